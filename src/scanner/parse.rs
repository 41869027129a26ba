//! Grepable Output Parsing
//!
//! Parses nmap's machine-readable grepable format (`-oG -`) into normalized
//! port findings. The format is line-oriented:
//!
//! ```text
//! # Nmap 7.94 scan initiated Fri Aug  1 12:00:00 2025 as: nmap -sV -oG - 192.168.1.50
//! Host: 192.168.1.50 ()  Status: Up
//! Host: 192.168.1.50 ()  Ports: 22/open/tcp//ssh//OpenSSH 8.9p1 (protocol 2.0)/
//! # Nmap done at Fri Aug  1 12:00:05 2025 -- 1 IP address (1 host up) scanned in 5.02 seconds
//! ```
//!
//! Each port entry carries seven slash-separated fields:
//! port / state / protocol / owner / service / rpc info / version.
//! A zero-exit run whose output does not look like this is a tool-contract
//! violation and is raised as `MalformedOutput`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use log::debug;
use regex::Regex;

use super::error::{ScanError, ScanResult};
use super::types::{PortFinding, PortState, Protocol, ScanReport};

/// Timestamp format used in the tool's run-summary comment lines
const RUN_SUMMARY_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Parse complete grepable output into a scan report.
pub fn parse_grepable(output: &str) -> ScanResult<ScanReport> {
    if !output.lines().any(|l| l.starts_with("# Nmap")) {
        return Err(ScanError::MalformedOutput(
            "output missing grepable run header".to_string(),
        ));
    }

    let host_re =
        Regex::new(r"^Host:\s+(\S+)\s+\(([^)]*)\)\s*(.*)$").expect("host line regex is valid");

    let mut findings = Vec::new();
    let mut started_at = None;
    let mut finished_at = None;

    for line in output.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("# Nmap ") {
            if let Some(idx) = rest.find("scan initiated ") {
                let tail = &rest[idx + "scan initiated ".len()..];
                let stamp = tail.split(" as:").next().unwrap_or(tail);
                started_at = parse_run_timestamp(stamp);
            } else if let Some(tail) = rest.strip_prefix("done at ") {
                let stamp = tail.split(" -- ").next().unwrap_or(tail);
                finished_at = parse_run_timestamp(stamp);
            }
            continue;
        }

        if let Some(caps) = host_re.captures(line) {
            let remainder = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            for field in remainder.split('\t') {
                if let Some(ports) = field.trim().strip_prefix("Ports: ") {
                    parse_ports_field(ports, &mut findings)?;
                }
            }
        }
    }

    debug!(
        "parsed {} port findings from grepable output",
        findings.len()
    );
    Ok(ScanReport {
        findings,
        started_at,
        finished_at,
    })
}

/// Parse the comma-separated entry list of one `Ports:` field.
fn parse_ports_field(ports: &str, findings: &mut Vec<PortFinding>) -> ScanResult<()> {
    for entry in split_port_entries(ports) {
        findings.push(parse_port_entry(entry.trim())?);
    }
    Ok(())
}

/// Split a Ports field on entry boundaries. The version field can itself
/// contain commas, so a chunk that does not start with a port number is
/// rejoined with its predecessor.
fn split_port_entries(ports: &str) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for chunk in ports.split(',') {
        let trimmed = chunk.trim_start();
        let looks_like_entry = trimmed
            .split('/')
            .next()
            .map(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        match entries.last_mut() {
            Some(last) if !looks_like_entry => {
                last.push(',');
                last.push_str(chunk);
            }
            _ => entries.push(chunk.to_string()),
        }
    }
    entries.retain(|e| !e.trim().is_empty());
    entries
}

/// Parse one seven-field port entry.
fn parse_port_entry(entry: &str) -> ScanResult<PortFinding> {
    let fields: Vec<&str> = entry.split('/').collect();
    if fields.len() < 7 {
        return Err(ScanError::MalformedOutput(format!(
            "port entry has {} fields, expected 7: {:?}",
            fields.len(),
            entry
        )));
    }

    let port: u16 = fields[0]
        .trim()
        .parse()
        .map_err(|_| ScanError::MalformedOutput(format!("invalid port number: {:?}", fields[0])))?;
    let state = PortState::parse(fields[1]);
    let protocol: Protocol = fields[2].parse().map_err(ScanError::MalformedOutput)?;
    let service_name = non_empty(fields[4]);
    let (service_product, service_version, service_extrainfo) = split_version_field(fields[6]);

    Ok(PortFinding {
        port,
        protocol,
        state,
        service_name,
        service_product,
        service_version,
        service_extrainfo,
    })
}

/// Split the combined version field into product, version, and extra info.
/// The field reads like "OpenSSH 8.9p1 Ubuntu (Ubuntu Linux; protocol 2.0)":
/// a trailing parenthesized segment is extra info, the first digit-leading
/// token starts the version, and everything before it is the product name.
fn split_version_field(raw: &str) -> (Option<String>, Option<String>, Option<String>) {
    let mut text = raw.trim().to_string();
    if text.is_empty() {
        return (None, None, None);
    }

    let mut extrainfo = None;
    if text.ends_with(')') {
        if let Some(open) = text.rfind('(') {
            extrainfo = non_empty(&text[open + 1..text.len() - 1]);
            text.truncate(open);
        }
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    let version_start = tokens
        .iter()
        .position(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit()));

    match version_start {
        Some(idx) => (
            non_empty(&tokens[..idx].join(" ")),
            non_empty(&tokens[idx..].join(" ")),
            extrainfo,
        ),
        None => (non_empty(&tokens.join(" ")), None, extrainfo),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a run-summary timestamp ("Fri Aug  1 12:00:05 2025"), interpreting
/// it in the local timezone the tool printed it in.
fn parse_run_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(stamp.trim(), RUN_SUMMARY_TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

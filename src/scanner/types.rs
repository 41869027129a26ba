//! Scan Result Types
//!
//! Normalized representation of what the external scanning tool reports:
//! per-port findings plus run-level metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport protocol of a scanned port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(format!("unknown protocol: {}", s)),
        }
    }
}

/// Observed state of a scanned port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unknown,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
            PortState::Unknown => write!(f, "unknown"),
        }
    }
}

impl PortState {
    /// Parse a tool-reported state string. States the tool reports that we do
    /// not model (e.g. "open|filtered") map to `Unknown` rather than failing
    /// the whole parse.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            "filtered" => PortState::Filtered,
            _ => PortState::Unknown,
        }
    }
}

/// One discovered port/service fact from a scan execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFinding {
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service_name: Option<String>,
    pub service_product: Option<String>,
    pub service_version: Option<String>,
    pub service_extrainfo: Option<String>,
}

impl PortFinding {
    /// Bare finding with no service metadata
    pub fn new(port: u16, protocol: Protocol, state: PortState) -> Self {
        Self {
            port,
            protocol,
            state,
            service_name: None,
            service_product: None,
            service_version: None,
            service_extrainfo: None,
        }
    }

    /// Human-readable service line, e.g. `ssh (OpenSSH 8.9p1)`.
    pub fn service_description(&self) -> String {
        let name = self.service_name.as_deref().unwrap_or("unknown");
        let detail: Vec<&str> = [
            self.service_product.as_deref(),
            self.service_version.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if detail.is_empty() {
            name.to_string()
        } else {
            format!("{} ({})", name, detail.join(" "))
        }
    }
}

/// Normalized result of one successful tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Flattened port findings across all hosts in the tool's output
    pub findings: Vec<PortFinding>,

    /// Run start per the tool's run summary, if present
    pub started_at: Option<DateTime<Utc>>,

    /// Run end per the tool's run summary, if present
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanReport {
    pub fn open_port_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.state == PortState::Open)
            .count()
    }
}

/// Outcome of one scan execution. Failures here are normal, recorded scan
/// outcomes (non-zero exit, timeout), as opposed to raised `ScanError`s.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Report(ScanReport),
    Failed { message: String },
}

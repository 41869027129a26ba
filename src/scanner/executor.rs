//! Scan Execution
//!
//! Invokes the external scanning tool against one target address under a
//! bounded timeout and classifies the result. The `PortScanner` trait is the
//! seam the runner depends on; `NmapScanner` is the production
//! implementation.
//!
//! Outcome classification:
//! - well-formed output        → `ScanOutcome::Report`
//! - non-zero exit             → `ScanOutcome::Failed` (diagnostic stream)
//! - timeout                   → `ScanOutcome::Failed` (names the timeout)
//! - zero exit, unparsable     → raised `MalformedOutput`
//! - tool missing / bad target → raised `ToolUnavailable` / `InvalidTarget`

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;

use super::error::{ScanError, ScanResult};
use super::parse::parse_grepable;
use super::tool;
use super::types::ScanOutcome;

/// Default scan timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default version-probe timeout in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Scanner invocation settings
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    /// Explicit tool path override (highest-priority resolution candidate)
    pub tool_path: Option<PathBuf>,

    /// Wall-clock budget for one scan invocation
    pub timeout: Duration,

    /// Budget for each tool-candidate version probe
    pub probe_timeout: Duration,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            tool_path: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

/// Executes one scan against one target
#[async_trait]
pub trait PortScanner: Send + Sync {
    async fn scan(&self, target: &str, timeout: Duration) -> ScanResult<ScanOutcome>;
}

/// Production scanner backed by the nmap binary
pub struct NmapScanner {
    settings: ScannerSettings,
}

impl NmapScanner {
    pub fn new(settings: ScannerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PortScanner for NmapScanner {
    async fn scan(&self, target: &str, timeout: Duration) -> ScanResult<ScanOutcome> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ScanError::InvalidTarget(
                "target address is empty".to_string(),
            ));
        }

        let tool_path = tool::resolve(
            self.settings.tool_path.as_deref(),
            self.settings.probe_timeout,
        )
        .await?;

        // Top-1000 common ports, service/version detection, aggressive
        // timing, grepable output on stdout.
        let mut command = Command::new(&tool_path);
        command
            .arg("-sV")
            .arg("--top-ports")
            .arg("1000")
            .arg("-T4")
            .arg("-oG")
            .arg("-")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "scanning {} with {} (timeout {}s)",
            target,
            tool_path.display(),
            timeout.as_secs()
        );

        let child = command.spawn()?;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // Dropping the wait future kills the child (kill_on_drop).
                warn!("scan of {} timed out after {}s", target, timeout.as_secs());
                return Ok(ScanOutcome::Failed {
                    message: format!("Scan timeout after {} seconds", timeout.as_secs()),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "scanner exited with status {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            debug!("scan of {} failed: {}", target, message);
            return Ok(ScanOutcome::Failed { message });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_grepable(&stdout)?;
        info!(
            "scan of {} found {} open ports",
            target,
            report.open_port_count()
        );
        Ok(ScanOutcome::Report(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::{PortState, Protocol};

    #[cfg(unix)]
    fn write_fake_tool(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-nmap");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    fn settings_for(tool: PathBuf) -> ScannerSettings {
        ScannerSettings {
            tool_path: Some(tool),
            timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_empty_target_is_invalid() {
        let scanner = NmapScanner::new(ScannerSettings {
            tool_path: Some(PathBuf::from("/nonexistent")),
            ..Default::default()
        });
        let err = scanner
            .scan("   ", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidTarget(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_scan_parses_ports() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(
            dir.path(),
            r#"cat <<'EOF'
# Nmap 7.94 scan initiated Fri Aug  1 12:00:00 2025 as: nmap -sV -oG - 192.168.1.50
Host: 192.168.1.50 ()	Ports: 22/open/tcp//ssh//OpenSSH 8.9p1/, 80/open/tcp//http//nginx 1.18.0/
# Nmap done at Fri Aug  1 12:00:05 2025 -- 1 IP address (1 host up) scanned in 5.02 seconds
EOF"#,
        );
        let scanner = NmapScanner::new(settings_for(tool));
        let outcome = scanner
            .scan("192.168.1.50", Duration::from_secs(5))
            .await
            .unwrap();
        match outcome {
            ScanOutcome::Report(report) => {
                assert_eq!(report.findings.len(), 2);
                assert_eq!(report.findings[0].port, 22);
                assert_eq!(report.findings[0].protocol, Protocol::Tcp);
                assert_eq!(report.findings[0].state, PortState::Open);
            }
            other => panic!("expected report, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_a_structured_failure() {
        let dir = tempfile::tempdir().unwrap();
        // The probe (--version) must return promptly; only the scan hangs.
        let tool = write_fake_tool(
            dir.path(),
            r#"if [ "$1" = "--version" ]; then exit 0; fi
sleep 30"#,
        );
        let scanner = NmapScanner::new(settings_for(tool));
        let outcome = scanner
            .scan("192.168.1.50", Duration::from_secs(1))
            .await
            .unwrap();
        match outcome {
            ScanOutcome::Failed { message } => {
                assert_eq!(message, "Scan timeout after 1 seconds");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_a_structured_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(
            dir.path(),
            r#"if [ "$1" = "--version" ]; then exit 0; fi
echo "route to host lost" >&2
exit 1"#,
        );
        let scanner = NmapScanner::new(settings_for(tool));
        let outcome = scanner
            .scan("192.168.1.50", Duration::from_secs(5))
            .await
            .unwrap();
        match outcome {
            ScanOutcome::Failed { message } => assert_eq!(message, "route to host lost"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbage_output_raises_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(
            dir.path(),
            r#"if [ "$1" = "--version" ]; then exit 0; fi
echo "segfault dump""#,
        );
        let scanner = NmapScanner::new(settings_for(tool));
        let err = scanner
            .scan("192.168.1.50", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::MalformedOutput(_)));
    }
}

//! Scanning Tool Discovery
//!
//! Locates the nmap executable. Resolution order: explicit configuration
//! override, the `PORTWATCH_NMAP` environment variable, a fixed list of
//! common install locations, and finally the bare command name (resolved via
//! `PATH`). Each candidate is validated with a short `--version` probe before
//! being accepted, so a stale configured path fails over to the next
//! candidate instead of failing the scan outright.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::process::Command;

use super::error::{ScanError, ScanResult};

/// Environment variable holding an explicit tool path override
pub const TOOL_ENV_VAR: &str = "PORTWATCH_NMAP";

/// Common install locations checked after the explicit overrides
const COMMON_LOCATIONS: &[&str] = &[
    "/usr/bin/nmap",
    "/usr/local/bin/nmap",
    "/opt/homebrew/bin/nmap",
    "/opt/local/bin/nmap",
    "/usr/sbin/nmap",
];

/// Bare command name, tried last so `PATH` resolution still works on hosts
/// with unusual layouts
const TOOL_NAME: &str = "nmap";

/// Build the ordered candidate list for tool resolution
fn candidates(override_path: Option<&Path>) -> Vec<PathBuf> {
    let mut list = Vec::new();
    if let Some(path) = override_path {
        list.push(path.to_path_buf());
    }
    if let Ok(env_path) = std::env::var(TOOL_ENV_VAR) {
        if !env_path.trim().is_empty() {
            list.push(PathBuf::from(env_path));
        }
    }
    list.extend(COMMON_LOCATIONS.iter().map(PathBuf::from));
    list.push(PathBuf::from(TOOL_NAME));
    list
}

/// Probe a candidate with `--version` under a short timeout.
/// Returns true only if the process starts and exits successfully.
async fn probe(candidate: &Path, timeout: Duration) -> bool {
    let child = Command::new(candidate)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            debug!(
                "tool candidate {} failed to spawn: {}",
                candidate.display(),
                e
            );
            return false;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!("tool candidate {} wait error: {}", candidate.display(), e);
            false
        }
        Err(_) => {
            warn!(
                "tool candidate {} did not answer version probe within {:?}",
                candidate.display(),
                timeout
            );
            false
        }
    }
}

/// Resolve the scanning tool executable, or raise `ToolUnavailable` if no
/// candidate answers the version probe.
pub async fn resolve(override_path: Option<&Path>, probe_timeout: Duration) -> ScanResult<PathBuf> {
    for candidate in candidates(override_path) {
        if probe(&candidate, probe_timeout).await {
            debug!("resolved scanning tool: {}", candidate.display());
            return Ok(candidate);
        }
    }
    Err(ScanError::ToolUnavailable(format!(
        "no {} executable found (checked override, ${}, common locations, and PATH)",
        TOOL_NAME, TOOL_ENV_VAR
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_ordering() {
        let list = candidates(Some(Path::new("/custom/nmap")));
        assert_eq!(list[0], PathBuf::from("/custom/nmap"));
        // Bare name is always the final fallback
        assert_eq!(list.last().unwrap(), &PathBuf::from(TOOL_NAME));
        assert!(list.iter().any(|p| p == Path::new("/usr/bin/nmap")));
    }

    #[test]
    fn test_candidates_without_override() {
        let list = candidates(None);
        assert!(!list.is_empty());
        assert_eq!(list.last().unwrap(), &PathBuf::from(TOOL_NAME));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_accepts_working_executable() {
        // `echo` exits zero regardless of arguments, which is all the probe
        // checks.
        let ok = probe(Path::new("/bin/echo"), Duration::from_secs(5)).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_probe_rejects_missing_executable() {
        let ok = probe(
            Path::new("/nonexistent/portwatch-tool"),
            Duration::from_secs(1),
        )
        .await;
        assert!(!ok);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_with_override() {
        let path = resolve(Some(Path::new("/bin/echo")), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/bin/echo"));
    }
}

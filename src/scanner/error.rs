//! Scanner Error Types
//!
//! The raised scan-semantic error taxonomy. Timeouts and non-zero tool exits
//! are *not* errors here — they are structured `ScanOutcome::Failed` values.
//! Everything in this enum indicates a broken environment or a tool-contract
//! violation and is raised to the runner, which converts it into a failed
//! scan record.

use thiserror::Error;

/// Result type for scanner operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors raised by scan execution
#[derive(Debug, Error)]
pub enum ScanError {
    /// No scanning tool candidate responded to a version probe
    #[error("scanning tool unavailable: {0}")]
    ToolUnavailable(String),

    /// The scan target address is missing or unusable
    #[error("invalid scan target: {0}")]
    InvalidTarget(String),

    /// The tool exited cleanly but its output could not be parsed
    #[error("malformed scanner output: {0}")]
    MalformedOutput(String),

    /// Failed to spawn or communicate with the tool process
    #[error("scanner process error: {0}")]
    Process(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ScanError::ToolUnavailable("no candidates".to_string());
        assert!(err.to_string().contains("unavailable"));

        let err = ScanError::InvalidTarget("empty target".to_string());
        assert!(err.to_string().contains("invalid scan target"));

        let err = ScanError::MalformedOutput("missing header".to_string());
        assert!(err.to_string().contains("malformed"));
    }
}

//! Queue Error Types

use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors from the scan dispatcher
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("scan queue is shut down")]
    Closed,

    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(QueueError::Closed.to_string(), "scan queue is shut down");
        assert!(QueueError::InvalidConfig("workers must be > 0".to_string())
            .to_string()
            .contains("workers"));
    }
}

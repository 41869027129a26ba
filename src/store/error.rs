//! Store Error Types
//!
//! Persistence failures are infrastructure-level: the runner lets them
//! propagate to the dispatcher's retry machinery instead of converting them
//! into scan outcomes.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the scan store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scan record {0} not found")]
    RecordNotFound(i64),

    #[error("device {0} not found")]
    DeviceNotFound(String),
}

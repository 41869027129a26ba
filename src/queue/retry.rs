//! Retry Policy
//!
//! Exponential backoff for transient task failures. Only infrastructure
//! errors reach the retry path; scan-level failures are recorded in the
//! store and never retried here.

use std::time::Duration;

use super::error::{QueueError, QueueResult};

/// Default retry ceiling per task
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default first-retry delay in milliseconds
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Default delay ceiling in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default delay growth factor
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Validate policy parameters.
    pub fn validate(&self) -> QueueResult<()> {
        if self.initial_delay_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "initial retry delay must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(QueueError::InvalidConfig(
                "max retry delay must be at least the initial delay".to_string(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(QueueError::InvalidConfig(
                "retry multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (zero-based), capped at the
    /// configured ceiling.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

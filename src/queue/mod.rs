//! Two-lane asynchronous scan queue with bounded concurrency and retry.

pub mod dispatcher;
pub mod error;
pub mod retry;

pub use dispatcher::{
    Dispatcher, DispatcherConfig, Lane, ScanQueue, ScanTask, TaskProcessor, DEFAULT_WORKERS,
};
pub use error::{QueueError, QueueResult};
pub use retry::RetryPolicy;

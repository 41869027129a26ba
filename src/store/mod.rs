//! Persistent scan database: device registry, scan records, port results.

pub mod error;
pub mod schema;
#[allow(clippy::module_inception)]
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{Device, ScanRecord, ScanStatus, ScanStore};

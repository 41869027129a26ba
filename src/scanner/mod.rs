//! Scan Executor
//!
//! Everything involved in running the external scanning tool: locating the
//! binary, invoking it against a target under a timeout, and parsing its
//! grepable output into normalized port findings. Persistence and admission
//! live elsewhere; this module's only side effect is spawning one process
//! per scan.

pub mod error;
pub mod executor;
pub mod parse;
pub mod tool;
pub mod types;

pub use error::{ScanError, ScanResult};
pub use executor::{
    NmapScanner, PortScanner, ScannerSettings, DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS,
};
pub use types::{PortFinding, PortState, Protocol, ScanOutcome, ScanReport};

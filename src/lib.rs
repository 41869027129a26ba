//! Background network-scan orchestration for LAN devices.
//!
//! `portwatch` keeps a registry of devices, admits port scans through a gate
//! that guarantees at most one active scan per device, runs nmap under a
//! bounded timeout, and records every attempt and its discovered ports in
//! SQLite. Scans are dispatched over two lanes: a parallel lane for rescans
//! and a strictly sequential lane reserved for a device's first scan.

pub mod cli;
pub mod config;
pub mod gate;
pub mod logging;
pub mod queue;
pub mod runner;
pub mod scanner;
pub mod scheduler;
pub mod store;

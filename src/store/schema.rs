//! Database Schema
//!
//! Three tables: the device registry, scan records (one row per attempt
//! lifecycle), and scan results (port findings owned by exactly one record).
//! Result rows cascade-delete with their record; the overwrite-on-rerun purge
//! is an explicit delete inside `commit_success`.

use rusqlite::Connection;

use super::error::StoreResult;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS devices (
    mac         TEXT PRIMARY KEY,
    ip          TEXT NOT NULL,
    name        TEXT,
    online      INTEGER NOT NULL DEFAULT 0,
    first_seen  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_records (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    device_mac     TEXT NOT NULL REFERENCES devices(mac),
    target_ip      TEXT NOT NULL,
    status         TEXT NOT NULL,
    started_at     INTEGER NOT NULL,
    completed_at   INTEGER,
    error_message  TEXT
);

CREATE INDEX IF NOT EXISTS idx_scan_records_device
    ON scan_records(device_mac, started_at);

CREATE INDEX IF NOT EXISTS idx_scan_records_status
    ON scan_records(device_mac, status);

CREATE TABLE IF NOT EXISTS scan_results (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id          INTEGER NOT NULL
                       REFERENCES scan_records(id) ON DELETE CASCADE,
    port               INTEGER NOT NULL,
    protocol           TEXT NOT NULL,
    state              TEXT NOT NULL,
    service_name       TEXT,
    service_product    TEXT,
    service_version    TEXT,
    service_extrainfo  TEXT
);

CREATE INDEX IF NOT EXISTS idx_scan_results_record
    ON scan_results(record_id);
";

/// Create all tables and indexes if they do not exist.
pub fn initialize(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

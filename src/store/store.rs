//! Scan Store
//!
//! Durable record of devices, scan attempts, and their discovered ports,
//! backed by SQLite. Every public operation opens a fresh connection and runs
//! inside its own transaction, so the claim/execute/commit phases of a scan
//! are independent transactional boundaries: a crash between phases leaves a
//! re-queryable record, never a torn write.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{StoreError, StoreResult};
use super::schema;
use crate::scanner::types::{PortFinding, PortState, Protocol};

/// Lifecycle status of a scan record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::InProgress => "in_progress",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "in_progress" => Some(ScanStatus::InProgress),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    /// Pending and in-progress records block new admissions for the device.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Pending | ScanStatus::InProgress)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A network device known to the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub mac: String,
    pub ip: String,
    pub name: Option<String>,
    pub online: bool,
    pub first_seen: DateTime<Utc>,
}

/// One scan attempt's durable lifecycle row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub device_mac: String,
    pub target_ip: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Persistent scan database
#[derive(Debug, Clone)]
pub struct ScanStore {
    path: PathBuf,
}

impl ScanStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        let conn = store.connect()?;
        schema::initialize(&conn)?;
        debug!("scan database ready at {}", path.display());
        Ok(store)
    }

    /// One connection per operation; foreign keys are per-connection in
    /// SQLite so the pragma must be set on every open.
    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    // --- device registry ---

    /// Insert or update a device. `first_seen` is preserved on update; a
    /// `None` name never clobbers an existing one.
    pub fn upsert_device(
        &self,
        mac: &str,
        ip: &str,
        name: Option<&str>,
        online: bool,
    ) -> StoreResult<Device> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO devices (mac, ip, name, online, first_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(mac) DO UPDATE SET
                ip = ?2,
                name = COALESCE(?3, name),
                online = ?4",
            params![mac, ip, name, online as i64, Utc::now().timestamp()],
        )?;
        self.get_device(mac)?
            .ok_or_else(|| StoreError::DeviceNotFound(mac.to_string()))
    }

    /// Flip a device's online flag.
    pub fn set_device_online(&self, mac: &str, online: bool) -> StoreResult<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE devices SET online = ?1 WHERE mac = ?2",
            params![online as i64, mac],
        )?;
        if updated == 0 {
            return Err(StoreError::DeviceNotFound(mac.to_string()));
        }
        Ok(())
    }

    pub fn get_device(&self, mac: &str) -> StoreResult<Option<Device>> {
        let conn = self.connect()?;
        let device = conn
            .query_row(
                "SELECT mac, ip, name, online, first_seen FROM devices WHERE mac = ?1",
                params![mac],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    pub fn list_devices(&self) -> StoreResult<Vec<Device>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT mac, ip, name, online, first_seen FROM devices ORDER BY mac")?;
        let rows = stmt.query_map([], device_from_row)?;
        collect(rows)
    }

    /// Devices currently flagged online (the periodic rescan sweep set).
    pub fn online_devices(&self) -> StoreResult<Vec<Device>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT mac, ip, name, online, first_seen FROM devices WHERE online = 1 ORDER BY mac",
        )?;
        let rows = stmt.query_map([], device_from_row)?;
        collect(rows)
    }

    // --- scan record lifecycle ---

    /// Create a new pending record for a device.
    pub fn create_pending(&self, mac: &str, target_ip: &str) -> StoreResult<ScanRecord> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO scan_records (device_mac, target_ip, status, started_at)
             VALUES (?1, ?2, 'pending', ?3)",
            params![mac, target_ip, Utc::now().timestamp()],
        )?;
        let id = conn.last_insert_rowid();
        self.get_record(id)?.ok_or(StoreError::RecordNotFound(id))
    }

    pub fn get_record(&self, id: i64) -> StoreResult<Option<ScanRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT id, device_mac, target_ip, status, started_at, completed_at, \
                 error_message FROM scan_records WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// The device's record in {pending, in_progress}, if any. The
    /// single-active-record invariant means there is at most one.
    pub fn active_record(&self, mac: &str) -> StoreResult<Option<ScanRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT id, device_mac, target_ip, status, started_at, completed_at, \
                 error_message FROM scan_records \
                 WHERE device_mac = ?1 AND status IN ('pending', 'in_progress') \
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![mac],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Whether the device has any record at all, of any status.
    pub fn has_any_record(&self, mac: &str) -> StoreResult<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scan_records WHERE device_mac = ?1",
            params![mac],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Claim a pending record for execution: pending → in_progress with a
    /// fresh start stamp. The status guard makes the claim atomic — under
    /// duplicate delivery exactly one caller sees `true`.
    pub fn begin_attempt(&self, id: i64) -> StoreResult<bool> {
        let conn = self.connect()?;
        let claimed = conn.execute(
            "UPDATE scan_records SET status = 'in_progress', started_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
            params![Utc::now().timestamp(), id],
        )?;
        Ok(claimed == 1)
    }

    /// Record a successful scan: purge the record's previous result rows,
    /// insert the new findings, and mark the record completed — atomically.
    pub fn commit_success(&self, id: i64, findings: &[PortFinding]) -> StoreResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM scan_results WHERE record_id = ?1",
            params![id],
        )?;
        for finding in findings {
            tx.execute(
                "INSERT INTO scan_results (record_id, port, protocol, state, service_name, \
                 service_product, service_version, service_extrainfo) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    finding.port as i64,
                    finding.protocol.to_string(),
                    finding.state.to_string(),
                    finding.service_name,
                    finding.service_product,
                    finding.service_version,
                    finding.service_extrainfo,
                ],
            )?;
        }
        let updated = tx.execute(
            "UPDATE scan_records SET status = 'completed', completed_at = ?1, \
             error_message = NULL WHERE id = ?2",
            params![Utc::now().timestamp(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::RecordNotFound(id));
        }

        tx.commit()?;
        debug!("record {} completed with {} results", id, findings.len());
        Ok(())
    }

    /// Record a failed scan. Previously stored result rows are left in place:
    /// a failed rerun does not erase the last successful result set.
    pub fn commit_failure(&self, id: i64, message: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE scan_records SET status = 'failed', completed_at = ?1, \
             error_message = ?2 WHERE id = ?3",
            params![Utc::now().timestamp(), message, id],
        )?;
        if updated == 0 {
            return Err(StoreError::RecordNotFound(id));
        }
        debug!("record {} failed: {}", id, message);
        Ok(())
    }

    // --- queries ---

    /// Scan history for a device, most recent first.
    pub fn history(&self, mac: &str, limit: Option<usize>) -> StoreResult<Vec<ScanRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, device_mac, target_ip, status, started_at, completed_at, \
             error_message FROM scan_records WHERE device_mac = ?1 \
             ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![mac, limit], record_from_row)?;
        collect(rows)
    }

    /// Result rows for one record, ordered by port.
    pub fn results_for(&self, record_id: i64) -> StoreResult<Vec<PortFinding>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT port, protocol, state, service_name, service_product, \
             service_version, service_extrainfo FROM scan_results \
             WHERE record_id = ?1 ORDER BY port",
        )?;
        let rows = stmt.query_map(params![record_id], finding_from_row)?;
        collect(rows)
    }
}

// --- row mapping helpers ---

fn collect<T>(
    rows: impl Iterator<Item = Result<T, rusqlite::Error>>,
) -> StoreResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn timestamp_from_secs(index: usize, secs: i64) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| conversion_error(index, format!("timestamp out of range: {}", secs)))
}

fn device_from_row(row: &rusqlite::Row<'_>) -> Result<Device, rusqlite::Error> {
    Ok(Device {
        mac: row.get(0)?,
        ip: row.get(1)?,
        name: row.get(2)?,
        online: row.get::<_, i64>(3)? != 0,
        first_seen: timestamp_from_secs(4, row.get(4)?)?,
    })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> Result<ScanRecord, rusqlite::Error> {
    let status_text: String = row.get(3)?;
    let status = ScanStatus::parse(&status_text)
        .ok_or_else(|| conversion_error(3, format!("unknown scan status: {}", status_text)))?;
    let completed_at = match row.get::<_, Option<i64>>(5)? {
        Some(secs) => Some(timestamp_from_secs(5, secs)?),
        None => None,
    };
    Ok(ScanRecord {
        id: row.get(0)?,
        device_mac: row.get(1)?,
        target_ip: row.get(2)?,
        status,
        started_at: timestamp_from_secs(4, row.get(4)?)?,
        completed_at,
        error_message: row.get(6)?,
    })
}

fn finding_from_row(row: &rusqlite::Row<'_>) -> Result<PortFinding, rusqlite::Error> {
    let port_i64: i64 = row.get(0)?;
    let port = u16::try_from(port_i64)
        .map_err(|_| conversion_error(0, format!("port out of range: {}", port_i64)))?;
    let protocol_text: String = row.get(1)?;
    let protocol: Protocol = protocol_text
        .parse()
        .map_err(|e: String| conversion_error(1, e))?;
    let state_text: String = row.get(2)?;
    Ok(PortFinding {
        port,
        protocol,
        state: PortState::parse(&state_text),
        service_name: row.get(3)?,
        service_product: row.get(4)?,
        service_version: row.get(5)?,
        service_extrainfo: row.get(6)?,
    })
}

//! Admission Gate
//!
//! Decides whether a scan may start for a device, creates the pending
//! record, and hands the work to the queue. Two paths exist: rescan
//! admission (parallel lane, any previously scanned device) and first-time
//! admission (sequential lane, available exactly once per device, ever).
//!
//! The check-then-insert here is best-effort under concurrent callers; the
//! runner's claim step closes the remaining race.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::queue::{Lane, QueueError, ScanQueue, ScanTask};
use crate::store::{ScanStore, StoreError};

/// Errors from admission itself, as opposed to a refused admission
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Outcome of an admission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A pending record was created and the task enqueued
    Admitted { record_id: i64 },
    /// The device is offline; nothing to scan
    DeviceOffline,
    /// The device already has a pending or in-progress scan
    ScanActive,
    /// The device has scan history; the first-time path is closed to it
    AlreadyScanned,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Admitted { record_id } => write!(f, "admitted (record {})", record_id),
            Admission::DeviceOffline => write!(f, "not admitted: device is offline"),
            Admission::ScanActive => write!(f, "not admitted: a scan is already active"),
            Admission::AlreadyScanned => {
                write!(f, "not admitted: device already has scan history")
            }
        }
    }
}

/// Gatekeeper between callers and the scan queue
pub struct AdmissionGate {
    store: ScanStore,
    queue: Arc<dyn ScanQueue>,
}

impl AdmissionGate {
    pub fn new(store: ScanStore, queue: Arc<dyn ScanQueue>) -> Self {
        Self { store, queue }
    }

    /// Admit a rescan of a known device onto the parallel lane.
    pub fn admit_rescan(&self, mac: &str) -> Result<Admission, GateError> {
        let device = self
            .store
            .get_device(mac)?
            .ok_or_else(|| StoreError::DeviceNotFound(mac.to_string()))?;

        if !device.online {
            debug!("rescan of {} refused: offline", mac);
            return Ok(Admission::DeviceOffline);
        }
        if self.store.active_record(mac)?.is_some() {
            debug!("rescan of {} refused: scan already active", mac);
            return Ok(Admission::ScanActive);
        }

        let record = self.store.create_pending(mac, &device.ip)?;
        self.queue
            .enqueue(Lane::Rescan, ScanTask::new(mac, record.id))?;
        info!("rescan of {} admitted as record {}", mac, record.id);
        Ok(Admission::Admitted {
            record_id: record.id,
        })
    }

    /// Admit a newly discovered device's one-time first scan onto the
    /// sequential lane. Any scan history at all, active or terminal,
    /// closes this path permanently.
    pub fn admit_new_device(&self, mac: &str) -> Result<Admission, GateError> {
        let device = self
            .store
            .get_device(mac)?
            .ok_or_else(|| StoreError::DeviceNotFound(mac.to_string()))?;

        if self.store.has_any_record(mac)? {
            debug!("first-time scan of {} refused: history exists", mac);
            return Ok(Admission::AlreadyScanned);
        }

        let record = self.store.create_pending(mac, &device.ip)?;
        self.queue
            .enqueue(Lane::FirstTime, ScanTask::new(mac, record.id))?;
        info!("first-time scan of {} admitted as record {}", mac, record.id);
        Ok(Admission::Admitted {
            record_id: record.id,
        })
    }
}

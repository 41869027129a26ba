//! Rescan Scheduler
//!
//! Periodic sweep that offers every online device to the admission gate.
//! Devices with an active scan are refused by the gate, so overlapping
//! sweeps never double-scan a device.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::gate::AdmissionGate;
use crate::store::ScanStore;

/// Handle to the running sweep loop
pub struct Scheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the sweep loop. The first sweep runs immediately, then every
    /// `interval`.
    pub fn start(store: ScanStore, gate: Arc<AdmissionGate>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "rescan scheduler started, sweeping every {}s",
                interval.as_secs()
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => sweep(&store, &gate),
                }
            }
            debug!("rescan scheduler stopped");
        });
        Self { cancel, handle }
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            error!("scheduler task panicked: {}", err);
        }
    }
}

fn sweep(store: &ScanStore, gate: &AdmissionGate) {
    let devices = match store.online_devices() {
        Ok(devices) => devices,
        Err(err) => {
            warn!("rescan sweep could not list devices: {}", err);
            return;
        }
    };
    debug!("rescan sweep over {} online devices", devices.len());
    for device in devices {
        match gate.admit_rescan(&device.mac) {
            Ok(admission) => debug!("sweep {}: {}", device.mac, admission),
            Err(err) => warn!("sweep admission for {} failed: {}", device.mac, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Lane, QueueResult, ScanQueue, ScanTask};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingQueue {
        enqueued: Mutex<Vec<(Lane, ScanTask)>>,
    }

    impl ScanQueue for RecordingQueue {
        fn enqueue(&self, lane: Lane, task: ScanTask) -> QueueResult<()> {
            self.enqueued.lock().unwrap().push((lane, task));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweep_admits_only_online_devices() {
        let dir = TempDir::new().unwrap();
        let store = ScanStore::open(&dir.path().join("portwatch.db")).unwrap();
        store
            .upsert_device("AA:AA:AA:AA:AA:01", "192.168.1.10", None, true)
            .unwrap();
        store
            .upsert_device("AA:AA:AA:AA:AA:02", "192.168.1.11", None, false)
            .unwrap();

        let queue = Arc::new(RecordingQueue::default());
        let gate = Arc::new(AdmissionGate::new(store.clone(), queue.clone()));

        let scheduler = Scheduler::start(store.clone(), gate, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;

        let enqueued = queue.enqueued.lock().unwrap();
        // Multiple ticks ran, but the pending record blocks re-admission
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].0, Lane::Rescan);
        assert_eq!(enqueued[0].1.device_mac, "AA:AA:AA:AA:AA:01");
        assert!(!store.has_any_record("AA:AA:AA:AA:AA:02").unwrap());
    }

    #[tokio::test]
    async fn test_stop_halts_sweeping() {
        let dir = TempDir::new().unwrap();
        let store = ScanStore::open(&dir.path().join("portwatch.db")).unwrap();
        let queue = Arc::new(RecordingQueue::default());
        let gate = Arc::new(AdmissionGate::new(store.clone(), queue.clone()));

        let scheduler = Scheduler::start(store.clone(), gate, Duration::from_millis(5));
        scheduler.stop().await;

        store
            .upsert_device("AA:AA:AA:AA:AA:01", "192.168.1.10", None, true)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(queue.enqueued.lock().unwrap().is_empty());
    }
}

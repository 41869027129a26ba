//! End-to-End Integration Tests
//!
//! Exercises the full pipeline: admission gate → dispatcher → scan runner →
//! store, with a stub scanner standing in for the external tool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use portwatch::gate::{Admission, AdmissionGate};
use portwatch::queue::{Dispatcher, DispatcherConfig, RetryPolicy};
use portwatch::runner::ScanRunner;
use portwatch::scanner::{
    PortFinding, PortScanner, PortState, Protocol, ScanOutcome, ScanReport, ScanResult,
};
use portwatch::store::{ScanStatus, ScanStore};

const MAC: &str = "AA:BB:CC:DD:EE:FF";
const IP: &str = "192.168.1.50";

/// Scanner stub that replays scripted outcomes, optionally holding each
/// scan open until released.
struct ScriptedScanner {
    outcomes: Mutex<VecDeque<ScanOutcome>>,
    scans: AtomicUsize,
    entered: Notify,
    release: Notify,
    blocking: bool,
}

impl ScriptedScanner {
    fn new(outcomes: Vec<ScanOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            scans: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
            blocking: false,
        }
    }

    fn blocking(outcomes: Vec<ScanOutcome>) -> Self {
        let mut scanner = Self::new(outcomes);
        scanner.blocking = true;
        scanner
    }
}

#[async_trait]
impl PortScanner for ScriptedScanner {
    async fn scan(&self, _target: &str, _timeout: Duration) -> ScanResult<ScanOutcome> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.blocking {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScanOutcome::Failed {
                message: "scripted outcomes exhausted".to_string(),
            });
        Ok(outcome)
    }
}

fn report_with(ports: &[u16]) -> ScanOutcome {
    ScanOutcome::Report(ScanReport {
        findings: ports
            .iter()
            .map(|&port| {
                let mut finding = PortFinding::new(port, Protocol::Tcp, PortState::Open);
                finding.service_name = Some("ssh".to_string());
                finding
            })
            .collect(),
        started_at: None,
        finished_at: None,
    })
}

fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        workers: 2,
        retry: RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            multiplier: 2.0,
        },
    }
}

struct Pipeline {
    _dir: TempDir,
    store: ScanStore,
    dispatcher: Arc<Dispatcher>,
    gate: AdmissionGate,
}

fn pipeline_with(scanner: Arc<ScriptedScanner>) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let store = ScanStore::open(&dir.path().join("portwatch.db")).unwrap();
    store.upsert_device(MAC, IP, Some("nas"), true).unwrap();

    let runner = Arc::new(ScanRunner::new(
        store.clone(),
        scanner,
        Duration::from_secs(300),
    ));
    let dispatcher = Arc::new(Dispatcher::start(runner, fast_config()).unwrap());
    let gate = AdmissionGate::new(store.clone(), dispatcher.clone());
    Pipeline {
        _dir: dir,
        store,
        dispatcher,
        gate,
    }
}

#[tokio::test]
async fn test_first_time_scan_end_to_end() {
    let scanner = Arc::new(ScriptedScanner::new(vec![report_with(&[22, 80])]));
    let pipeline = pipeline_with(scanner.clone());

    let admission = pipeline.gate.admit_new_device(MAC).unwrap();
    let record_id = match admission {
        Admission::Admitted { record_id } => record_id,
        other => panic!("expected admission, got {:?}", other),
    };
    pipeline.dispatcher.idle().await;

    let record = pipeline.store.get_record(record_id).unwrap().unwrap();
    assert_eq!(record.status, ScanStatus::Completed);
    assert!(record.completed_at.is_some());
    assert!(record.error_message.is_none());

    let results = pipeline.store.results_for(record_id).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].port, 22);
    assert_eq!(results[1].port, 80);
    assert_eq!(scanner.scans.load(Ordering::SeqCst), 1);

    // The first-time path is now permanently closed for this device
    assert_eq!(
        pipeline.gate.admit_new_device(MAC).unwrap(),
        Admission::AlreadyScanned
    );
    pipeline.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_rescan_refused_while_scan_active() {
    let scanner = Arc::new(ScriptedScanner::blocking(vec![report_with(&[22])]));
    let pipeline = pipeline_with(scanner.clone());

    assert!(pipeline.gate.admit_rescan(MAC).unwrap().is_admitted());
    // Wait until the scan is actually in flight
    scanner.entered.notified().await;

    assert_eq!(
        pipeline.gate.admit_rescan(MAC).unwrap(),
        Admission::ScanActive
    );
    assert_eq!(pipeline.store.history(MAC, None).unwrap().len(), 1);

    scanner.release.notify_one();
    pipeline.dispatcher.idle().await;

    // With the record terminal, admission opens up again
    assert!(pipeline.gate.admit_rescan(MAC).unwrap().is_admitted());
    scanner.release.notify_one();
    pipeline.dispatcher.idle().await;
    pipeline.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_timeout_failure_is_recorded_and_rescannable() {
    let scanner = Arc::new(ScriptedScanner::new(vec![
        ScanOutcome::Failed {
            message: "Scan timeout after 300 seconds".to_string(),
        },
        report_with(&[443]),
    ]));
    let pipeline = pipeline_with(scanner.clone());

    let first = match pipeline.gate.admit_rescan(MAC).unwrap() {
        Admission::Admitted { record_id } => record_id,
        other => panic!("expected admission, got {:?}", other),
    };
    pipeline.dispatcher.idle().await;

    let record = pipeline.store.get_record(first).unwrap().unwrap();
    assert_eq!(record.status, ScanStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Scan timeout after 300 seconds")
    );
    assert!(pipeline.store.results_for(first).unwrap().is_empty());

    // The failure is terminal for that record; a fresh admission succeeds
    let second = match pipeline.gate.admit_rescan(MAC).unwrap() {
        Admission::Admitted { record_id } => record_id,
        other => panic!("expected admission, got {:?}", other),
    };
    pipeline.dispatcher.idle().await;

    let record = pipeline.store.get_record(second).unwrap().unwrap();
    assert_eq!(record.status, ScanStatus::Completed);
    assert_eq!(pipeline.store.results_for(second).unwrap().len(), 1);

    // History is most recent first and keeps both attempts
    let history = pipeline.store.history(MAC, None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second);
    assert_eq!(history[1].id, first);
    pipeline.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_offline_device_is_never_scanned() {
    let scanner = Arc::new(ScriptedScanner::new(vec![report_with(&[22])]));
    let pipeline = pipeline_with(scanner.clone());
    pipeline.store.set_device_online(MAC, false).unwrap();

    assert_eq!(
        pipeline.gate.admit_rescan(MAC).unwrap(),
        Admission::DeviceOffline
    );
    pipeline.dispatcher.idle().await;

    assert!(!pipeline.store.has_any_record(MAC).unwrap());
    assert_eq!(scanner.scans.load(Ordering::SeqCst), 0);
    pipeline.dispatcher.shutdown().await;
}

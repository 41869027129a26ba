//! Scan Runner
//!
//! Drives one scan record through its lifecycle:
//! `pending → in_progress → {completed | failed}`. The runner is safe under
//! at-least-once task delivery: it re-reads the device's active record and
//! claims it atomically, so of two deliveries for the same request exactly
//! one performs the scan and the other reports `skipped`.
//!
//! Scan-level failures (timeout, tool error, unparsable output) are recorded
//! on the record and returned as normal summaries. Only persistence errors
//! escape, to the dispatcher's retry machinery.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::queue::{ScanTask, TaskProcessor};
use crate::scanner::{PortScanner, ScanOutcome};
use crate::store::{ScanStatus, ScanStore, StoreResult};

/// Terminal disposition of one unit of scan work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    /// Scan ran and results were stored
    Completed,
    /// Scan ran and failed; the failure is recorded
    Failed,
    /// Another delivery already claimed this record
    Skipped,
    /// The unit of work was unusable (no active record for the device)
    Error,
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SummaryStatus::Completed => "completed",
            SummaryStatus::Failed => "failed",
            SummaryStatus::Skipped => "skipped",
            SummaryStatus::Error => "error",
        };
        write!(f, "{}", text)
    }
}

/// Result payload returned from one unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub status: SummaryStatus,
    pub ports_count: usize,
    pub error: Option<String>,
}

impl ScanSummary {
    pub fn completed(ports_count: usize) -> Self {
        Self {
            status: SummaryStatus::Completed,
            ports_count,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: SummaryStatus::Failed,
            ports_count: 0,
            error: Some(message.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: SummaryStatus::Skipped,
            ports_count: 0,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SummaryStatus::Error,
            ports_count: 0,
            error: Some(message.into()),
        }
    }
}

/// Executes claimed scan work against the store and the scanner
pub struct ScanRunner {
    store: ScanStore,
    scanner: Arc<dyn PortScanner>,
    timeout: Duration,
}

impl ScanRunner {
    pub fn new(store: ScanStore, scanner: Arc<dyn PortScanner>, timeout: Duration) -> Self {
        Self {
            store,
            scanner,
            timeout,
        }
    }

    /// Run one unit of work to a terminal summary.
    pub async fn execute(&self, task: &ScanTask) -> StoreResult<ScanSummary> {
        let record = match self.store.active_record(&task.device_mac)? {
            Some(record) => record,
            None => {
                warn!(
                    "task {} has no active record for {}",
                    task.id, task.device_mac
                );
                return Ok(ScanSummary::error(format!(
                    "no active scan record for device {}",
                    task.device_mac
                )));
            }
        };

        // A record already in_progress means another delivery claimed it.
        if record.status == ScanStatus::InProgress {
            info!("record {} already claimed, skipping", record.id);
            return Ok(ScanSummary::skipped());
        }
        if !self.store.begin_attempt(record.id)? {
            info!("lost the claim race for record {}, skipping", record.id);
            return Ok(ScanSummary::skipped());
        }

        match self.scanner.scan(&record.target_ip, self.timeout).await {
            Ok(ScanOutcome::Report(report)) => {
                let ports_count = report.open_port_count();
                self.store.commit_success(record.id, &report.findings)?;
                info!(
                    "record {} completed, {} open ports on {}",
                    record.id, ports_count, record.target_ip
                );
                Ok(ScanSummary::completed(ports_count))
            }
            Ok(ScanOutcome::Failed { message }) => {
                self.store.commit_failure(record.id, &message)?;
                warn!("record {} failed: {}", record.id, message);
                Ok(ScanSummary::failed(message))
            }
            // A raised scan error is still a recorded failure, never an
            // uncaught escape from the unit of work.
            Err(err) => {
                let message = err.to_string();
                self.store.commit_failure(record.id, &message)?;
                warn!("record {} failed: {}", record.id, message);
                Ok(ScanSummary::failed(message))
            }
        }
    }
}

#[async_trait]
impl TaskProcessor for ScanRunner {
    async fn process(&self, task: &ScanTask) -> StoreResult<ScanSummary> {
        self.execute(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{
        PortFinding, PortState, Protocol, ScanError, ScanReport, ScanResult,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";
    const IP: &str = "192.168.1.50";

    enum StubBehavior {
        Report(Vec<PortFinding>),
        Failure(String),
        Raise(fn() -> ScanError),
    }

    struct StubScanner {
        behavior: StubBehavior,
        entered: Notify,
        release: Notify,
        blocking: bool,
        scans: AtomicUsize,
    }

    impl StubScanner {
        fn reporting(findings: Vec<PortFinding>) -> Self {
            Self {
                behavior: StubBehavior::Report(findings),
                entered: Notify::new(),
                release: Notify::new(),
                blocking: false,
                scans: AtomicUsize::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                behavior: StubBehavior::Failure(message.to_string()),
                entered: Notify::new(),
                release: Notify::new(),
                blocking: false,
                scans: AtomicUsize::new(0),
            }
        }

        fn raising(make: fn() -> ScanError) -> Self {
            Self {
                behavior: StubBehavior::Raise(make),
                entered: Notify::new(),
                release: Notify::new(),
                blocking: false,
                scans: AtomicUsize::new(0),
            }
        }

        fn blocking(findings: Vec<PortFinding>) -> Self {
            let mut scanner = Self::reporting(findings);
            scanner.blocking = true;
            scanner
        }
    }

    #[async_trait]
    impl PortScanner for StubScanner {
        async fn scan(&self, _target: &str, _timeout: Duration) -> ScanResult<ScanOutcome> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            if self.blocking {
                self.entered.notify_one();
                self.release.notified().await;
            }
            match &self.behavior {
                StubBehavior::Report(findings) => Ok(ScanOutcome::Report(ScanReport {
                    findings: findings.clone(),
                    started_at: None,
                    finished_at: None,
                })),
                StubBehavior::Failure(message) => Ok(ScanOutcome::Failed {
                    message: message.clone(),
                }),
                StubBehavior::Raise(make) => Err(make()),
            }
        }
    }

    fn open_ports() -> Vec<PortFinding> {
        vec![
            PortFinding::new(22, Protocol::Tcp, PortState::Open),
            PortFinding::new(80, Protocol::Tcp, PortState::Open),
        ]
    }

    fn runner_with(scanner: Arc<StubScanner>) -> (TempDir, ScanStore, ScanRunner) {
        let dir = TempDir::new().unwrap();
        let store = ScanStore::open(&dir.path().join("portwatch.db")).unwrap();
        store.upsert_device(MAC, IP, None, true).unwrap();
        let runner = ScanRunner::new(store.clone(), scanner, Duration::from_secs(300));
        (dir, store, runner)
    }

    #[tokio::test]
    async fn test_successful_scan_completes_record() {
        let scanner = Arc::new(StubScanner::reporting(open_ports()));
        let (_dir, store, runner) = runner_with(scanner);
        let record = store.create_pending(MAC, IP).unwrap();

        let summary = runner
            .execute(&ScanTask::new(MAC, record.id))
            .await
            .unwrap();

        assert_eq!(summary.status, SummaryStatus::Completed);
        assert_eq!(summary.ports_count, 2);
        assert!(summary.error.is_none());
        let record = store.get_record(record.id).unwrap().unwrap();
        assert_eq!(record.status, ScanStatus::Completed);
        assert_eq!(store.results_for(record.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_structured_failure_is_recorded() {
        let scanner = Arc::new(StubScanner::failing("Scan timeout after 300 seconds"));
        let (_dir, store, runner) = runner_with(scanner);
        let record = store.create_pending(MAC, IP).unwrap();

        let summary = runner
            .execute(&ScanTask::new(MAC, record.id))
            .await
            .unwrap();

        assert_eq!(summary.status, SummaryStatus::Failed);
        assert_eq!(summary.ports_count, 0);
        assert_eq!(
            summary.error.as_deref(),
            Some("Scan timeout after 300 seconds")
        );
        let record = store.get_record(record.id).unwrap().unwrap();
        assert_eq!(record.status, ScanStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("Scan timeout after 300 seconds")
        );
    }

    #[tokio::test]
    async fn test_raised_scan_error_becomes_recorded_failure() {
        let scanner = Arc::new(StubScanner::raising(|| {
            ScanError::MalformedOutput("output missing grepable run header".to_string())
        }));
        let (_dir, store, runner) = runner_with(scanner);
        let record = store.create_pending(MAC, IP).unwrap();

        let summary = runner
            .execute(&ScanTask::new(MAC, record.id))
            .await
            .unwrap();

        assert_eq!(summary.status, SummaryStatus::Failed);
        let record = store.get_record(record.id).unwrap().unwrap();
        assert_eq!(record.status, ScanStatus::Failed);
        assert!(record
            .error_message
            .unwrap()
            .contains("missing grepable run header"));
    }

    #[tokio::test]
    async fn test_no_active_record_is_an_error_summary() {
        let scanner = Arc::new(StubScanner::reporting(open_ports()));
        let (_dir, _store, runner) = runner_with(scanner.clone());

        let summary = runner.execute(&ScanTask::new(MAC, 999)).await.unwrap();

        assert_eq!(summary.status, SummaryStatus::Error);
        assert!(summary.error.unwrap().contains(MAC));
        assert_eq!(scanner.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_in_progress_record_is_skipped() {
        let scanner = Arc::new(StubScanner::reporting(open_ports()));
        let (_dir, store, runner) = runner_with(scanner.clone());
        let record = store.create_pending(MAC, IP).unwrap();
        store.begin_attempt(record.id).unwrap();

        let summary = runner
            .execute(&ScanTask::new(MAC, record.id))
            .await
            .unwrap();

        assert_eq!(summary.status, SummaryStatus::Skipped);
        assert_eq!(scanner.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_scans_exactly_once() {
        let scanner = Arc::new(StubScanner::blocking(open_ports()));
        let (_dir, store, runner) = runner_with(scanner.clone());
        let runner = Arc::new(runner);
        let record = store.create_pending(MAC, IP).unwrap();
        let task = ScanTask::new(MAC, record.id);

        let first = tokio::spawn({
            let runner = Arc::clone(&runner);
            let task = task.clone();
            async move { runner.execute(&task).await.unwrap() }
        });
        // Wait until the first delivery holds the claim mid-scan
        scanner.entered.notified().await;

        let second = runner.execute(&task).await.unwrap();
        assert_eq!(second.status, SummaryStatus::Skipped);

        scanner.release.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.status, SummaryStatus::Completed);
        assert_eq!(scanner.scans.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_summary_status_display() {
        assert_eq!(SummaryStatus::Completed.to_string(), "completed");
        assert_eq!(SummaryStatus::Failed.to_string(), "failed");
        assert_eq!(SummaryStatus::Skipped.to_string(), "skipped");
        assert_eq!(SummaryStatus::Error.to_string(), "error");
    }
}

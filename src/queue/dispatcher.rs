//! Scan Dispatcher
//!
//! Two-lane task queue feeding the scan runner. The rescan lane fans tasks
//! out to a bounded pool of concurrent scans; the first-time lane processes
//! tasks strictly one at a time, so a newly discovered device's first scan
//! never competes with another first-time scan.
//!
//! Delivery is at-least-once: a task may reach the runner more than once and
//! the runner's claim step makes the duplicate a no-op. Infrastructure
//! errors (persistence failures) are retried with exponential backoff;
//! scan-level failures are already recorded in the store and are final.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{QueueError, QueueResult};
use super::retry::RetryPolicy;
use crate::runner::ScanSummary;
use crate::store::StoreResult;

/// Default rescan-lane worker pool size
pub const DEFAULT_WORKERS: usize = 4;

/// Which lane a task is admitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Parallel lane for devices scanned before
    Rescan,
    /// Sequential lane for a device's very first scan
    FirstTime,
}

/// One unit of scan work
#[derive(Debug, Clone)]
pub struct ScanTask {
    pub id: Uuid,
    pub device_mac: String,
    pub record_id: i64,
}

impl ScanTask {
    pub fn new(device_mac: &str, record_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_mac: device_mac.to_string(),
            record_id,
        }
    }
}

/// Accepts tasks for asynchronous execution. The admission gate depends on
/// this seam rather than the dispatcher directly.
pub trait ScanQueue: Send + Sync {
    fn enqueue(&self, lane: Lane, task: ScanTask) -> QueueResult<()>;
}

/// Executes one claimed task end to end. An `Err` is an infrastructure
/// failure and re-queues the task; every scan-level outcome is an `Ok`
/// summary.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: &ScanTask) -> StoreResult<ScanSummary>;
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Concurrent scan ceiling for the rescan lane
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> QueueResult<()> {
        if self.workers == 0 {
            return Err(QueueError::InvalidConfig(
                "workers must be greater than 0".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// Tracks tasks accepted but not yet finished, so callers can wait for the
/// queue to drain.
#[derive(Default)]
struct InflightGauge {
    count: AtomicUsize,
    notify: Notify,
}

impl InflightGauge {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            // Register before checking, so a completion between the check
            // and the await cannot be missed.
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Handle to a running dispatcher
pub struct Dispatcher {
    rescan_tx: UnboundedSender<ScanTask>,
    first_time_tx: UnboundedSender<ScanTask>,
    cancel: CancellationToken,
    inflight: Arc<InflightGauge>,
    lanes: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn both lane loops and return the handle that feeds them.
    pub fn start(processor: Arc<dyn TaskProcessor>, config: DispatcherConfig) -> QueueResult<Self> {
        config.validate()?;

        let (rescan_tx, rescan_rx) = mpsc::unbounded_channel();
        let (first_time_tx, first_time_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let inflight = Arc::new(InflightGauge::default());

        let rescan_lane = tokio::spawn(run_parallel_lane(
            rescan_rx,
            Arc::clone(&processor),
            config.workers,
            config.retry.clone(),
            cancel.clone(),
            Arc::clone(&inflight),
        ));
        let first_time_lane = tokio::spawn(run_sequential_lane(
            first_time_rx,
            processor,
            config.retry,
            cancel.clone(),
            Arc::clone(&inflight),
        ));

        info!("scan dispatcher started ({} rescan workers)", config.workers);
        Ok(Self {
            rescan_tx,
            first_time_tx,
            cancel,
            inflight,
            lanes: std::sync::Mutex::new(vec![rescan_lane, first_time_lane]),
        })
    }

    /// Wait until every accepted task has finished.
    pub async fn idle(&self) {
        self.inflight.wait_idle().await;
    }

    /// Stop accepting work, let in-flight tasks finish, and join the lanes.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let lanes: Vec<JoinHandle<()>> = match self.lanes.lock() {
            Ok(mut lanes) => lanes.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for lane in lanes {
            if let Err(err) = lane.await {
                error!("dispatcher lane panicked: {}", err);
            }
        }
        info!("scan dispatcher stopped");
    }
}

impl ScanQueue for Dispatcher {
    fn enqueue(&self, lane: Lane, task: ScanTask) -> QueueResult<()> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Closed);
        }
        debug!(
            "enqueue task {} for {} on {:?} lane",
            task.id, task.device_mac, lane
        );
        self.inflight.add();
        let sender = match lane {
            Lane::Rescan => &self.rescan_tx,
            Lane::FirstTime => &self.first_time_tx,
        };
        sender.send(task).map_err(|_| {
            self.inflight.done();
            QueueError::Closed
        })
    }
}

/// Rescan lane: up to `workers` tasks run concurrently.
async fn run_parallel_lane(
    mut rx: UnboundedReceiver<ScanTask>,
    processor: Arc<dyn TaskProcessor>,
    workers: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    inflight: Arc<InflightGauge>,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    loop {
        while running.try_join_next().is_some() {}

        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(task) => task,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                inflight.done();
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let processor = Arc::clone(&processor);
        let retry = retry.clone();
        let cancel = cancel.clone();
        let inflight = Arc::clone(&inflight);
        running.spawn(async move {
            process_with_retry(processor.as_ref(), &task, &retry, &cancel).await;
            drop(permit);
            inflight.done();
        });
    }

    // In-flight scans run to completion before the lane exits.
    while running.join_next().await.is_some() {}
    debug!("rescan lane stopped");
}

/// First-time lane: strictly one task at a time, in arrival order.
async fn run_sequential_lane(
    mut rx: UnboundedReceiver<ScanTask>,
    processor: Arc<dyn TaskProcessor>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    inflight: Arc<InflightGauge>,
) {
    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(task) => task,
                None => break,
            },
        };
        process_with_retry(processor.as_ref(), &task, &retry, &cancel).await;
        inflight.done();
    }
    debug!("first-time lane stopped");
}

/// Run one task, re-attempting on infrastructure errors until the retry
/// budget is exhausted.
async fn process_with_retry(
    processor: &dyn TaskProcessor,
    task: &ScanTask,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        match processor.process(task).await {
            Ok(summary) => {
                info!(
                    "task {} for {} finished: {}",
                    task.id, task.device_mac, summary.status
                );
                return;
            }
            Err(err) if attempt < retry.max_retries => {
                let delay = retry.delay_for(attempt);
                attempt += 1;
                warn!(
                    "task {} attempt {} failed ({}), retrying in {}ms",
                    task.id,
                    attempt,
                    err,
                    delay.as_millis()
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!("task {} abandoned during shutdown", task.id);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                error!(
                    "task {} for {} gave up after {} attempts: {}",
                    task.id,
                    task.device_mac,
                    attempt + 1,
                    err
                );
                return;
            }
        }
    }
}

//! Fetch/persist/requeue state machine of a single worker.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use intake_core::WorkItem;

use crate::queue::{DurableQueue, QueueError, RequeueOutcome};
use crate::sink::{ReportSink, UpsertOutcome};

/// Worker lifecycle state.
///
/// `Idle → Fetching → (Idle | Persisting)`, `Persisting → (Idle | Requeuing)`,
/// `Requeuing → Idle`, and any state `→ Stopped` once cancellation is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Persisting,
    Requeuing,
    Stopped,
}

/// Counters shared by the workers of one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub fetched: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    /// Items lost because both the write and the requeue failed.
    pub dropped: u64,
    pub fetch_errors: u64,
}

/// Pause after a failed fetch so an unreachable store is not hammered.
const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Granularity at which a backoff sleep checks for cancellation.
const CANCEL_CHECK: Duration = Duration::from_millis(50);

pub struct ReportWorker {
    name: String,
    queue: DurableQueue,
    sink: Arc<dyn ReportSink>,
    poll_timeout: Duration,
    error_backoff: Duration,
    state: WorkerState,
    stats: Arc<Mutex<WorkerStats>>,
}

impl ReportWorker {
    pub fn new(
        name: impl Into<String>,
        queue: DurableQueue,
        sink: Arc<dyn ReportSink>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            sink,
            poll_timeout,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            state: WorkerState::Idle,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    /// Report into a counter set shared with other workers.
    pub fn with_stats(mut self, stats: Arc<Mutex<WorkerStats>>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Loop until cancelled. Blocks the calling thread.
    pub fn run(&mut self, cancel: &CancellationToken) {
        info!(worker = %self.name, "worker started");
        while self.step(cancel) != WorkerState::Stopped {}
        info!(worker = %self.name, "worker stopped");
    }

    /// One iteration: fetch at most one item and see it through.
    ///
    /// Returns the state the worker rests in afterwards: `Idle`, or `Stopped`
    /// if cancellation was observed before or during the fetch. An item that
    /// was fetched is always finished, cancelled or not.
    pub fn step(&mut self, cancel: &CancellationToken) -> WorkerState {
        if cancel.is_cancelled() {
            self.state = WorkerState::Stopped;
            return self.state;
        }

        self.state = WorkerState::Fetching;
        match self.queue.blocking_pop(self.poll_timeout, cancel) {
            Ok(Some(item)) => self.process(item),
            Ok(None) => self.state = WorkerState::Idle,
            Err(QueueError::Cancelled) => self.state = WorkerState::Stopped,
            Err(e) => {
                error!(worker = %self.name, error = %e, "dequeue failed");
                self.bump(|s| s.fetch_errors += 1);
                self.state = if self.pause(cancel) {
                    WorkerState::Stopped
                } else {
                    WorkerState::Idle
                };
            }
        }
        self.state
    }

    fn process(&mut self, mut item: WorkItem) {
        self.state = WorkerState::Persisting;
        self.bump(|s| s.fetched += 1);
        debug!(
            worker = %self.name,
            event_id = %item.event_id,
            site_id = %item.site_id,
            retry_count = item.retry_count,
            "processing report"
        );

        match self.sink.upsert(&item) {
            Ok(UpsertOutcome::Inserted) => {
                info!(worker = %self.name, event_id = %item.event_id, "report saved");
                self.bump(|s| s.persisted += 1);
            }
            Ok(UpsertOutcome::AlreadyPresent) => {
                info!(worker = %self.name, event_id = %item.event_id, "report already stored, duplicate delivery ignored");
                self.bump(|s| s.duplicates += 1);
            }
            Err(e) => {
                warn!(
                    worker = %self.name,
                    event_id = %item.event_id,
                    retry_count = item.retry_count,
                    error = %e,
                    "insert failed, requeuing"
                );
                self.state = WorkerState::Requeuing;
                self.requeue(&mut item);
            }
        }

        self.state = WorkerState::Idle;
    }

    fn requeue(&mut self, item: &mut WorkItem) {
        match self.queue.requeue(item) {
            Ok(RequeueOutcome::Requeued { .. }) => self.bump(|s| s.requeued += 1),
            Ok(RequeueOutcome::DeadLettered { .. }) => self.bump(|s| s.dead_lettered += 1),
            Err(e) => {
                // Not retried locally: the item existed only in this worker's
                // memory and is lost here. Known gap, kept deliberately.
                error!(
                    worker = %self.name,
                    event_id = %item.event_id,
                    site_id = %item.site_id,
                    retry_count = item.retry_count,
                    error = %e,
                    "requeue failed, work item dropped"
                );
                self.bump(|s| s.dropped += 1);
            }
        }
    }

    /// Sleep out the error backoff; returns true if cancelled meanwhile.
    fn pause(&self, cancel: &CancellationToken) -> bool {
        let until = Instant::now() + self.error_backoff;
        loop {
            if cancel.is_cancelled() {
                return true;
            }
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            thread::sleep(left.min(CANCEL_CHECK));
        }
    }

    fn bump(&self, f: impl FnOnce(&mut WorkerStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

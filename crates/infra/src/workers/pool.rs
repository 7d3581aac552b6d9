//! Fixed-size pool of report workers on dedicated threads.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::DurableQueue;
use crate::sink::ReportSink;

use super::report_worker::{ReportWorker, WorkerStats};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Upper bound of one blocking pop; also bounds shutdown latency
    pub poll_timeout: Duration,
    /// Thread name prefix
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            poll_timeout: Duration::from_secs(5),
            name: "report-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Result of [`WorkerPoolHandle::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Workers that finished their current item and exited.
    pub stopped: usize,
    /// Workers still running when the deadline passed.
    pub abandoned: usize,
    /// Workers whose thread panicked.
    pub panicked: usize,
}

pub struct WorkerPool;

impl WorkerPool {
    /// Start `config.workers` threads, each running a [`ReportWorker`] loop.
    ///
    /// If a thread cannot be spawned the workers already started are
    /// cancelled and the error is returned.
    pub fn spawn(
        config: WorkerPoolConfig,
        queue: DurableQueue,
        sink: Arc<dyn ReportSink>,
    ) -> io::Result<WorkerPoolHandle> {
        let cancel = CancellationToken::new();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let (done_tx, done_rx) = mpsc::channel::<usize>();
        let mut joins = Vec::with_capacity(config.workers);

        for i in 0..config.workers {
            let name = format!("{}-{}", config.name, i);
            let mut worker = ReportWorker::new(
                name.clone(),
                queue.clone(),
                sink.clone(),
                config.poll_timeout,
            )
            .with_stats(stats.clone());
            let worker_cancel = cancel.clone();
            let done = done_tx.clone();

            let spawned = thread::Builder::new().name(name).spawn(move || {
                worker.run(&worker_cancel);
                let _ = done.send(i);
            });
            match spawned {
                Ok(join) => joins.push(join),
                Err(e) => {
                    cancel.cancel();
                    return Err(e);
                }
            }
        }
        drop(done_tx);

        info!(
            workers = config.workers,
            poll_timeout_ms = config.poll_timeout.as_millis() as u64,
            "worker pool started"
        );

        Ok(WorkerPoolHandle {
            cancel,
            joins,
            done: done_rx,
            stats,
        })
    }
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    joins: Vec<thread::JoinHandle<()>>,
    done: mpsc::Receiver<usize>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerPoolHandle {
    pub fn worker_count(&self) -> usize {
        self.joins.len()
    }

    /// Aggregate counters across all workers.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Signal cancellation and wait up to `deadline` for workers to exit.
    ///
    /// Workers mid-item finish it first. Threads still running at the
    /// deadline are detached and counted as abandoned.
    pub fn shutdown(self, deadline: Duration) -> ShutdownSummary {
        let total = self.joins.len();
        info!(workers = total, deadline_ms = deadline.as_millis() as u64, "draining worker pool");
        self.cancel.cancel();

        let until = Instant::now() + deadline;
        let mut exited = 0;
        while exited < total {
            let left = until.saturating_duration_since(Instant::now());
            match self.done.recv_timeout(left) {
                Ok(_) => exited += 1,
                // Every sender is gone: the remaining threads all panicked.
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let abandoned = total - exited;
                    warn!(
                        stopped = exited,
                        abandoned,
                        stats = ?self.stats(),
                        "shutdown deadline passed, abandoning workers"
                    );
                    return ShutdownSummary {
                        stopped: exited,
                        abandoned,
                        panicked: 0,
                    };
                }
            }
        }

        let stats = self.stats();
        let panicked = self
            .joins
            .into_iter()
            .map(|j| j.join())
            .filter(Result::is_err)
            .count();
        let summary = ShutdownSummary {
            stopped: total - panicked,
            abandoned: 0,
            panicked,
        };
        info!(
            stopped = summary.stopped,
            panicked,
            ?stats,
            "worker pool stopped"
        );
        summary
    }
}

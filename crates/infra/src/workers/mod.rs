//! Queue consumers: the only path that drains the durable queue.
//!
//! - `ReportWorker`: one fetch → persist → (requeue) state machine
//! - `WorkerPool`: N workers on dedicated threads with shared cancellation

pub mod pool;
pub mod report_worker;

pub use pool::{ShutdownSummary, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use report_worker::{ReportWorker, WorkerState, WorkerStats};

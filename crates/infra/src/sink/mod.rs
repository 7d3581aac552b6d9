//! Persistence sink: idempotent upsert of work items keyed by `event_id`.
//!
//! Redelivery is normal (a worker may crash after writing but before the
//! queue forgets the item, or a transient failure triggers a requeue), so a
//! duplicate write is a silent no-op rather than an error. That turns
//! at-least-once queue delivery into effectively-once stored state.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use intake_core::WorkItem;

pub use in_memory::InMemoryReportSink;
pub use postgres::PostgresReportSink;

/// Result of a successful upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First write for this `event_id`.
    Inserted,
    /// A record already existed; nothing changed.
    AlreadyPresent,
}

/// Persistence failure. Every variant is treated as transient by the worker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("database call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("query failed: {0}")]
    Query(String),

    #[error("could not encode record: {0}")]
    Encode(String),
}

/// Relational store of reports.
pub trait ReportSink: Send + Sync {
    /// Insert `item` unless a record with its `event_id` exists.
    fn upsert(&self, item: &WorkItem) -> Result<UpsertOutcome, SinkError>;
}

impl<T: ReportSink + ?Sized> ReportSink for Arc<T> {
    fn upsert(&self, item: &WorkItem) -> Result<UpsertOutcome, SinkError> {
        (**self).upsert(item)
    }
}

//! In-memory report sink for tests/dev, with failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use intake_core::{EventId, PersistedRecord, WorkItem};

use super::{ReportSink, SinkError, UpsertOutcome};

#[derive(Debug, Default)]
pub struct InMemoryReportSink {
    records: RwLock<HashMap<EventId, PersistedRecord>>,
    failures_pending: AtomicU32,
    attempts: AtomicU64,
}

impl InMemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upserts fail with `SinkError::Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Total upsert calls, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn get(&self, event_id: EventId) -> Option<PersistedRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ReportSink for InMemoryReportSink {
    fn upsert(&self, item: &WorkItem) -> Result<UpsertOutcome, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(SinkError::Unavailable("injected failure".to_string()));
        }

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&item.event_id) {
            return Ok(UpsertOutcome::AlreadyPresent);
        }
        records.insert(item.event_id, PersistedRecord::from(item));
        Ok(UpsertOutcome::Inserted)
    }
}

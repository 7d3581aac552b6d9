//! Durable work queue with bounded retry and dead-letter escalation.
//!
//! ## Design
//!
//! - A main list and a dead-letter list live in the shared store
//! - Producers append (`LPUSH`), workers pop from the other end (`BRPOP`), so
//!   throughput is roughly FIFO; no ordering is promised downstream
//! - A pop hands each entry to exactly one waiting worker
//! - A failed item is re-pushed with `retry_count + 1`; once the count reaches
//!   the ceiling it goes to the dead-letter list instead
//! - Every store mutation is a single command; no multi-step locks
//!
//! ## Components
//!
//! - `ListStore`: raw list primitives (Redis or in-memory)
//! - `DurableQueue`: typed push/pop/requeue over a `ListStore`
//! - `Producer`: the request path's only write into the queue

pub mod in_memory;
pub mod producer;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use intake_core::WorkItem;

pub use in_memory::InMemoryListStore;
pub use producer::{EnqueueError, Producer};
#[cfg(feature = "redis")]
pub use redis::RedisListStore;

/// Default main work list.
pub const MAIN_QUEUE: &str = "bug_reports:queue";

/// Default dead-letter list.
pub const DEAD_LETTER_QUEUE: &str = "bug_reports:dlq";

/// Retry ceiling: an item whose `retry_count` reaches this is dead-lettered.
pub const MAX_RETRY: u32 = 5;

/// Queue operation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// Network, timeout or command failure against the shared store.
    #[error("queue store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The caller's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

/// Raw list primitives of the shared store.
pub trait ListStore: Send + Sync {
    /// Append `payload` at the producer end of `list`.
    fn push(&self, list: &str, payload: String) -> Result<(), QueueError>;

    /// Take one entry from the consumer end of `list`, waiting at most
    /// `timeout`. `Ok(None)` means the wait ran out.
    fn blocking_pop(&self, list: &str, timeout: Duration) -> Result<Option<String>, QueueError>;

    fn len(&self, list: &str) -> Result<u64, QueueError>;
}

impl<T: ListStore + ?Sized> ListStore for Arc<T> {
    fn push(&self, list: &str, payload: String) -> Result<(), QueueError> {
        (**self).push(list, payload)
    }

    fn blocking_pop(&self, list: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        (**self).blocking_pop(list, timeout)
    }

    fn len(&self, list: &str) -> Result<u64, QueueError> {
        (**self).len(list)
    }
}

/// Names of the two lists a queue uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub main: String,
    pub dead_letter: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            main: MAIN_QUEUE.to_string(),
            dead_letter: DEAD_LETTER_QUEUE.to_string(),
        }
    }
}

/// Where a requeued item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Back on the main list for another attempt.
    Requeued { retry_count: u32 },
    /// Retries exhausted; parked on the dead-letter list.
    DeadLettered { retry_count: u32 },
}

/// Typed queue of [`WorkItem`]s over a [`ListStore`].
#[derive(Clone)]
pub struct DurableQueue {
    store: Arc<dyn ListStore>,
    names: QueueNames,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl DurableQueue {
    pub fn new(store: Arc<dyn ListStore>) -> Self {
        Self {
            store,
            names: QueueNames::default(),
        }
    }

    pub fn with_names(mut self, names: QueueNames) -> Self {
        self.names = names;
        self
    }

    /// Serialize and append to the main list.
    pub fn push(&self, item: &WorkItem) -> Result<(), QueueError> {
        let payload = encode(item)?;
        self.store.push(&self.names.main, payload)
    }

    /// Wait up to `timeout` for the next item.
    ///
    /// Returns `Err(Cancelled)` if `cancel` has fired and nothing was taken.
    /// An item already taken is always returned, even when cancellation raced
    /// the pop: it now lives only in the caller's memory.
    ///
    /// An entry that does not decode is moved verbatim to the dead-letter list
    /// and reported as `Ok(None)`.
    pub fn blocking_pop(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<WorkItem>, QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let raw = match self.store.blocking_pop(&self.names.main, timeout)? {
            Some(raw) => raw,
            None if cancel.is_cancelled() => return Err(QueueError::Cancelled),
            None => return Ok(None),
        };

        match serde_json::from_str::<WorkItem>(&raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!(error = %e, "undecodable queue entry, moving to dead-letter list");
                if let Err(push_err) = self.store.push(&self.names.dead_letter, raw) {
                    error!(error = %push_err, "failed to dead-letter undecodable entry, dropping it");
                }
                Ok(None)
            }
        }
    }

    /// Record one more failed attempt and hand the item back to the store.
    ///
    /// Bumps `retry_count`; at the ceiling the item goes to the dead-letter
    /// list, otherwise back onto the main list.
    pub fn requeue(&self, item: &mut WorkItem) -> Result<RequeueOutcome, QueueError> {
        item.retry_count = item.retry_count.saturating_add(1);
        let payload = encode(item)?;

        if item.retry_count >= MAX_RETRY {
            self.store.push(&self.names.dead_letter, payload)?;
            warn!(
                event_id = %item.event_id,
                site_id = %item.site_id,
                retry_count = item.retry_count,
                "retries exhausted, moved to dead-letter list"
            );
            return Ok(RequeueOutcome::DeadLettered {
                retry_count: item.retry_count,
            });
        }

        self.store.push(&self.names.main, payload)?;
        info!(
            event_id = %item.event_id,
            retry_count = item.retry_count,
            "requeued for retry"
        );
        Ok(RequeueOutcome::Requeued {
            retry_count: item.retry_count,
        })
    }

    pub fn queue_length(&self) -> Result<u64, QueueError> {
        self.store.len(&self.names.main)
    }

    pub fn dead_letter_length(&self) -> Result<u64, QueueError> {
        self.store.len(&self.names.dead_letter)
    }
}

fn encode(item: &WorkItem) -> Result<String, QueueError> {
    serde_json::to_string(item).map_err(|e| QueueError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use intake_core::ReportSubmission;

    fn item() -> WorkItem {
        let submission = ReportSubmission {
            site_id: "example.com".to_string(),
            report_type: None,
            title: "Broken footer".to_string(),
            description: "Footer overlaps content on mobile".to_string(),
            category: "mobile".to_string(),
            page_url: Some("https://example.com/".to_string()),
            contact_type: None,
            contact_value: None,
            first_name: Some("Ada".to_string()),
            last_name: None,
            image_urls: vec!["https://img.example/a.png".to_string()],
        };
        WorkItem::accept(submission, Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap())
    }

    fn queue() -> (Arc<InMemoryListStore>, DurableQueue) {
        let store = Arc::new(InMemoryListStore::new());
        (store.clone(), DurableQueue::new(store))
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn push_then_pop_round_trips_exactly() {
        let (store, queue) = queue();
        let original = item();
        queue.push(&original).unwrap();

        let raw_before = store.contents(MAIN_QUEUE);
        let popped = queue
            .blocking_pop(SHORT, &CancellationToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(popped, original);
        assert_eq!(serde_json::to_string(&popped).unwrap(), raw_before[0]);
        assert_eq!(queue.queue_length().unwrap(), 0);
    }

    #[test]
    fn pop_is_fifo() {
        let (_, queue) = queue();
        let first = item();
        let second = item();
        queue.push(&first).unwrap();
        queue.push(&second).unwrap();

        let cancel = CancellationToken::new();
        assert_eq!(queue.blocking_pop(SHORT, &cancel).unwrap().unwrap().event_id, first.event_id);
        assert_eq!(queue.blocking_pop(SHORT, &cancel).unwrap().unwrap().event_id, second.event_id);
    }

    #[test]
    fn empty_pop_times_out_with_none() {
        let (_, queue) = queue();
        let started = std::time::Instant::now();
        let got = queue.blocking_pop(SHORT, &CancellationToken::new()).unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= SHORT);
    }

    #[test]
    fn cancelled_pop_reports_cancellation() {
        let (_, queue) = queue();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            queue.blocking_pop(SHORT, &cancel),
            Err(QueueError::Cancelled)
        ));
    }

    #[test]
    fn requeue_increments_retry_count_by_one() {
        let (_, queue) = queue();
        let mut it = item();
        let outcome = queue.requeue(&mut it).unwrap();

        assert_eq!(outcome, RequeueOutcome::Requeued { retry_count: 1 });
        let back = queue
            .blocking_pop(SHORT, &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(back.retry_count, 1);
        assert_eq!(back.event_id, it.event_id);
    }

    #[test]
    fn item_at_retry_four_is_dead_lettered_on_next_failure() {
        let (_, queue) = queue();
        let mut it = item();
        it.retry_count = 4;

        let outcome = queue.requeue(&mut it).unwrap();

        assert_eq!(outcome, RequeueOutcome::DeadLettered { retry_count: 5 });
        assert_eq!(queue.queue_length().unwrap(), 0);
        assert_eq!(queue.dead_letter_length().unwrap(), 1);
    }

    #[test]
    fn max_retry_consecutive_requeues_end_in_dead_letter() {
        let (store, queue) = queue();
        let cancel = CancellationToken::new();
        queue.push(&item()).unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..MAX_RETRY {
            let mut it = queue.blocking_pop(SHORT, &cancel).unwrap().unwrap();
            outcomes.push(queue.requeue(&mut it).unwrap());
        }

        assert!(matches!(outcomes.last(), Some(RequeueOutcome::DeadLettered { retry_count: 5 })));
        assert_eq!(queue.queue_length().unwrap(), 0);

        let dead: WorkItem = serde_json::from_str(&store.contents(DEAD_LETTER_QUEUE)[0]).unwrap();
        assert_eq!(dead.retry_count, MAX_RETRY);
    }

    #[test]
    fn undecodable_entry_is_parked_in_dead_letter() {
        let (store, queue) = queue();
        store.push(MAIN_QUEUE, "{not json".to_string()).unwrap();

        let got = queue.blocking_pop(SHORT, &CancellationToken::new()).unwrap();

        assert!(got.is_none());
        assert_eq!(store.contents(DEAD_LETTER_QUEUE), vec!["{not json".to_string()]);
    }

    #[test]
    fn store_outage_surfaces_as_store_error() {
        let (store, queue) = queue();
        store.set_unavailable(true);
        assert!(matches!(queue.push(&item()), Err(QueueError::Store(_))));
        assert!(matches!(queue.queue_length(), Err(QueueError::Store(_))));
    }

    #[test]
    fn custom_names_are_used() {
        let (store, queue) = queue();
        let queue = queue.with_names(QueueNames {
            main: "q".to_string(),
            dead_letter: "dlq".to_string(),
        });
        queue.push(&item()).unwrap();
        assert_eq!(store.contents("q").len(), 1);
        assert!(store.contents(MAIN_QUEUE).is_empty());
    }
}

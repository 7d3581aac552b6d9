//! Request-path producer: the only write path into the main queue.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use intake_core::{EventId, ReportSubmission, WorkItem};

use super::{DurableQueue, QueueError};

/// Enqueue failure surfaced to the submitting client as "retry later".
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnqueueError {
    #[error("work item could not be serialized: {0}")]
    Serialization(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl From<QueueError> for EnqueueError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Serialization(msg) => EnqueueError::Serialization(msg),
            QueueError::Store(msg) => EnqueueError::Unavailable(msg),
            QueueError::Cancelled => EnqueueError::Unavailable("cancelled".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Producer {
    queue: DurableQueue,
}

impl Producer {
    pub fn new(queue: DurableQueue) -> Self {
        Self { queue }
    }

    /// Serialize and push. Never drops silently: any failure is returned so
    /// the caller does not confirm delivery it cannot vouch for.
    pub fn enqueue(&self, item: &WorkItem) -> Result<(), EnqueueError> {
        self.queue.push(item).map_err(|e| {
            error!(event_id = %item.event_id, error = %e, "enqueue failed");
            EnqueueError::from(e)
        })
    }

    /// Accept a validated submission: assign its event id and enqueue it.
    pub fn submit(
        &self,
        submission: ReportSubmission,
        received_at: DateTime<Utc>,
    ) -> Result<EventId, EnqueueError> {
        let item = WorkItem::accept(submission, received_at);
        self.enqueue(&item)?;
        info!(
            event_id = %item.event_id,
            site_id = %item.site_id,
            images = item.image_urls.len(),
            "report queued"
        );
        Ok(item.event_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::queue::InMemoryListStore;

    fn submission() -> ReportSubmission {
        ReportSubmission {
            site_id: "shop.example".to_string(),
            report_type: Some("bug".to_string()),
            title: "Search returns nothing".to_string(),
            description: "Any query gives zero results".to_string(),
            category: "functionality".to_string(),
            page_url: None,
            contact_type: None,
            contact_value: None,
            first_name: None,
            last_name: None,
            image_urls: Vec::new(),
        }
    }

    #[test]
    fn submit_enqueues_with_fresh_id() {
        let store = Arc::new(InMemoryListStore::new());
        let queue = DurableQueue::new(store);
        let producer = Producer::new(queue.clone());

        let id = producer.submit(submission(), Utc::now()).unwrap();

        let item = queue
            .blocking_pop(Duration::from_millis(10), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(item.event_id, id);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.title, "Search returns nothing");
    }

    #[test]
    fn store_failure_is_reported_not_swallowed() {
        let store = Arc::new(InMemoryListStore::new());
        store.set_unavailable(true);
        let producer = Producer::new(DurableQueue::new(store));

        let err = producer.submit(submission(), Utc::now()).unwrap_err();
        assert!(matches!(err, EnqueueError::Unavailable(_)));
    }
}

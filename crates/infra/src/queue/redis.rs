//! Redis list-backed queue store (`LPUSH` / `BRPOP` / `LLEN`).

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::{ListStore, QueueError};
use crate::connection_cache::{ConnectionCache, DEFAULT_MAX_IDLE};

/// Extra socket read allowance on top of a `BRPOP` wait.
const BLOCKING_READ_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RedisListStore {
    connections: Arc<ConnectionCache>,
    timeout: Duration,
}

impl RedisListStore {
    /// Create a store against `redis_url`.
    ///
    /// `timeout` bounds connecting and every non-blocking command.
    /// Connections are opened lazily and reused; a worker blocked in `BRPOP`
    /// holds its own connection for the duration of the wait.
    pub fn new(redis_url: impl AsRef<str>, timeout: Duration) -> Result<Self, QueueError> {
        let connections = ConnectionCache::open(redis_url.as_ref(), timeout, DEFAULT_MAX_IDLE)
            .map_err(|e| QueueError::Store(e.to_string()))?;

        Ok(Self {
            connections: Arc::new(connections),
            timeout,
        })
    }

    /// Round-trip a `PING`; used at startup to fail fast.
    pub fn ping(&self) -> Result<(), QueueError> {
        let _: String = self
            .connections
            .with_connection(self.timeout, |conn| redis::cmd("PING").query(conn))
            .map_err(|e| QueueError::Store(format!("PING failed: {e}")))?;
        Ok(())
    }
}

impl ListStore for RedisListStore {
    // No `err` here: the producer logs enqueue failures with the event id.
    #[instrument(skip(self, payload))]
    fn push(&self, list: &str, payload: String) -> Result<(), QueueError> {
        let _: i64 = self
            .connections
            .with_connection(self.timeout, |conn| {
                redis::cmd("LPUSH").arg(list).arg(&payload).query(conn)
            })
            .map_err(|e| QueueError::Store(format!("LPUSH failed: {e}")))?;
        Ok(())
    }

    /// `BRPOP` takes whole seconds; sub-second waits round up to one second.
    fn blocking_pop(&self, list: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        // BRPOP 0 blocks forever; never ask for that.
        let wait_secs = timeout.as_secs().max(1);
        let read_timeout = Duration::from_secs(wait_secs).saturating_add(BLOCKING_READ_GRACE);

        let popped: Option<(String, String)> = self
            .connections
            .with_connection(read_timeout, |conn| {
                redis::cmd("BRPOP").arg(list).arg(wait_secs).query(conn)
            })
            .map_err(|e| QueueError::Store(format!("BRPOP failed: {e}")))?;

        Ok(popped.map(|(_key, payload)| payload))
    }

    fn len(&self, list: &str) -> Result<u64, QueueError> {
        self.connections
            .with_connection(self.timeout, |conn| redis::cmd("LLEN").arg(list).query(conn))
            .map_err(|e| QueueError::Store(format!("LLEN failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::Utc;
    use intake_core::{EventId, ReportSubmission, WorkItem};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::queue::{DurableQueue, QueueNames, RequeueOutcome};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn store() -> RedisListStore {
        RedisListStore::new(redis_url(), Duration::from_secs(2)).unwrap()
    }

    /// Per-test list names so runs never touch the production lists.
    fn names() -> QueueNames {
        let run = EventId::new();
        QueueNames {
            main: format!("bug_reports:test-{run}:queue"),
            dead_letter: format!("bug_reports:test-{run}:dlq"),
        }
    }

    fn delete(names: &QueueNames) {
        let mut conn = redis::Client::open(redis_url()).unwrap().get_connection().unwrap();
        let _: i64 = redis::cmd("DEL")
            .arg(&names.main)
            .arg(&names.dead_letter)
            .query(&mut conn)
            .unwrap();
    }

    fn item() -> WorkItem {
        WorkItem::accept(
            ReportSubmission {
                site_id: "redis.example".to_string(),
                report_type: Some("bug".to_string()),
                title: "Form resets".to_string(),
                description: "Contact form clears on submit".to_string(),
                category: "forms".to_string(),
                page_url: None,
                contact_type: None,
                contact_value: None,
                first_name: None,
                last_name: None,
                image_urls: vec!["https://img.example/f.png".to_string()],
            },
            Utc::now(),
        )
    }

    #[test]
    fn unreachable_store_reports_store_error() {
        let store = RedisListStore::new("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        assert!(matches!(store.ping(), Err(QueueError::Store(_))));
        assert!(matches!(store.len("q"), Err(QueueError::Store(_))));
    }

    #[test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    fn empty_list_pop_times_out_with_none() {
        let store = store();
        let names = names();

        // Sub-second waits go out as a whole second.
        let started = Instant::now();
        let popped = store.blocking_pop(&names.main, Duration::from_millis(200)).unwrap();

        assert_eq!(popped, None);
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert!(started.elapsed() < Duration::from_secs(1) + BLOCKING_READ_GRACE);
    }

    #[test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    fn push_then_pop_is_fifo_and_lossless() {
        let store = Arc::new(store());
        let names = names();
        let queue = DurableQueue::new(store.clone()).with_names(names.clone());
        let cancel = CancellationToken::new();
        let first = item();
        let second = item();

        queue.push(&first).unwrap();
        queue.push(&second).unwrap();
        assert_eq!(queue.queue_length().unwrap(), 2);

        let a = queue.blocking_pop(Duration::from_secs(1), &cancel).unwrap().unwrap();
        let b = queue.blocking_pop(Duration::from_secs(1), &cancel).unwrap().unwrap();
        delete(&names);

        assert_eq!(a, first);
        assert_eq!(b, second);
        assert_eq!(store.connections.idle_count(), 1);
    }

    #[test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    fn fifth_failure_lands_on_dead_letter_list() {
        let names = names();
        let queue = DurableQueue::new(Arc::new(store())).with_names(names.clone());
        let cancel = CancellationToken::new();
        let mut original = item();
        original.retry_count = 4;
        queue.push(&original).unwrap();

        let mut popped = queue.blocking_pop(Duration::from_secs(1), &cancel).unwrap().unwrap();
        let outcome = queue.requeue(&mut popped).unwrap();

        let main_len = queue.queue_length().unwrap();
        let dead_len = queue.dead_letter_length().unwrap();
        let dead = DurableQueue::new(Arc::new(store()))
            .with_names(QueueNames {
                main: names.dead_letter.clone(),
                dead_letter: names.dead_letter.clone(),
            })
            .blocking_pop(Duration::from_secs(1), &cancel)
            .unwrap()
            .unwrap();
        delete(&names);

        assert_eq!(outcome, RequeueOutcome::DeadLettered { retry_count: 5 });
        assert_eq!(main_len, 0);
        assert_eq!(dead_len, 1);
        assert_eq!(dead.event_id, original.event_id);
        assert_eq!(dead.retry_count, 5);
    }
}

//! In-process rate-limit store for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use intake_core::{BucketState, TokenBucket};

use super::{RateLimitError, RateLimitStore};

/// Single-process stand-in for the shared store.
///
/// The whole read-modify-write runs under one mutex, which gives the same
/// atomicity the Redis script gives across processes.
#[derive(Debug)]
pub struct InMemoryRateLimitStore {
    buckets: Mutex<HashMap<String, BucketState>>,
    ttl_ms: i64,
    unavailable: AtomicBool,
}

impl InMemoryRateLimitStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate the store going away (every call errors) or coming back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of identities currently holding state.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn state(&self, key: &str) -> Option<BucketState> {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn try_take(&self, key: &str, bucket: &TokenBucket, now_ms: i64) -> Result<bool, RateLimitError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RateLimitError::Unavailable("in-memory store offline".to_string()));
        }

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        // Idle state expires exactly like a Redis key TTL would.
        let ttl_ms = self.ttl_ms;
        buckets.retain(|_, s| now_ms.saturating_sub(s.last_refill_ms) < ttl_ms);

        let (next, allowed) = bucket.try_take(buckets.get(key).copied(), now_ms);
        buckets.insert(key.to_string(), next);
        Ok(allowed)
    }
}

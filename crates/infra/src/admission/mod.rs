//! Admission gate: a per-identity token bucket shared by every API instance.
//!
//! ## Design
//!
//! - Bucket state lives in the shared store, keyed `rl:{identity}`
//! - Refill, compare, debit, write-back and TTL refresh run as one atomic
//!   operation in the store (a Lua script for Redis)
//! - State expires after a period of inactivity
//! - If the store cannot be reached the gate fails open and logs it

pub mod identity;
pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use tracing::{debug, error};

use intake_core::TokenBucket;

pub use identity::{client_identity, InvalidNetwork, IpNetwork, TrustedProxies};
pub use in_memory::InMemoryRateLimitStore;
#[cfg(feature = "redis")]
pub use redis::RedisRateLimitStore;

/// Key prefix of per-identity bucket state in the shared store.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rl:";

/// Store key holding the bucket of `identity`.
pub fn rate_limit_key(identity: &str) -> String {
    format!("{RATE_LIMIT_KEY_PREFIX}{identity}")
}

/// Rate-limit backend error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Shared-store backend of the admission gate.
pub trait RateLimitStore: Send + Sync {
    /// Atomically refill the bucket at `key` to `now_ms`, debit one token if
    /// one is available, write the state back and refresh its expiry.
    ///
    /// Returns whether the attempt was admitted.
    fn try_take(&self, key: &str, bucket: &TokenBucket, now_ms: i64) -> Result<bool, RateLimitError>;
}

impl<T: RateLimitStore + ?Sized> RateLimitStore for Arc<T> {
    fn try_take(&self, key: &str, bucket: &TokenBucket, now_ms: i64) -> Result<bool, RateLimitError> {
        (**self).try_take(key, bucket, now_ms)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A token was debited.
    Allowed,
    /// The bucket was empty.
    Denied,
    /// The store was unreachable; let through without accounting.
    AllowedUnchecked,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Denied)
    }
}

/// Per-identity admission control in front of the producer.
#[derive(Clone)]
pub struct AdmissionGate {
    store: Arc<dyn RateLimitStore>,
    bucket: TokenBucket,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl AdmissionGate {
    pub fn new(store: Arc<dyn RateLimitStore>, bucket: TokenBucket) -> Self {
        Self { store, bucket }
    }

    /// Decide whether one unit of work from `identity` may proceed.
    pub fn try_acquire(&self, identity: &str, now_ms: i64) -> Admission {
        match self.store.try_take(&rate_limit_key(identity), &self.bucket, now_ms) {
            Ok(true) => Admission::Allowed,
            Ok(false) => {
                debug!(identity = %identity, "rate limit exceeded");
                Admission::Denied
            }
            Err(e) => {
                error!(identity = %identity, error = %e, "rate limiter unavailable, failing open");
                Admission::AllowedUnchecked
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(rps: u32) -> (Arc<InMemoryRateLimitStore>, AdmissionGate) {
        let store = Arc::new(InMemoryRateLimitStore::default());
        let gate = AdmissionGate::new(store.clone(), TokenBucket::per_second(rps).unwrap());
        (store, gate)
    }

    #[test]
    fn burst_of_25_at_rate_10_admits_20() {
        let (_, gate) = gate(10);
        let results: Vec<_> = (0..25).map(|_| gate.try_acquire("203.0.113.1", 5_000)).collect();

        assert_eq!(results.iter().filter(|a| **a == Admission::Allowed).count(), 20);
        assert_eq!(results.iter().filter(|a| **a == Admission::Denied).count(), 5);
    }

    #[test]
    fn identities_have_independent_buckets() {
        let (_, gate) = gate(1);
        assert!(gate.try_acquire("a", 0).is_allowed());
        assert!(gate.try_acquire("a", 0).is_allowed());
        assert!(!gate.try_acquire("a", 0).is_allowed());
        assert!(gate.try_acquire("b", 0).is_allowed());
    }

    #[test]
    fn fails_open_when_store_is_down() {
        let (store, gate) = gate(1);
        store.set_unavailable(true);
        for _ in 0..10 {
            assert_eq!(gate.try_acquire("a", 0), Admission::AllowedUnchecked);
        }

        store.set_unavailable(false);
        assert_eq!(gate.try_acquire("a", 0), Admission::Allowed);
    }

    #[test]
    fn concurrent_callers_never_overspend() {
        let (_, gate) = gate(50);
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| gate.try_acquire("shared", 1_000).is_allowed())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    #[test]
    fn key_is_prefixed_identity() {
        assert_eq!(rate_limit_key("198.51.100.4"), "rl:198.51.100.4");
    }
}

//! Token-bucket arithmetic shared by every admission backend.
//!
//! The Redis backend runs the same computation inside a Lua script; the
//! in-memory backend calls [`TokenBucket::try_take`] directly. Keeping the
//! math here lets both be checked against one set of properties.

use crate::error::{DomainError, DomainResult};

/// Persisted per-identity bucket state.
///
/// Invariant: `0 <= tokens <= burst` of the bucket that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: i64,
}

/// Continuous-refill token bucket: `rate` tokens/second, capacity `2 * rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
}

impl TokenBucket {
    /// Bucket refilling at `rps` tokens per second with a burst of `2 * rps`.
    pub fn per_second(rps: u32) -> DomainResult<Self> {
        if rps == 0 {
            return Err(DomainError::validation("rate limit must be at least 1 request/second"));
        }
        let rate = f64::from(rps);
        Ok(Self {
            rate,
            burst: rate * 2.0,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Bring `state` forward to `now_ms`.
    ///
    /// A missing state is a full bucket. Elapsed time is never negative, so a
    /// caller whose clock lags the last writer gets no refill and does not
    /// move the timestamp backwards.
    pub fn refill(&self, state: Option<BucketState>, now_ms: i64) -> BucketState {
        let Some(state) = state else {
            return BucketState {
                tokens: self.burst,
                last_refill_ms: now_ms,
            };
        };

        let elapsed_s = (now_ms - state.last_refill_ms).max(0) as f64 / 1000.0;
        let tokens = (state.tokens + elapsed_s * self.rate).clamp(0.0, self.burst);

        BucketState {
            tokens,
            last_refill_ms: state.last_refill_ms.max(now_ms),
        }
    }

    /// Refill, then debit one token if available.
    ///
    /// Returns the state to write back and whether the attempt was admitted.
    /// The state must be written back on denial too, so the refill timestamp
    /// keeps advancing.
    pub fn try_take(&self, state: Option<BucketState>, now_ms: i64) -> (BucketState, bool) {
        let mut next = self.refill(state, now_ms);
        if next.tokens < 1.0 {
            return (next, false);
        }
        next.tokens -= 1.0;
        (next, true)
    }
}

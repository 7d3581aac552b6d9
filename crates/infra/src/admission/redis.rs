//! Redis-backed rate-limit store (atomic Lua token bucket).

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use intake_core::TokenBucket;

use super::{RateLimitError, RateLimitStore};
use crate::connection_cache::{ConnectionCache, DEFAULT_MAX_IDLE};

/// Token bucket evaluated inside Redis so concurrent API instances cannot
/// interleave their read-modify-write.
///
/// KEYS[1]: bucket key (`rl:{identity}`)
/// ARGV[1]: current time in milliseconds
/// ARGV[2]: refill rate (tokens per second)
/// ARGV[3]: burst size (max tokens)
/// ARGV[4]: key TTL in seconds
///
/// Returns 1 if admitted, 0 if not. Same arithmetic as `TokenBucket::try_take`.
const TOKEN_BUCKET_LUA: &str = r#"
local key    = KEYS[1]
local now_ms = tonumber(ARGV[1])
local rate   = tonumber(ARGV[2])
local burst  = tonumber(ARGV[3])
local ttl    = tonumber(ARGV[4])

local data    = redis.call('HMGET', key, 't', 'ts')
local tokens  = tonumber(data[1])
local last_ms = tonumber(data[2])

if tokens == nil or last_ms == nil then
    tokens  = burst
    last_ms = now_ms
end

local elapsed_s = math.max(0, now_ms - last_ms) / 1000
tokens = math.max(0, math.min(burst, tokens + elapsed_s * rate))
last_ms = math.max(last_ms, now_ms)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('HSET', key, 't', tostring(tokens), 'ts', tostring(last_ms))
redis.call('EXPIRE', key, ttl)
return allowed
"#;

#[derive(Debug, Clone)]
pub struct RedisRateLimitStore {
    connections: Arc<ConnectionCache>,
    script: Arc<redis::Script>,
    ttl: Duration,
    timeout: Duration,
}

impl RedisRateLimitStore {
    /// Create a store against `redis_url`.
    ///
    /// * `ttl` - idle expiry of bucket state (refreshed on every check)
    /// * `timeout` - connect/read/write bound per check
    ///
    /// Connections are opened lazily and reused across checks.
    pub fn new(
        redis_url: impl AsRef<str>,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Self, RateLimitError> {
        let connections = ConnectionCache::open(redis_url.as_ref(), timeout, DEFAULT_MAX_IDLE)
            .map_err(|e| RateLimitError::Unavailable(e.to_string()))?;

        Ok(Self {
            connections: Arc::new(connections),
            script: Arc::new(redis::Script::new(TOKEN_BUCKET_LUA)),
            ttl,
            timeout,
        })
    }
}

impl RateLimitStore for RedisRateLimitStore {
    // No `err` here: the gate logs the fail-open decision itself.
    #[instrument(skip(self, bucket))]
    fn try_take(&self, key: &str, bucket: &TokenBucket, now_ms: i64) -> Result<bool, RateLimitError> {
        // EVALSHA, falling back to EVAL on NOSCRIPT; one round trip either way.
        let allowed: i64 = self
            .connections
            .with_connection(self.timeout, |conn| {
                self.script
                    .key(key)
                    .arg(now_ms)
                    .arg(bucket.rate())
                    .arg(bucket.burst())
                    .arg(self.ttl.as_secs().max(1))
                    .invoke(conn)
            })
            .map_err(|e| RateLimitError::Unavailable(format!("token bucket script failed: {e}")))?;

        Ok(allowed == 1)
    }
}

#[cfg(test)]
mod tests {
    use intake_core::{BucketState, EventId};

    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn store() -> RedisRateLimitStore {
        RedisRateLimitStore::new(redis_url(), Duration::from_secs(300), Duration::from_secs(2)).unwrap()
    }

    fn fresh_key() -> String {
        format!("rl:test-{}", EventId::new())
    }

    fn raw_connection() -> redis::Connection {
        redis::Client::open(redis_url()).unwrap().get_connection().unwrap()
    }

    fn delete(key: &str) {
        let _: i64 = redis::cmd("DEL").arg(key).query(&mut raw_connection()).unwrap();
    }

    #[test]
    fn unreachable_store_is_unavailable() {
        let store = RedisRateLimitStore::new(
            "redis://127.0.0.1:1",
            Duration::from_secs(300),
            Duration::from_millis(200),
        )
        .unwrap();
        let bucket = TokenBucket::per_second(10).unwrap();

        let err = store.try_take("rl:nobody", &bucket, 0).unwrap_err();
        assert!(matches!(err, RateLimitError::Unavailable(_)));
    }

    #[test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    fn instant_burst_of_25_at_rate_10_admits_20() {
        let store = store();
        let bucket = TokenBucket::per_second(10).unwrap();
        let key = fresh_key();

        let allowed = (0..25)
            .filter(|_| store.try_take(&key, &bucket, 1_000_000).unwrap())
            .count();

        delete(&key);
        assert_eq!(allowed, 20);
    }

    #[test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    fn bucket_key_carries_ttl() {
        let store = store();
        let bucket = TokenBucket::per_second(10).unwrap();
        let key = fresh_key();

        store.try_take(&key, &bucket, 1_000_000).unwrap();
        let ttl: i64 = redis::cmd("TTL").arg(&key).query(&mut raw_connection()).unwrap();

        delete(&key);
        assert!((1..=300).contains(&ttl), "unexpected TTL {ttl}");
    }

    #[test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    fn script_agrees_with_in_process_bucket() {
        let store = store();
        let bucket = TokenBucket::per_second(4).unwrap();
        let key = fresh_key();
        // Bursts, partial refills, a clock step backwards, and a long idle gap.
        // Steps are multiples of 125ms so every token count is exact in binary
        // and survives the script's string round trip.
        let times = [
            0, 0, 0, 0, 0, 0, 0, 0, 0, 125, 250, 250, 500, 375, 1_000, 1_000, 1_000, 3_000,
            3_000, 3_000, 3_000, 3_000, 3_000, 3_000, 3_000, 3_000, 3_125,
        ];

        let mut state: Option<BucketState> = None;
        for (i, now_ms) in times.iter().copied().enumerate() {
            let (next, expected) = bucket.try_take(state, now_ms);
            state = Some(next);
            let got = store.try_take(&key, &bucket, now_ms).unwrap();
            assert_eq!(got, expected, "call {i} at {now_ms}ms");
        }

        let (tokens, ts): (String, String) = redis::cmd("HMGET")
            .arg(&key)
            .arg("t")
            .arg("ts")
            .query(&mut raw_connection())
            .unwrap();
        delete(&key);

        let state = state.unwrap();
        assert!((tokens.parse::<f64>().unwrap() - state.tokens).abs() < 1e-6);
        assert_eq!(ts.parse::<f64>().unwrap() as i64, state.last_refill_ms);
    }

    #[test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    fn connection_is_reused_across_checks() {
        let store = store();
        let bucket = TokenBucket::per_second(10).unwrap();
        let key = fresh_key();

        for _ in 0..5 {
            store.try_take(&key, &bucket, 1_000_000).unwrap();
        }

        delete(&key);
        assert_eq!(store.connections.idle_count(), 1);
    }
}

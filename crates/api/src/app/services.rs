use std::sync::Arc;

use intake_core::TokenBucket;
use intake_infra::{
    admission::{AdmissionGate, InMemoryRateLimitStore, RedisRateLimitStore, TrustedProxies},
    config::Config,
    queue::{DurableQueue, InMemoryListStore, Producer, RedisListStore},
};

/// Everything a request handler touches.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub gate: Arc<AdmissionGate>,
    pub trusted_proxies: Arc<TrustedProxies>,
    pub producer: Producer,
    /// Read-only inspection for `/health`.
    pub queue: DurableQueue,
}

impl AppServices {
    pub fn new(gate: AdmissionGate, queue: DurableQueue, trusted_proxies: TrustedProxies) -> Self {
        Self {
            gate: Arc::new(gate),
            trusted_proxies: Arc::new(trusted_proxies),
            producer: Producer::new(queue.clone()),
            queue,
        }
    }

    /// Single-process wiring with no external store (dev/test).
    pub fn in_memory(bucket: TokenBucket) -> Self {
        let gate = AdmissionGate::new(Arc::new(InMemoryRateLimitStore::default()), bucket);
        let queue = DurableQueue::new(Arc::new(InMemoryListStore::new()));
        Self::new(gate, queue, TrustedProxies::none())
    }
}

/// Wire the gate and queue to the shared Redis store.
///
/// Fails fast if the store cannot be reached at startup; later outages are
/// handled per request (admission fails open, enqueue returns 503).
pub fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let bucket = TokenBucket::per_second(config.rate_limit_rps)?;

    let list_store = RedisListStore::new(&config.redis_url, config.store_timeout)?;
    list_store.ping()?;
    let queue = DurableQueue::new(Arc::new(list_store));

    let limiter = RedisRateLimitStore::new(
        &config.redis_url,
        config.rate_limit_ttl,
        config.store_timeout,
    )?;
    let gate = AdmissionGate::new(Arc::new(limiter), bucket);

    tracing::info!(
        rate_limit_rps = bucket.rate(),
        burst = bucket.burst(),
        trusted_proxies = !config.trusted_proxies.is_empty(),
        "services wired to shared store"
    );

    Ok(AppServices::new(gate, queue, config.trusted_proxies.clone()))
}

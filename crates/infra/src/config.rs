//! Process configuration read from the environment.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::admission::{InvalidNetwork, TrustedProxies};

const MAX_POLL_TIMEOUT_SECS: u64 = 300;
const MAX_STORE_TIMEOUT_MS: u64 = 60_000;
const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 3_600;
const MAX_RATE_LIMIT_TTL_SECS: u64 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not set")]
    Missing { name: &'static str },

    #[error("{name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings shared by the intake API and the worker process.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    database_url: Option<String>,
    /// Sustained admissions per second per client; burst is twice this.
    pub rate_limit_rps: u32,
    pub worker_concurrency: usize,
    pub trusted_proxies: TrustedProxies,
    pub queue_poll_timeout: Duration,
    /// Per-call bound on rate-limit and queue store round trips.
    pub store_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Idle lifetime of a client's bucket state.
    pub rate_limit_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let rate_limit_rps: u32 = parse(&get, "RATE_LIMIT_RPS", 10)?;
        if rate_limit_rps == 0 {
            return Err(invalid("RATE_LIMIT_RPS", "0", "must be at least 1"));
        }
        let worker_concurrency: usize = parse(&get, "WORKER_CONCURRENCY", 10)?;
        if worker_concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "0", "must be at least 1"));
        }
        let poll_secs = parse_within(&get, "QUEUE_POLL_TIMEOUT_SECS", 5, 1..=MAX_POLL_TIMEOUT_SECS)?;

        let trusted_proxies = match get("TRUSTED_PROXIES") {
            Some(raw) => TrustedProxies::parse(&raw)
                .map_err(|e: InvalidNetwork| invalid("TRUSTED_PROXIES", &raw, &e.to_string()))?,
            None => TrustedProxies::none(),
        };

        Ok(Self {
            port: parse(&get, "PORT", 8080)?,
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            database_url: get("DATABASE_URL"),
            rate_limit_rps,
            worker_concurrency,
            trusted_proxies,
            queue_poll_timeout: Duration::from_secs(poll_secs),
            store_timeout: Duration::from_millis(parse_within(
                &get,
                "STORE_TIMEOUT_MS",
                2000,
                1..=MAX_STORE_TIMEOUT_MS,
            )?),
            shutdown_timeout: Duration::from_secs(parse_within(
                &get,
                "SHUTDOWN_TIMEOUT_SECS",
                30,
                0..=MAX_SHUTDOWN_TIMEOUT_SECS,
            )?),
            rate_limit_ttl: Duration::from_secs(parse_within(
                &get,
                "RATE_LIMIT_TTL_SECS",
                300,
                1..=MAX_RATE_LIMIT_TTL_SECS,
            )?),
        })
    }

    /// Durable store URL; only the worker needs it.
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing {
                name: "DATABASE_URL",
            })
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, &raw, &e.to_string())),
    }
}

/// `parse` for durations, rejecting values outside `range`.
fn parse_within(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = parse(get, name, default)?;
    if !range.contains(&value) {
        return Err(invalid(
            name,
            &value.to_string(),
            &format!("must be between {} and {}", range.start(), range.end()),
        ));
    }
    Ok(value)
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

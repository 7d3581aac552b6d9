//! Infrastructure layer: shared-store adapters, durable sink, workers, config.

pub mod admission;
pub mod config;
#[cfg(feature = "redis")]
mod connection_cache;
pub mod queue;
pub mod sink;
pub mod workers;

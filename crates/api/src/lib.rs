//! HTTP API: thin axum glue in front of the admission gate and producer.

pub mod app;
pub mod middleware;

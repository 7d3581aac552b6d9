//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: shared-store wiring (admission gate, producer, queue)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// rate limiter can see the peer address.
pub fn build_app(services: AppServices) -> Router {
    let limiter = middleware::RateLimitState {
        gate: services.gate.clone(),
        trusted_proxies: services.trusted_proxies.clone(),
    };
    let services = Arc::new(services);

    // Rate-limited submission routes.
    let v1 = routes::router().layer(axum::middleware::from_fn_with_state(
        limiter,
        middleware::rate_limit_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/v1", v1)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

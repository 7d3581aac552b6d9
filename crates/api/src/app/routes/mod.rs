use axum::{routing::post, Router};

pub mod reports;
pub mod system;

/// Router for rate-limited endpoints (mounted under `/v1`).
pub fn router() -> Router {
    Router::new().route("/reports", post(reports::submit))
}

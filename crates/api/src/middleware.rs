use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use intake_infra::admission::{client_identity, Admission, AdmissionGate, TrustedProxies};

use crate::app::errors::json_error;

#[derive(Clone)]
pub struct RateLimitState {
    pub gate: Arc<AdmissionGate>,
    pub trusted_proxies: Arc<TrustedProxies>,
}

/// Debit one token for the caller's identity before the handler runs.
///
/// An empty bucket yields `429` with `Retry-After: 1`. If the limiter's store
/// is unreachable the request proceeds.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let identity = client_identity(
        peer,
        header_str(req.headers(), "x-forwarded-for"),
        header_str(req.headers(), "x-real-ip"),
        &state.trusted_proxies,
    );

    let gate = state.gate.clone();
    let now_ms = Utc::now().timestamp_millis();
    let admission = tokio::task::spawn_blocking(move || gate.try_acquire(&identity, now_ms))
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "rate limit check aborted, failing open");
            Admission::AllowedUnchecked
        });

    if !admission.is_allowed() {
        return too_many_requests();
    }

    next.run(req).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn too_many_requests() -> Response {
    let mut res = json_error(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "too many requests, slow down",
    );
    res.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    res
}

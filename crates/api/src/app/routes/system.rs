use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::app::{dto::HealthResponse, services::AppServices};

/// Liveness plus queue depth. A store error reports `degraded` with `503`.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let queue = services.queue.clone();
    let lengths = tokio::task::spawn_blocking(move || {
        Ok::<_, intake_infra::queue::QueueError>((queue.queue_length()?, queue.dead_letter_length()?))
    })
    .await;

    match lengths {
        Ok(Ok((queue_length, dead_letter_length))) => Json(HealthResponse {
            status: "ok",
            queue_length: Some(queue_length),
            dead_letter_length: Some(dead_letter_length),
        })
        .into_response(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "health check could not read queue lengths");
            degraded()
        }
        Err(e) => {
            tracing::warn!(error = %e, "health check task aborted");
            degraded()
        }
    }
}

fn degraded() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthResponse {
            status: "degraded",
            queue_length: None,
            dead_letter_length: None,
        }),
    )
        .into_response()
}

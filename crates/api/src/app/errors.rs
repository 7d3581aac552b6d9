use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use intake_infra::queue::EnqueueError;

/// Every enqueue failure means "not accepted, retry later".
pub fn enqueue_error_to_response(err: EnqueueError) -> axum::response::Response {
    match err {
        EnqueueError::Unavailable(_) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_unavailable",
            "report could not be queued, retry later",
        ),
        EnqueueError::Serialization(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

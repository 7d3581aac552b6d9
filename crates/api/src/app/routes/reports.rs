use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use intake_core::ReportSubmission;

use crate::app::{
    dto::ReportAccepted,
    errors::{enqueue_error_to_response, json_error},
    services::AppServices,
};

/// Accept a submission: assign its event id and hand it to the queue.
///
/// `202` means the report is durably queued, not yet stored.
pub async fn submit(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<ReportSubmission>, JsonRejection>,
) -> Response {
    let Json(submission) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text());
        }
    };

    let producer = services.producer.clone();
    let received_at = Utc::now();
    match tokio::task::spawn_blocking(move || producer.submit(submission, received_at)).await {
        Ok(Ok(event_id)) => (
            StatusCode::ACCEPTED,
            Json(ReportAccepted {
                event_id,
                queued: true,
            }),
        )
            .into_response(),
        Ok(Err(e)) => enqueue_error_to_response(e),
        Err(e) => {
            tracing::error!(error = %e, "enqueue task aborted");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "report could not be queued",
            )
        }
    }
}

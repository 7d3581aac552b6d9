use serde::Serialize;

use intake_core::EventId;

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ReportAccepted {
    pub event_id: EventId,
    pub queued: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_length: Option<u64>,
    pub dead_letter_length: Option<u64>,
}

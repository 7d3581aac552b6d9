//! Report submission, queue work item, and persisted record.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::id::EventId;

/// A validated, sanitized submission handed over by the HTTP layer.
///
/// Validation is the caller's job; the pipeline only rate-gates, queues,
/// retries and stores what it is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSubmission {
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

/// The unit of work carried by the durable queue.
///
/// ## Wire format
///
/// Serialized as a JSON object. `received_at` is RFC 3339 UTC. Fields this
/// version does not know about are kept in `extra` and written back on
/// requeue, so a worker never strips data added by a newer producer.
///
/// ## Ownership
///
/// An item lives in exactly one place at a time: the main list, one worker's
/// memory, or the dead-letter list. `retry_count` only ever goes up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub event_id: EventId,
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl WorkItem {
    /// Wrap an accepted submission, assigning its permanent event id.
    pub fn accept(submission: ReportSubmission, received_at: DateTime<Utc>) -> Self {
        Self::with_id(EventId::new(), submission, received_at)
    }

    /// Same as [`WorkItem::accept`] with a caller-chosen id.
    pub fn with_id(
        event_id: EventId,
        submission: ReportSubmission,
        received_at: DateTime<Utc>,
    ) -> Self {
        let ReportSubmission {
            site_id,
            report_type,
            title,
            description,
            category,
            page_url,
            contact_type,
            contact_value,
            first_name,
            last_name,
            image_urls,
        } = submission;

        Self {
            event_id,
            site_id,
            report_type,
            title,
            description,
            category,
            page_url,
            contact_type,
            contact_value,
            first_name,
            last_name,
            image_urls,
            received_at: received_at.trunc_subsecs(0),
            retry_count: 0,
            extra: Map::new(),
        }
    }
}

/// Lifecycle status of a stored report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    New,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::New => "new",
        }
    }
}

/// Row shape of a persisted report (one per `event_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub event_id: EventId,
    pub site_id: String,
    pub report_type: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub page_url: Option<String>,
    pub contact_type: Option<String>,
    pub contact_value: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_urls: Vec<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&WorkItem> for PersistedRecord {
    fn from(item: &WorkItem) -> Self {
        Self {
            event_id: item.event_id,
            site_id: item.site_id.clone(),
            report_type: item.report_type.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            category: item.category.clone(),
            page_url: item.page_url.clone(),
            contact_type: item.contact_type.clone(),
            contact_value: item.contact_value.clone(),
            first_name: item.first_name.clone(),
            last_name: item.last_name.clone(),
            image_urls: item.image_urls.clone(),
            status: ReportStatus::New,
            created_at: item.received_at,
        }
    }
}

//! `intake-core`: domain building blocks for the report intake pipeline.
//!
//! This crate contains **pure domain** types (no Redis, no Postgres, no HTTP).

pub mod error;
pub mod id;
pub mod rate;
pub mod report;

pub use error::{DomainError, DomainResult};
pub use id::EventId;
pub use rate::{BucketState, TokenBucket};
pub use report::{PersistedRecord, ReportStatus, ReportSubmission, WorkItem};

//! Postgres-backed report sink.
//!
//! ## Idempotency
//!
//! `INSERT ... ON CONFLICT (id) DO NOTHING` keyed by `event_id`; zero rows
//! affected means the record already existed.
//!
//! ## Error Mapping
//!
//! | SQLx Error | SinkError |
//! |------------|-----------|
//! | Io / Tls / PoolTimedOut / PoolClosed | `Unavailable` |
//! | Database (any SQLSTATE) | `Query` |
//! | Other | `Query` |
//! | outer deadline elapsed | `Timeout` |
//!
//! ## Threading
//!
//! Workers are plain OS threads; each call is driven to completion on the
//! stored runtime handle with `block_on`. Do not call `upsert` from inside a
//! runtime worker thread.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::runtime::Handle;
use tracing::{info, instrument};

use intake_core::{ReportStatus, WorkItem};

use super::{ReportSink, SinkError, UpsertOutcome};

const CREATE_BUG_REPORTS: &str = include_str!("../../migrations/001_create_bug_reports.sql");

/// Open a bounded connection pool and check it with a round trip.
pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<PgPool, SinkError> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| map_sqlx_error("ping", e))?;

    Ok(pool)
}

/// Apply the embedded schema (idempotent).
pub async fn migrate(pool: &PgPool) -> Result<(), SinkError> {
    info!("running database migrations");
    sqlx::raw_sql(CREATE_BUG_REPORTS)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    info!("database migrations completed");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresReportSink {
    pool: PgPool,
    runtime: Handle,
    statement_timeout: Duration,
}

impl PostgresReportSink {
    pub fn new(pool: PgPool, runtime: Handle, statement_timeout: Duration) -> Self {
        Self {
            pool,
            runtime,
            statement_timeout,
        }
    }

    async fn insert(&self, item: &WorkItem) -> Result<UpsertOutcome, SinkError> {
        let image_urls = (!item.image_urls.is_empty()).then(|| Json(&item.image_urls));

        let result = sqlx::query(
            r#"
            INSERT INTO bug_reports (
                id, site_id, report_type, title, description, category, page_url,
                contact_type, contact_value, first_name, last_name, image_urls,
                status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(item.event_id.as_uuid())
        .bind(&item.site_id)
        .bind(item.report_type.as_deref())
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.category)
        .bind(item.page_url.as_deref())
        .bind(item.contact_type.as_deref())
        .bind(item.contact_value.as_deref())
        .bind(item.first_name.as_deref())
        .bind(item.last_name.as_deref())
        .bind(image_urls)
        .bind(ReportStatus::New.as_str())
        .bind(item.received_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_report", e))?;

        Ok(if result.rows_affected() == 0 {
            UpsertOutcome::AlreadyPresent
        } else {
            UpsertOutcome::Inserted
        })
    }
}

impl ReportSink for PostgresReportSink {
    #[instrument(
        skip(self, item),
        fields(event_id = %item.event_id, retry_count = item.retry_count),
        err
    )]
    fn upsert(&self, item: &WorkItem) -> Result<UpsertOutcome, SinkError> {
        let deadline = self.statement_timeout;
        self.runtime.block_on(async {
            tokio::time::timeout(deadline, self.insert(item))
                .await
                .map_err(|_| SinkError::Timeout(deadline))?
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SinkError {
    match err {
        sqlx::Error::Io(e) => SinkError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => SinkError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::PoolTimedOut => {
            SinkError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            SinkError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            SinkError::Query(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        other => SinkError::Query(format!("sqlx error in {operation}: {other}")),
    }
}

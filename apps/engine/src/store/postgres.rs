use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;

use super::{JobStore, StoreError};
use crate::models::{DocumentPaths, JobRecord, JobStatus, StatusMetadata};

#[derive(Debug, Clone, FromRow)]
struct JobRow {
    primary_identifier: String,
    status: String,
    ats_type: Option<String>,
    application_url: Option<String>,
    job_title: Option<String>,
    company_name: Option<String>,
    description: Option<String>,
    resume_path: Option<String>,
    cover_letter_path: Option<String>,
    output_dir: Option<String>,
    attempt_count: i32,
    last_error: Option<String>,
    status_reason: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    last_attempted_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<JobStatus>().map_err(|e| StoreError::Corrupt {
            id: row.primary_identifier.clone(),
            detail: e.to_string(),
        })?;
        Ok(JobRecord {
            primary_identifier: row.primary_identifier,
            status,
            ats_type: row.ats_type,
            application_url: row.application_url,
            job_title: row.job_title,
            company_name: row.company_name,
            description: row.description,
            document_paths: DocumentPaths {
                resume: row.resume_path.map(PathBuf::from),
                cover_letter: row.cover_letter_path.map(PathBuf::from),
                output_dir: row.output_dir.map(PathBuf::from),
            },
            attempt_count: row.attempt_count,
            last_error: row.last_error,
            status_reason: row.status_reason,
            submitted_at: row.submitted_at,
            last_attempted_at: row.last_attempted_at,
            updated_at: row.updated_at,
        })
    }
}

const JOB_COLUMNS: &str = "primary_identifier, status, ats_type, application_url, job_title, \
     company_name, description, resume_path, cover_letter_path, output_dir, attempt_count, \
     last_error, status_reason, submitted_at, last_attempted_at, updated_at";

/// Postgres-backed store over the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE primary_identifier = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn list_eligible(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(JobStatus::DocsReady.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        metadata: StatusMetadata,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2,
                status_reason = $3,
                last_error = COALESCE($4, last_error),
                ats_type = COALESCE($5, ats_type),
                submitted_at = COALESCE($6, submitted_at),
                attempt_count = attempt_count + CASE WHEN $7 THEN 1 ELSE 0 END,
                last_attempted_at = CASE WHEN $7 THEN NOW() ELSE last_attempted_at END,
                updated_at = NOW()
            WHERE primary_identifier = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&metadata.reason)
        .bind(&metadata.last_error)
        .bind(&metadata.ats_type)
        .bind(metadata.submitted_at)
        .bind(metadata.start_attempt)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        debug!("[{id}] status -> {status} ({})", metadata.reason);
        Ok(())
    }
}

//! Job store: where job records live and where status writes go.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{JobRecord, JobStatus, StatusMetadata};

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[cfg(test)]
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {id} has an unreadable record: {detail}")]
    Corrupt { id: String, detail: String },
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Jobs at `docs_ready`, oldest first.
    async fn list_eligible(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError>;

    /// Writes a status. `updated_at` is stamped on every write; `metadata.start_attempt`
    /// also bumps the attempt count and `last_attempted_at`.
    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        metadata: StatusMetadata,
    ) -> Result<(), StoreError>;
}

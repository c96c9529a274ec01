use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::{JobStore, StoreError};
use crate::models::{JobRecord, JobStatus, StatusMetadata};

/// In-process store. Insertion order stands in for creation time.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<IndexMap<String, JobRecord>>,
    writes: RwLock<Vec<(String, JobStatus)>>,
    /// Writes of this status fail while the count is above zero.
    failing: RwLock<Option<(JobStatus, usize)>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: JobRecord) {
        self.jobs
            .write()
            .await
            .insert(job.primary_identifier.clone(), job);
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Makes the next `times` writes of `status` fail.
    pub async fn fail_writes(&self, status: JobStatus, times: usize) {
        *self.failing.write().await = Some((status, times));
    }

    /// Every successful status write, in order.
    pub async fn writes(&self) -> Vec<(String, JobStatus)> {
        self.writes.read().await.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list_eligible(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == JobStatus::DocsReady)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        metadata: StatusMetadata,
    ) -> Result<(), StoreError> {
        if let Some((failing, remaining)) = self.failing.write().await.as_mut() {
            if *failing == status && *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
        }

        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let now = Utc::now();
        job.status = status;
        job.status_reason = Some(metadata.reason);
        if let Some(error) = metadata.last_error {
            job.last_error = Some(error);
        }
        if let Some(ats) = metadata.ats_type {
            job.ats_type = Some(ats);
        }
        if let Some(at) = metadata.submitted_at {
            job.submitted_at = Some(at);
        }
        if metadata.start_attempt {
            job.attempt_count += 1;
            job.last_attempted_at = Some(now);
        }
        job.updated_at = now;

        self.writes.write().await.push((id.to_string(), status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_status_applies_metadata() {
        let store = MemoryJobStore::new();
        store.insert(JobRecord::new("job-1")).await;

        store
            .update_status(
                "job-1",
                JobStatus::ApplicationInProgress,
                StatusMetadata {
                    reason: "attempt started".into(),
                    ats_type: Some("lever".into()),
                    start_attempt: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let job = store.fetch("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::ApplicationInProgress);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.ats_type.as_deref(), Some("lever"));
        assert!(job.last_attempted_at.is_some());
    }

    #[tokio::test]
    async fn test_list_eligible_only_docs_ready_in_order() {
        let store = MemoryJobStore::new();
        let mut done = JobRecord::new("done");
        done.status = JobStatus::AppliedSuccess;
        store.insert(JobRecord::new("a")).await;
        store.insert(done).await;
        store.insert(JobRecord::new("b")).await;
        store.insert(JobRecord::new("c")).await;

        let ids: Vec<String> = store
            .list_eligible(2)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.primary_identifier)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let result = store
            .update_status("ghost", JobStatus::ErrorUnknown, StatusMetadata::reason("x"))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}

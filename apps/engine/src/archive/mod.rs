//! Archival of a finished job's documents into `success/` or `failure/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::models::{JobRecord, JobStatus};

pub mod s3;

pub use s3::S3Archiver;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object storage error: {0}")]
    ObjectStore(String),
}

/// Folder name a terminal status is archived under.
pub fn archive_bucket(status: JobStatus) -> &'static str {
    if status.is_success() {
        "success"
    } else {
        "failure"
    }
}

/// Files to archive for a job: the whole output folder when it exists,
/// otherwise the individual documents.
pub(crate) async fn archive_sources(job: &JobRecord) -> Vec<PathBuf> {
    let docs = &job.document_paths;
    if let Some(dir) = &docs.output_dir {
        if fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return vec![dir.clone()];
        }
    }
    let mut sources = Vec::new();
    for path in [&docs.resume, &docs.cover_letter].into_iter().flatten() {
        if fs::metadata(path).await.is_ok() {
            sources.push(path.clone());
        }
    }
    sources
}

#[async_trait]
pub trait Archiver: Send + Sync {
    /// Moves the job's artifacts. Returns where they went, or `None` if there was nothing to move.
    async fn archive(&self, job: &JobRecord, status: JobStatus) -> Result<Option<String>, ArchiveError>;
}

/// Moves artifacts under `<root>/success` or `<root>/failure` on the local disk.
pub struct FsArchiver {
    root: PathBuf,
}

impl FsArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Archiver for FsArchiver {
    async fn archive(&self, job: &JobRecord, status: JobStatus) -> Result<Option<String>, ArchiveError> {
        let sources = archive_sources(job).await;
        if sources.is_empty() {
            debug!("[{}] Nothing to archive", job.primary_identifier);
            return Ok(None);
        }

        let bucket = self.root.join(archive_bucket(status));
        // A lone output folder keeps its name; loose documents get a folder named after the job.
        let dest_dir = match sources.as_slice() {
            [dir] if job.document_paths.output_dir.as_ref() == Some(dir) => bucket,
            _ => bucket.join(&job.primary_identifier),
        };
        fs::create_dir_all(&dest_dir).await?;

        for source in &sources {
            let Some(name) = source.file_name() else {
                continue;
            };
            let target = free_path(&dest_dir.join(name)).await;
            move_path(source, &target).await?;
        }

        info!(
            "[{}] Archived {} item(s) to {}",
            job.primary_identifier,
            sources.len(),
            dest_dir.display()
        );
        Ok(Some(dest_dir.display().to_string()))
    }
}

/// `path`, or `path` with a timestamp suffix if it is taken.
async fn free_path(path: &Path) -> PathBuf {
    if fs::metadata(path).await.is_err() {
        return path.to_path_buf();
    }
    let stem = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_{}", Utc::now().format("%Y%m%d%H%M%S")))
}

/// Rename, falling back to copy-and-delete across filesystems.
async fn move_path(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    if fs::metadata(from).await?.is_dir() {
        copy_dir(from, to).await?;
        fs::remove_dir_all(from).await?;
    } else {
        fs::copy(from, to).await?;
        fs::remove_file(from).await?;
    }
    Ok(())
}

async fn copy_dir(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        fs::create_dir_all(&dst).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), target).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_output_dir_moves_to_success() {
        let work = tempdir().unwrap();
        let out = work.path().join("acme_platform");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("resume.pdf"), b"%PDF").unwrap();
        let processed = work.path().join("processed");

        let mut job = JobRecord::new("job-1");
        job.document_paths.output_dir = Some(out.clone());
        job.document_paths.resume = Some(out.join("resume.pdf"));

        let dest = FsArchiver::new(&processed)
            .archive(&job, JobStatus::ManualInterventionSubmitted)
            .await
            .unwrap();

        assert_eq!(dest, Some(processed.join("success").display().to_string()));
        assert!(processed.join("success/acme_platform/resume.pdf").exists());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_loose_documents_move_to_failure_folder() {
        let work = tempdir().unwrap();
        let resume = work.path().join("resume.pdf");
        std::fs::write(&resume, b"%PDF").unwrap();
        let processed = work.path().join("processed");

        let mut job = JobRecord::new("job-2");
        job.document_paths.resume = Some(resume.clone());

        FsArchiver::new(&processed)
            .archive(&job, JobStatus::ErrorUnknown)
            .await
            .unwrap();

        assert!(processed.join("failure/job-2/resume.pdf").exists());
        assert!(!resume.exists());
    }

    #[tokio::test]
    async fn test_nothing_to_archive() {
        let work = tempdir().unwrap();
        let result = FsArchiver::new(work.path())
            .archive(&JobRecord::new("job-3"), JobStatus::AppliedSuccess)
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_bucket_follows_success() {
        assert_eq!(archive_bucket(JobStatus::AppliedSuccess), "success");
        assert_eq!(archive_bucket(JobStatus::ApplicationFailedAts), "failure");
        assert_eq!(archive_bucket(JobStatus::ManualInterventionClosedByUser), "failure");
    }
}

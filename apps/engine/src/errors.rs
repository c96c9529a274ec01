use thiserror::Error;

use crate::archive::ArchiveError;
use crate::browser::BrowserError;
use crate::cache::CacheError;
use crate::intervention::InterventionError;
use crate::models::JobStatus;
use crate::oracle::OracleError;
use crate::store::StoreError;

/// Engine-level error type.
///
/// Collaborator errors convert into this via `?`. At the job boundary every
/// variant is classified into a terminal [`JobStatus`] by [`EngineError::status`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Job {id} is not eligible for application (status {status})")]
    NotEligible { id: String, status: JobStatus },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Locator cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Intervention error: {0}")]
    Intervention(#[from] InterventionError),

    #[error("Application failed: {0}")]
    Application(#[from] ApplicationError),

    #[error("Job task panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// Terminal status a job ends in when this error escapes an attempt.
    pub fn status(&self) -> JobStatus {
        match self {
            EngineError::Application(e) => e.status,
            _ => JobStatus::ErrorUnknown,
        }
    }
}

/// A classified failure: the message is what lands in the job's `last_error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ApplicationError {
    pub status: JobStatus,
    pub message: String,
}

impl ApplicationError {
    pub fn ats_failure(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::ApplicationFailedAts,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::ErrorUnknown,
            message: message.into(),
        }
    }
}

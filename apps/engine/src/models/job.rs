//! Job records as seen by the application engine.
//!
//! The job store owns persistence; this module only defines the shape of a
//! record and the closed set of lifecycle statuses the engine reads and writes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Status
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a job. Stored as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Processing,
    TailoringFailed,
    GenerationFailed,
    DocsReady,
    ApplicationInProgress,
    AppliedSuccess,
    ApplicationFailedAts,
    ManualInterventionSubmitted,
    ManualInterventionClosedByUser,
    ErrorUnknown,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl JobStatus {
    pub const ALL: [JobStatus; 11] = [
        JobStatus::New,
        JobStatus::Processing,
        JobStatus::TailoringFailed,
        JobStatus::GenerationFailed,
        JobStatus::DocsReady,
        JobStatus::ApplicationInProgress,
        JobStatus::AppliedSuccess,
        JobStatus::ApplicationFailedAts,
        JobStatus::ManualInterventionSubmitted,
        JobStatus::ManualInterventionClosedByUser,
        JobStatus::ErrorUnknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Processing => "processing",
            JobStatus::TailoringFailed => "tailoring_failed",
            JobStatus::GenerationFailed => "generation_failed",
            JobStatus::DocsReady => "docs_ready",
            JobStatus::ApplicationInProgress => "application_in_progress",
            JobStatus::AppliedSuccess => "applied_success",
            JobStatus::ApplicationFailedAts => "application_failed_ats",
            JobStatus::ManualInterventionSubmitted => "manual_intervention_submitted",
            JobStatus::ManualInterventionClosedByUser => "manual_intervention_closed_by_user",
            JobStatus::ErrorUnknown => "error_unknown",
        }
    }

    /// Statuses the engine never moves a job out of on its own.
    /// `error_unknown` is terminal for a run but may be picked up by a later retry pass.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::AppliedSuccess
                | JobStatus::ApplicationFailedAts
                | JobStatus::ManualInterventionSubmitted
                | JobStatus::ManualInterventionClosedByUser
                | JobStatus::ErrorUnknown
        )
    }

    /// Statuses the engine will start (or resume) an application from.
    pub fn is_eligible(&self) -> bool {
        matches!(
            self,
            JobStatus::DocsReady | JobStatus::ApplicationInProgress | JobStatus::ErrorUnknown
        )
    }

    /// Outcomes that end with the application actually submitted.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            JobStatus::AppliedSuccess | JobStatus::ManualInterventionSubmitted
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Record
// ────────────────────────────────────────────────────────────────────────────

/// Tailored documents produced upstream for a single job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPaths {
    pub resume: Option<PathBuf>,
    pub cover_letter: Option<PathBuf>,
    /// Folder holding the generated documents; moved to success/ or failure/ after an attempt.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub primary_identifier: String,
    pub status: JobStatus,
    pub ats_type: Option<String>,
    pub application_url: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub description: Option<String>,
    pub document_paths: DocumentPaths,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub status_reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A minimal `docs_ready` record. Used by the in-memory store and tests.
    pub fn new(primary_identifier: impl Into<String>) -> Self {
        Self {
            primary_identifier: primary_identifier.into(),
            status: JobStatus::DocsReady,
            ats_type: None,
            application_url: None,
            job_title: None,
            company_name: None,
            description: None,
            document_paths: DocumentPaths::default(),
            attempt_count: 0,
            last_error: None,
            status_reason: None,
            submitted_at: None,
            last_attempted_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Human-readable label for logs and the interactive picker.
    pub fn display_name(&self) -> String {
        match (&self.job_title, &self.company_name) {
            (Some(title), Some(company)) => format!("{title} at {company}"),
            (Some(title), None) => title.clone(),
            (None, Some(company)) => company.clone(),
            (None, None) => self.primary_identifier.clone(),
        }
    }
}

/// Metadata attached to a status write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusMetadata {
    pub reason: String,
    pub last_error: Option<String>,
    pub ats_type: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Set on the `application_in_progress` write that opens an attempt.
    pub start_attempt: bool,
}

impl StatusMetadata {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert_eq!(
            "applied".parse::<JobStatus>(),
            Err(UnknownStatus("applied".to_string()))
        );
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::ManualInterventionClosedByUser).unwrap();
        assert_eq!(json, "\"manual_intervention_closed_by_user\"");
    }

    #[test]
    fn test_terminal_and_eligible_sets() {
        assert!(JobStatus::AppliedSuccess.is_terminal());
        assert!(!JobStatus::DocsReady.is_terminal());
        assert!(JobStatus::DocsReady.is_eligible());
        assert!(JobStatus::ApplicationInProgress.is_eligible());
        assert!(!JobStatus::New.is_eligible());
        assert!(!JobStatus::ApplicationFailedAts.is_eligible());
        assert!(JobStatus::ManualInterventionSubmitted.is_success());
    }

    #[test]
    fn test_display_name_falls_back_to_identifier() {
        let mut job = JobRecord::new("job-42");
        assert_eq!(job.display_name(), "job-42");
        job.job_title = Some("Platform Engineer".into());
        job.company_name = Some("Acme".into());
        assert_eq!(job.display_name(), "Platform Engineer at Acme");
    }
}

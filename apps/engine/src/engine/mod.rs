//! Application engine: owns one job's lifecycle from `docs_ready` to a
//! terminal status.
//!
//! ```text
//! docs_ready ──▶ application_in_progress ──▶ applied_success
//!                         │                  application_failed_ats
//!                         │                  manual_intervention_submitted
//!                         │                  manual_intervention_closed_by_user
//!                         └────────────────▶ error_unknown
//! ```
//!
//! Strategies run strictly one after another. Only a recoverable failure moves
//! the chain forward. A fatal failure or an exhausted chain goes to the
//! intervention controller when one is configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::Archiver;
use crate::browser::{BrowserSession, SessionFactory, SessionGuard};
use crate::cache::{CachedLocator, LocatorCache};
use crate::errors::{ApplicationError, EngineError};
use crate::intervention::{InterventionController, InterventionRequest};
use crate::models::{JobRecord, JobStatus, StatusMetadata, UserProfile};
use crate::oracle::JobContext;
use crate::strategy::ats::{identify_ats, UNKNOWN_ATS};
use crate::strategy::selector::should_continue;
use crate::strategy::{
    AttemptContext, AttemptOutcome, LocatorPromotion, StrategyDescriptor, StrategyRegistry,
    StrategySelector,
};

pub mod batch;

pub use batch::{BatchRunner, RunSummary};

/// Final result of one job, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub reason: String,
    pub strategies_tried: Vec<String>,
    pub escalated: bool,
}

/// How the strategy chain ended for one attempt.
#[derive(Debug)]
struct ChainResult {
    outcome: Option<AttemptOutcome>,
    /// One line per strategy run, for logs and the intervention prompt.
    progress: Vec<String>,
    tried: Vec<String>,
}

pub struct ApplicationEngine {
    store: Arc<dyn crate::store::JobStore>,
    registry: StrategyRegistry,
    chain: Vec<StrategyDescriptor>,
    sessions: Arc<dyn SessionFactory>,
    cache: Arc<dyn LocatorCache>,
    profile: Arc<UserProfile>,
    intervention: Option<Arc<InterventionController>>,
    archiver: Option<Arc<dyn Archiver>>,
}

impl ApplicationEngine {
    pub fn new(
        store: Arc<dyn crate::store::JobStore>,
        registry: StrategyRegistry,
        chain: Vec<StrategyDescriptor>,
        sessions: Arc<dyn SessionFactory>,
        cache: Arc<dyn LocatorCache>,
        profile: Arc<UserProfile>,
    ) -> Self {
        Self {
            store,
            registry,
            chain,
            sessions,
            cache,
            profile,
            intervention: None,
            archiver: None,
        }
    }

    pub fn with_intervention(mut self, controller: Arc<InterventionController>) -> Self {
        self.intervention = Some(controller);
        self
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    /// Runs one job to a terminal status.
    ///
    /// Returns `Err` only when the job was left untouched: it does not exist or
    /// is in a status this engine does not own. Every failure after the attempt
    /// starts is classified and written to the store instead.
    pub async fn apply(&self, job_id: &str) -> Result<JobOutcome, EngineError> {
        let job = self
            .store
            .fetch(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        if !job.status.is_eligible() {
            if job.status.is_terminal() {
                info!("[{job_id}] Already {}; nothing to do", job.status);
                return Ok(JobOutcome {
                    job_id: job_id.to_string(),
                    status: job.status,
                    reason: job.status_reason.clone().unwrap_or_default(),
                    strategies_tried: Vec::new(),
                    escalated: false,
                });
            }
            return Err(EngineError::NotEligible {
                id: job_id.to_string(),
                status: job.status,
            });
        }

        match self.run_attempt(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Ok(self.record_failure(&job, e).await),
        }
    }

    /// Records a job whose task panicked.
    pub async fn record_panic(&self, job_id: &str, message: String) -> JobOutcome {
        let job = match self.store.fetch(job_id).await {
            Ok(Some(job)) => job,
            _ => JobRecord::new(job_id),
        };
        self.record_failure(&job, EngineError::Panicked(message)).await
    }

    async fn run_attempt(&self, job: &JobRecord) -> Result<JobOutcome, EngineError> {
        let job_id = job.primary_identifier.as_str();

        let ats_type = job
            .ats_type
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| {
                job.application_url
                    .as_deref()
                    .and_then(identify_ats)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| UNKNOWN_ATS.to_string());

        if job.submitted_at.is_some() {
            info!("[{job_id}] Submission was already confirmed; not applying again");
            return self
                .finish(
                    job,
                    JobStatus::AppliedSuccess,
                    StatusMetadata::reason("submission already confirmed"),
                    Vec::new(),
                    false,
                )
                .await;
        }

        if job.status == JobStatus::ApplicationInProgress {
            info!("[{job_id}] Resuming attempt left in progress");
        } else {
            self.store
                .update_status(
                    job_id,
                    JobStatus::ApplicationInProgress,
                    StatusMetadata {
                        reason: "application attempt started".to_string(),
                        ats_type: Some(ats_type.clone()),
                        start_attempt: true,
                        ..Default::default()
                    },
                )
                .await?;
        }

        let (application_url, resume) = preflight(job).await?;
        let cover_letter = existing_file(job.document_paths.cover_letter.as_deref()).await;
        info!(
            "[{job_id}] Applying to {} via {application_url} (ATS: {ats_type})",
            job.display_name()
        );

        let session = SessionGuard::new(self.sessions.open().await?);
        let chain = self
            .run_chain(
                job,
                &ats_type,
                &application_url,
                &resume,
                cover_letter.as_deref(),
                session.session(),
            )
            .await;

        let result = match chain {
            Ok(chain) => self.conclude(job, &ats_type, chain, session.session()).await,
            Err(e) => Err(e),
        };

        // Closed only after any human decision has been made.
        if let Err(e) = session.close().await {
            warn!("[{job_id}] Failed to close browser session: {e}");
        }
        result
    }

    async fn run_chain(
        &self,
        job: &JobRecord,
        ats_type: &str,
        application_url: &str,
        resume: &Path,
        cover_letter: Option<&Path>,
        session: &dyn BrowserSession,
    ) -> Result<ChainResult, EngineError> {
        let job_id = &job.primary_identifier;
        let mut selector = StrategySelector::new(self.chain.clone());
        let mut result = ChainResult {
            outcome: None,
            progress: Vec::new(),
            tried: Vec::new(),
        };

        while let Some(selected) = selector.next(&self.registry, ats_type) {
            let name = selected.descriptor.name.clone();
            info!("[{job_id}] Trying strategy {name}");

            let ctx = AttemptContext {
                job,
                ats_type,
                application_url,
                resume,
                cover_letter,
                profile: &self.profile,
                descriptor: &selected.descriptor,
                job_context: JobContext::from(job),
            };
            let outcome = selected.strategy.attempt(&ctx, session).await?;

            info!("[{job_id}] Strategy {name} finished: {}", outcome.label());
            result.progress.push(format!("{name}: {}", describe(&outcome)));
            result.tried.push(name);

            let keep_going = should_continue(&outcome);
            result.outcome = Some(outcome);
            if !keep_going {
                break;
            }
        }

        if result.tried.is_empty() {
            warn!("[{job_id}] No strategy available for ATS {ats_type}");
        }
        Ok(result)
    }

    /// Turns the chain's result into a terminal status, escalating if needed.
    async fn conclude(
        &self,
        job: &JobRecord,
        ats_type: &str,
        chain: ChainResult,
        session: &dyn BrowserSession,
    ) -> Result<JobOutcome, EngineError> {
        let job_id = &job.primary_identifier;
        let last_reason = match &chain.outcome {
            Some(AttemptOutcome::Success(evidence)) => {
                let submitted_at = self.checkpoint_submission(job_id, &evidence.confirmation).await?;
                self.promote(ats_type, &evidence.promotions).await;
                let metadata = StatusMetadata {
                    reason: evidence.confirmation.clone(),
                    submitted_at: Some(submitted_at),
                    ..Default::default()
                };
                return self
                    .finish(job, JobStatus::AppliedSuccess, metadata, chain.tried, false)
                    .await;
            }
            Some(AttemptOutcome::EscalatedToHuman(disposition)) => {
                let status = disposition.to_status();
                let reason = format!("human disposition: {disposition}");
                let submitted_at = if status.is_success() {
                    Some(self.checkpoint_submission(job_id, &reason).await?)
                } else {
                    None
                };
                let metadata = StatusMetadata {
                    reason,
                    submitted_at,
                    ..Default::default()
                };
                return self.finish(job, status, metadata, chain.tried, true).await;
            }
            Some(AttemptOutcome::FatalFailure { reason })
            | Some(AttemptOutcome::RecoverableFailure { reason }) => reason.clone(),
            None => "no strategy available".to_string(),
        };

        let Some(controller) = &self.intervention else {
            let metadata = StatusMetadata::reason("all strategies failed").with_error(last_reason);
            return self
                .finish(job, JobStatus::ApplicationFailedAts, metadata, chain.tried, false)
                .await;
        };

        warn!("[{job_id}] Automation stopped ({last_reason}); escalating to a human");
        let request = InterventionRequest {
            job_id: job_id.clone(),
            job_title: job.job_title.clone(),
            company: job.company_name.clone(),
            application_url: job.application_url.clone().unwrap_or_default(),
            current_url: session.current_url().await.ok(),
            progress: chain.progress,
            last_error: Some(last_reason.clone()),
        };
        let disposition = controller.escalate(request).await?;
        let status = disposition.to_status();
        let reason = format!("human disposition: {disposition}");
        let submitted_at = if status.is_success() {
            Some(self.checkpoint_submission(job_id, &reason).await?)
        } else {
            None
        };
        let metadata = StatusMetadata {
            reason,
            last_error: Some(last_reason),
            submitted_at,
            ..Default::default()
        };
        self.finish(job, status, metadata, chain.tried, true).await
    }

    /// Stamps `submitted_at` while the job is still in progress, so a crash or a
    /// failed final write can never lead to a second submission.
    async fn checkpoint_submission(
        &self,
        job_id: &str,
        confirmation: &str,
    ) -> Result<DateTime<Utc>, EngineError> {
        let submitted_at = Utc::now();
        self.store
            .update_status(
                job_id,
                JobStatus::ApplicationInProgress,
                StatusMetadata {
                    reason: format!("submission confirmed: {confirmation}"),
                    submitted_at: Some(submitted_at),
                    ..Default::default()
                },
            )
            .await?;
        Ok(submitted_at)
    }

    async fn finish(
        &self,
        job: &JobRecord,
        status: JobStatus,
        metadata: StatusMetadata,
        strategies_tried: Vec<String>,
        escalated: bool,
    ) -> Result<JobOutcome, EngineError> {
        let job_id = &job.primary_identifier;
        let reason = metadata.reason.clone();
        self.store.update_status(job_id, status, metadata).await?;
        info!("[{job_id}] Final status: {status} ({reason})");
        self.archive(job, status).await;

        Ok(JobOutcome {
            job_id: job_id.clone(),
            status,
            reason,
            strategies_tried,
            escalated,
        })
    }

    /// Classifies an error that escaped the attempt and writes it.
    async fn record_failure(&self, job: &JobRecord, err: EngineError) -> JobOutcome {
        let job_id = &job.primary_identifier;
        let message = match &err {
            EngineError::Application(e) => e.message.clone(),
            other => other.to_string(),
        };

        // A confirmed submission is never put back into an eligible status.
        let confirmed = matches!(
            self.store.fetch(job_id).await,
            Ok(Some(current)) if current.submitted_at.is_some()
        );
        let (status, reason) = if confirmed {
            warn!("[{job_id}] Failed after the submission was confirmed: {message}");
            (JobStatus::AppliedSuccess, "submission already confirmed".to_string())
        } else {
            error!("[{job_id}] Attempt ended with {}: {message}", err.status());
            (err.status(), message.clone())
        };

        let metadata = StatusMetadata::reason(reason.clone()).with_error(message);
        if let Err(e) = self.store.update_status(job_id, status, metadata).await {
            error!("[{job_id}] Could not record status {status}: {e}");
        }
        // error_unknown stays eligible for a retry pass, so its documents stay put.
        if status != JobStatus::ErrorUnknown {
            self.archive(job, status).await;
        }

        JobOutcome {
            job_id: job_id.clone(),
            status,
            reason,
            strategies_tried: Vec::new(),
            escalated: false,
        }
    }

    async fn promote(&self, ats_type: &str, promotions: &[LocatorPromotion]) {
        for promotion in promotions {
            if promotion.key.ats_type != ats_type {
                debug!("Skipping promotion for foreign ATS key {}", promotion.key.render());
                continue;
            }
            let entry = CachedLocator::new(promotion.locator.clone(), promotion.kind);
            match self.cache.put(&promotion.key, entry).await {
                Ok(()) => debug!("Cached {}", promotion.key.render()),
                Err(e) => warn!("Failed to cache {}: {e}", promotion.key.render()),
            }
        }
    }

    async fn archive(&self, job: &JobRecord, status: JobStatus) {
        let Some(archiver) = &self.archiver else {
            return;
        };
        match archiver.archive(job, status).await {
            Ok(Some(dest)) => debug!("[{}] Documents archived to {dest}", job.primary_identifier),
            Ok(None) => {}
            Err(e) => warn!("[{}] Archival failed: {e}", job.primary_identifier),
        }
    }
}

fn describe(outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Success(evidence) => format!("success ({})", evidence.confirmation),
        AttemptOutcome::RecoverableFailure { reason } => format!("failed: {reason}"),
        AttemptOutcome::FatalFailure { reason } => format!("fatal: {reason}"),
        AttemptOutcome::EscalatedToHuman(d) => format!("human: {d}"),
    }
}

/// Checks a job can be attempted at all. Returns its URL and resume path.
async fn preflight(job: &JobRecord) -> Result<(String, PathBuf), ApplicationError> {
    let url = job
        .application_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApplicationError::ats_failure("job has no application URL"))?;

    let resume = existing_file(job.document_paths.resume.as_deref())
        .await
        .ok_or_else(|| match &job.document_paths.resume {
            Some(path) => ApplicationError::unknown(format!("resume not found at {}", path.display())),
            None => ApplicationError::unknown("job has no resume path"),
        })?;

    Ok((url.to_string(), resume))
}

async fn existing_file(path: Option<&Path>) -> Option<PathBuf> {
    let path = path?;
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(path.to_path_buf()),
        _ => None,
    }
}

//! Vision-agent strategy: hands the whole application to a remote agent that
//! drives its own browser, then polls the task until it settles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::page::detect_lockout;
use super::{ApplicationStrategy, AttemptContext, AttemptOutcome, Availability, StrategyKind, SuccessEvidence};
use crate::browser::BrowserSession;
use crate::errors::EngineError;

const TASK_PROMPT: &str = r#"Complete and submit the job application at this URL for the {job_title} position at {company}.

Use the applicant details in the navigation payload for every field. Upload the resume file named {resume_file}{cover_letter_clause}.
For optional demographic questions (gender, race, ethnicity, veteran status, disability), choose "Decline to self-identify" or the closest equivalent.
For free-text questions, answer briefly and professionally using the applicant details.
Do not create an account if a guest application is possible. Stop if a captcha or human verification appears.
When finished, report status "submitted" only if a confirmation page or message is visible."#;

const EXTRACTION_GOAL: &str =
    "Report whether the application was submitted, with any confirmation message shown.";

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

/// A task submitted to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct VisionTask {
    pub url: String,
    pub navigation_goal: String,
    pub data_extraction_goal: String,
    pub navigation_payload: serde_json::Value,
    pub max_steps: u32,
    pub extracted_information_schema: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Extracted {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub confirmation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub status: String,
    pub extracted_information: Option<Extracted>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    task_id: String,
}

/// The remote agent's task API.
#[async_trait]
pub trait VisionAgent: Send + Sync {
    async fn create_task(&self, task: &VisionTask) -> Result<String, VisionError>;

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, VisionError>;
}

pub struct HttpVisionAgent {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpVisionAgent {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, VisionError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, VisionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(VisionError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl VisionAgent for HttpVisionAgent {
    async fn create_task(&self, task: &VisionTask) -> Result<String, VisionError> {
        let response = self
            .request(self.client.post(format!("{}/api/v1/tasks", self.base_url)))
            .json(task)
            .send()
            .await?;
        let created: CreatedTask = Self::check(response).await?.json().await?;
        Ok(created.task_id)
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, VisionError> {
        let response = self
            .request(self.client.get(format!("{}/api/v1/tasks/{task_id}", self.base_url)))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

/// Maps a task status to an outcome. `None` while the task is still running.
pub fn classify_task(status: &TaskStatus) -> Option<AttemptOutcome> {
    match status.status.to_ascii_lowercase().as_str() {
        "created" | "queued" | "running" => None,
        "completed" => {
            let extracted = status.extracted_information.clone().unwrap_or_default();
            if extracted.status.eq_ignore_ascii_case("submitted") {
                let confirmation = extracted
                    .confirmation
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or(extracted.message);
                Some(AttemptOutcome::Success(SuccessEvidence {
                    confirmation: format!("vision agent: {confirmation}"),
                    promotions: Vec::new(),
                }))
            } else {
                Some(failure_outcome(&format!(
                    "agent finished without submitting: {}",
                    extracted.message
                )))
            }
        }
        other => {
            let reason = status
                .failure_reason
                .clone()
                .unwrap_or_else(|| format!("task {other}"));
            Some(failure_outcome(&reason))
        }
    }
}

fn failure_outcome(reason: &str) -> AttemptOutcome {
    match detect_lockout(reason) {
        Some(marker) => AttemptOutcome::fatal(format!("blocked by site: {marker}")),
        None => AttemptOutcome::recoverable(reason),
    }
}

pub struct VisionAgentStrategy {
    agent: Option<Arc<dyn VisionAgent>>,
    poll_interval: Duration,
    max_wait: Duration,
    /// Wait before resubmitting a task that could not be created, times the attempt number.
    retry_step: Duration,
}

impl VisionAgentStrategy {
    pub fn new(agent: Option<Arc<dyn VisionAgent>>) -> Self {
        Self {
            agent,
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(15 * 60),
            retry_step: Duration::from_secs(30),
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, max_wait: Duration, retry_step: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self.retry_step = retry_step;
        self
    }

    fn build_task(ctx: &AttemptContext<'_>) -> VisionTask {
        let file_name = |p: &std::path::Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let cover_letter_clause = ctx
            .cover_letter
            .map(|p| format!(" and the cover letter named {}", file_name(p)))
            .unwrap_or_default();

        let navigation_goal = TASK_PROMPT
            .replace("{job_title}", ctx.job_context.title.as_deref().unwrap_or("this position"))
            .replace("{company}", ctx.job_context.company.as_deref().unwrap_or("the company"))
            .replace("{resume_file}", &file_name(ctx.resume))
            .replace("{cover_letter_clause}", &cover_letter_clause);

        let mut payload = ctx.profile.facts();
        payload.insert("resume_path".into(), ctx.resume.display().to_string());
        if let Some(cover) = ctx.cover_letter {
            payload.insert("cover_letter_path".into(), cover.display().to_string());
        }

        VisionTask {
            url: ctx.application_url.to_string(),
            navigation_goal,
            data_extraction_goal: EXTRACTION_GOAL.to_string(),
            navigation_payload: json!(payload),
            max_steps: ctx.descriptor.step_budget,
            extracted_information_schema: json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "description": "submitted, failed, or error"},
                    "message": {"type": "string"},
                    "confirmation": {"type": "string"}
                },
                "required": ["status", "message"]
            }),
        }
    }

    async fn create_with_retry(
        &self,
        agent: &dyn VisionAgent,
        ctx: &AttemptContext<'_>,
        task: &VisionTask,
    ) -> Result<String, VisionError> {
        let attempts = ctx.descriptor.retry_budget.max(1);
        let mut attempt = 1;
        loop {
            match agent.create_task(task).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < attempts => {
                    let wait = self.retry_step * attempt;
                    warn!(
                        "[{}] Vision task creation failed ({e}); retrying in {}s",
                        ctx.job.primary_identifier,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ApplicationStrategy for VisionAgentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VisionAgent
    }

    fn availability(&self, _ats_type: &str) -> Availability {
        match self.agent {
            Some(_) => Availability::Available,
            None => Availability::Unavailable("no vision agent configured (VISION_AGENT_URL)".to_string()),
        }
    }

    /// The agent drives its own browser; the engine's session is left untouched.
    async fn attempt(
        &self,
        ctx: &AttemptContext<'_>,
        _session: &dyn BrowserSession,
    ) -> Result<AttemptOutcome, EngineError> {
        let Some(agent) = self.agent.as_deref() else {
            return Ok(AttemptOutcome::recoverable("vision agent not configured"));
        };
        let job_id = &ctx.job.primary_identifier;
        let task = Self::build_task(ctx);

        let task_id = match self.create_with_retry(agent, ctx, &task).await {
            Ok(id) => id,
            Err(e) => return Ok(AttemptOutcome::recoverable(format!("vision task not created: {e}"))),
        };
        info!("[{job_id}] Vision task {task_id} created");

        let deadline = Instant::now() + self.max_wait;
        loop {
            match agent.task_status(&task_id).await {
                Ok(status) => {
                    debug!("[{job_id}] Vision task {task_id}: {}", status.status);
                    if let Some(outcome) = classify_task(&status) {
                        info!("[{job_id}] Vision task {task_id} settled: {}", outcome.label());
                        return Ok(outcome);
                    }
                }
                Err(e) => warn!("[{job_id}] Vision task {task_id} status check failed: {e}"),
            }
            if Instant::now() >= deadline {
                return Ok(AttemptOutcome::recoverable(format!(
                    "vision task {task_id} did not finish within {}s",
                    self.max_wait.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

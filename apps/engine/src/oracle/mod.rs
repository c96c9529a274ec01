//! Field oracle: an external intelligence that maps page fragments to
//! structured field descriptions and answers free-text questions.
//!
//! Every response is schema-checked here before anything downstream sees it;
//! callers only ever receive a validated [`FieldFragment`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::browser::Locator;
use crate::models::{JobRecord, UserProfile};
use crate::resolver::Chunk;

pub mod anthropic;
pub mod llm;
pub mod prompts;

pub use anthropic::{MessagesApi, TransportError};
pub use llm::LlmOracle;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("response failed schema validation: {0}")]
    Schema(String),

    #[error("oracle returned an empty response")]
    Empty,

    #[error("oracle timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("oracle transport error: {0}")]
    Transport(#[from] TransportError),
}

// ────────────────────────────────────────────────────────────────────────────
// Response schema
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Email,
    Tel,
    Url,
    Textarea,
    Select,
    Checkbox,
    Radio,
    File,
    Submit,
}

/// What a field asks for. Drives whether the question handler gets involved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    /// Answerable from the profile or documents.
    #[default]
    Profile,
    FreeText,
    YesNo,
    Demographic,
}

/// One field as described by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleField {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub locator: Locator,
    pub kind: FieldKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub confidence: f32,
    #[serde(default)]
    pub category: QuestionCategory,
    #[serde(default)]
    pub options: Vec<String>,
}

/// The oracle's answer for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldFragment {
    #[serde(default)]
    pub fields: Vec<OracleField>,
    /// Controls the oracle saw but could not map, as free-form hints.
    #[serde(default)]
    pub unresolved: Vec<String>,
}

impl FieldFragment {
    /// Rejects fragments that would corrupt the field map.
    pub fn validate(self) -> Result<Self, OracleError> {
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(OracleError::Schema("field with empty name".into()));
            }
            if field.locator.value().trim().is_empty() {
                return Err(OracleError::Schema(format!(
                    "field '{}' has an empty locator",
                    field.name
                )));
            }
            if !field.confidence.is_finite() || !(0.0..=1.0).contains(&field.confidence) {
                return Err(OracleError::Schema(format!(
                    "field '{}' has confidence {} outside [0, 1]",
                    field.name, field.confidence
                )));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionAnswer {
    pub answer: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Requests
// ────────────────────────────────────────────────────────────────────────────

/// Job details the oracle may draw on when answering questions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobContext {
    pub title: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl From<&JobRecord> for JobContext {
    fn from(job: &JobRecord) -> Self {
        Self {
            title: job.job_title.clone(),
            company: job.company_name.clone(),
            description: job.description.clone(),
            url: job.application_url.clone(),
        }
    }
}

pub struct ChunkRequest<'a> {
    pub chunk: &'a Chunk,
    pub ats_type: &'a str,
    pub profile: &'a UserProfile,
    /// Fields already mapped by heuristics or the cache; the oracle need not describe them again.
    pub known_fields: &'a [String],
}

pub struct QuestionRequest<'a> {
    pub question: &'a str,
    pub category: QuestionCategory,
    pub options: &'a [String],
    pub job: &'a JobContext,
    pub profile: &'a UserProfile,
}

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait FieldOracle: Send + Sync {
    async fn resolve_fields(&self, request: &ChunkRequest<'_>) -> Result<FieldFragment, OracleError>;

    async fn answer_question(&self, request: &QuestionRequest<'_>) -> Result<String, OracleError>;
}

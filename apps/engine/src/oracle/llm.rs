use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::prompts::{
    FIELD_RESOLVE_PROMPT_TEMPLATE, FIELD_RESOLVE_SYSTEM, QUESTION_PROMPT_TEMPLATE, QUESTION_SYSTEM,
};
use super::anthropic::{json_payload, MessagesApi};
use super::{ChunkRequest, FieldFragment, FieldOracle, OracleError, QuestionAnswer, QuestionRequest};

/// [`FieldOracle`] backed by the Anthropic Messages API.
pub struct LlmOracle {
    api: MessagesApi,
    /// Bound on one oracle call, retries included.
    timeout: Duration,
}

impl LlmOracle {
    pub fn new(api: MessagesApi, timeout: Duration) -> Self {
        Self { api, timeout }
    }

    async fn call<T: DeserializeOwned>(&self, prompt: &str, system: &str) -> Result<T, OracleError> {
        let text = tokio::time::timeout(self.timeout, self.api.complete(system, prompt))
            .await
            .map_err(|_| OracleError::Timeout(self.timeout))??;
        serde_json::from_str(json_payload(&text)).map_err(|e| OracleError::Schema(e.to_string()))
    }
}

#[async_trait]
impl FieldOracle for LlmOracle {
    async fn resolve_fields(&self, request: &ChunkRequest<'_>) -> Result<FieldFragment, OracleError> {
        let prompt = build_resolve_prompt(request)?;
        info!(
            "Resolving fields for chunk {}/{} ({} chars)",
            request.chunk.index + 1,
            request.chunk.total,
            request.chunk.text.len()
        );

        let fragment: FieldFragment = self.call(&prompt, FIELD_RESOLVE_SYSTEM).await?;
        let fragment = fragment.validate()?;
        debug!(
            "Oracle returned {} field(s), {} unresolved",
            fragment.fields.len(),
            fragment.unresolved.len()
        );
        Ok(fragment)
    }

    async fn answer_question(&self, request: &QuestionRequest<'_>) -> Result<String, OracleError> {
        let prompt = build_question_prompt(request)?;
        let answer: QuestionAnswer = self.call(&prompt, QUESTION_SYSTEM).await?;
        let answer = answer.answer.trim().to_string();
        if answer.is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(answer)
    }
}

fn build_resolve_prompt(request: &ChunkRequest<'_>) -> Result<String, OracleError> {
    let profile_json = serde_json::to_string_pretty(&request.profile.facts())
        .map_err(|e| OracleError::Schema(e.to_string()))?;
    let known_fields = if request.known_fields.is_empty() {
        "none".to_string()
    } else {
        request.known_fields.join(", ")
    };

    Ok(FIELD_RESOLVE_PROMPT_TEMPLATE
        .replace("{ats_type}", request.ats_type)
        .replace("{chunk_num}", &(request.chunk.index + 1).to_string())
        .replace("{total_chunks}", &request.chunk.total.to_string())
        .replace("{profile_json}", &profile_json)
        .replace("{known_fields}", &known_fields)
        .replace("{chunk}", &request.chunk.text))
}

fn build_question_prompt(request: &QuestionRequest<'_>) -> Result<String, OracleError> {
    let profile_json = serde_json::to_string_pretty(&request.profile.facts())
        .map_err(|e| OracleError::Schema(e.to_string()))?;
    let job_json =
        serde_json::to_string_pretty(request.job).map_err(|e| OracleError::Schema(e.to_string()))?;
    let category = serde_json::to_string(&request.category)
        .map_err(|e| OracleError::Schema(e.to_string()))?;
    let options = if request.options.is_empty() {
        "none".to_string()
    } else {
        request.options.join(" | ")
    };

    Ok(QUESTION_PROMPT_TEMPLATE
        .replace("{question}", request.question)
        .replace("{category}", category.trim_matches('"'))
        .replace("{options}", &options)
        .replace("{profile_json}", &profile_json)
        .replace("{job_json}", &job_json))
}

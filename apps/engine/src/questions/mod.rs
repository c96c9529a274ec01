//! Custom question handling.
//!
//! Demographic questions are answered by policy and never sent to the oracle:
//! the control's own decline option if it has one, else the configured default.
//! Everything else goes to the oracle (one retry), then to canned answers.
//! Answers are capped at 500 characters.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::UserProfile;
use crate::oracle::{FieldKind, FieldOracle, JobContext, QuestionCategory, QuestionRequest};
use crate::resolver::FieldMap;

pub mod policy;

const ORACLE_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct QuestionPolicy {
    pub demographic_default: String,
    pub max_answer_chars: usize,
}

impl Default for QuestionPolicy {
    fn default() -> Self {
        Self {
            demographic_default: "Prefer not to say".to_string(),
            max_answer_chars: policy::MAX_ANSWER_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Policy,
    Oracle,
    Canned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
}

pub struct CustomQuestionHandler {
    oracle: Option<Arc<dyn FieldOracle>>,
    policy: QuestionPolicy,
}

impl CustomQuestionHandler {
    pub fn new(oracle: Option<Arc<dyn FieldOracle>>, policy: QuestionPolicy) -> Self {
        Self { oracle, policy }
    }

    /// Answers one question. `None` when nothing applies.
    pub async fn answer(
        &self,
        question: &str,
        category: QuestionCategory,
        options: &[String],
        job: &JobContext,
        profile: &UserProfile,
    ) -> Option<Answer> {
        if category == QuestionCategory::Demographic || policy::is_demographic(question) {
            return Some(self.demographic_answer(options));
        }

        if let Some(oracle) = &self.oracle {
            let request = QuestionRequest {
                question,
                category,
                options,
                job,
                profile,
            };
            for attempt in 1..=ORACLE_ATTEMPTS {
                match oracle.answer_question(&request).await {
                    Ok(text) => {
                        return Some(Answer {
                            text: policy::truncate_answer(&text, self.policy.max_answer_chars),
                            source: AnswerSource::Oracle,
                        });
                    }
                    Err(e) => warn!("Question oracle attempt {attempt}/{ORACLE_ATTEMPTS} failed: {e}"),
                }
            }
        }

        policy::canned_answer(question).map(|text| Answer {
            text: policy::truncate_answer(text, self.policy.max_answer_chars),
            source: AnswerSource::Canned,
        })
    }

    fn demographic_answer(&self, options: &[String]) -> Answer {
        let text = policy::decline_option(options)
            .cloned()
            .unwrap_or_else(|| self.policy.demographic_default.clone());
        Answer {
            text,
            source: AnswerSource::Policy,
        }
    }

    /// Fills values for every question-type field in the map.
    ///
    /// Demographic fields are always overwritten with the policy answer, even
    /// if the oracle suggested something. Returns names left unanswered.
    pub async fn answer_fields(
        &self,
        fields: &mut FieldMap,
        job: &JobContext,
        profile: &UserProfile,
    ) -> Vec<String> {
        let mut unanswered = Vec::new();

        for entry in fields.iter_mut() {
            if matches!(entry.kind, FieldKind::File | FieldKind::Submit) {
                continue;
            }
            let question = entry.question_text().to_string();
            let demographic = entry.category == QuestionCategory::Demographic
                || policy::is_demographic(&question);

            if demographic {
                let answer = self.demographic_answer(&entry.options);
                debug!("Demographic field {} -> '{}'", entry.name, answer.text);
                entry.category = QuestionCategory::Demographic;
                entry.value = Some(answer.text);
                continue;
            }
            if entry.category == QuestionCategory::Profile || entry.value.is_some() {
                continue;
            }

            match self
                .answer(&question, entry.category, &entry.options, job, profile)
                .await
            {
                Some(answer) => {
                    info!("Answered '{}' via {:?}", truncate_for_log(&question), answer.source);
                    entry.value = Some(answer.text);
                }
                None => unanswered.push(entry.name.clone()),
            }
        }
        unanswered
    }
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(60).collect()
}

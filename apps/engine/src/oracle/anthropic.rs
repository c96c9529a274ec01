//! Messages API transport for [`LlmOracle`](super::LlmOracle).
//!
//! One oracle call is one exchange: a system prompt, a single user turn, and
//! a JSON object expected back in the text blocks.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::OracleError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
/// Pinned so field extraction behaves the same across runs.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("API unavailable after {attempts} attempts (last status {status})")]
    Unavailable { attempts: u32, status: u16 },
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Turn<'a>; 1],
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<Block>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl MessagesResponse {
    /// All text blocks, concatenated in order.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                Block::Text { text } => Some(text.as_str()),
                Block::Other => None,
            })
            .collect()
    }
}

/// What to do with a non-success status.
#[derive(Debug, PartialEq, Eq)]
enum Retry {
    After(Duration),
    Never,
}

fn retry_policy(status: StatusCode, retry_after: Option<&str>, attempt: u32) -> Retry {
    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
        return Retry::Never;
    }
    let hinted = retry_after
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let backoff = BASE_BACKOFF * 2u32.saturating_pow(attempt);
    Retry::After(hinted.unwrap_or(backoff).min(MAX_BACKOFF))
}

/// The JSON object inside a reply, tolerating code fences or a preamble.
pub fn json_payload(text: &str) -> &str {
    let text = text.trim();
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

#[derive(Clone)]
pub struct MessagesApi {
    http: Client,
    api_key: String,
}

impl MessagesApi {
    /// `request_timeout` bounds each HTTP exchange; the oracle bounds the whole call.
    pub fn new(api_key: String, request_timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            http: Client::builder().timeout(request_timeout).build()?,
            api_key,
        })
    }

    /// Sends one exchange and returns the reply text.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError> {
        let body = MessagesRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: [Turn {
                role: "user",
                content: prompt,
            }],
        };

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let sent = self
                .http
                .post(API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if attempt < ATTEMPTS && (e.is_connect() || e.is_timeout()) => {
                    warn!("Oracle request failed ({e}); retrying");
                    tokio::time::sleep(BASE_BACKOFF * attempt).await;
                    continue;
                }
                Err(e) => return Err(TransportError::Request(e).into()),
            };

            let status = response.status();
            if status.is_success() {
                break response;
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            match retry_policy(status, retry_after.as_deref(), attempt - 1) {
                Retry::After(delay) if attempt < ATTEMPTS => {
                    warn!("Oracle API returned {status}; retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
                Retry::After(_) => {
                    return Err(TransportError::Unavailable {
                        attempts: attempt,
                        status: status.as_u16(),
                    }
                    .into())
                }
                Retry::Never => {
                    let raw = response.text().await.unwrap_or_default();
                    let message = serde_json::from_str::<ApiErrorEnvelope>(&raw)
                        .map(|e| e.error.message)
                        .unwrap_or(raw);
                    return Err(TransportError::Rejected {
                        status: status.as_u16(),
                        message,
                    }
                    .into());
                }
            }
        };

        let reply: MessagesResponse = response.json().await.map_err(TransportError::Request)?;
        if let Some(usage) = &reply.usage {
            debug!(
                "Oracle exchange used {} input / {} output tokens",
                usage.input_tokens, usage.output_tokens
            );
        }
        if reply.stop_reason.as_deref() == Some("max_tokens") {
            warn!("Oracle reply was cut off at {MAX_TOKENS} tokens");
        }

        let text = reply.text();
        if text.trim().is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_payload_strips_fences_and_preamble() {
        assert_eq!(json_payload("```json\n{\"fields\": []}\n```"), "{\"fields\": []}");
        assert_eq!(
            json_payload("Here is the mapping:\n{\"answer\": \"Yes\"}\nLet me know."),
            "{\"answer\": \"Yes\"}"
        );
        assert_eq!(json_payload("  no json here "), "no json here");
    }

    #[test]
    fn test_reply_text_skips_non_text_blocks() {
        let reply: MessagesResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                    {"type": "text", "text": "{\"fields\": "},
                    {"type": "text", "text": "[]}"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(reply.text(), "{\"fields\": []}");
    }

    #[test]
    fn test_retry_policy() {
        assert_eq!(
            retry_policy(StatusCode::TOO_MANY_REQUESTS, Some("7"), 0),
            Retry::After(Duration::from_secs(7))
        );
        assert_eq!(
            retry_policy(StatusCode::BAD_GATEWAY, None, 2),
            Retry::After(Duration::from_secs(4))
        );
        assert_eq!(
            retry_policy(StatusCode::SERVICE_UNAVAILABLE, Some("600"), 0),
            Retry::After(MAX_BACKOFF)
        );
        assert_eq!(retry_policy(StatusCode::BAD_REQUEST, None, 0), Retry::Never);
        assert_eq!(retry_policy(StatusCode::UNAUTHORIZED, Some("1"), 0), Retry::Never);
    }
}

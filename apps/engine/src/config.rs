use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::strategy::StrategyKind;

/// Engine configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Locator cache backend: Redis when set, otherwise the JSON file at `locator_cache_path`.
    pub redis_url: Option<String>,
    pub locator_cache_path: PathBuf,
    /// Oracle credentials. Strategies needing the oracle report unavailable without it.
    pub anthropic_api_key: Option<String>,
    pub webdriver_url: String,
    pub headless: bool,
    pub vision_agent_url: Option<String>,
    pub vision_agent_api_key: Option<String>,
    pub strategy_order: Vec<StrategyKind>,
    pub strategy_step_budget: u32,
    pub strategy_retry_budget: u32,
    pub profile_path: PathBuf,
    pub processed_dir: PathBuf,
    pub s3: Option<S3Settings>,
    pub max_jobs_per_run: usize,
    pub max_chunk_chars: usize,
    pub chunk_overlap_segments: usize,
    pub element_wait: Duration,
    /// How long a page may take to change after next or submit.
    pub transition_wait: Duration,
    pub oracle_timeout: Duration,
    pub workers: usize,
    pub demographic_default: String,
    pub rust_log: String,
}

/// Object storage for archived application folders.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let strategy_order = optional_env("STRATEGY_ORDER")
            .unwrap_or_else(|| "vision-agent,universal-ai,hybrid-ai,traditional".to_string());

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: optional_env("REDIS_URL"),
            locator_cache_path: optional_env("LOCATOR_CACHE_PATH")
                .unwrap_or_else(|| ".cache/locators.json".to_string())
                .into(),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            webdriver_url: optional_env("WEBDRIVER_URL")
                .unwrap_or_else(|| "http://localhost:9515".to_string()),
            headless: parse_env("HEADLESS", true)?,
            vision_agent_url: optional_env("VISION_AGENT_URL"),
            vision_agent_api_key: optional_env("VISION_AGENT_API_KEY"),
            strategy_order: parse_strategy_order(&strategy_order)?,
            strategy_step_budget: parse_env("STRATEGY_STEP_BUDGET", 20)?,
            strategy_retry_budget: parse_env("STRATEGY_RETRY_BUDGET", 3)?,
            profile_path: optional_env("PROFILE_PATH")
                .unwrap_or_else(|| "profile.json".to_string())
                .into(),
            processed_dir: optional_env("PROCESSED_DIR")
                .unwrap_or_else(|| "processed_applications".to_string())
                .into(),
            s3: optional_env("S3_BUCKET").map(|bucket| S3Settings {
                bucket,
                endpoint: optional_env("S3_ENDPOINT"),
                access_key_id: optional_env("AWS_ACCESS_KEY_ID"),
                secret_access_key: optional_env("AWS_SECRET_ACCESS_KEY"),
            }),
            max_jobs_per_run: parse_env("MAX_JOBS_PER_RUN", 5)?,
            max_chunk_chars: parse_env("MAX_CHUNK_CHARS", 50_000)?,
            chunk_overlap_segments: parse_env("CHUNK_OVERLAP_SEGMENTS", 1)?,
            element_wait: Duration::from_secs(parse_env("ELEMENT_WAIT_SECS", 10)?),
            transition_wait: Duration::from_secs(parse_env("TRANSITION_WAIT_SECS", 15)?),
            oracle_timeout: Duration::from_secs(parse_env("ORACLE_TIMEOUT_SECS", 120)?),
            workers: parse_env::<usize>("WORKERS", 1)?.max(1),
            demographic_default: optional_env("DEMOGRAPHIC_DEFAULT")
                .unwrap_or_else(|| "Prefer not to say".to_string()),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

/// Parses a comma-separated strategy list, preserving order and dropping duplicates.
pub fn parse_strategy_order(raw: &str) -> Result<Vec<StrategyKind>> {
    let mut order = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = name
            .parse::<StrategyKind>()
            .with_context(|| format!("STRATEGY_ORDER contains unknown strategy '{name}'"))?;
        if !order.contains(&kind) {
            order.push(kind);
        }
    }
    if order.is_empty() {
        anyhow::bail!("STRATEGY_ORDER must name at least one strategy");
    }
    Ok(order)
}

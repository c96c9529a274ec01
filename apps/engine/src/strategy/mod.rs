//! Application strategies and the ordered fallback chain that runs them.
//!
//! Each strategy is a different way of getting through an application form.
//! The [`selector`] walks a priority-ordered chain, skipping strategies that
//! report themselves unavailable, and moves on only after a recoverable failure.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::browser::{BrowserSession, Locator};
use crate::cache::CacheKey;
use crate::errors::EngineError;
use crate::intervention::Disposition;
use crate::models::{JobRecord, UserProfile};
use crate::oracle::{FieldKind, JobContext};

pub mod ats;
pub mod flow;
pub mod hybrid;
pub mod page;
pub mod selector;
pub mod traditional;
pub mod universal;
pub mod vision;

pub use hybrid::HybridAiStrategy;
pub use selector::StrategySelector;
pub use traditional::TraditionalStrategy;
pub use universal::UniversalAiStrategy;
pub use vision::VisionAgentStrategy;

// ────────────────────────────────────────────────────────────────────────────
// Identity
// ────────────────────────────────────────────────────────────────────────────

/// The closed set of built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    VisionAgent,
    UniversalAi,
    HybridAi,
    Traditional,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::VisionAgent => "vision-agent",
            StrategyKind::UniversalAi => "universal-ai",
            StrategyKind::HybridAi => "hybrid-ai",
            StrategyKind::Traditional => "traditional",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vision-agent" | "vision" => Ok(StrategyKind::VisionAgent),
            "universal-ai" | "universal" => Ok(StrategyKind::UniversalAi),
            "hybrid-ai" | "hybrid" => Ok(StrategyKind::HybridAi),
            "traditional" => Ok(StrategyKind::Traditional),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// A strategy's slot in the chain. Lower priority runs first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDescriptor {
    pub name: String,
    pub priority: u32,
    /// Page transitions allowed in one attempt.
    pub step_budget: u32,
    /// Per-interaction retries within one attempt.
    pub retry_budget: u32,
}

impl StrategyDescriptor {
    /// Descriptors for an ordered list of kinds, priorities following list order.
    pub fn chain(order: &[StrategyKind], step_budget: u32, retry_budget: u32) -> Vec<Self> {
        order
            .iter()
            .enumerate()
            .map(|(i, kind)| StrategyDescriptor {
                name: kind.as_str().to_string(),
                priority: i as u32,
                step_budget,
                retry_budget,
            })
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outcomes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

/// A locator that worked during a successful attempt, to be written to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorPromotion {
    pub key: CacheKey,
    pub locator: Locator,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SuccessEvidence {
    /// Confirmation text or URL marker that proved submission.
    pub confirmation: String,
    pub promotions: Vec<LocatorPromotion>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(SuccessEvidence),
    /// Another strategy may still succeed.
    RecoverableFailure { reason: String },
    /// Stop the chain; the failure is about the job, not the strategy.
    FatalFailure { reason: String },
    /// A human took over inside the attempt and resolved it.
    EscalatedToHuman(Disposition),
}

impl AttemptOutcome {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        AttemptOutcome::RecoverableFailure {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        AttemptOutcome::FatalFailure {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::RecoverableFailure { .. } => "recoverable_failure",
            AttemptOutcome::FatalFailure { .. } => "fatal_failure",
            AttemptOutcome::EscalatedToHuman(_) => "escalated_to_human",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

/// Everything a strategy needs to know about the job it is applying to.
pub struct AttemptContext<'a> {
    pub job: &'a JobRecord,
    pub ats_type: &'a str,
    pub application_url: &'a str,
    pub resume: &'a Path,
    pub cover_letter: Option<&'a Path>,
    pub profile: &'a UserProfile,
    pub descriptor: &'a StrategyDescriptor,
    pub job_context: JobContext,
}

/// One way of completing an application.
///
/// `attempt` returns `Err` only for failures it cannot classify; the engine
/// maps those to `error_unknown`. Everything else is an [`AttemptOutcome`].
#[async_trait]
pub trait ApplicationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn availability(&self, ats_type: &str) -> Availability;

    async fn attempt(
        &self,
        ctx: &AttemptContext<'_>,
        session: &dyn BrowserSession,
    ) -> Result<AttemptOutcome, EngineError>;
}

/// Strategies by name.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ApplicationStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn ApplicationStrategy>) {
        self.strategies
            .insert(strategy.kind().as_str().to_string(), strategy);
    }

    /// Registers under an explicit name. Lets tests run several fakes of one kind.
    pub fn register_as(&mut self, name: impl Into<String>, strategy: Arc<dyn ApplicationStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ApplicationStrategy>> {
        self.strategies.get(name).cloned()
    }
}

//! Hybrid strategy: known locators and heuristics first, the oracle for
//! whatever they leave over.

use async_trait::async_trait;
use tracing::debug;

use super::flow::{run_form_flow, FormKit, PageFiller, PagePlan};
use super::page::PageState;
use super::traditional::static_fields;
use super::{ApplicationStrategy, AttemptContext, AttemptOutcome, Availability, StrategyKind};
use crate::browser::BrowserSession;
use crate::errors::EngineError;
use crate::resolver::extract_controls;

pub struct HybridAiStrategy {
    kit: FormKit,
}

impl HybridAiStrategy {
    pub fn new(kit: FormKit) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl PageFiller for HybridAiStrategy {
    async fn plan_page(
        &self,
        ctx: &AttemptContext<'_>,
        session: &dyn BrowserSession,
        page: &PageState,
    ) -> PagePlan {
        let controls = extract_controls(&page.snapshot);
        let known = static_fields(session, ctx.ats_type, &controls).await;
        if known.is_empty() {
            debug!("No static matches; resolving the whole page");
        }
        let static_count = known.len();

        let resolution = self
            .kit
            .resolver
            .resolve(session, ctx.ats_type, &page.snapshot, ctx.profile, known)
            .await;
        debug!(
            "Hybrid plan: {static_count} static, {} total",
            resolution.fields.len()
        );

        PagePlan {
            fields: resolution.fields,
            form_signature: resolution.form_signature,
            unresolved: resolution.unresolved,
        }
    }
}

#[async_trait]
impl ApplicationStrategy for HybridAiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HybridAi
    }

    fn availability(&self, _ats_type: &str) -> Availability {
        if self.kit.resolver.has_oracle() {
            Availability::Available
        } else {
            Availability::Unavailable("no oracle configured (ANTHROPIC_API_KEY)".to_string())
        }
    }

    async fn attempt(
        &self,
        ctx: &AttemptContext<'_>,
        session: &dyn BrowserSession,
    ) -> Result<AttemptOutcome, EngineError> {
        Ok(run_form_flow(self, &self.kit, ctx, session).await)
    }
}

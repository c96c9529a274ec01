//! Universal AI filler: every page is resolved through the field resolver,
//! so it works on any platform the oracle can read.

use async_trait::async_trait;

use super::flow::{run_form_flow, FormKit, PageFiller, PagePlan};
use super::page::PageState;
use super::{ApplicationStrategy, AttemptContext, AttemptOutcome, Availability, StrategyKind};
use crate::browser::BrowserSession;
use crate::errors::EngineError;
use crate::resolver::FieldMap;

pub struct UniversalAiStrategy {
    kit: FormKit,
}

impl UniversalAiStrategy {
    pub fn new(kit: FormKit) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl PageFiller for UniversalAiStrategy {
    async fn plan_page(
        &self,
        ctx: &AttemptContext<'_>,
        session: &dyn BrowserSession,
        page: &PageState,
    ) -> PagePlan {
        let resolution = self
            .kit
            .resolver
            .resolve(session, ctx.ats_type, &page.snapshot, ctx.profile, FieldMap::new())
            .await;
        PagePlan {
            fields: resolution.fields,
            form_signature: resolution.form_signature,
            unresolved: resolution.unresolved,
        }
    }
}

#[async_trait]
impl ApplicationStrategy for UniversalAiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UniversalAi
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

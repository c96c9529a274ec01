//! The multi-step form loop shared by the DOM-driven strategies.
//!
//! A strategy only decides how a page's fields are identified (its
//! [`PageFiller`]). Navigation, value binding, question answering, actuation,
//! advancing and submission are the same for all of them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::page::{self, PageState};
use super::{AttemptContext, AttemptOutcome, LocatorPromotion, SuccessEvidence};
use crate::actuator::retry::RetryPolicy;
use crate::actuator::{ActuationReport, ActuatorConfig, FormActuator};
use crate::browser::{wait_for_page, BrowserError, BrowserSession, Locator};
use crate::cache::CacheKey;
use crate::oracle::{FieldKind, QuestionCategory};
use crate::questions::CustomQuestionHandler;
use crate::resolver::{extract_controls, FieldMap, FieldResolver, FieldSource};

const CONFIRMATION_POLL: Duration = Duration::from_millis(500);

/// Fields identified on one page.
#[derive(Debug, Clone, Default)]
pub struct PagePlan {
    pub fields: FieldMap,
    pub form_signature: String,
    pub unresolved: Vec<String>,
}

/// How a strategy identifies the fields on the page in front of it.
#[async_trait]
pub trait PageFiller: Send + Sync {
    async fn plan_page(
        &self,
        ctx: &AttemptContext<'_>,
        session: &dyn BrowserSession,
        page: &PageState,
    ) -> PagePlan;
}

/// Collaborators every form flow uses.
#[derive(Clone)]
pub struct FormKit {
    pub resolver: Arc<FieldResolver>,
    pub questions: Arc<CustomQuestionHandler>,
    pub actuator: ActuatorConfig,
    /// How long to wait for a page change after next or submit.
    pub transition_wait: Duration,
}

impl FormKit {
    fn actuator_for(&self, ctx: &AttemptContext<'_>) -> ActuatorConfig {
        ActuatorConfig {
            element_wait: self.actuator.element_wait,
            retry: RetryPolicy {
                max_attempts: ctx.descriptor.retry_budget.max(1),
                backoff_step: self.actuator.retry.backoff_step,
            },
        }
    }
}

pub async fn run_form_flow(
    filler: &dyn PageFiller,
    kit: &FormKit,
    ctx: &AttemptContext<'_>,
    session: &dyn BrowserSession,
) -> AttemptOutcome {
    let job_id = &ctx.job.primary_identifier;
    let strategy = &ctx.descriptor.name;

    if let Err(e) = session.navigate(ctx.application_url).await {
        return AttemptOutcome::recoverable(format!("navigation failed: {e}"));
    }

    if let Err(e) = open_form(session).await {
        return AttemptOutcome::recoverable(format!("could not open application form: {e}"));
    }

    let mut promotions = Vec::new();

    for step in 1..=ctx.descriptor.step_budget {
        let page = match PageState::observe(session).await {
            Ok(page) => page,
            Err(e) => return AttemptOutcome::recoverable(format!("could not read page: {e}")),
        };

        if let Some(marker) = page.lockout() {
            warn!("[{job_id}] {strategy}: site blocked automation ({marker})");
            return AttemptOutcome::fatal(format!("blocked by site: {marker}"));
        }
        // The first page is the form itself; only later pages can confirm.
        if step > 1 {
            if let Some(confirmation) = page.completion() {
                info!("[{job_id}] {strategy}: application confirmed ({confirmation})");
                return success(confirmation, promotions);
            }
        }

        info!("[{job_id}] {strategy}: step {step}/{}", ctx.descriptor.step_budget);

        let mut plan = filler.plan_page(ctx, session, &page).await;
        if !plan.unresolved.is_empty() {
            debug!("[{job_id}] Unresolved on this page: {:?}", plan.unresolved);
        }
        bind_values(&mut plan.fields, ctx);
        let unanswered = kit
            .questions
            .answer_fields(&mut plan.fields, &ctx.job_context, ctx.profile)
            .await;
        if !unanswered.is_empty() {
            info!("[{job_id}] Left unanswered: {}", unanswered.join(", "));
        }

        let submits = plan.fields.take_submits();
        let report = FormActuator::new(session, kit.actuator_for(ctx))
            .apply(&plan.fields)
            .await;

        invalidate_failed_cache_entries(kit, ctx, &plan, &report).await;
        promotions.extend(collect_promotions(ctx, &plan, &report));

        if report.has_required_failure() {
            let names: Vec<&str> = report
                .required_failures()
                .iter()
                .map(|f| f.name.as_str())
                .collect();
            return AttemptOutcome::recoverable(format!(
                "required field(s) failed: {}",
                names.join(", ")
            ));
        }

        // Next/continue first; submission only when the form has nowhere else to go.
        match page::click_first(session, &page::next_buttons()).await {
            Ok(Some(_)) => {
                if !await_transition(session, &page.snapshot, kit.transition_wait).await {
                    return AttemptOutcome::recoverable("form did not advance after next");
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => return AttemptOutcome::recoverable(format!("could not advance form: {e}")),
        }

        let mut submit_locators: Vec<Locator> = submits.into_iter().map(|s| s.locator).collect();
        submit_locators.extend(page::submit_buttons());
        match page::click_first(session, &submit_locators).await {
            Ok(Some(locator)) => {
                info!("[{job_id}] {strategy}: submitted via {locator}");
            }
            Ok(None) => {
                return AttemptOutcome::recoverable("no next or submit control found");
            }
            Err(e) => return AttemptOutcome::recoverable(format!("submit click failed: {e}")),
        }

        return match await_confirmation(session, kit.transition_wait).await {
            Ok(Some(confirmation)) => {
                info!("[{job_id}] {strategy}: application confirmed ({confirmation})");
                success(confirmation, promotions)
            }
            // Clicked submit without a confirmation. Another strategy could submit twice.
            Ok(None) => AttemptOutcome::fatal("submitted but no confirmation page appeared"),
            Err(e) => AttemptOutcome::fatal(format!("submitted but page unreadable: {e}")),
        };
    }

    AttemptOutcome::recoverable(format!(
        "step budget of {} exhausted",
        ctx.descriptor.step_budget
    ))
}

fn success(confirmation: String, promotions: Vec<LocatorPromotion>) -> AttemptOutcome {
    AttemptOutcome::Success(SuccessEvidence {
        confirmation,
        promotions,
    })
}

/// Clicks an apply button when the landing page has no form yet.
async fn open_form(session: &dyn BrowserSession) -> Result<(), BrowserError> {
    let snapshot = session.snapshot().await?;
    if extract_controls(&snapshot).iter().any(|c| c.is_fillable()) {
        return Ok(());
    }
    if page::click_first(session, &page::apply_buttons()).await?.is_none() {
        debug!("No apply button on landing page");
    }
    Ok(())
}

/// Fills in values the page plan could not know: document paths and profile facts.
pub fn bind_values(fields: &mut FieldMap, ctx: &AttemptContext<'_>) {
    for entry in fields.iter_mut() {
        match entry.kind {
            FieldKind::File => {
                let wants_cover = entry.name.contains("cover");
                entry.value = if wants_cover {
                    ctx.cover_letter.map(|p| p.display().to_string())
                } else {
                    Some(ctx.resume.display().to_string())
                };
            }
            FieldKind::Submit => {}
            _ if entry.value.is_none() && entry.category == QuestionCategory::Profile => {
                entry.value = ctx.profile.value_for(&entry.name);
            }
            _ => {}
        }
    }
}

/// Cached locators that failed during actuation are dropped immediately.
async fn invalidate_failed_cache_entries(
    kit: &FormKit,
    ctx: &AttemptContext<'_>,
    plan: &PagePlan,
    report: &ActuationReport,
) {
    for failed in report.failed().filter(|f| f.source == FieldSource::Cache) {
        warn!(
            "[{}] Cached locator for {} failed; invalidating",
            ctx.job.primary_identifier, failed.name
        );
        let key = CacheKey::new(ctx.ats_type, &plan.form_signature, &failed.name);
        kit.resolver.invalidate(&key).await;
    }
}

/// Freshly resolved profile and document locators that were filled successfully.
fn collect_promotions(
    ctx: &AttemptContext<'_>,
    plan: &PagePlan,
    report: &ActuationReport,
) -> Vec<LocatorPromotion> {
    if plan.form_signature.is_empty() {
        return Vec::new();
    }
    report
        .filled()
        .filter(|f| f.source != FieldSource::Cache)
        .filter_map(|f| plan.fields.get(&f.name))
        .filter(|entry| entry.category == QuestionCategory::Profile)
        .map(|entry| LocatorPromotion {
            key: CacheKey::new(ctx.ats_type, &plan.form_signature, &entry.name),
            locator: entry.locator.clone(),
            kind: entry.kind,
        })
        .collect()
}

async fn await_transition(session: &dyn BrowserSession, before: &str, timeout: Duration) -> bool {
    wait_for_page(session, timeout, "page transition", |snapshot| snapshot != before)
        .await
        .is_ok()
}

async fn await_confirmation(
    session: &dyn BrowserSession,
    timeout: Duration,
) -> Result<Option<String>, BrowserError> {
    let deadline = Instant::now() + timeout;
    loop {
        let page = PageState::observe(session).await?;
        if let Some(confirmation) = page.completion() {
            return Ok(Some(confirmation));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(CONFIRMATION_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocatorCache, MemoryLocatorCache};
    use crate::questions::QuestionPolicy;
    use crate::resolver::{FieldEntry, ResolverConfig};
    use crate::strategy::StrategyDescriptor;
    use crate::test_support::{attempt_context, profile, FakePage, TestJob};

    struct FixedFiller(FieldMap);

    #[async_trait]
    impl PageFiller for FixedFiller {
        async fn plan_page(
            &self,
            _ctx: &AttemptContext<'_>,
            _session: &dyn BrowserSession,
            _page: &PageState,
        ) -> PagePlan {
            PagePlan {
                fields: self.0.clone(),
                form_signature: "sig".into(),
                unresolved: vec![],
            }
        }
    }

    fn kit(cache: Arc<MemoryLocatorCache>) -> FormKit {
        FormKit {
            resolver: Arc::new(FieldResolver::new(None, cache, ResolverConfig::default())),
            questions: Arc::new(CustomQuestionHandler::new(None, QuestionPolicy::default())),
            actuator: ActuatorConfig {
                element_wait: Duration::from_millis(200),
                retry: RetryPolicy {
                    max_attempts: 1,
                    backoff_step: Duration::from_millis(10),
                },
            },
            transition_wait: Duration::from_secs(2),
        }
    }

    fn field(name: &str, css: &str, kind: FieldKind, source: FieldSource, required: bool) -> FieldEntry {
        let mut entry = FieldEntry::new(name, Locator::css(css), kind, source);
        entry.required = required;
        entry
    }

    const FORM: &str = r#"<form><input id="email" type="email"><button type="submit">Submit</button></form>"#;

    #[tokio::test(start_paused = true)]
    async fn test_fill_submit_confirm() {
        let page = FakePage::new(FORM);
        page.add_element(Locator::css("#email"));
        page.add_element(Locator::css("#resume"));
        page.add_element(Locator::css("#submit"));
        page.on_click(Locator::css("#submit"), "<h1>Application submitted</h1>");
        let session = page.session();

        let fields: FieldMap = vec![
            field("email", "#email", FieldKind::Email, FieldSource::Oracle, true),
            field("resume", "#resume", FieldKind::File, FieldSource::Oracle, true),
            field("submit", "#submit", FieldKind::Submit, FieldSource::Oracle, false),
        ]
        .into_iter()
        .collect();

        let job = TestJob::new("job-1");
        let descriptor = StrategyDescriptor::chain(&[crate::strategy::StrategyKind::UniversalAi], 5, 2).remove(0);
        let profile = profile();
        let ctx = attempt_context(&job, &descriptor, &profile);

        let outcome = run_form_flow(&FixedFiller(fields), &kit(Arc::new(MemoryLocatorCache::new())), &ctx, &session).await;

        let AttemptOutcome::Success(evidence) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(evidence.confirmation, "page says 'application submitted'");
        let promoted: Vec<&str> = evidence.promotions.iter().map(|p| p.key.field.as_str()).collect();
        assert_eq!(promoted, vec!["resume", "email"]);
        assert_eq!(page.value_of(&Locator::css("#email")).as_deref(), Some("ada@example.com"));
        assert_eq!(page.clicks(&Locator::css("#submit")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_required_failure_is_recoverable_and_invalidates_cache() {
        let cache = Arc::new(MemoryLocatorCache::new());
        let key = CacheKey::new("lever", "sig", "email");
        cache
            .put(&key, crate::cache::CachedLocator::new(Locator::css("#gone"), FieldKind::Email))
            .await
            .unwrap();
        let page = FakePage::new(FORM);
        let session = page.session();
        let fields: FieldMap = vec![field("email", "#gone", FieldKind::Email, FieldSource::Cache, true)]
            .into_iter()
            .collect();

        let job = TestJob::new("job-2");
        let descriptor = StrategyDescriptor::chain(&[crate::strategy::StrategyKind::HybridAi], 5, 1).remove(0);
        let profile = profile();
        let ctx = attempt_context(&job, &descriptor, &profile);

        let outcome = run_form_flow(&FixedFiller(fields), &kit(cache.clone()), &ctx, &session).await;

        assert_eq!(outcome, AttemptOutcome::recoverable("required field(s) failed: email"));
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lockout_is_fatal() {
        let page = FakePage::new("<p>Please complete the captcha to continue</p>");
        let session = page.session();
        let job = TestJob::new("job-3");
        let descriptor = StrategyDescriptor::chain(&[crate::strategy::StrategyKind::Traditional], 5, 1).remove(0);
        let profile = profile();
        let ctx = attempt_context(&job, &descriptor, &profile);

        let outcome = run_form_flow(&FixedFiller(FieldMap::new()), &kit(Arc::new(MemoryLocatorCache::new())), &ctx, &session).await;

        assert_eq!(outcome, AttemptOutcome::fatal("blocked by site: captcha"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_without_confirmation_is_fatal() {
        let page = FakePage::new(FORM);
        page.add_element(Locator::css("#submit"));
        let session = page.session();
        let fields: FieldMap = vec![field("submit", "#submit", FieldKind::Submit, FieldSource::Oracle, false)]
            .into_iter()
            .collect();
        let job = TestJob::new("job-4");
        let descriptor = StrategyDescriptor::chain(&[crate::strategy::StrategyKind::UniversalAi], 5, 1).remove(0);
        let profile = profile();
        let ctx = attempt_context(&job, &descriptor, &profile);

        let outcome = run_form_flow(&FixedFiller(fields), &kit(Arc::new(MemoryLocatorCache::new())), &ctx, &session).await;

        assert!(matches!(outcome, AttemptOutcome::FatalFailure { .. }));
        assert_eq!(page.clicks(&Locator::css("#submit")), 1);
    }

    #[test]
    fn test_bind_values_documents_and_profile() {
        let job = TestJob::new("job-5");
        let descriptor = StrategyDescriptor::chain(&[crate::strategy::StrategyKind::Traditional], 5, 1).remove(0);
        let profile = profile();
        let ctx = attempt_context(&job, &descriptor, &profile);
        let mut fields: FieldMap = vec![
            field("resume", "#r", FieldKind::File, FieldSource::Static, true),
            field("cover_letter", "#c", FieldKind::File, FieldSource::Static, false),
            field("first_name", "#f", FieldKind::Text, FieldSource::Static, true),
        ]
        .into_iter()
        .collect();

        bind_values(&mut fields, &ctx);

        assert_eq!(
            fields.get("resume").unwrap().value.as_deref(),
            Some(ctx.resume.display().to_string().as_str())
        );
        assert!(fields.get("cover_letter").unwrap().value.is_none());
        assert_eq!(fields.get("first_name").unwrap().value.as_deref(), Some("Ada"));
    }
}

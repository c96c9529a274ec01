//! Scripted collaborators shared by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::browser::{BrowserError, BrowserSession, ElementHandle, Locator, SessionFactory};
use crate::errors::EngineError;
use crate::intervention::{Disposition, InterventionController, InterventionRequest};
use crate::models::{JobRecord, UserProfile};
use crate::oracle::{
    ChunkRequest, FieldFragment, FieldKind, FieldOracle, OracleError, OracleField, QuestionCategory,
    QuestionRequest,
};
use crate::strategy::{
    ApplicationStrategy, AttemptContext, AttemptOutcome, Availability, StrategyDescriptor,
    StrategyKind,
};

// ────────────────────────────────────────────────────────────────────────────
// Browser
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Element {
    value: String,
    clicks: u32,
    uploaded: Option<PathBuf>,
    /// Fills that fail with a transient error before one succeeds.
    flaky: u32,
}

#[derive(Debug, Default)]
struct PageInner {
    html: String,
    navigations: Vec<String>,
    elements: HashMap<String, Element>,
    transitions: HashMap<String, String>,
    closed: bool,
}

/// An in-memory page. Only elements added explicitly can be found.
#[derive(Clone, Default)]
pub struct FakePage {
    inner: Arc<Mutex<PageInner>>,
}

impl FakePage {
    pub fn new(html: &str) -> Self {
        let page = Self::default();
        page.inner.lock().unwrap().html = html.to_string();
        page
    }

    pub fn add_element(&self, locator: Locator) {
        self.inner
            .lock()
            .unwrap()
            .elements
            .insert(locator.to_string(), Element::default());
    }

    pub fn add_flaky_element(&self, locator: Locator, failures: u32) {
        self.inner.lock().unwrap().elements.insert(
            locator.to_string(),
            Element {
                flaky: failures,
                ..Default::default()
            },
        );
    }

    /// Clicking `locator` replaces the page with `html`.
    pub fn on_click(&self, locator: Locator, html: &str) {
        self.inner
            .lock()
            .unwrap()
            .transitions
            .insert(locator.to_string(), html.to_string());
    }

    pub fn value_of(&self, locator: &Locator) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .elements
            .get(&locator.to_string())
            .map(|e| e.value.clone())
    }

    pub fn clicks(&self, locator: &Locator) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .elements
            .get(&locator.to_string())
            .map(|e| e.clicks)
            .unwrap_or(0)
    }

    pub fn uploaded(&self, locator: &Locator) -> Option<PathBuf> {
        self.inner
            .lock()
            .unwrap()
            .elements
            .get(&locator.to_string())
            .and_then(|e| e.uploaded.clone())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.inner.lock().unwrap().navigations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn session(&self) -> FakeSession {
        FakeSession { page: self.clone() }
    }

    fn with_element<T>(
        &self,
        element: &ElementHandle,
        f: impl FnOnce(&mut Element) -> Result<T, BrowserError>,
    ) -> Result<T, BrowserError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(BrowserError::SessionClosed);
        }
        let found = inner
            .elements
            .get_mut(&element.0)
            .ok_or_else(|| BrowserError::NotFound(element.0.clone()))?;
        f(found)
    }
}

pub struct FakeSession {
    page: FakePage,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.page.inner.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    async fn find(&self, locator: &Locator) -> Result<Option<ElementHandle>, BrowserError> {
        let inner = self.page.inner.lock().unwrap();
        if inner.closed {
            return Err(BrowserError::SessionClosed);
        }
        let key = locator.to_string();
        Ok(inner.elements.contains_key(&key).then_some(ElementHandle(key)))
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), BrowserError> {
        self.page.with_element(element, |e| {
            if e.flaky > 0 {
                e.flaky -= 1;
                return Err(BrowserError::NotInteractable("element is obscured".into()));
            }
            e.value = value.to_string();
            Ok(())
        })
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.page.with_element(element, |e| {
            e.clicks += 1;
            Ok(())
        })?;
        let mut inner = self.page.inner.lock().unwrap();
        if let Some(html) = inner.transitions.get(&element.0).cloned() {
            inner.html = html;
        }
        Ok(())
    }

    async fn upload(&self, element: &ElementHandle, path: &Path) -> Result<(), BrowserError> {
        self.page.with_element(element, |e| {
            e.uploaded = Some(path.to_path_buf());
            Ok(())
        })
    }

    async fn read_value(&self, element: &ElementHandle) -> Result<Option<String>, BrowserError> {
        self.page.with_element(element, |e| Ok(Some(e.value.clone())))
    }

    async fn snapshot(&self) -> Result<String, BrowserError> {
        Ok(self.page.inner.lock().unwrap().html.clone())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .page
            .inner
            .lock()
            .unwrap()
            .navigations
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out blank pages and remembers them.
#[derive(Default)]
pub struct FakeSessionFactory {
    pages: Mutex<Vec<FakePage>>,
}

impl FakeSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    pub fn closed(&self) -> usize {
        self.pages.lock().unwrap().iter().filter(|p| p.is_closed()).count()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let page = FakePage::new("<html></html>");
        self.pages.lock().unwrap().push(page.clone());
        Ok(Box::new(page.session()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Oracle
// ────────────────────────────────────────────────────────────────────────────

/// Replays queued responses. An empty fragment queue yields an empty fragment;
/// an empty answer queue yields an error.
#[derive(Default)]
pub struct ScriptedOracle {
    fragments: Mutex<VecDeque<Result<FieldFragment, OracleError>>>,
    answers: Mutex<VecDeque<Result<String, OracleError>>>,
    resolve_calls: Mutex<usize>,
    answer_calls: Mutex<usize>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(&self, fragment: Result<FieldFragment, OracleError>) {
        self.fragments.lock().unwrap().push_back(fragment);
    }

    pub fn push_answer(&self, answer: Result<String, OracleError>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn resolve_calls(&self) -> usize {
        *self.resolve_calls.lock().unwrap()
    }

    pub fn answer_calls(&self) -> usize {
        *self.answer_calls.lock().unwrap()
    }
}

#[async_trait]
impl FieldOracle for ScriptedOracle {
    async fn resolve_fields(&self, _request: &ChunkRequest<'_>) -> Result<FieldFragment, OracleError> {
        *self.resolve_calls.lock().unwrap() += 1;
        self.fragments
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FieldFragment::default()))
    }

    async fn answer_question(&self, _request: &QuestionRequest<'_>) -> Result<String, OracleError> {
        *self.answer_calls.lock().unwrap() += 1;
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(OracleError::Empty))
    }
}

pub fn oracle_field(name: &str, css: &str, kind: FieldKind, confidence: f32) -> OracleField {
    OracleField {
        name: name.to_string(),
        label: None,
        locator: Locator::css(css),
        kind,
        value: None,
        required: false,
        confidence,
        category: QuestionCategory::Profile,
        options: vec![],
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Jobs and profile
// ────────────────────────────────────────────────────────────────────────────

pub fn profile() -> UserProfile {
    serde_json::from_str(
        r#"{
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "phone": "+1 555 0100",
            "linkedin_url": "https://linkedin.com/in/ada",
            "location": "London, England"
        }"#,
    )
    .unwrap()
}

/// A job plus the borrowed pieces an [`AttemptContext`] needs.
pub struct TestJob {
    pub record: JobRecord,
    pub url: String,
    pub resume: PathBuf,
}

impl TestJob {
    pub fn new(id: &str) -> Self {
        let url = "https://jobs.lever.co/acme/1".to_string();
        let mut record = JobRecord::new(id);
        record.ats_type = Some("lever".into());
        record.application_url = Some(url.clone());
        record.job_title = Some("Platform Engineer".into());
        record.company_name = Some("Acme".into());
        Self {
            record,
            url,
            resume: PathBuf::from(format!("/tmp/ats-engine-tests/{id}/resume.pdf")),
        }
    }
}

pub fn attempt_context<'a>(
    job: &'a TestJob,
    descriptor: &'a StrategyDescriptor,
    profile: &'a UserProfile,
) -> AttemptContext<'a> {
    AttemptContext {
        job: &job.record,
        ats_type: "lever",
        application_url: &job.url,
        resume: &job.resume,
        cover_letter: None,
        profile,
        descriptor,
        job_context: (&job.record).into(),
    }
}

/// A `docs_ready` job whose resume exists on disk. Keep the directory alive for the test.
pub fn ready_job(id: &str) -> (JobRecord, TempDir) {
    let docs = tempfile::tempdir().unwrap();
    let resume = docs.path().join("resume.pdf");
    std::fs::write(&resume, b"%PDF-1.4").unwrap();

    let mut job = TestJob::new(id).record;
    job.document_paths.resume = Some(resume);
    (job, docs)
}

// ────────────────────────────────────────────────────────────────────────────
// Strategies and intervention
// ────────────────────────────────────────────────────────────────────────────

pub struct FakeStrategy {
    availability: Availability,
    outcomes: Mutex<VecDeque<Result<AttemptOutcome, String>>>,
    calls: Mutex<usize>,
}

impl FakeStrategy {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            availability: Availability::Unavailable(reason.to_string()),
            outcomes: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub fn scripted(outcomes: Vec<AttemptOutcome>) -> Self {
        Self {
            availability: Availability::Available,
            outcomes: Mutex::new(outcomes.into_iter().map(Ok).collect()),
            calls: Mutex::default(),
        }
    }

    /// Every attempt ends in an unclassified error.
    pub fn failing(message: &str) -> Self {
        Self {
            availability: Availability::Available,
            outcomes: Mutex::new(VecDeque::from(vec![Err(message.to_string())])),
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ApplicationStrategy for FakeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Traditional
    }

    fn availability(&self, _ats_type: &str) -> Availability {
        self.availability.clone()
    }

    async fn attempt(
        &self,
        _ctx: &AttemptContext<'_>,
        _session: &dyn BrowserSession,
    ) -> Result<AttemptOutcome, EngineError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.outcomes.lock().unwrap().pop_front();
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(BrowserError::Protocol(message).into()),
            None => Ok(AttemptOutcome::recoverable("no scripted outcome left")),
        }
    }
}

/// A controller whose responder always answers `disposition`, recording each request.
pub fn spawn_responder(
    disposition: Disposition,
) -> (Arc<InterventionController>, Arc<Mutex<Vec<InterventionRequest>>>) {
    let (controller, mut tickets) = InterventionController::channel(1);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    tokio::spawn(async move {
        while let Some(ticket) = tickets.recv().await {
            log.lock().unwrap().push(ticket.request.clone());
            ticket.resolve(disposition);
        }
    });
    (Arc::new(controller), seen)
}

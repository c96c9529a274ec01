//! Browser session: the only surface through which the engine touches a page.
//!
//! One session is owned by one job attempt for its whole duration. The W3C
//! WebDriver adapter lives in [`webdriver`]; tests drive a scripted page instead.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

pub mod webdriver;

pub use webdriver::WebDriverFactory;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ────────────────────────────────────────────────────────────────────────────
// Locators and handles
// ────────────────────────────────────────────────────────────────────────────

/// Opaque address of an element on a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
    Id(String),
    Name(String),
}

impl Locator {
    pub fn css(value: impl Into<String>) -> Self {
        Locator::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Locator::XPath(value.into())
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::Css(v) | Locator::XPath(v) | Locator::Id(v) | Locator::Name(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(v) => write!(f, "css={v}"),
            Locator::XPath(v) => write!(f, "xpath={v}"),
            Locator::Id(v) => write!(f, "id={v}"),
            Locator::Name(v) => write!(f, "name={v}"),
        }
    }
}

/// Reference to a located element, valid for the current page only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("element not interactable: {0}")]
    NotInteractable(String),

    #[error("timed out after {}ms waiting for {what}", .after.as_millis())]
    Timeout { after: Duration, what: String },

    #[error("webdriver transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webdriver protocol error: {0}")]
    Protocol(String),

    #[error("browser session closed")]
    SessionClosed,
}

impl BrowserError {
    /// Whether the same interaction may succeed if retried on this session.
    pub fn is_transient(&self) -> bool {
        !matches!(self, BrowserError::SessionClosed | BrowserError::Protocol(_))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Traits
// ────────────────────────────────────────────────────────────────────────────

/// A live browser tab. All calls take `&self`; implementations serialise
/// access internally.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Resolves a locator on the current page. `Ok(None)` means not present.
    async fn find(&self, locator: &Locator) -> Result<Option<ElementHandle>, BrowserError>;

    /// Replaces the element's value: clears text inputs, picks the matching option for selects.
    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), BrowserError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError>;

    async fn upload(&self, element: &ElementHandle, path: &Path) -> Result<(), BrowserError>;

    async fn read_value(&self, element: &ElementHandle) -> Result<Option<String>, BrowserError>;

    /// Serialized DOM of the current page.
    async fn snapshot(&self) -> Result<String, BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Opens fresh sessions, one per job attempt.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Owns a session for one attempt. A guard dropped without [`close`](Self::close),
/// for instance while a panic unwinds, closes the session on the runtime.
pub struct SessionGuard {
    session: Arc<dyn BrowserSession>,
    open: bool,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session: Arc::from(session),
            open: true,
        }
    }

    pub fn session(&self) -> &dyn BrowserSession {
        self.session.as_ref()
    }

    pub async fn close(mut self) -> Result<(), BrowserError> {
        self.open = false;
        self.session.close().await
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = self.session.clone();
        warn!("Browser session dropped while open; closing it");
        runtime.spawn(async move {
            if let Err(e) = session.close().await {
                warn!("Failed to close abandoned browser session: {e}");
            }
        });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Waiting
// ────────────────────────────────────────────────────────────────────────────

/// Polls `find` until the element appears or `timeout` elapses.
pub async fn wait_for_element(
    session: &dyn BrowserSession,
    locator: &Locator,
    timeout: Duration,
) -> Result<ElementHandle, BrowserError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(handle) = session.find(locator).await? {
            return Ok(handle);
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Timeout {
                after: timeout,
                what: locator.to_string(),
            });
        }
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

/// Polls the page until `predicate` accepts the snapshot or `timeout` elapses.
/// Returns the accepting snapshot.
pub async fn wait_for_page<F>(
    session: &dyn BrowserSession,
    timeout: Duration,
    what: &str,
    mut predicate: F,
) -> Result<String, BrowserError>
where
    F: FnMut(&str) -> bool + Send,
{
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = session.snapshot().await?;
        if predicate(&snapshot) {
            return Ok(snapshot);
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Timeout {
                after: timeout,
                what: what.to_string(),
            });
        }
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

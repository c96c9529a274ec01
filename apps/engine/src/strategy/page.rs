//! Page-level heuristics shared by the form-filling strategies: buttons to
//! start, advance and submit an application, and signs that it is finished
//! or that the site has shut us out.

use tracing::{debug, info};

use crate::browser::{BrowserError, BrowserSession, Locator};
use crate::resolver::visible_text;

const APPLY_BUTTONS: [&str; 6] = [
    "//button[contains(translate(normalize-space(.), 'APPLY', 'apply'), 'apply')]",
    "//a[contains(translate(normalize-space(.), 'APPLY', 'apply'), 'apply')]",
    "//button[contains(@class, 'apply')]",
    "//a[contains(@class, 'apply')]",
    "//input[@type='submit' and contains(@value, 'Apply')]",
    "//*[@data-automation-id='applyManually']",
];

/// Next/continue controls. Anything mentioning "submit" is left to [`SUBMIT_BUTTONS`].
const NEXT_BUTTONS: [&str; 7] = [
    "//button[contains(translate(normalize-space(.), 'NEXT', 'next'), 'next') and not(contains(translate(., 'SUBMIT', 'submit'), 'submit'))]",
    "//button[contains(translate(normalize-space(.), 'CONTINUE', 'continue'), 'continue') and not(contains(translate(., 'SUBMIT', 'submit'), 'submit'))]",
    "//a[contains(translate(normalize-space(.), 'NEXT', 'next'), 'next')]",
    "//a[contains(translate(normalize-space(.), 'CONTINUE', 'continue'), 'continue')]",
    "//input[@type='submit' and contains(@value, 'Next')]",
    "//input[@type='submit' and contains(@value, 'Continue')]",
    "//*[@data-automation-id='bottom-navigation-next-button']",
];

const SUBMIT_BUTTONS: [&str; 5] = [
    "//button[contains(translate(normalize-space(.), 'SUBMIT', 'submit'), 'submit')]",
    "//input[@type='submit' and contains(translate(@value, 'SUBMIT', 'submit'), 'submit')]",
    "//button[contains(@class, 'submit')]",
    "//a[contains(translate(normalize-space(.), 'SUBMIT', 'submit'), 'submit')]",
    "//button[@type='submit']",
];

const COMPLETION_PHRASES: [&str; 7] = [
    "application submitted",
    "application received",
    "application complete",
    "successfully submitted",
    "we have received your application",
    "thanks for applying",
    "thank you",
];

const COMPLETION_URL_MARKERS: [&str; 4] = ["success", "confirmation", "thank", "complete"];

/// Signs the site has blocked automation outright.
const LOCKOUT_PHRASES: [&str; 6] = [
    "captcha",
    "verify you are human",
    "verification required",
    "account locked",
    "too many attempts",
    "access denied",
];

fn locators(patterns: &[&str]) -> Vec<Locator> {
    patterns.iter().map(|p| Locator::xpath(*p)).collect()
}

pub fn apply_buttons() -> Vec<Locator> {
    locators(&APPLY_BUTTONS)
}

pub fn next_buttons() -> Vec<Locator> {
    locators(&NEXT_BUTTONS)
}

pub fn submit_buttons() -> Vec<Locator> {
    locators(&SUBMIT_BUTTONS)
}

/// What the engine sees of the current page.
#[derive(Debug, Clone)]
pub struct PageState {
    pub snapshot: String,
    pub text: String,
    pub url: String,
}

impl PageState {
    pub async fn observe(session: &dyn BrowserSession) -> Result<Self, BrowserError> {
        let snapshot = session.snapshot().await?;
        let url = session.current_url().await?;
        Ok(Self {
            text: visible_text(&snapshot).to_lowercase(),
            snapshot,
            url,
        })
    }

    /// The phrase or URL marker proving submission, if present.
    pub fn completion(&self) -> Option<String> {
        detect_completion(&self.text, &self.url)
    }

    pub fn lockout(&self) -> Option<&'static str> {
        detect_lockout(&self.text)
    }
}

pub fn detect_completion(page_text: &str, url: &str) -> Option<String> {
    let text = page_text.to_lowercase();
    if let Some(phrase) = COMPLETION_PHRASES.iter().find(|p| text.contains(*p)) {
        return Some(format!("page says '{phrase}'"));
    }
    let url = url.to_lowercase();
    let path = url.split_once("://").map(|(_, rest)| rest).unwrap_or(&url);
    COMPLETION_URL_MARKERS
        .iter()
        .find(|m| path.contains(*m))
        .map(|m| format!("url contains '{m}'"))
}

pub fn detect_lockout(page_text: &str) -> Option<&'static str> {
    let text = page_text.to_lowercase();
    LOCKOUT_PHRASES.iter().copied().find(|p| text.contains(p))
}

/// Clicks the first locator present on the page. Returns the one clicked.
pub async fn click_first(
    session: &dyn BrowserSession,
    candidates: &[Locator],
) -> Result<Option<Locator>, BrowserError> {
    for locator in candidates {
        let Some(element) = session.find(locator).await? else {
            continue;
        };
        match session.click(&element).await {
            Ok(()) => {
                info!("Clicked {locator}");
                return Ok(Some(locator.clone()));
            }
            Err(e) if e.is_transient() => debug!("Click on {locator} failed, trying next: {e}"),
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

//! W3C WebDriver adapter (chromedriver, geckodriver, Selenium Grid).
//!
//! Speaks the JSON wire protocol directly over `reqwest`; no driver binary is
//! spawned here. `WEBDRIVER_URL` must point at an already running driver.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{BrowserError, BrowserSession, ElementHandle, Locator, SessionFactory};

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4f1ff6a29a2b";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct WebDriverFactory {
    client: Client,
    endpoint: String,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(endpoint: impl Into<String>, headless: bool) -> Result<Self, BrowserError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            headless,
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--window-size=1920,1080",
            "--disable-blink-features=AutomationControlled",
            "--no-sandbox",
        ];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await?;
        let value = unwrap_value(status, body)?;

        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("new session response has no sessionId".into()))?;
        info!("Opened WebDriver session {session_id}");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
        }))
    }
}

pub struct WebDriverSession {
    client: Client,
    base: String,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let url = format!("{}{}", self.base, path);
        debug!("webdriver {} {}", method, path);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await?;
        unwrap_value(status, body)
    }

    fn element_path(element: &ElementHandle, suffix: &str) -> String {
        format!("/element/{}/{}", element.0, suffix)
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn find(&self, locator: &Locator) -> Result<Option<ElementHandle>, BrowserError> {
        let (using, value) = strategy_for(locator);
        match self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": using, "value": value })),
            )
            .await
        {
            Ok(value) => value[ELEMENT_KEY]
                .as_str()
                .map(|id| Some(ElementHandle(id.to_string())))
                .ok_or_else(|| BrowserError::Protocol("element response has no reference".into())),
            Err(BrowserError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), BrowserError> {
        let tag = self
            .command(Method::GET, &Self::element_path(element, "name"), None)
            .await?;
        if tag.as_str().map(|t| t.eq_ignore_ascii_case("select")).unwrap_or(false) {
            return self.select_option(element, value).await;
        }

        // Clearing is best-effort: some custom widgets reject it but still accept keys.
        if let Err(e) = self
            .command(Method::POST, &Self::element_path(element, "clear"), Some(json!({})))
            .await
        {
            warn!("clear failed before fill: {e}");
        }
        self.command(
            Method::POST,
            &Self::element_path(element, "value"),
            Some(json!({ "text": value })),
        )
        .await
        .map(|_| ())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.command(Method::POST, &Self::element_path(element, "click"), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn upload(&self, element: &ElementHandle, path: &Path) -> Result<(), BrowserError> {
        let absolute = tokio::fs::canonicalize(path).await.map_err(|e| {
            BrowserError::NotInteractable(format!("cannot upload {}: {e}", path.display()))
        })?;
        self.command(
            Method::POST,
            &Self::element_path(element, "value"),
            Some(json!({ "text": absolute.to_string_lossy() })),
        )
        .await
        .map(|_| ())
    }

    async fn read_value(&self, element: &ElementHandle) -> Result<Option<String>, BrowserError> {
        let value = self
            .command(Method::GET, &Self::element_path(element, "property/value"), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn snapshot(&self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol("page source is not a string".into()))
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol("current url is not a string".into()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.command(Method::DELETE, "", None).await.map(|_| ())
    }
}

impl WebDriverSession {
    /// Picks the `<option>` whose visible text or value matches, case-insensitively.
    async fn select_option(&self, select: &ElementHandle, wanted: &str) -> Result<(), BrowserError> {
        let options = self
            .command(
                Method::POST,
                &Self::element_path(select, "elements"),
                Some(json!({ "using": "css selector", "value": "option" })),
            )
            .await?;
        let options = options.as_array().cloned().unwrap_or_default();
        let wanted = wanted.trim().to_lowercase();

        for option in options {
            let Some(id) = option[ELEMENT_KEY].as_str() else {
                continue;
            };
            let handle = ElementHandle(id.to_string());
            let text = self
                .command(Method::GET, &Self::element_path(&handle, "text"), None)
                .await?;
            let value = self.read_value(&handle).await?.unwrap_or_default();
            let text = text.as_str().unwrap_or_default().trim().to_lowercase();
            if text == wanted || value.trim().to_lowercase() == wanted {
                return self.click(&handle).await;
            }
        }
        Err(BrowserError::NotInteractable(format!(
            "no option matching '{wanted}'"
        )))
    }
}

fn strategy_for(locator: &Locator) -> (&'static str, String) {
    match locator {
        Locator::Css(v) => ("css selector", v.clone()),
        Locator::XPath(v) => ("xpath", v.clone()),
        Locator::Id(v) => ("css selector", format!("[id=\"{}\"]", escape_attr(v))),
        Locator::Name(v) => ("css selector", format!("[name=\"{}\"]", escape_attr(v))),
    }
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Unwraps a `{"value": ...}` envelope, mapping W3C error codes onto [`BrowserError`].
fn unwrap_value(status: u16, mut body: Value) -> Result<Value, BrowserError> {
    let value = body
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);
    if (200..300).contains(&status) {
        return Ok(value);
    }

    let code = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or_default().to_string();
    Err(classify_error(code, message))
}

fn classify_error(code: &str, message: String) -> BrowserError {
    match code {
        "no such element" | "stale element reference" => BrowserError::NotFound(message),
        "element not interactable" | "element click intercepted" | "invalid element state" => {
            BrowserError::NotInteractable(message)
        }
        "invalid session id" | "no such window" | "session not created" => BrowserError::SessionClosed,
        "timeout" | "script timeout" => BrowserError::Timeout {
            after: REQUEST_TIMEOUT,
            what: message,
        },
        other => BrowserError::Protocol(format!("{other}: {message}")),
    }
}

//! Form actuator: executes a resolved [`FieldMap`] against a live page.
//!
//! Order is fixed: file uploads, then required fields, then optional fields,
//! then submission controls. Each field gets a bounded wait, a type-appropriate
//! action and, for typed fields, a read-back check. Failures are retried with
//! linear backoff; a field that never succeeds is recorded, not raised.
//! Submission controls are skipped once any required field has failed.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::browser::{wait_for_element, BrowserError, BrowserSession};
use crate::oracle::FieldKind;
use crate::resolver::{FieldEntry, FieldMap, FieldSource};

pub mod retry;

use retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ActuatorConfig {
    pub element_wait: Duration,
    pub retry: RetryPolicy,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            element_wait: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FieldStatus {
    Filled,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldReport {
    pub name: String,
    pub kind: FieldKind,
    pub source: FieldSource,
    pub required: bool,
    pub attempts: u32,
    pub status: FieldStatus,
}

impl FieldReport {
    pub fn is_filled(&self) -> bool {
        self.status == FieldStatus::Filled
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActuationReport {
    pub fields: Vec<FieldReport>,
}

impl ActuationReport {
    pub fn required_failures(&self) -> Vec<&FieldReport> {
        self.fields
            .iter()
            .filter(|f| f.required && matches!(f.status, FieldStatus::Failed(_)))
            .collect()
    }

    pub fn has_required_failure(&self) -> bool {
        !self.required_failures().is_empty()
    }

    pub fn filled(&self) -> impl Iterator<Item = &FieldReport> {
        self.fields.iter().filter(|f| f.is_filled())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FieldReport> {
        self.fields
            .iter()
            .filter(|f| matches!(f.status, FieldStatus::Failed(_)))
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&FieldReport> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn summary(&self) -> String {
        let filled = self.filled().count();
        let failed = self.failed().count();
        let skipped = self.fields.len() - filled - failed;
        format!("{filled} filled, {failed} failed, {skipped} skipped")
    }
}

/// Orders entries for actuation. Stable within each group.
pub fn actuation_order(fields: &FieldMap) -> Vec<&FieldEntry> {
    let rank = |entry: &FieldEntry| match (entry.kind, entry.required) {
        (FieldKind::File, _) => 0,
        (FieldKind::Submit, _) => 3,
        (_, true) => 1,
        (_, false) => 2,
    };
    let mut ordered: Vec<&FieldEntry> = fields.iter().collect();
    ordered.sort_by_key(|entry| rank(entry));
    ordered
}

pub struct FormActuator<'a> {
    session: &'a dyn BrowserSession,
    config: ActuatorConfig,
}

impl<'a> FormActuator<'a> {
    pub fn new(session: &'a dyn BrowserSession, config: ActuatorConfig) -> Self {
        Self { session, config }
    }

    pub async fn apply(&self, fields: &FieldMap) -> ActuationReport {
        let mut report = ActuationReport::default();

        for entry in actuation_order(fields) {
            let field_report = if entry.kind == FieldKind::Submit && report.has_required_failure() {
                self.skipped(entry, "required field failed")
            } else {
                self.apply_field(entry).await
            };
            report.fields.push(field_report);
        }

        info!("Actuation finished: {}", report.summary());
        report
    }

    async fn apply_field(&self, entry: &FieldEntry) -> FieldReport {
        let Some(value) = self.value_for(entry) else {
            debug!("Skipping {}: no value", entry.name);
            return self.skipped(entry, "no value");
        };

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.try_field(entry, value).await {
                Ok(()) => {
                    debug!("Filled {} via {} (attempt {attempt})", entry.name, entry.locator);
                    return self.report(entry, attempt, FieldStatus::Filled);
                }
                Err(e) => {
                    warn!(
                        "Field {} attempt {attempt}/{max_attempts} failed: {e}",
                        entry.name
                    );
                    let retryable = e.is_transient();
                    last_error = e.to_string();
                    if !retryable {
                        return self.report(entry, attempt, FieldStatus::Failed(last_error));
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        self.report(entry, max_attempts, FieldStatus::Failed(last_error))
    }

    fn value_for<'e>(&self, entry: &'e FieldEntry) -> Option<&'e str> {
        match entry.kind {
            FieldKind::Submit | FieldKind::Radio => Some(entry.value.as_deref().unwrap_or("")),
            FieldKind::Checkbox => entry.value.as_deref().filter(|v| is_truthy(v)),
            _ => entry.value.as_deref().filter(|v| !v.trim().is_empty()),
        }
    }

    async fn try_field(&self, entry: &FieldEntry, value: &str) -> Result<(), BrowserError> {
        let element =
            wait_for_element(self.session, &entry.locator, self.config.element_wait).await?;

        match entry.kind {
            FieldKind::File => self.session.upload(&element, Path::new(value)).await,
            FieldKind::Checkbox | FieldKind::Radio | FieldKind::Submit => {
                self.session.click(&element).await
            }
            FieldKind::Select => self.session.fill(&element, value).await,
            _ => {
                self.session.fill(&element, value).await?;
                let actual = self.session.read_value(&element).await?;
                match actual {
                    Some(actual) if actual.trim() != value.trim() => {
                        Err(BrowserError::NotInteractable(format!(
                            "read-back mismatch on {}: expected {} chars, found {}",
                            entry.name,
                            value.trim().len(),
                            actual.trim().len()
                        )))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    fn report(&self, entry: &FieldEntry, attempts: u32, status: FieldStatus) -> FieldReport {
        FieldReport {
            name: entry.name.clone(),
            kind: entry.kind,
            source: entry.source,
            required: entry.required,
            attempts,
            status,
        }
    }

    fn skipped(&self, entry: &FieldEntry, reason: &str) -> FieldReport {
        self.report(entry, 0, FieldStatus::Skipped(reason.to_string()))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "on" | "checked"
    )
}

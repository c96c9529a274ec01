//! Pure traditional strategy: known locator tables plus keyword heuristics.
//! Never calls the oracle.

use async_trait::async_trait;
use tracing::debug;

use super::ats::{known_fields, UNKNOWN_ATS};
use super::flow::{run_form_flow, FormKit, PageFiller, PagePlan};
use super::page::PageState;
use super::{ApplicationStrategy, AttemptContext, AttemptOutcome, Availability, StrategyKind};
use crate::browser::BrowserSession;
use crate::errors::EngineError;
use crate::oracle::{FieldKind, QuestionCategory};
use crate::questions::policy::is_demographic;
use crate::resolver::{extract_controls, form_signature, FieldEntry, FieldMap, FieldSource, FormControl};

/// Profile field names by descriptor keyword. Checked in order; first match wins.
const FIELD_KEYWORDS: [(&str, &[&str]); 14] = [
    ("first_name", &["first name", "first_name", "firstname", "given name", "fname"]),
    ("last_name", &["last name", "last_name", "lastname", "surname", "family name", "lname"]),
    ("full_name", &["full name", "full_name", "fullname", "your name"]),
    ("email", &["email", "e-mail"]),
    ("phone", &["phone", "mobile", "telephone"]),
    ("linkedin", &["linkedin"]),
    ("github", &["github"]),
    ("website", &["website", "portfolio", "personal site"]),
    ("address", &["street", "address"]),
    ("city", &["city", "town"]),
    ("state", &["state", "province", "region"]),
    ("zip", &["zip", "postal", "postcode"]),
    ("country", &["country"]),
    ("location", &["location"]),
];

/// Maps one control to a field name, or `None` if it is not recognised.
pub fn identify_control(control: &FormControl) -> Option<String> {
    let descriptor = control.descriptor();
    if control.kind() == FieldKind::File {
        let name = if descriptor.contains("cover") {
            "cover_letter"
        } else {
            "resume"
        };
        return Some(name.to_string());
    }
    if let Some((name, _)) = FIELD_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| descriptor.contains(k)))
    {
        return Some(name.to_string());
    }
    // A bare `name="name"` is almost always the full name.
    if control.name.as_deref() == Some("name") || control.id.as_deref() == Some("name") {
        return Some("full_name".to_string());
    }
    None
}

/// Fields found without the oracle: the ATS's known table first, then heuristics.
pub async fn static_fields(
    session: &dyn BrowserSession,
    ats_type: &str,
    controls: &[FormControl],
) -> FieldMap {
    let mut fields = FieldMap::new();

    for known in known_fields(ats_type).unwrap_or_default() {
        for locator in &known.locators {
            if let Ok(Some(_)) = session.find(locator).await {
                let mut entry = FieldEntry::new(known.name, locator.clone(), known.kind, FieldSource::Static);
                entry.required = known.required;
                fields.insert(entry);
                break;
            }
        }
    }

    for control in controls.iter().filter(|c| c.is_fillable()) {
        let Some(locator) = control.locator() else {
            continue;
        };
        let descriptor = control.descriptor();

        if is_demographic(&descriptor) {
            let name = control
                .name
                .clone()
                .or_else(|| control.id.clone())
                .unwrap_or_else(|| descriptor.clone());
            let mut entry = FieldEntry::new(name, locator, control.kind(), FieldSource::Static);
            entry.label = control.label.clone();
            entry.category = QuestionCategory::Demographic;
            fields.insert_if_absent(entry);
            continue;
        }

        if let Some(name) = identify_control(control) {
            let mut entry = FieldEntry::new(name, locator, control.kind(), FieldSource::Static);
            entry.label = control.label.clone();
            entry.required = control.required;
            if fields.insert_if_absent(entry) {
                debug!("Heuristic match: {} -> {}", descriptor, control.tag);
            }
        }
    }

    fields
}

pub struct TraditionalStrategy {
    kit: FormKit,
}

impl TraditionalStrategy {
    pub fn new(kit: FormKit) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl PageFiller for TraditionalStrategy {
    async fn plan_page(
        &self,
        ctx: &AttemptContext<'_>,
        session: &dyn BrowserSession,
        page: &PageState,
    ) -> PagePlan {
        let controls = extract_controls(&page.snapshot);
        let fields = static_fields(session, ctx.ats_type, &controls).await;
        let unresolved = controls
            .iter()
            .filter(|c| c.is_fillable() && identify_control(c).is_none() && !is_demographic(&c.descriptor()))
            .map(|c| c.descriptor())
            .collect();
        PagePlan {
            fields,
            form_signature: form_signature(&controls),
            unresolved,
        }
    }
}

#[async_trait]
impl ApplicationStrategy for TraditionalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Traditional
    }

    fn availability(&self, ats_type: &str) -> Availability {
        if ats_type == UNKNOWN_ATS {
            Availability::Unavailable("ATS platform not recognised".to_string())
        } else {
            Availability::Available
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

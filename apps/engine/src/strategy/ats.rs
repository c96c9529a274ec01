//! ATS identification from application URLs, and known locators per ATS.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::browser::Locator;
use crate::oracle::FieldKind;

pub const UNKNOWN_ATS: &str = "unknown";

/// Host+path patterns, checked in order.
const ATS_PATTERNS: [(&str, &[&str]); 11] = [
    ("greenhouse", &[r"boards\.greenhouse\.io", r"greenhouse\.io/embed"]),
    ("lever", &[r"jobs\.lever\.co", r"lever\.co/apply"]),
    ("ashbyhq", &[r"jobs\.ashbyhq\.com"]),
    (
        "workday",
        &[
            r"\.wd[0-9]+\.myworkdayjobs\.com",
            r"myworkdayjobs\.com",
            r"workday\.com/.*careers",
            r"workday\.com/.*jobs",
        ],
    ),
    ("bamboohr", &[r"\.bamboohr\.com/careers", r"\.bamboohr\.com/jobs"]),
    ("icims", &[r"icims\.com"]),
    ("smartrecruiters", &[r"smartrecruiters\.com"]),
    ("taleo", &[r"taleo\.net"]),
    ("jobvite", &[r"jobs\.jobvite\.com"]),
    (
        "oraclecloud",
        &[r"fa\.oraclecloud\.com", r"oraclecloud\.com/hcmui/candidateexperience"],
    ),
    ("sap_successfactors", &[r"successfactors\.com", r"sf\.careers"]),
];

fn compiled_patterns() -> &'static [(&'static str, Vec<Regex>)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ATS_PATTERNS
            .iter()
            .map(|(name, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!("Invalid ATS pattern {p}: {e}");
                            None
                        }
                    })
                    .collect();
                (*name, compiled)
            })
            .collect()
    })
}

/// Lowercase ATS name for a URL, or `None` when no pattern matches.
pub fn identify_ats(url: &str) -> Option<&'static str> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let haystack = format!("{}{}", host, parsed.path().to_lowercase());

    let found = compiled_patterns()
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(&haystack)))
        .map(|(name, _)| *name);

    match found {
        Some(name) => debug!("ATS identified as {name} for {url}"),
        None => debug!("No ATS pattern matched {url}"),
    }
    found
}

/// A field with a locator known ahead of time for a specific ATS.
#[derive(Debug, Clone)]
pub struct KnownField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub locators: Vec<Locator>,
}

fn known(name: &'static str, kind: FieldKind, required: bool, locators: &[&str]) -> KnownField {
    KnownField {
        name,
        kind,
        required,
        locators: locators
            .iter()
            .map(|l| {
                if l.starts_with('/') {
                    Locator::xpath(*l)
                } else {
                    Locator::css(*l)
                }
            })
            .collect(),
    }
}

/// Hand-maintained locator tables. `None` for ATSs without one.
pub fn known_fields(ats_type: &str) -> Option<Vec<KnownField>> {
    match ats_type {
        "greenhouse" => Some(vec![
            known("first_name", FieldKind::Text, true, &["#first_name"]),
            known("last_name", FieldKind::Text, true, &["#last_name"]),
            known("email", FieldKind::Email, true, &["#email"]),
            known("phone", FieldKind::Tel, false, &["#phone"]),
            known(
                "resume",
                FieldKind::File,
                true,
                &["input[type='file'][id*='resume']", "input[type='file'][name*='resume']"],
            ),
            known(
                "cover_letter",
                FieldKind::File,
                false,
                &["input[type='file'][id*='cover_letter']", "input[type='file'][name*='cover_letter']"],
            ),
            known(
                "linkedin",
                FieldKind::Url,
                false,
                &["//label[contains(., 'LinkedIn')]/following::input[1]"],
            ),
            known("submit", FieldKind::Submit, false, &["#submit_app", "button[type='submit']"]),
        ]),
        "lever" => Some(vec![
            known("full_name", FieldKind::Text, true, &["input[name='name']"]),
            known("email", FieldKind::Email, true, &["input[name='email']"]),
            known("phone", FieldKind::Tel, false, &["input[name='phone']"]),
            known("linkedin", FieldKind::Url, false, &["input[name='urls[LinkedIn]']"]),
            known("github", FieldKind::Url, false, &["input[name='urls[GitHub]']"]),
            known("resume", FieldKind::File, true, &["input[name='resume']"]),
            known("submit", FieldKind::Submit, false, &["button[type='submit']", "#btn-submit"]),
        ]),
        "workday" => Some(vec![
            known(
                "resume",
                FieldKind::File,
                true,
                &["//input[@type='file' and contains(@data-automation-id, 'resume')]"],
            ),
            known(
                "cover_letter",
                FieldKind::File,
                false,
                &["//input[@type='file' and contains(@data-automation-id, 'coverLetter')]"],
            ),
            known(
                "first_name",
                FieldKind::Text,
                true,
                &["//input[@data-automation-id='legalNameSection_firstName']"],
            ),
            known(
                "last_name",
                FieldKind::Text,
                true,
                &["//input[@data-automation-id='legalNameSection_lastName']"],
            ),
            known(
                "city",
                FieldKind::Text,
                false,
                &["//input[@data-automation-id='addressSection_city']"],
            ),
            known("email", FieldKind::Email, true, &["//input[@data-automation-id='email']"]),
            known("phone", FieldKind::Tel, false, &["//input[@data-automation-id='phoneNumber']"]),
        ]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_known_platforms() {
        assert_eq!(
            identify_ats("https://boards.greenhouse.io/openai/jobs/12345"),
            Some("greenhouse")
        );
        assert_eq!(
            identify_ats("https://openai.wd1.myworkdayjobs.com/en-US/External/job/X_JR-123"),
            Some("workday")
        );
        assert_eq!(identify_ats("https://jobs.lever.co/google/123abc"), Some("lever"));
        assert_eq!(
            identify_ats("https://eexi.fa.us2.oraclecloud.com/hcmUI/CandidateExperience/en/sites/CX/job/1001"),
            Some("oraclecloud")
        );
        assert_eq!(
            identify_ats("https://WWW.example.bamboohr.com/careers/123"),
            Some("bamboohr")
        );
    }

    #[test]
    fn test_identify_unknown_or_invalid() {
        assert_eq!(identify_ats("https://careers.google.com/jobs/results/1234/"), None);
        assert_eq!(identify_ats("not a url"), None);
        assert_eq!(identify_ats(""), None);
    }

    #[test]
    fn test_known_fields_pick_locator_kind() {
        let workday = known_fields("workday").unwrap();
        assert!(matches!(workday[0].locators[0], Locator::XPath(_)));
        let greenhouse = known_fields("greenhouse").unwrap();
        assert_eq!(greenhouse[2].locators[0], Locator::css("#email"));
        assert!(known_fields("taleo").is_none());
    }
}

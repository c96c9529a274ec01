use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The applicant's personal data, loaded once per run from a JSON file.
///
/// Known keys are typed; anything else lands in `extra` and is still offered
/// to the oracle as a fact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, alias = "name")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "linkedin_url")]
    pub linkedin: Option<String>,
    #[serde(default, alias = "github_url")]
    pub github: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub work_authorization: Option<String>,
    #[serde(default)]
    pub requires_sponsorship: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl UserProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile at {}", path.display()))?;
        let profile: UserProfile = serde_json::from_str(&raw)
            .with_context(|| format!("Profile at {} is not valid JSON", path.display()))?;
        if profile.email.trim().is_empty() {
            anyhow::bail!("Profile at {} has no email address", path.display());
        }
        Ok(profile)
    }

    pub fn full_name(&self) -> String {
        match &self.full_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => format!("{} {}", self.first_name.trim(), self.last_name.trim())
                .trim()
                .to_string(),
        }
    }

    /// Value for a canonical field name, if the profile has one.
    pub fn value_for(&self, field: &str) -> Option<String> {
        let value = match field {
            "first_name" => Some(self.first_name.clone()),
            "last_name" => Some(self.last_name.clone()),
            "full_name" | "name" => Some(self.full_name()),
            "email" => Some(self.email.clone()),
            "phone" | "phone_number" => self.phone.clone(),
            "linkedin" => self.linkedin.clone(),
            "github" => self.github.clone(),
            "website" | "portfolio" => self.website.clone().or_else(|| self.github.clone()),
            "location" => self.location.clone(),
            "city" => self
                .location
                .as_ref()
                .and_then(|loc| loc.split(',').next())
                .map(|s| s.trim().to_string()),
            "state" => self
                .location
                .as_ref()
                .and_then(|loc| loc.rsplit_once(','))
                .map(|(_, state)| state.trim().to_string()),
            "work_authorization" => self.work_authorization.clone(),
            "requires_sponsorship" => self
                .requires_sponsorship
                .map(|b| if b { "Yes" } else { "No" }.to_string()),
            other => self.extra.get(other).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::Bool(b) => Some(if *b { "Yes" } else { "No" }.to_string()),
                _ => None,
            }),
        };

        value.filter(|v| !v.trim().is_empty())
    }

    /// Canonical field names this profile can answer.
    pub fn field_names(&self) -> Vec<String> {
        const CANONICAL: [&str; 13] = [
            "first_name",
            "last_name",
            "full_name",
            "email",
            "phone",
            "linkedin",
            "github",
            "website",
            "location",
            "city",
            "state",
            "work_authorization",
            "requires_sponsorship",
        ];

        CANONICAL
            .iter()
            .map(|s| s.to_string())
            .chain(self.extra.keys().cloned())
            .filter(|name| self.value_for(name).is_some())
            .collect()
    }

    /// All known facts as a flat map, handed to the oracle with every chunk.
    pub fn facts(&self) -> BTreeMap<String, String> {
        self.field_names()
            .into_iter()
            .filter_map(|name| self.value_for(&name).map(|value| (name, value)))
            .collect()
    }
}

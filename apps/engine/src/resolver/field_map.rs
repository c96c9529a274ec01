use indexmap::IndexMap;
use serde::Serialize;

use crate::browser::Locator;
use crate::oracle::{FieldKind, OracleField, QuestionCategory};

/// Where a field's locator came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Validated entry from the locator cache.
    Cache,
    /// Described by the oracle on this page.
    Oracle,
    /// Known locator table for the ATS, or heuristic identification.
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldEntry {
    pub name: String,
    pub label: Option<String>,
    pub locator: Locator,
    pub kind: FieldKind,
    pub value: Option<String>,
    pub required: bool,
    pub confidence: f32,
    pub category: QuestionCategory,
    pub options: Vec<String>,
    pub source: FieldSource,
}

impl FieldEntry {
    pub fn new(name: impl Into<String>, locator: Locator, kind: FieldKind, source: FieldSource) -> Self {
        Self {
            name: name.into(),
            label: None,
            locator,
            kind,
            value: None,
            required: false,
            confidence: 1.0,
            category: QuestionCategory::Profile,
            options: Vec::new(),
            source,
        }
    }

    pub fn from_oracle(field: OracleField) -> Self {
        Self {
            name: field.name.trim().to_string(),
            label: field.label,
            locator: field.locator,
            kind: field.kind,
            value: field.value.filter(|v| !v.trim().is_empty()),
            required: field.required,
            confidence: field.confidence,
            category: field.category,
            options: field.options,
            source: FieldSource::Oracle,
        }
    }

    /// Text to show the question handler: the label if known, else the name.
    pub fn question_text(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Field name to entry, ordered by first appearance on the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldMap {
    entries: IndexMap<String, FieldEntry>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces by name. A replaced entry keeps its original position.
    pub fn insert(&mut self, entry: FieldEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Inserts only if the name is not already present.
    pub fn insert_if_absent(&mut self, entry: FieldEntry) -> bool {
        if self.entries.contains_key(&entry.name) {
            return false;
        }
        self.insert(entry);
        true
    }

    pub fn get(&self, name: &str) -> Option<&FieldEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FieldEntry> {
        self.entries.values_mut()
    }

    /// Splits off submit controls, leaving only fields that take a value.
    pub fn take_submits(&mut self) -> Vec<FieldEntry> {
        let submits: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.kind == FieldKind::Submit)
            .map(|e| e.name.clone())
            .collect();
        submits
            .iter()
            .filter_map(|name| self.entries.shift_remove(name))
            .collect()
    }
}

impl FromIterator<FieldEntry> for FieldMap {
    fn from_iter<T: IntoIterator<Item = FieldEntry>>(iter: T) -> Self {
        let mut map = FieldMap::new();
        for entry in iter {
            map.insert(entry);
        }
        map
    }
}

//! Form structure extraction and fingerprinting.
//!
//! Two pages with the same controls in the same order share a signature, so
//! locators learned on one apply to the other.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use lol_html::html_content::{Element, EndTag};
use lol_html::{doc_text, element, rewrite_str, HandlerResult, RewriteStrSettings};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::browser::Locator;
use crate::oracle::FieldKind;

/// A form control as it appears in the raw snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormControl {
    pub tag: String,
    pub input_type: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub placeholder: Option<String>,
    pub aria_label: Option<String>,
    pub required: bool,
    /// Text of the `<label>` pointing at this control, if any.
    pub label: Option<String>,
}

impl FormControl {
    /// Controls a human would type into, pick from, or attach a file to.
    pub fn is_fillable(&self) -> bool {
        match self.tag.as_str() {
            "select" | "textarea" => true,
            "input" => !matches!(
                self.input_type.as_deref(),
                Some("hidden") | Some("submit") | Some("button") | Some("reset") | Some("image")
            ),
            _ => false,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match (self.tag.as_str(), self.input_type.as_deref()) {
            ("select", _) => FieldKind::Select,
            ("textarea", _) => FieldKind::Textarea,
            ("button", _) | (_, Some("submit")) => FieldKind::Submit,
            (_, Some("email")) => FieldKind::Email,
            (_, Some("tel")) => FieldKind::Tel,
            (_, Some("url")) => FieldKind::Url,
            (_, Some("file")) => FieldKind::File,
            (_, Some("checkbox")) => FieldKind::Checkbox,
            (_, Some("radio")) => FieldKind::Radio,
            _ => FieldKind::Text,
        }
    }

    /// Most specific locator available: id, then name.
    pub fn locator(&self) -> Option<Locator> {
        self.id
            .as_ref()
            .map(|id| Locator::Id(id.clone()))
            .or_else(|| self.name.as_ref().map(|name| Locator::Name(name.clone())))
    }

    /// Whether `locator` names this control by id or name, directly or as a
    /// plain `#id` / `[name=...]` selector.
    pub fn is_addressed_by(&self, locator: &Locator) -> bool {
        let id = self.id.as_deref();
        let name = self.name.as_deref();
        match locator {
            Locator::Id(value) => id == Some(value.as_str()),
            Locator::Name(value) => name == Some(value.as_str()),
            Locator::Css(selector) => {
                if let Some(value) = selector.strip_prefix('#') {
                    return id == Some(value);
                }
                let Some(name) = name else {
                    return false;
                };
                [format!("[name=\"{name}\"]"), format!("[name='{name}']"), format!("[name={name}]")]
                    .iter()
                    .any(|pattern| selector.ends_with(pattern.as_str()))
            }
            Locator::XPath(_) => false,
        }
    }

    /// Every piece of human-facing text describing the control, lowercased.
    pub fn descriptor(&self) -> String {
        [
            self.label.as_deref(),
            self.aria_label.as_deref(),
            self.placeholder.as_deref(),
            self.name.as_deref(),
            self.id.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[derive(Default)]
struct Extraction {
    controls: Vec<FormControl>,
    /// Label text keyed by its `for` target.
    labels_by_target: HashMap<String, String>,
    /// Controls wrapped by a label without `for`, with that label's index.
    wrapped: Vec<(usize, usize)>,
    labels: Vec<(Option<String>, String)>,
    open_label: Option<usize>,
}

fn attribute(el: &Element, name: &str) -> Option<String> {
    el.get_attribute(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn record_control(state: &RefCell<Extraction>, el: &Element) {
    let tag = el.tag_name().to_ascii_lowercase();
    let input_type = attribute(el, "type")
        .map(|t| t.to_ascii_lowercase())
        .or_else(|| (tag == "input").then(|| "text".to_string()));
    let control = FormControl {
        input_type,
        id: attribute(el, "id"),
        name: attribute(el, "name"),
        placeholder: attribute(el, "placeholder"),
        aria_label: attribute(el, "aria-label"),
        required: el.has_attribute("required")
            || attribute(el, "aria-required").as_deref() == Some("true"),
        label: None,
        tag,
    };

    let mut state = state.borrow_mut();
    let index = state.controls.len();
    if let Some(label) = state.open_label {
        state.wrapped.push((index, label));
    }
    state.controls.push(control);
}

/// Strips tags and collapses whitespace.
pub fn visible_text(html: &str) -> String {
    let mut text = String::new();
    let _ = rewrite_str(
        html,
        RewriteStrSettings {
            document_content_handlers: vec![doc_text!(|chunk| {
                text.push_str(chunk.as_str());
                if chunk.last_in_text_node() {
                    text.push(' ');
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    );
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// All input, select, textarea and button controls, in document order.
pub fn extract_controls(snapshot: &str) -> Vec<FormControl> {
    let state = Rc::new(RefCell::new(Extraction::default()));

    let label_state = state.clone();
    let text_state = state.clone();
    let result = rewrite_str(
        snapshot,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("label", |el| {
                    let target = attribute(el, "for");
                    let index = {
                        let mut state = label_state.borrow_mut();
                        state.labels.push((target, String::new()));
                        let index = state.labels.len() - 1;
                        state.open_label = Some(index);
                        index
                    };
                    if let Some(handlers) = el.end_tag_handlers() {
                        let closing = label_state.clone();
                        handlers.push(Box::new(move |_end: &mut EndTag<'_>| -> HandlerResult {
                            let mut state = closing.borrow_mut();
                            if state.open_label == Some(index) {
                                state.open_label = None;
                            }
                            Ok(())
                        }));
                    }
                    Ok(())
                }),
                element!("input", |el| {
                    record_control(&state, el);
                    Ok(())
                }),
                element!("select", |el| {
                    record_control(&state, el);
                    Ok(())
                }),
                element!("textarea", |el| {
                    record_control(&state, el);
                    Ok(())
                }),
                element!("button", |el| {
                    record_control(&state, el);
                    Ok(())
                }),
            ],
            document_content_handlers: vec![doc_text!(|chunk| {
                let mut state = text_state.borrow_mut();
                if let Some(open) = state.open_label {
                    state.labels[open].1.push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        state.labels[open].1.push(' ');
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    );
    if let Err(e) = result {
        debug!("Snapshot could not be fully parsed: {e}");
    }

    let mut state = state.take();
    let labels: Vec<(Option<String>, String)> = std::mem::take(&mut state.labels)
        .into_iter()
        .map(|(target, text)| (target, text.split_whitespace().collect::<Vec<_>>().join(" ")))
        .collect();
    for (target, text) in &labels {
        if let Some(target) = target.as_ref().filter(|_| !text.is_empty()) {
            state.labels_by_target.insert(target.clone(), text.clone());
        }
    }

    let Extraction {
        mut controls,
        labels_by_target,
        wrapped,
        ..
    } = state;
    for (index, control) in controls.iter_mut().enumerate() {
        control.label = control
            .id
            .as_ref()
            .and_then(|id| labels_by_target.get(id).cloned())
            .or_else(|| {
                wrapped
                    .iter()
                    .find(|(wrapped_index, _)| *wrapped_index == index)
                    .map(|(_, label)| labels[*label].1.clone())
                    .filter(|text| !text.is_empty())
            });
    }
    controls
}

/// Stable fingerprint of a form's fillable structure: first 16 hex chars of SHA-256.
pub fn form_signature(controls: &[FormControl]) -> String {
    let mut hasher = Sha256::new();
    for control in controls.iter().filter(|c| c.is_fillable()) {
        hasher.update(control.tag.as_bytes());
        hasher.update(b"|");
        hasher.update(control.input_type.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(control.name.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(control.id.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = r#"
        <form id="application_form">
          <label for="first_name">First Name *</label>
          <input type="text" id="first_name" name="job_application[first_name]" required>
          <label>Email <input type='email' name="email" aria-required="true"></label>
          <input type="hidden" name="token" value="abc">
          <select id="gender"><option>Male</option><option>Decline to self-identify</option></select>
          <textarea id="why" placeholder="Why us?"></textarea>
          <button type="submit">Submit Application</button>
        </form>"#;

    #[test]
    fn test_extract_controls_reads_attributes_and_labels() {
        let controls = extract_controls(FORM);
        assert_eq!(controls.len(), 6);

        let first = &controls[0];
        assert_eq!(first.id.as_deref(), Some("first_name"));
        assert_eq!(first.label.as_deref(), Some("First Name *"));
        assert!(first.required);

        let email = &controls[1];
        assert_eq!(email.kind(), FieldKind::Email);
        assert_eq!(email.label.as_deref(), Some("Email"));
        assert!(email.required);
        assert_eq!(email.locator(), Some(Locator::Name("email".into())));

        assert!(!controls[2].is_fillable());
        assert_eq!(controls[3].kind(), FieldKind::Select);
        assert_eq!(controls[5].kind(), FieldKind::Submit);
    }

    #[test]
    fn test_signature_ignores_non_fillable_and_whitespace() {
        let a = form_signature(&extract_controls(FORM));
        let reformatted = FORM.replace("\n          ", "");
        let b = form_signature(&extract_controls(&reformatted));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let extra_hidden = FORM.replace(
            "</form>",
            r#"<input type="hidden" name="utm" value="x"></form>"#,
        );
        assert_eq!(a, form_signature(&extract_controls(&extra_hidden)));
    }

    #[test]
    fn test_signature_changes_with_structure() {
        let a = form_signature(&extract_controls(FORM));
        let changed = FORM.replace(r#"id="why""#, r#"id="why_us""#);
        assert_ne!(a, form_signature(&extract_controls(&changed)));
    }

    #[test]
    fn test_quoted_angle_bracket_does_not_break_attributes() {
        let html = r#"<label for="salary">Expected salary</label>
            <input placeholder="e.g. > 100k" id="salary" name="salary" required>"#;
        let controls = extract_controls(html);

        assert_eq!(controls.len(), 1);
        let salary = &controls[0];
        assert_eq!(salary.id.as_deref(), Some("salary"));
        assert_eq!(salary.name.as_deref(), Some("salary"));
        assert_eq!(salary.placeholder.as_deref(), Some("e.g. > 100k"));
        assert!(salary.required);
        assert_eq!(salary.label.as_deref(), Some("Expected salary"));
    }

    #[test]
    fn test_label_text_includes_nested_markup() {
        let html = r#"<label for="first">First <span class="req">name</span></label><input id="first">"#;
        assert_eq!(extract_controls(html)[0].label.as_deref(), Some("First name"));
    }

    #[test]
    fn test_visible_text_collapses_markup() {
        assert_eq!(
            visible_text("<div><h1>Thank you</h1>\n <p>for applying</p></div>"),
            "Thank you for applying"
        );
    }

    #[test]
    fn test_control_addressed_by_id_or_name() {
        let controls = extract_controls(FORM);
        let first = &controls[0];
        assert!(first.is_addressed_by(&Locator::Id("first_name".into())));
        assert!(first.is_addressed_by(&Locator::css("#first_name")));
        assert!(first.is_addressed_by(&Locator::css("input[name=\"job_application[first_name]\"]")));
        assert!(!first.is_addressed_by(&Locator::css("#first")));

        let email = &controls[1];
        assert!(email.is_addressed_by(&Locator::Name("email".into())));
        assert!(email.is_addressed_by(&Locator::css("input[name='email']")));
        assert!(!email.is_addressed_by(&Locator::css("input[type=email]")));
    }
}

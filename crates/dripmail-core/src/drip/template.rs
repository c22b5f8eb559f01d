//! Template Renderer - `{placeholder}` substitution for step subjects and bodies

use dripmail_common::types::ContactData;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid"))
}

/// A rendered step email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStep {
    pub subject: String,
    pub body: String,
    /// Placeholders with no value in the contact data, in order of first use
    pub missing: Vec<String>,
}

/// Template renderer for step subjects and bodies.
///
/// Values are inserted as-is: bodies are HTML and are not escaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Replace every `{identifier}` with the matching value from `data`.
    /// Unknown identifiers become the empty string and are reported.
    pub fn render(&self, template: &str, data: &ContactData) -> (String, Vec<String>) {
        let mut missing: Vec<String> = Vec::new();

        let rendered = placeholder_pattern().replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match data.get(key).and_then(value_text) {
                Some(text) => text,
                None => {
                    if !missing.iter().any(|m| m == key) {
                        missing.push(key.to_string());
                    }
                    String::new()
                }
            }
        });

        (rendered.into_owned(), missing)
    }

    /// Render a step's subject and body against one contact
    pub fn render_step(&self, subject: &str, body: &str, data: &ContactData) -> RenderedStep {
        let (subject, mut missing) = self.render(subject, data);
        let (body, body_missing) = self.render(body, data);

        for key in body_missing {
            if !missing.contains(&key) {
                missing.push(key);
            }
        }

        RenderedStep {
            subject,
            body,
            missing,
        }
    }
}

/// Text for a placeholder value; null counts as absent
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(value: Value) -> ContactData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_known_placeholder() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("Hi {firstName}", &data(json!({"firstName": "Ana"})));
        assert_eq!(result, ("Hi Ana".to_string(), vec![]));
    }

    #[test]
    fn test_render_missing_placeholder() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("Hi {firstName}", &ContactData::new());
        assert_eq!(result, ("Hi ".to_string(), vec!["firstName".to_string()]));
    }

    #[test]
    fn test_render_empty_template() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("", &data(json!({"firstName": "Ana"})));
        assert_eq!(result, (String::new(), vec![]));
    }

    #[test]
    fn test_render_non_string_values_and_repeats() {
        let renderer = TemplateRenderer::new();
        let (text, missing) = renderer.render(
            "{plan} x{seats} {trial} {nothing} {nothing}",
            &data(json!({"plan": "pro", "seats": 3, "trial": true, "nothing": null})),
        );
        assert_eq!(text, "pro x3 true  ");
        assert_eq!(missing, vec!["nothing".to_string()]);
    }

    #[test]
    fn test_render_leaves_non_identifier_braces() {
        let renderer = TemplateRenderer::new();
        let (text, missing) =
            renderer.render("<style>p {color: red}</style>{first-name}", &ContactData::new());
        assert_eq!(text, "<style>p {color: red}</style>{first-name}");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_render_step_merges_missing_keys() {
        let renderer = TemplateRenderer::new();
        let rendered = renderer.render_step(
            "Hello {firstName}",
            "<p>{company} and {firstName}</p><b>{email}</b>",
            &data(json!({"email": "ana@example.com"})),
        );
        assert_eq!(rendered.subject, "Hello ");
        assert_eq!(rendered.body, "<p> and </p><b>ana@example.com</b>");
        assert_eq!(
            rendered.missing,
            vec!["firstName".to_string(), "company".to_string()]
        );
    }
}

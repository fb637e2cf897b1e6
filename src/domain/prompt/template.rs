//! Prompt template rendering
//!
//! Variables use `{{name}}`, or `{{name|fallback}}` to supply a value when
//! the caller does not.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*(?:\|([^}]*))?\}\}").unwrap());

/// Template processing errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("Missing required variable: {name}")]
    MissingVariable { name: String },
}

/// A variable referenced by a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptVariable {
    pub name: String,
    pub fallback: Option<String>,
}

impl PromptVariable {
    pub fn is_required(&self) -> bool {
        self.fallback.is_none()
    }
}

/// A parsed prompt template
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    content: String,
    variables: Vec<PromptVariable>,
}

impl PromptTemplate {
    pub fn parse(content: impl Into<String>) -> Self {
        let content = content.into();
        let mut seen = HashSet::new();
        let variables = VARIABLE_PATTERN
            .captures_iter(&content)
            .filter_map(|cap| {
                let name = cap.get(1)?.as_str().to_string();
                seen.insert(name.clone()).then(|| PromptVariable {
                    name,
                    fallback: cap.get(2).map(|m| m.as_str().to_string()),
                })
            })
            .collect();

        Self { content, variables }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn variables(&self) -> &[PromptVariable] {
        &self.variables
    }

    /// Substitute every variable, failing on the first one with no value
    pub fn render(&self, values: &HashMap<String, String>) -> Result<String, TemplateError> {
        if let Some(missing) = self
            .variables
            .iter()
            .find(|v| v.is_required() && !values.contains_key(&v.name))
        {
            return Err(TemplateError::MissingVariable {
                name: missing.name.clone(),
            });
        }

        let rendered = VARIABLE_PATTERN.replace_all(&self.content, |cap: &Captures| {
            let name = &cap[1];
            values
                .get(name)
                .cloned()
                .or_else(|| cap.get(2).map(|m| m.as_str().to_string()))
                .unwrap_or_default()
        });

        Ok(rendered.into_owned())
    }
}

/// Render a template string directly
pub fn render_template(
    template: &str,
    values: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    PromptTemplate::parse(template).render(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_variables() {
        let template = PromptTemplate::parse("Summarize {{content}} focusing on {{ focus | general }}. {{content}}");
        assert_eq!(template.variables().len(), 2);
        assert!(template.variables()[0].is_required());
        assert_eq!(template.variables()[1].fallback.as_deref(), Some(" general "));
    }

    #[test]
    fn test_render() {
        let result = render_template("Hello, {{name}}!", &values(&[("name", "Ada")])).unwrap();
        assert_eq!(result, "Hello, Ada!");
    }

    #[test]
    fn test_render_fallback() {
        let result = render_template("Length: {{length|detailed}}", &HashMap::new()).unwrap();
        assert_eq!(result, "Length: detailed");

        let result =
            render_template("Length: {{length|detailed}}", &values(&[("length", "brief")])).unwrap();
        assert_eq!(result, "Length: brief");
    }

    #[test]
    fn test_missing_variable() {
        let error = render_template("{{content}}", &HashMap::new()).unwrap_err();
        assert_eq!(
            error,
            TemplateError::MissingVariable {
                name: "content".into()
            }
        );
    }

    #[test]
    fn test_no_variables() {
        let template = PromptTemplate::parse("plain text");
        assert!(template.variables().is_empty());
        assert_eq!(template.render(&HashMap::new()).unwrap(), "plain text");
    }
}

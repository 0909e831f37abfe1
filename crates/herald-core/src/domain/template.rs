//! Response templates with `{placeholder}` substitution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TemplateId;

/// Values substituted into `{key}` tokens.
pub type Variables = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub subject_template: String,
    pub body_template: String,
    /// Classification this template is written for, used by `suggest`.
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Template {
    /// Returns `(subject, body)`.
    pub fn render(&self, vars: &Variables) -> (String, String) {
        (
            render(&self.subject_template, vars),
            render(&self.body_template, vars),
        )
    }
}

/// Builder for a template that is not stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTemplate {
    pub name: String,
    pub subject_template: String,
    pub body_template: String,
    pub classification: Option<String>,
    pub urgency: Option<String>,
    pub tags: Vec<String>,
}

impl NewTemplate {
    pub fn new(
        name: impl Into<String>,
        subject_template: impl Into<String>,
        body_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subject_template: subject_template.into(),
            body_template: body_template.into(),
            classification: None,
            urgency: None,
            tags: Vec::new(),
        }
    }

    pub fn for_classification(mut self, classification: impl Into<String>) -> Self {
        self.classification = Some(classification.into());
        self
    }

    pub fn for_urgency(mut self, urgency: impl Into<String>) -> Self {
        self.urgency = Some(urgency.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn into_template(self, id: TemplateId, now: DateTime<Utc>) -> Template {
        Template {
            id,
            name: self.name,
            subject_template: self.subject_template,
            body_template: self.body_template,
            classification: self.classification,
            urgency: self.urgency,
            tags: self.tags,
            created_at: now,
        }
    }
}

/// Replace every `{key}` whose key is in `vars`. Unknown tokens stay
/// verbatim, and substituted values are never re-scanned.
pub fn render(template: &str, vars: &Variables) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find(['{', '}']) {
            Some(close) if after_open.as_bytes()[close] == b'}' => {
                let key = &after_open[..close];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after_open[close + 1..];
            }
            // `{` without a matching `}` before the next `{`
            _ => {
                out.push('{');
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

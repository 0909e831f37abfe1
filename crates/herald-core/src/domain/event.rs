//! Classified inbound events, as produced by the external classifier.
//!
//! The rule engine only reads these; labels are free-form strings so the
//! classifier can evolve its label set without a schema change here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification label that the `follow_up_classification` trigger reacts to.
pub const FOLLOW_UP: &str = "follow_up";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl ActionItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// Raw sender, e.g. `Alice Smith <alice@example.com>`.
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub classification: String,
    pub urgency: String,
    pub sentiment: String,
    #[serde(default)]
    pub action_items: Vec<ActionItem>,
}

impl ClassifiedEvent {
    /// Display name of the sender: the part before `<...>`, or the local part
    /// of a bare address.
    pub fn sender_name(&self) -> String {
        let raw = self.sender.trim();
        if let Some((name, _)) = raw.split_once('<') {
            let name = name.trim().trim_matches('"').trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }
        let address = self.sender_email();
        match address.split_once('@') {
            Some((local, _)) if !local.is_empty() => local.to_string(),
            _ => address,
        }
    }

    pub fn sender_email(&self) -> String {
        let raw = self.sender.trim();
        match (raw.find('<'), raw.rfind('>')) {
            (Some(start), Some(end)) if start < end => raw[start + 1..end].trim().to_string(),
            _ => raw.to_string(),
        }
    }

    /// Haystack for keyword triggers.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.subject, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(sender: &str) -> ClassifiedEvent {
        ClassifiedEvent {
            sender: sender.to_string(),
            subject: "Budget".into(),
            body: "Numbers attached".into(),
            classification: "work".into(),
            urgency: "high".into(),
            sentiment: "neutral".into(),
            action_items: vec![],
        }
    }

    #[test]
    fn sender_name_prefers_display_name() {
        let e = event("Alice Smith <alice@example.com>");
        assert_eq!(e.sender_name(), "Alice Smith");
        assert_eq!(e.sender_email(), "alice@example.com");
    }

    #[test]
    fn sender_name_falls_back_to_local_part() {
        assert_eq!(event("bob@example.com").sender_name(), "bob");
        assert_eq!(event("<carol@example.com>").sender_name(), "carol");
        assert_eq!(event("\"Dan\" <dan@example.com>").sender_name(), "Dan");
    }

    #[test]
    fn action_items_default_to_empty() {
        let json = r#"{"sender":"a@b.c","subject":"s","body":"b","classification":"c",
                      "urgency":"u","sentiment":"n"}"#;
        let e: ClassifiedEvent = serde_json::from_str(json).unwrap();
        assert!(e.action_items.is_empty());
    }
}

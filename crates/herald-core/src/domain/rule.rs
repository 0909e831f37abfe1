//! Automation rules: trigger + conditions + response template, rate-limited
//! per calendar day.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{HeraldError, Result};
use super::event::{ClassifiedEvent, FOLLOW_UP};
use super::ids::{RuleId, TemplateId};
use super::priority::Priority;
use super::schedule::CronSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    ClassificationEquals,
    UrgencyEquals,
    SentimentEquals,
    KeywordMatch,
    /// Fired by the periodic sweep only, never by an event.
    TimeBased,
    FollowUpClassification,
}

/// Trigger-specific parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Target label for the `*_equals` triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Cron expression for `time_based`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl RuleConditions {
    pub fn equals(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn schedule(expression: impl Into<String>) -> Self {
        Self {
            schedule: Some(expression.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub name: String,
    pub trigger: Trigger,
    pub conditions: RuleConditions,
    pub template_id: TemplateId,
    pub enabled: bool,
    /// Deferral before the spawned response task fires.
    pub delay_minutes: u32,
    pub max_daily_sends: u32,
    pub daily_send_count: u32,
    pub last_reset_date: NaiveDate,
    /// Priority given to spawned response tasks.
    #[serde(default)]
    pub priority: Priority,
    /// Last time the periodic sweep fired a `time_based` rule.
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AutomationRule {
    /// Reset the daily counter the first time the rule is looked at on a new
    /// calendar day. Returns whether anything changed.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date != today {
            self.daily_send_count = 0;
            self.last_reset_date = today;
            true
        } else {
            false
        }
    }

    pub fn has_quota(&self) -> bool {
        self.daily_send_count < self.max_daily_sends
    }

    pub fn record_send(&mut self) {
        self.daily_send_count += 1;
    }

    /// Per-event trigger test. `time_based` never matches here.
    pub fn matches(&self, event: &ClassifiedEvent) -> bool {
        let equals = |field: &str| self.conditions.value.as_deref() == Some(field);
        match self.trigger {
            Trigger::ClassificationEquals => equals(&event.classification),
            Trigger::UrgencyEquals => equals(&event.urgency),
            Trigger::SentimentEquals => equals(&event.sentiment),
            Trigger::KeywordMatch => {
                let haystack = event.searchable_text().to_lowercase();
                self.conditions
                    .keywords
                    .iter()
                    .filter(|k| !k.trim().is_empty())
                    .any(|k| haystack.contains(&k.to_lowercase()))
            }
            Trigger::FollowUpClassification => event.classification == FOLLOW_UP,
            Trigger::TimeBased => false,
        }
    }
}

/// Builder for a rule that is not stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    pub name: String,
    pub trigger: Trigger,
    pub conditions: RuleConditions,
    pub template_id: TemplateId,
    pub enabled: bool,
    pub delay_minutes: u32,
    pub max_daily_sends: u32,
    pub priority: Priority,
}

impl NewRule {
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        conditions: RuleConditions,
        template_id: TemplateId,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            conditions,
            template_id,
            enabled: true,
            delay_minutes: 0,
            max_daily_sends: 10,
            priority: Priority::Normal,
        }
    }

    pub fn delay_minutes(mut self, minutes: u32) -> Self {
        self.delay_minutes = minutes;
        self
    }

    pub fn max_daily_sends(mut self, n: u32) -> Self {
        self.max_daily_sends = n;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Trigger-specific checks. Template existence is checked by the engine,
    /// which owns the template library.
    pub fn validate(&self) -> Result<()> {
        let c = &self.conditions;
        match self.trigger {
            Trigger::ClassificationEquals | Trigger::UrgencyEquals | Trigger::SentimentEquals => {
                if c.value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                    return Err(HeraldError::validation(format!(
                        "rule '{}': {:?} requires a target value",
                        self.name, self.trigger
                    )));
                }
            }
            Trigger::KeywordMatch => {
                if c.keywords.iter().all(|k| k.trim().is_empty()) {
                    return Err(HeraldError::validation(format!(
                        "rule '{}': keyword_match requires at least one keyword",
                        self.name
                    )));
                }
            }
            Trigger::TimeBased => {
                let expr = c.schedule.as_deref().ok_or_else(|| {
                    HeraldError::validation(format!(
                        "rule '{}': time_based requires a schedule",
                        self.name
                    ))
                })?;
                CronSchedule::parse(expr)?;
            }
            Trigger::FollowUpClassification => {}
        }
        Ok(())
    }

    pub fn into_rule(self, id: RuleId, now: DateTime<Utc>) -> AutomationRule {
        AutomationRule {
            id,
            name: self.name,
            trigger: self.trigger,
            conditions: self.conditions,
            template_id: self.template_id,
            enabled: self.enabled,
            delay_minutes: self.delay_minutes,
            max_daily_sends: self.max_daily_sends,
            daily_send_count: 0,
            last_reset_date: now.date_naive(),
            priority: self.priority,
            last_triggered: None,
            created_at: now,
        }
    }
}

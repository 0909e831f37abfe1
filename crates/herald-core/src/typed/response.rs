//! Payload of the tasks spawned by the rule engine.

use serde::{Deserialize, Serialize};

use super::task::TaskPayload;
use crate::domain::{RuleId, TemplateId};

/// A rendered automated response waiting to be sent.
///
/// The handler registered for [`TemplateResponse::TYPE`] (a mail adapter,
/// a chat webhook) decides what "send" means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResponse {
    pub rule_id: RuleId,
    pub template_id: TemplateId,
    /// Address of the event sender. `None` for time-based rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    /// Subject of the event being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl TaskPayload for TemplateResponse {
    const TYPE: &'static str = "template-response";
}

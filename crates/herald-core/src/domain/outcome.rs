//! Result of one execution attempt.
//!
//! The executor reports what happened; whether to retry is decided by the
//! worker that holds the task (see `app::worker`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    /// Handler failed or timed out; eligible for the retry policy.
    Failure,
    /// Cannot succeed on a retry (e.g. no handler registered).
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent in the handler.
    pub duration: Duration,
}

impl TaskResult {
    pub fn success(task_id: TaskId, output: serde_json::Value, duration: Duration) -> Self {
        Self {
            task_id,
            kind: OutcomeKind::Success,
            output: Some(output),
            error: None,
            duration,
        }
    }

    pub fn failure(task_id: TaskId, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            task_id,
            kind: OutcomeKind::Failure,
            output: None,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn fatal(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            kind: OutcomeKind::Fatal,
            output: None,
            error: Some(error.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == OutcomeKind::Failure
    }
}

//! Task entity and its construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{HeraldError, Result};
use super::ids::TaskId;
use super::priority::Priority;
use super::status::TaskStatus;

/// Opaque key/value data handed to the handler.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Tag selecting the handler for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A unit of deferred or recurring work.
///
/// Only the executor (status/result/timestamps) and the manager
/// (cancellation, updates, deletion) mutate a stored task, always through
/// [`Task::transition`] so the state machine in [`TaskStatus`] holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub payload: Payload,
    pub status: TaskStatus,
    pub priority: Priority,
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Presence makes this a recurring template.
    pub cron_schedule: Option<String>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Task {
    /// Materialize a fully populated record from a [`NewTask`].
    ///
    /// Status is `Scheduled` for recurring templates and future one-offs,
    /// `Pending` otherwise. `next_run` must already be computed by the caller
    /// for recurring tasks.
    pub fn from_new(
        id: TaskId,
        new: NewTask,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Self {
        let status = if new.cron_schedule.is_some()
            || new.scheduled_time.is_some_and(|t| t > now)
        {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };

        Self {
            id,
            name: new.name,
            task_type: new.task_type,
            payload: new.payload,
            status,
            priority: new.priority,
            scheduled_time: new.scheduled_time,
            cron_schedule: new.cron_schedule,
            max_retries: new.max_retries.unwrap_or(0),
            retry_count: 0,
            timeout_seconds: new.timeout_seconds.unwrap_or(0),
            created_at: now,
            started_at: None,
            completed_at: None,
            last_run: None,
            next_run,
            error_message: None,
            result: None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.cron_schedule.is_some()
    }

    /// Move to `next`, stamping the timestamps that belong to it.
    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(HeraldError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            TaskStatus::Running => {
                self.started_at = Some(now);
                self.completed_at = None;
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Wall-clock execution time of the last run, if it finished.
    pub fn execution_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }

    /// Still waiting to be dispatched although its time has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Scheduled)
            && self.scheduled_time.is_some_and(|t| t < now)
    }
}

/// Builder for a task that does not exist yet.
///
/// Unset `max_retries` / `timeout_seconds` are filled from the scheduler
/// configuration by the manager.
///
/// # 使用例
/// ```ignore
/// let new = NewTask::new("digest", "send-digest")
///     .priority(Priority::High)
///     .cron("0 8 * * *")
///     .max_retries(2);
/// let id = manager.create_task(new).await?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub task_type: TaskType,
    pub payload: Payload,
    pub priority: Priority,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub cron_schedule: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, task_type: impl Into<TaskType>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            payload: Payload::new(),
            priority: Priority::Normal,
            scheduled_time: None,
            cron_schedule: None,
            max_retries: None,
            timeout_seconds: None,
        }
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Convenience for building the payload from a `json!({...})` object.
    /// Non-object values are stored under a `"value"` key.
    pub fn payload_json(mut self, value: serde_json::Value) -> Self {
        self.payload = match value {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = Payload::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(at);
        self
    }

    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_schedule = Some(expression.into());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }
}

/// Partial update for [`crate::app::TaskManager::update_task`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub payload: Option<Payload>,
    pub priority: Option<Priority>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub cron_schedule: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

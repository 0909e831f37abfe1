//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Scheduled -> Pending (scheduled_time arrives)
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed -> Retrying -> Pending (while retries remain)
/// - Pending -> Failed (no handler registered; never retried)
/// - {Scheduled, Pending, Retrying} -> Cancelled
/// - Running -> Pending (only when recovering work interrupted by a restart)
///
/// Running cannot be cancelled; it runs to completion or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Future one-off, not yet queue-eligible. Also the resting state of
    /// recurring templates, which are never queued themselves.
    Scheduled,

    /// Queue-eligible.
    Pending,

    Running,

    Completed,

    /// Terminal unless the worker schedules a retry.
    Failed,

    /// Timed wait before re-queue.
    Retrying,

    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Scheduled,
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Retrying,
        TaskStatus::Cancelled,
    ];

    /// Eligible for `cleanup_old_tasks`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            TaskStatus::Scheduled | TaskStatus::Pending | TaskStatus::Retrying
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Scheduled, Pending) => true,
            (Pending, Running) | (Pending, Failed) => true,
            (Running, Completed) | (Running, Failed) | (Running, Pending) => true,
            (Failed, Retrying) => true,
            (Retrying, Pending) => true,
            (from, Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

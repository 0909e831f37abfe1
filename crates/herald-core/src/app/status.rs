//! Status - 集計ビュー
//!
//! `TaskManager::get_stats` の戻り値。CLI の `inspect` もこれを表示します。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::queue::QueueSizes;
use crate::domain::{Task, TaskStatus};

/// TaskStats はタスク全体の集計
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStats {
    pub total_tasks: usize,
    /// すべての status をキーに持つ（0 件も含む）
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub queue_sizes: QueueSizes,
    /// PENDING / SCHEDULED のうち scheduled_time を過ぎたもの
    pub overdue_tasks: usize,
    pub recurring_tasks: usize,
    /// COMPLETED タスクの平均実行時間（秒）。完了が 0 件なら None
    pub average_execution_secs: Option<f64>,
}

impl TaskStats {
    pub fn collect(tasks: &[Task], queue_sizes: QueueSizes, now: DateTime<Utc>) -> Self {
        let mut by_status: BTreeMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut overdue_tasks = 0;
        let mut recurring_tasks = 0;
        let mut completed_secs = Vec::new();

        for task in tasks {
            *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
            *by_type.entry(task.task_type.to_string()).or_default() += 1;
            if task.is_overdue(now) {
                overdue_tasks += 1;
            }
            if task.is_recurring() {
                recurring_tasks += 1;
            }
            if task.status == TaskStatus::Completed
                && let Some(d) = task.execution_duration()
            {
                completed_secs.push(d.num_milliseconds() as f64 / 1000.0);
            }
        }

        let average_execution_secs = (!completed_secs.is_empty())
            .then(|| completed_secs.iter().sum::<f64>() / completed_secs.len() as f64);

        Self {
            total_tasks: tasks.len(),
            by_status,
            by_type,
            queue_sizes,
            overdue_tasks,
            recurring_tasks,
            average_execution_secs,
        }
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

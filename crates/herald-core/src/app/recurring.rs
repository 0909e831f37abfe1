//! RecurringScheduler - cron テンプレートから one-off を生成する定期ループ
//!
//! cron_schedule を持つタスクは実行されないテンプレートです。next_run が
//! 来るたびに、同じ type / payload / priority / retry 設定を持つ新しい
//! タスクを作ってキューに積み、テンプレートの last_run / next_run を進めます。
//! next_run は作成より先に進めるので、1 つの時間帯から 2 つ生まれることはありません。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use super::manager::TaskManager;
use crate::domain::{CronSchedule, HeraldError, NewTask, Result, Task, TaskId, TaskStatus};

pub struct RecurringScheduler {
    manager: Arc<TaskManager>,
}

impl RecurringScheduler {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }

    /// One pass over all recurring templates, using the manager's clock.
    pub async fn tick(&self) -> Result<Vec<TaskId>> {
        let now = self.manager.clock().now();
        self.tick_at(now).await
    }

    /// One pass with an explicit reference time.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        let due: Vec<Task> = self
            .manager
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| is_due(t, now))
            .collect();

        let mut spawned = Vec::with_capacity(due.len());
        for template in due {
            match self.fire(&template, now).await {
                Ok(Some(id)) => spawned.push(id),
                Ok(None) => {}
                Err(e) => {
                    error!(task_id = %template.id, error = %e, "recurring spawn failed");
                }
            }
        }
        Ok(spawned)
    }

    /// テンプレートの next_run を先に進めてから、インスタンスを 1 つ作る
    ///
    /// `template` は scan 時点のスナップショットなので、ID lock の内側で
    /// もう一度 due かどうかを確かめます。その間に cancel / 削除された
    /// テンプレートや、別の tick が既に進めたテンプレートは `None`。
    async fn fire(&self, template: &Task, now: DateTime<Utc>) -> Result<Option<TaskId>> {
        // 作成時に検証済み
        let expr = template.cron_schedule.as_deref().unwrap_or_default();
        let next_run = CronSchedule::parse(expr)?.next_after(now);

        let mut stale = false;
        let claimed = self
            .manager
            .tasks()
            .update(template.id, |t| {
                if !is_due(t, now) {
                    stale = true;
                    return Err(HeraldError::validation("recurring template is no longer due"));
                }
                t.last_run = Some(now);
                t.next_run = next_run;
                Ok(())
            })
            .await;
        let template = match claimed {
            Ok(template) => template,
            Err(HeraldError::NotFound(_)) => return Ok(None),
            Err(_) if stale => return Ok(None),
            Err(e) => return Err(e),
        };

        let instance = NewTask::new(instance_name(&template.name, now), template.task_type.clone())
            .payload(template.payload.clone())
            .priority(template.priority)
            .scheduled_at(now)
            .max_retries(template.max_retries)
            .timeout_seconds(template.timeout_seconds);
        let instance_id = self.manager.submit(instance, now).await?;

        info!(
            task_id = %template.id,
            instance_id = %instance_id,
            next_run = ?next_run,
            "recurring task fired"
        );
        Ok(Some(instance_id))
    }

    /// Tick every `interval` until shutdown. Storage errors are logged and
    /// retried on the next tick.
    pub async fn run(self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "recurring tick failed");
                    }
                }
            }
        }
    }
}

fn is_due(task: &Task, now: DateTime<Utc>) -> bool {
    task.is_recurring()
        && task.status != TaskStatus::Running
        && !task.status.is_terminal()
        && task.next_run.is_some_and(|next| next <= now)
}

/// `{name}_{YYYYmmdd_HHMMSS}`
fn instance_name(name: &str, fired_at: DateTime<Utc>) -> String {
    format!("{name}_{}", fired_at.format("%Y%m%d_%H%M%S"))
}

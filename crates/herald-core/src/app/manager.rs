//! TaskManager - タスク操作のファサード
//!
//! API ハンドラ・定期ループ・worker はすべてこれを経由してタスクを作成・
//! 変更します。TaskManager は `Scheduler` が 1 つだけ作り、`Arc` で共有します
//! （グローバル状態は持たない）。
//!
//! # 設計原則
//! - 正本は `Repository<Task>`。キューは task_id を運ぶだけ
//! - 状態変更は必ず `Repository::update`（ID 単位の lock）の中で
//!   `Task::transition` を通す
//! - cancel は失敗しても例外にせず `CancelOutcome` で理由を返す

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::queue::PriorityQueue;
use super::repository::Repository;
use super::status::TaskStats;
use crate::config::SchedulerConfig;
use crate::domain::{
    CronSchedule, HeraldError, NewTask, Result, Task, TaskId, TaskStatus, TaskType, TaskUpdate,
};
use crate::ports::{Clock, IdGenerator};

/// cancel_task の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelOutcome {
    Cancelled,
    /// 現在の status では取り消せない（RUNNING や終端状態）
    Rejected(TaskStatus),
    NotFound,
}

impl CancelOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CancelOutcome::Cancelled)
    }
}

/// 再起動時のリカバリ結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    /// PENDING のまま残っていて積み直したもの
    pub requeued_pending: usize,
    /// RETRYING（バックオフ待ち）から PENDING に戻したもの
    pub resumed_retrying: usize,
    /// RUNNING のまま中断されていたもの
    pub interrupted_running: usize,
}

impl RecoveryStats {
    pub fn total(&self) -> usize {
        self.requeued_pending + self.resumed_retrying + self.interrupted_running
    }
}

pub struct TaskManager {
    tasks: Arc<Repository<Task>>,
    queue: Arc<PriorityQueue>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    default_timeout_seconds: u64,
    default_max_retries: u32,
}

impl TaskManager {
    pub fn new(
        tasks: Arc<Repository<Task>>,
        queue: Arc<PriorityQueue>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            tasks,
            queue,
            ids,
            clock,
            default_timeout_seconds: config.default_timeout_seconds,
            default_max_retries: config.default_max_retries,
        }
    }

    pub fn tasks(&self) -> &Arc<Repository<Task>> {
        &self.tasks
    }

    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================
    // 作成
    // ========================================

    /// 新しいタスクを作成する
    ///
    /// # 検証（失敗時は `Validation`、キューには入らない）
    /// - name / type が空でない
    /// - cron 式が解釈できる
    /// - scheduled_time が過去でない
    /// - cron と scheduled_time を同時に指定しない
    /// - timeout_seconds が 0 でない
    ///
    /// 即時実行できるものは PENDING でキューに積まれ、未来日時のものと
    /// cron テンプレートは SCHEDULED で保存されます。
    pub async fn create_task(&self, new: NewTask) -> Result<TaskId> {
        let now = self.clock.now();
        if new.name.trim().is_empty() {
            return Err(HeraldError::validation("task name must not be empty"));
        }
        if new.task_type.as_str().trim().is_empty() {
            return Err(HeraldError::validation("task type must not be empty"));
        }
        if new.cron_schedule.is_some() && new.scheduled_time.is_some() {
            return Err(HeraldError::validation(
                "a task is either recurring (cron_schedule) or one-off (scheduled_time), not both",
            ));
        }
        if let Some(at) = new.scheduled_time
            && at < now
        {
            return Err(HeraldError::validation(format!(
                "scheduled_time {at} is in the past"
            )));
        }
        if new.timeout_seconds == Some(0) {
            return Err(HeraldError::validation("timeout_seconds must be at least 1"));
        }
        self.submit(new, now).await
    }

    /// 検証済み（または内部生成）のタスクを保存して、必要ならキューに積む
    ///
    /// 定期ループが生成するタスクはここから入る。`now` は呼び出し側が
    /// 時刻計算に使ったものと同じ値を渡す。
    pub(crate) async fn submit(&self, mut new: NewTask, now: DateTime<Utc>) -> Result<TaskId> {
        let next_run = match &new.cron_schedule {
            Some(expr) => CronSchedule::parse(expr)?.next_after(now),
            None => None,
        };
        new.max_retries.get_or_insert(self.default_max_retries);
        new.timeout_seconds.get_or_insert(self.default_timeout_seconds);

        let task = Task::from_new(self.ids.generate_task_id(), new, now, next_run);
        let (id, status, priority) = (task.id, task.status, task.priority);
        self.tasks.insert(task).await?;

        if status == TaskStatus::Pending {
            self.queue.enqueue(id, priority).await;
        }
        info!(task_id = %id, status = %status, priority = %priority, "task created");
        Ok(id)
    }

    // ========================================
    // 状態遷移
    // ========================================

    /// scheduled_time が来ていればキューに積む
    ///
    /// SCHEDULED の one-off は PENDING に遷移させてから積む。既に PENDING で
    /// キューに無いもの（リカバリ漏れなど）も積み直す。積んだら true。
    pub async fn schedule_task(&self, id: TaskId) -> Result<bool> {
        let now = self.clock.now();
        let task = self.tasks.require(id).await?;

        match task.status {
            TaskStatus::Scheduled if !task.is_recurring() => {
                if task.scheduled_time.is_some_and(|at| at > now) {
                    return Ok(false);
                }
                let task = self
                    .tasks
                    .update(id, |t| t.transition(TaskStatus::Pending, now))
                    .await?;
                self.queue.enqueue(id, task.priority).await;
                debug!(task_id = %id, "scheduled task is due");
                Ok(true)
            }
            TaskStatus::Pending => Ok(self.queue.enqueue(id, task.priority).await),
            _ => Ok(false),
        }
    }

    /// 期限の来た SCHEDULED one-off をまとめて PENDING にする
    pub async fn promote_due(&self) -> Result<Vec<TaskId>> {
        let now = self.clock.now();
        let due: Vec<TaskId> = self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::Scheduled
                    && !t.is_recurring()
                    && t.scheduled_time.is_none_or(|at| at <= now)
            })
            .map(|t| t.id)
            .collect();

        let mut promoted = Vec::with_capacity(due.len());
        for id in due {
            match self.schedule_task(id).await {
                Ok(true) => promoted.push(id),
                Ok(false) => {}
                // cancel と競合した
                Err(HeraldError::InvalidTransition { .. }) | Err(HeraldError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(promoted)
    }

    /// RETRYING のバックオフが明けたタスクを PENDING に戻して積む
    ///
    /// 待っている間に cancel / delete されていたら何もせず false。
    pub async fn requeue(&self, id: TaskId) -> Result<bool> {
        let now = self.clock.now();
        match self
            .tasks
            .update(id, |t| t.transition(TaskStatus::Pending, now))
            .await
        {
            Ok(task) => {
                self.queue.enqueue(id, task.priority).await;
                info!(task_id = %id, attempt = task.retry_count + 1, "retry re-enqueued");
                Ok(true)
            }
            Err(HeraldError::InvalidTransition { from, .. }) => {
                debug!(task_id = %id, status = %from, "retry dropped");
                Ok(false)
            }
            Err(HeraldError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 取り消し。SCHEDULED / PENDING / RETRYING のときだけ成功する
    pub async fn cancel_task(&self, id: TaskId) -> Result<CancelOutcome> {
        let now = self.clock.now();
        match self
            .tasks
            .update(id, |t| t.transition(TaskStatus::Cancelled, now))
            .await
        {
            Ok(_) => {
                self.queue.remove(id).await;
                info!(task_id = %id, "task cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            Err(HeraldError::InvalidTransition { from, .. }) => {
                warn!(task_id = %id, status = %from, "cancel rejected");
                Ok(CancelOutcome::Rejected(from))
            }
            Err(HeraldError::NotFound(_)) => Ok(CancelOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    // ========================================
    // CRUD
    // ========================================

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.tasks.get(id).await
    }

    /// 部分更新。RUNNING と終端状態のタスクは変更できない
    ///
    /// cron を変えたら next_run を計算し直し、キュー内のタスクの優先度を
    /// 変えたら新しいレベルに積み直す。
    pub async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        let now = self.clock.now();
        let next_run = match &update.cron_schedule {
            Some(expr) => Some(CronSchedule::parse(expr)?.next_after(now)),
            None => None,
        };
        if let Some(at) = update.scheduled_time
            && at < now
        {
            return Err(HeraldError::validation(format!(
                "scheduled_time {at} is in the past"
            )));
        }
        if update.timeout_seconds == Some(0) {
            return Err(HeraldError::validation("timeout_seconds must be at least 1"));
        }

        let mut before = None;
        let task = self
            .tasks
            .update(id, |t| {
                before = Some(t.priority);
                if t.status == TaskStatus::Running || t.status.is_terminal() {
                    return Err(HeraldError::validation(format!(
                        "cannot update a {} task",
                        t.status
                    )));
                }
                if update.cron_schedule.is_some() && !t.is_recurring() {
                    return Err(HeraldError::validation(
                        "cannot turn a one-off task into a recurring one",
                    ));
                }
                if update.scheduled_time.is_some() && t.is_recurring() {
                    return Err(HeraldError::validation(
                        "recurring tasks have no scheduled_time",
                    ));
                }
                // キューに載った後は実行時刻を動かさない
                if update.scheduled_time.is_some() && t.status != TaskStatus::Scheduled {
                    return Err(HeraldError::validation(format!(
                        "scheduled_time can only change while SCHEDULED (task is {})",
                        t.status
                    )));
                }
                if let Some(name) = update.name {
                    t.name = name;
                }
                if let Some(payload) = update.payload {
                    t.payload = payload;
                }
                if let Some(priority) = update.priority {
                    t.priority = priority;
                }
                if let Some(at) = update.scheduled_time {
                    t.scheduled_time = Some(at);
                }
                if let Some(expr) = update.cron_schedule {
                    t.cron_schedule = Some(expr);
                    t.next_run = next_run.flatten();
                }
                if let Some(n) = update.max_retries {
                    t.max_retries = n;
                }
                if let Some(secs) = update.timeout_seconds {
                    t.timeout_seconds = secs;
                }
                Ok(())
            })
            .await?;

        if before != Some(task.priority) && self.queue.remove(id).await {
            self.queue.enqueue(id, task.priority).await;
        }
        debug!(task_id = %id, "task updated");
        Ok(task)
    }

    /// 削除。RUNNING のタスクは消せない
    pub async fn delete_task(&self, id: TaskId) -> Result<bool> {
        let existed = self
            .tasks
            .delete_if(id, |t| {
                if t.status == TaskStatus::Running {
                    return Err(HeraldError::validation("cannot delete a RUNNING task"));
                }
                Ok(())
            })
            .await?;
        if existed {
            self.queue.remove(id).await;
            info!(task_id = %id, "task deleted");
        }
        Ok(existed)
    }

    // ========================================
    // 問い合わせ
    // ========================================

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.tasks.list().await
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    pub async fn list_by_type(&self, task_type: &TaskType) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|t| &t.task_type == task_type)
            .collect())
    }

    /// scheduled_time を過ぎてもまだ PENDING / SCHEDULED のもの
    pub async fn get_overdue(&self) -> Result<Vec<Task>> {
        let now = self.clock.now();
        Ok(self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|t| t.is_overdue(now))
            .collect())
    }

    pub async fn get_stats(&self) -> Result<TaskStats> {
        let tasks = self.tasks.list().await?;
        let sizes = self.queue.queue_sizes().await;
        Ok(TaskStats::collect(&tasks, sizes, self.clock.now()))
    }

    // ========================================
    // メンテナンス
    // ========================================

    /// 終端状態で `days` 日より古いタスクを削除し、削除件数を返す
    ///
    /// 基準時刻は completed_at（無ければ created_at）。
    pub async fn cleanup_old_tasks(&self, days: u32) -> Result<usize> {
        let cutoff = self.clock.now() - ChronoDuration::days(i64::from(days));
        let expired: Vec<TaskId> = self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|t| t.status.is_terminal() && t.completed_at.unwrap_or(t.created_at) < cutoff)
            .map(|t| t.id)
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.tasks.delete(id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, days, "old tasks cleaned up");
        }
        Ok(removed)
    }

    /// 起動時リカバリ
    ///
    /// - PENDING: キューに積み直す
    /// - RETRYING: バックオフのタイマーは失われているので PENDING に戻して積む
    /// - RUNNING: 再起動で中断されたので PENDING に戻して積む
    pub async fn recover(&self) -> Result<RecoveryStats> {
        let now = self.clock.now();
        let mut stats = RecoveryStats::default();

        for task in self.tasks.list().await? {
            match task.status {
                TaskStatus::Pending => {
                    self.queue.enqueue(task.id, task.priority).await;
                    stats.requeued_pending += 1;
                }
                TaskStatus::Retrying | TaskStatus::Running => {
                    let recovered = self
                        .tasks
                        .update(task.id, |t| {
                            if t.status == TaskStatus::Running {
                                t.started_at = None;
                            }
                            t.transition(TaskStatus::Pending, now)
                        })
                        .await?;
                    self.queue.enqueue(recovered.id, recovered.priority).await;
                    if task.status == TaskStatus::Running {
                        warn!(task_id = %task.id, "interrupted task re-enqueued");
                        stats.interrupted_running += 1;
                    } else {
                        stats.resumed_retrying += 1;
                    }
                }
                _ => {}
            }
        }

        if stats.total() > 0 {
            info!(
                pending = stats.requeued_pending,
                retrying = stats.resumed_retrying,
                running = stats.interrupted_running,
                "recovered tasks from store"
            );
        }
        Ok(stats)
    }
}

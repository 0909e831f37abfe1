//! Executor - 1 回分の実行
//!
//! # フロー
//! 1. Repository からタスクを読む
//! 2. task_type で handler を引く（無ければ PENDING → FAILED、Fatal）
//! 3. PENDING → RUNNING（started_at を刻む）
//! 4. `timeout_seconds` の deadline 付きで handler を実行
//! 5. 成功なら COMPLETED + result、失敗・timeout なら FAILED + error_message
//!
//! リトライするかどうかは決めない。それは worker の仕事です。

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::registry::HandlerRegistry;
use super::repository::Repository;
use crate::domain::{HeraldError, Result, Task, TaskId, TaskResult, TaskStatus};
use crate::ports::Clock;

pub struct Executor {
    tasks: Arc<Repository<Task>>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
}

impl Executor {
    pub fn new(
        tasks: Arc<Repository<Task>>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks,
            registry,
            clock,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Execute one task.
    ///
    /// `Err` means the task could not be picked up at all (missing, or no
    /// longer PENDING because it was cancelled after being dequeued). Handler
    /// failures are reported through the returned `TaskResult`.
    pub async fn execute(&self, id: TaskId) -> Result<TaskResult> {
        let task = self.tasks.require(id).await?;

        let Some(handler) = self.registry.get(&task.task_type).cloned() else {
            let err = HeraldError::UnregisteredHandler(task.task_type.clone());
            let message = err.to_string();
            let now = self.clock.now();
            self.tasks
                .update(id, |t| {
                    t.transition(TaskStatus::Failed, now)?;
                    t.error_message = Some(message.clone());
                    Ok(())
                })
                .await?;
            error!(task_id = %id, task_type = %task.task_type, "no handler registered");
            return Ok(TaskResult::fatal(id, message));
        };

        let started = self.clock.now();
        let task = self
            .tasks
            .update(id, |t| t.transition(TaskStatus::Running, started))
            .await?;
        info!(task_id = %id, task_type = %task.task_type, attempt = task.retry_count + 1, "task started");

        let timeout_seconds = task.timeout_seconds.max(1);
        let clock_start = tokio::time::Instant::now();
        let outcome = match tokio::time::timeout(
            Duration::from_secs(timeout_seconds),
            handler.invoke(&task),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HeraldError::Timeout {
                seconds: timeout_seconds,
            }),
        };
        let duration = clock_start.elapsed();
        let finished = self.clock.now();

        match outcome {
            Ok(output) => {
                let stored = output.clone();
                self.tasks
                    .update(id, |t| {
                        t.transition(TaskStatus::Completed, finished)?;
                        t.result = Some(stored);
                        t.error_message = None;
                        Ok(())
                    })
                    .await?;
                info!(task_id = %id, duration_ms = duration.as_millis() as u64, "task completed");
                Ok(TaskResult::success(id, output, duration))
            }
            Err(err) => {
                let message = err.to_string();
                self.tasks
                    .update(id, |t| {
                        t.transition(TaskStatus::Failed, finished)?;
                        t.error_message = Some(message.clone());
                        Ok(())
                    })
                    .await?;
                warn!(task_id = %id, error = %err, "task failed");
                if err.is_retryable() {
                    Ok(TaskResult::failure(id, message, duration))
                } else {
                    Ok(TaskResult {
                        duration,
                        ..TaskResult::fatal(id, message)
                    })
                }
            }
        }
    }
}

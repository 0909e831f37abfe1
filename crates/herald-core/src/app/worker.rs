use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::executor::Executor;
use super::manager::TaskManager;
use super::retry::RetryPolicy;
use crate::domain::{HeraldError, Result, TaskId, TaskResult, TaskStatus};

/// Worker owns the execute -> retry decision -> re-enqueue sequence for the
/// task it holds.
pub struct Worker {
    executor: Executor,
    manager: Arc<TaskManager>,
    retry: RetryPolicy,
}

impl Worker {
    pub fn new(executor: Executor, manager: Arc<TaskManager>, retry: RetryPolicy) -> Self {
        Self {
            executor,
            manager,
            retry,
        }
    }

    /// Run one dequeued task to its next resting state.
    ///
    /// Returns `None` when the task was no longer runnable (cancelled or
    /// deleted between dequeue and pickup).
    pub async fn process(&self, id: TaskId) -> Result<Option<TaskResult>> {
        let result = match self.executor.execute(id).await {
            Ok(result) => result,
            Err(HeraldError::InvalidTransition { from, .. }) => {
                debug!(task_id = %id, status = %from, "dequeued task no longer pending");
                return Ok(None);
            }
            Err(HeraldError::NotFound(_)) => {
                debug!(task_id = %id, "dequeued task was deleted");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if result.is_retryable() {
            self.schedule_retry(id).await?;
        }
        Ok(Some(result))
    }

    /// FAILED -> RETRYING, then a detached timer puts it back to PENDING.
    ///
    /// The backoff wait does not hold the worker; the timer task does.
    async fn schedule_retry(&self, id: TaskId) -> Result<()> {
        let task = self.manager.tasks().require(id).await?;
        if !task.retries_remaining() {
            warn!(task_id = %id, retries = task.retry_count, "retries exhausted");
            return Ok(());
        }

        let delay = self.retry.next_delay(task.retry_count);
        let now = self.manager.clock().now();
        let task = self
            .manager
            .tasks()
            .update(id, |t| {
                t.transition(TaskStatus::Retrying, now)?;
                t.retry_count += 1;
                Ok(())
            })
            .await?;
        warn!(
            task_id = %id,
            retry = task.retry_count,
            max_retries = task.max_retries,
            delay_secs = delay.as_secs(),
            "retry scheduled"
        );

        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = manager.requeue(id).await {
                error!(task_id = %id, error = %e, "failed to re-enqueue retry");
            }
        });
        Ok(())
    }
}

/// Worker group handle.
/// - `shutdown_tx` を drop するとワーカー全体が止まる
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one `Worker`.
    pub fn spawn(n: usize, worker: Arc<Worker>, dequeue_timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let w = Arc::clone(&worker);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, w, dequeue_timeout, &mut rx).await;
            });
            joins.push(join);
        }
        info!(workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// In-flight handlers run to completion; workers just stop dequeueing.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    worker: Arc<Worker>,
    dequeue_timeout: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let queue = Arc::clone(worker.manager.queue());
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // dequeue は待つ可能性があるので select で shutdown と競合させる
        let next = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            next = queue.dequeue(dequeue_timeout) => next,
        };

        let Some(id) = next else {
            continue;
        };

        if let Err(e) = worker.process(id).await {
            error!(worker_id, task_id = %id, error = %e, "task processing failed");
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::queue::PriorityQueue;
    use crate::app::registry::{HandlerRegistry, TaskHandler};
    use crate::app::repository::Repository;
    use crate::config::SchedulerConfig;
    use crate::domain::{NewTask, Task};
    use crate::impls::InMemoryStore;
    use crate::ports::{SystemClock, UlidGenerator};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 最初の `fail_first` 回だけ失敗する
    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn invoke(&self, _task: &Task) -> Result<serde_json::Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(HeraldError::execution(format!("attempt {n} failed")))
            } else {
                Ok(serde_json::json!({"attempts": n + 1}))
            }
        }
    }

    fn worker(fail_first: u32) -> (Arc<Worker>, Arc<TaskManager>, Arc<Flaky>) {
        let clock: Arc<dyn crate::ports::Clock> = Arc::new(SystemClock);
        let tasks = Arc::new(Repository::<Task>::new(Arc::new(InMemoryStore::new())));
        let manager = Arc::new(TaskManager::new(
            Arc::clone(&tasks),
            Arc::new(PriorityQueue::new()),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::clone(&clock),
            &SchedulerConfig::default(),
        ));
        let flaky = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first,
        });
        let mut registry = HandlerRegistry::new();
        registry.register("flaky", flaky.clone()).unwrap();
        let executor = Executor::new(tasks, Arc::new(registry), clock);
        let worker = Arc::new(Worker::new(
            executor,
            Arc::clone(&manager),
            RetryPolicy::default(),
        ));
        (worker, manager, flaky)
    }

    #[tokio::test(start_paused = true)]
    async fn failure_moves_to_retrying_then_back_to_pending() {
        let (worker, manager, _) = worker(1);
        let id = manager
            .create_task(NewTask::new("t", "flaky").max_retries(1))
            .await
            .unwrap();
        let dequeued = manager.queue().dequeue(Duration::from_millis(1)).await;
        assert_eq!(dequeued, Some(id));

        let result = worker.process(id).await.unwrap().unwrap();
        assert!(result.is_retryable());
        let task = manager.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert_eq!(task.retry_count, 1);
        assert!(!manager.queue().contains(id).await);

        // 60 秒のバックオフ（paused なので即座に進む）
        tokio::time::sleep(Duration::from_secs(61)).await;
        let task = manager.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(manager.queue().contains(id).await);

        manager.queue().remove(id).await;
        let result = worker.process(id).await.unwrap().unwrap();
        assert!(result.is_success());
        let task = manager.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_stay_failed() {
        let (worker, manager, _) = worker(u32::MAX);
        let id = manager
            .create_task(NewTask::new("t", "flaky").max_retries(0))
            .await
            .unwrap();

        worker.process(id).await.unwrap();
        let task = manager.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
    }

    #[tokio::test]
    async fn cancelled_after_dequeue_is_skipped() {
        let (worker, manager, flaky) = worker(0);
        let id = manager.create_task(NewTask::new("t", "flaky")).await.unwrap();
        manager.cancel_task(id).await.unwrap();

        assert!(worker.process(id).await.unwrap().is_none());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn group_drains_queue_and_shuts_down() {
        let (worker, manager, _) = worker(0);
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                manager
                    .create_task(NewTask::new(format!("t{i}"), "flaky"))
                    .await
                    .unwrap(),
            );
        }

        let group = WorkerGroup::spawn(3, worker, Duration::from_millis(50));
        assert_eq!(group.len(), 3);
        for _ in 0..100 {
            if manager
                .list_by_status(TaskStatus::Completed)
                .await
                .unwrap()
                .len()
                == ids.len()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        group.shutdown_and_join().await;

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.count(TaskStatus::Completed), 5);
        assert_eq!(stats.queue_sizes.total(), 0);
    }
}

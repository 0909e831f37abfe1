//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - バックグラウンドループの起動と停止を 1 つのハンドルにまとめる

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::automation::{RuleEngine, TemplateLibrary};
use super::executor::Executor;
use super::manager::{RecoveryStats, TaskManager};
use super::queue::PriorityQueue;
use super::recurring::RecurringScheduler;
use super::registry::{HandlerRegistry, TaskHandler};
use super::repository::Repository;
use super::retry::RetryPolicy;
use super::worker::{Worker, WorkerGroup};
use crate::config::{SchedulerConfig, StoreConfig};
use crate::domain::{ClassifiedEvent, HeraldError, Result, TaskType};
use crate::impls::{InMemoryStore, SledStore};
use crate::ports::{Clock, IdGenerator, RecordStore, SystemClock, UlidGenerator};
use crate::typed::{Handler, TaskPayload};

const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// SchedulerBuilder はスケジューラを構築
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new(config)
///     .register_typed::<SendDigest, _>(DigestHandler)?
///     .expect_tasks(&[SendDigest::TYPE, TemplateResponse::TYPE])
///     .build()?;
/// let handle = scheduler.start().await?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: HandlerRegistry,
    expected_tasks: Option<Vec<String>>,
    store: Option<Arc<dyn RecordStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はスケジューラ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Herald(#[from] HeraldError),
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected_tasks: None,
            store: None,
            clock: None,
            ids: None,
        }
    }

    /// 動的な Handler を task_type 文字列で登録
    pub fn register(
        mut self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    /// 型付き Handler を登録
    ///
    /// # Example
    /// ```ignore
    /// builder.register_typed::<SendDigest, _>(DigestHandler)?;
    /// ```
    pub fn register_typed<T: TaskPayload, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self> {
        self.registry.register_typed::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// `config.store` を無視して任意のストアを使う
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// SchedulerBuilder を構築して Scheduler を生成
    ///
    /// # 検証
    /// - 設定値が妥当か
    /// - expect_tasks() で設定された task_type が全て登録されているか
    pub fn build(self) -> std::result::Result<Scheduler, BuildError> {
        self.config.validate()?;

        if let Some(expected_tasks) = &self.expected_tasks {
            let registered: Vec<String> = self
                .registry
                .registered_types()
                .into_iter()
                .map(|t| t.as_str().to_string())
                .collect();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let store: Arc<dyn RecordStore> = match self.store {
            Some(store) => store,
            None => open_store(&self.config.store)?,
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let tasks = Arc::new(Repository::new(Arc::clone(&store)));
        let manager = Arc::new(TaskManager::new(
            Arc::clone(&tasks),
            Arc::new(PriorityQueue::new()),
            Arc::clone(&ids),
            Arc::clone(&clock),
            &self.config,
        ));
        let executor = Executor::new(tasks, Arc::new(self.registry), clock);
        let worker = Arc::new(Worker::new(
            executor,
            Arc::clone(&manager),
            RetryPolicy::from_config(&self.config),
        ));
        let rules = Arc::new(RuleEngine::new(Arc::clone(&store), Arc::clone(&manager), ids));

        Ok(Scheduler {
            config: self.config,
            store,
            manager,
            rules,
            worker,
            started: AtomicBool::new(false),
        })
    }
}

fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    Ok(match config {
        StoreConfig::Memory => Arc::new(InMemoryStore::new()),
        StoreConfig::Sled { path } => Arc::new(SledStore::open(path)?),
    })
}

/// 構築済みで、まだループが動いていないスケジューラ
///
/// タスクやルールの登録は start() の前後どちらでもよい。
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn RecordStore>,
    manager: Arc<TaskManager>,
    rules: Arc<RuleEngine>,
    worker: Arc<Worker>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    pub fn templates(&self) -> &TemplateLibrary {
        self.rules.templates()
    }

    /// Persisted state is recovered first, then the workers and the
    /// recurring, promotion, automation and retention loops are spawned.
    /// A scheduler starts at most once; later calls return `Validation`.
    pub async fn start(&self) -> Result<SchedulerHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HeraldError::validation("scheduler is already started"));
        }
        let recovered = match self.manager.recover().await {
            Ok(recovered) => recovered,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let config = &self.config;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);

        let workers = WorkerGroup::spawn(
            config.workers,
            Arc::clone(&self.worker),
            config.dequeue_timeout(),
        );

        let loops = vec![
            tokio::spawn(
                RecurringScheduler::new(Arc::clone(&self.manager))
                    .run(config.recurring_interval(), shutdown_rx.clone()),
            ),
            tokio::spawn(promotion_loop(
                Arc::clone(&self.manager),
                config.promotion_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(Arc::clone(&self.rules).run(
                events_rx,
                config.automation_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(retention_loop(
                Arc::clone(&self.manager),
                config.retention_days,
                shutdown_rx,
            )),
        ];

        info!(workers = workers.len(), "scheduler started");
        Ok(SchedulerHandle {
            store: Arc::clone(&self.store),
            workers,
            loops,
            events: events_tx,
            shutdown_tx,
            recovered,
        })
    }
}

/// 動いているスケジューラへのハンドル
///
/// drop しても止まらない。止めるときは shutdown() を呼ぶ。
pub struct SchedulerHandle {
    store: Arc<dyn RecordStore>,
    workers: WorkerGroup,
    loops: Vec<JoinHandle<()>>,
    events: mpsc::Sender<ClassifiedEvent>,
    shutdown_tx: watch::Sender<bool>,
    recovered: RecoveryStats,
}

impl SchedulerHandle {
    /// What start() found in the store.
    pub fn recovered(&self) -> &RecoveryStats {
        &self.recovered
    }

    /// Hand a classified event to the rule engine loop.
    pub async fn submit_event(&self, event: ClassifiedEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| HeraldError::execution("scheduler is shutting down"))
    }

    pub fn event_sender(&self) -> mpsc::Sender<ClassifiedEvent> {
        self.events.clone()
    }

    /// Stop dequeueing, let in-flight handlers finish, stop the loops and
    /// flush the store.
    pub async fn shutdown(self) -> Result<()> {
        info!("scheduler shutting down");
        let _ = self.shutdown_tx.send(true);
        self.workers.shutdown_and_join().await;
        for join in self.loops {
            if let Err(e) = join.await {
                warn!(error = %e, "background loop ended abnormally");
            }
        }
        self.store.flush().await?;
        info!("scheduler stopped");
        Ok(())
    }
}

/// Move due SCHEDULED one-offs into the queue.
async fn promotion_loop(
    manager: Arc<TaskManager>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = manager.promote_due().await {
                    error!(error = %e, "promotion failed");
                }
            }
        }
    }
}

/// Drop finished tasks older than `days`, once at startup and then daily.
/// `days == 0` keeps everything.
async fn retention_loop(
    manager: Arc<TaskManager>,
    days: u32,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if days == 0 {
        return;
    }
    let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = manager.cleanup_old_tasks(days).await {
                    error!(error = %e, "cleanup failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskStatus};
    use crate::typed::TemplateResponse;
    use crate::typed::task::fixtures::SendDigest;
    use async_trait::async_trait;

    struct DigestHandler;

    #[async_trait]
    impl Handler<SendDigest> for DigestHandler {
        async fn handle(
            &self,
            digest: SendDigest,
            _task: &crate::domain::Task,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "list": digest.list }))
        }
    }

    fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new(SchedulerConfig::default())
    }

    #[test]
    fn test_build_success() {
        let scheduler = builder()
            .register_typed::<SendDigest, _>(DigestHandler)
            .unwrap()
            .expect_tasks(&[SendDigest::TYPE])
            .build();
        assert!(scheduler.is_ok());
    }

    #[test]
    fn test_build_missing_task_types() {
        let scheduler = builder()
            .register_typed::<SendDigest, _>(DigestHandler)
            .unwrap()
            .expect_tasks(&[SendDigest::TYPE, TemplateResponse::TYPE])
            .build();
        assert!(matches!(
            scheduler,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![TemplateResponse::TYPE.to_string()]
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = SchedulerConfig {
            workers: 0,
            ..SchedulerConfig::default()
        };
        let scheduler = SchedulerBuilder::new(config).build();
        assert!(matches!(
            scheduler,
            Err(BuildError::Herald(HeraldError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn started_scheduler_runs_tasks_and_stops() {
        let scheduler = builder()
            .register_typed::<SendDigest, _>(DigestHandler)
            .unwrap()
            .build()
            .unwrap();
        let handle = scheduler.start().await.unwrap();

        let digest = SendDigest {
            list: "ops".into(),
            max_items: 5,
        };
        let id = scheduler
            .manager()
            .create_task(digest.into_new_task("ops-digest").unwrap())
            .await
            .unwrap();

        let mut status = TaskStatus::Pending;
        for _ in 0..100 {
            status = scheduler.manager().get_task(id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, TaskStatus::Completed);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn recovery_requeues_interrupted_work() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());

        // 1 回目: タスクを作るだけで start しない
        let first = builder().store(Arc::clone(&store)).build().unwrap();
        first
            .manager()
            .create_task(NewTask::new("later", "nobody-handles-this"))
            .await
            .unwrap();

        // 2 回目: 同じストアから立ち上げ直す
        let second = builder().store(store).build().unwrap();
        assert!(second.manager().queue().is_empty().await);
        let handle = second.start().await.unwrap();
        assert_eq!(handle.recovered().requeued_pending, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn second_start_is_refused() {
        let scheduler = builder().build().unwrap();
        let handle = scheduler.start().await.unwrap();

        let err = scheduler.start().await.err().unwrap();
        assert!(matches!(err, HeraldError::Validation(_)), "{err}");

        handle.shutdown().await.unwrap();
    }
}

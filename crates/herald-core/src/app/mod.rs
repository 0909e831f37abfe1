//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: スケジューラの構築とワイヤリング
//! - **TaskManager**: タスクの作成 / 照会 / キャンセル / 復旧
//! - **PriorityQueue**: 4 段の優先度キュー
//! - **Executor / Worker**: 実行、タイムアウト、リトライ判断
//! - **RecurringScheduler**: cron テンプレートからの生成
//! - **RuleEngine / TemplateLibrary**: イベント駆動の自動応答

pub mod automation;
pub mod builder;
pub mod executor;
pub mod manager;
pub mod queue;
pub mod recurring;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod status;
pub mod worker;

// 主要な型を再エクスポート
pub use self::automation::{RuleEngine, TemplateLibrary};
pub use self::builder::{BuildError, Scheduler, SchedulerBuilder, SchedulerHandle};
pub use self::executor::Executor;
pub use self::manager::{CancelOutcome, RecoveryStats, TaskManager};
pub use self::queue::{PriorityQueue, QueueSizes};
pub use self::recurring::RecurringScheduler;
pub use self::registry::{HandlerRegistry, TaskHandler};
pub use self::repository::Repository;
pub use self::retry::RetryPolicy;
pub use self::status::TaskStats;
pub use self::worker::{Worker, WorkerGroup};

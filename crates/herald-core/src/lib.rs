//! herald-core
//!
//! Core building blocks for the Herald background task scheduler.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, status, priority, schedule, rule, template, event, errors）
//! - **ports**: 抽象化レイヤー（RecordStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryStore, SledStore, レコードの codec）
//! - **app**: アプリケーションロジック（builder, manager, queue, executor, worker, recurring, automation）
//! - **typed**: 型付き payload API（TaskPayload trait, Handler trait）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{BuildError, Scheduler, SchedulerBuilder, SchedulerHandle};
pub use config::{SchedulerConfig, StoreConfig};
pub use domain::{HeraldError, Result};

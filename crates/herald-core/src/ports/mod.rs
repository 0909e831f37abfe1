//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の仕組み（永続ストア、時計、ID 採番）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - RecordStore が source of truth（正本）
//! - 「今」は必ず Clock から取る（テストで時刻を固定するため）

pub mod clock;
pub mod id_generator;
pub mod record_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::record_store::{Keyspace, RecordStore};

//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: テスト・デモ用の RecordStore
//! - **SledStore**: sled による永続 RecordStore
//! - **codec**: レコードのバージョン付きエンコード

pub mod codec;
pub mod memory_store;
pub mod sled_store;

// 主要な型を再エクスポート
pub use self::codec::Record;
pub use self::memory_store::InMemoryStore;
pub use self::sled_store::SledStore;

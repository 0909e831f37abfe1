//! RecordStore port - 永続化された KV ストア（正本）
//!
//! Task / Rule / Template はそれぞれ独立したキースペースに、バージョン付きの
//! エンコード済みレコードとして保存されます。エンコード形式は
//! `impls::codec` が担い、このポートはバイト列しか扱いません。
//!
//! # 実装
//! - **InMemoryStore**: テスト・デモ用
//! - **SledStore**: sled による永続化

use std::fmt;

use async_trait::async_trait;

use crate::domain::Result;

/// Keyspace はレコードの種類ごとの名前空間
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Keyspace {
    Tasks,
    Rules,
    Templates,
}

impl Keyspace {
    pub const ALL: [Keyspace; 3] = [Keyspace::Tasks, Keyspace::Rules, Keyspace::Templates];

    /// sled の tree 名にも使う
    pub fn name(self) -> &'static str {
        match self {
            Keyspace::Tasks => "tasks",
            Keyspace::Rules => "rules",
            Keyspace::Templates => "templates",
        }
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// RecordStore は keyspace ごとの永続 KV
///
/// # 設計原則
/// - ここが正本。キャッシュは `app::repository` 側が持つ
/// - `insert` は既存キーを上書きしない（重複 ID は invariant violation）
/// - `scan` はキー順（ULID なので作成順）
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 新規レコードを書き込む。キーが存在すれば `DuplicateId`
    async fn insert(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<()>;

    /// 上書き保存
    async fn put(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<()>;

    async fn get(&self, keyspace: Keyspace, key: &str) -> Result<Option<Vec<u8>>>;

    /// 削除。存在していたら true
    async fn delete(&self, keyspace: Keyspace, key: &str) -> Result<bool>;

    async fn scan(&self, keyspace: Keyspace) -> Result<Vec<(String, Vec<u8>)>>;

    /// Flush pending writes.
    async fn flush(&self) -> Result<()>;
}

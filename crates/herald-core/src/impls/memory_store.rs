//! InMemoryStore - テスト・デモ用の RecordStore
//!
//! # 実装詳細
//! - keyspace ごとに BTreeMap（scan がキー順になる）
//! - tokio の RwLock で排他制御（ロックを持ったまま await しない）

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{HeraldError, Result};
use crate::ports::{Keyspace, RecordStore};

#[derive(Default)]
pub struct InMemoryStore {
    spaces: RwLock<HashMap<Keyspace, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
        let mut spaces = self.spaces.write().await;
        let space = spaces.entry(keyspace).or_default();
        if space.contains_key(key) {
            return Err(HeraldError::DuplicateId(key.to_string()));
        }
        space.insert(key.to_string(), value);
        Ok(())
    }

    async fn put(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
        self.spaces
            .write()
            .await
            .entry(keyspace)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, keyspace: Keyspace, key: &str) -> Result<Option<Vec<u8>>> {
        let spaces = self.spaces.read().await;
        Ok(spaces.get(&keyspace).and_then(|s| s.get(key)).cloned())
    }

    async fn delete(&self, keyspace: Keyspace, key: &str) -> Result<bool> {
        let mut spaces = self.spaces.write().await;
        Ok(spaces
            .get_mut(&keyspace)
            .is_some_and(|s| s.remove(key).is_some()))
    }

    async fn scan(&self, keyspace: Keyspace) -> Result<Vec<(String, Vec<u8>)>> {
        let spaces = self.spaces.read().await;
        Ok(spaces
            .get(&keyspace)
            .map(|s| s.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

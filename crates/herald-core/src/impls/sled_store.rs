//! SledStore - sled による永続 RecordStore
//!
//! keyspace ごとに sled の tree を 1 つ開きます。`insert` は
//! 「キーが存在しない」ことを条件にした compare-and-swap です。
//! sled の呼び出しは同期 I/O なので、すべて `spawn_blocking` の中で行います。

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{HeraldError, Result};
use crate::ports::{Keyspace, RecordStore};

pub struct SledStore {
    db: sled::Db,
    tasks: sled::Tree,
    rules: sled::Tree,
    templates: sled::Tree,
}

impl SledStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        debug!(path = %path.display(), "opened sled store");
        Ok(Self {
            tasks: db.open_tree(Keyspace::Tasks.name())?,
            rules: db.open_tree(Keyspace::Rules.name())?,
            templates: db.open_tree(Keyspace::Templates.name())?,
            db,
        })
    }

    fn tree(&self, keyspace: Keyspace) -> sled::Tree {
        match keyspace {
            Keyspace::Tasks => self.tasks.clone(),
            Keyspace::Rules => self.rules.clone(),
            Keyspace::Templates => self.templates.clone(),
        }
    }
}

/// sled の同期 API を blocking スレッドで実行
async fn blocking<R, F>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HeraldError::Storage(format!("sled task failed: {e}")))?
}

#[async_trait]
impl RecordStore for SledStore {
    async fn insert(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
        let tree = self.tree(keyspace);
        let key = key.to_string();
        blocking(move || {
            tree.compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?
                .map_err(|_| HeraldError::DuplicateId(key))
        })
        .await
    }

    async fn put(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
        let tree = self.tree(keyspace);
        let key = key.to_string();
        blocking(move || {
            tree.insert(key, value)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, keyspace: Keyspace, key: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(keyspace);
        let key = key.to_string();
        blocking(move || Ok(tree.get(key)?.map(|v| v.to_vec()))).await
    }

    async fn delete(&self, keyspace: Keyspace, key: &str) -> Result<bool> {
        let tree = self.tree(keyspace);
        let key = key.to_string();
        blocking(move || Ok(tree.remove(key)?.is_some())).await
    }

    async fn scan(&self, keyspace: Keyspace) -> Result<Vec<(String, Vec<u8>)>> {
        let tree = self.tree(keyspace);
        blocking(move || {
            let mut out = Vec::new();
            for entry in tree.iter() {
                let (k, v) = entry?;
                let key = String::from_utf8(k.to_vec()).map_err(|e| {
                    HeraldError::Storage(format!("non-utf8 key in {keyspace}: {e}"))
                })?;
                out.push((key, v.to_vec()));
            }
            Ok(out)
        })
        .await
    }

    async fn flush(&self) -> Result<()> {
        let db = self.db.clone();
        blocking(move || {
            db.flush()?;
            Ok(())
        })
        .await
    }
}

//! Repository - RecordStore の上に載る cache-aside 層
//!
//! # 設計原則
//! - RecordStore が正本。キャッシュは `get` / `list` の読み取り専用
//! - `update` / `delete_if` は ID ごとの async lock の内側で、ストアから
//!   読み直してから read-modify-write する（キャッシュを判断に使わない）
//! - 書き込みはすべて write-through。失敗したらエントリを捨てる
//! - 書き込みのたびに世代番号を進める。`get` / `list` はストアを読む前の
//!   世代を覚えておき、その間に書き込みがあればキャッシュに入れない
//!   （古いスナップショットが新しいエントリを上書きしない）

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::domain::{HeraldError, Result};
use crate::impls::codec::{self, Record};
use crate::ports::RecordStore;

/// Repository は 1 種類のエンティティを扱う
///
/// # 使用例
/// ```ignore
/// let tasks: Repository<Task> = Repository::new(store.clone());
/// tasks.insert(task).await?;
/// let running = tasks.update(id, |t| t.transition(TaskStatus::Running, now)).await?;
/// ```
pub struct Repository<T: Record> {
    store: Arc<dyn RecordStore>,
    cache: RwLock<HashMap<T::Id, T>>,
    /// cache の write lock を握ったまま進める
    generation: AtomicU64,
    locks: StdMutex<HashMap<T::Id, Arc<Mutex<()>>>>,
}

impl<T: Record> Repository<T> {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: T::Id) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(id).or_default())
    }

    async fn cache_store(&self, record: T) {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        cache.insert(record.id(), record);
    }

    async fn cache_evict(&self, id: T::Id) {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        cache.remove(&id);
    }

    /// Read the authoritative record, bypassing the cache.
    async fn load(&self, id: T::Id) -> Result<Option<T>> {
        match self.store.get(T::KEYSPACE, &codec::key_of::<T>(id)).await? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 新規レコードを保存。同じ ID が既にあれば `DuplicateId`
    pub async fn insert(&self, record: T) -> Result<()> {
        let id = record.id();
        let bytes = codec::encode(&record)?;
        self.store
            .insert(T::KEYSPACE, &codec::key_of::<T>(id), bytes)
            .await?;
        self.cache_store(record).await;
        Ok(())
    }

    pub async fn get(&self, id: T::Id) -> Result<Option<T>> {
        if let Some(hit) = self.cache.read().await.get(&id) {
            return Ok(Some(hit.clone()));
        }
        let seen = self.generation.load(Ordering::SeqCst);
        let Some(record) = self.load(id).await? else {
            return Ok(None);
        };
        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::SeqCst) == seen {
            cache.insert(id, record.clone());
        }
        Ok(Some(record))
    }

    /// `get` して無ければ `NotFound`
    pub async fn require(&self, id: T::Id) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| HeraldError::NotFound(id.to_string()))
    }

    /// ID 単位で atomic な read-modify-write
    ///
    /// `f` にはストアから読み直したレコードが渡ります。`f` が `Err` を
    /// 返したら何も書き込まずにそのエラーを返します。成功時は更新後の
    /// レコードを返します。
    pub async fn update<F>(&self, id: T::Id, f: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<()> + Send,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self
            .load(id)
            .await?
            .ok_or_else(|| HeraldError::NotFound(id.to_string()))?;
        f(&mut record)?;

        let bytes = codec::encode(&record)?;
        if let Err(e) = self
            .store
            .put(T::KEYSPACE, &codec::key_of::<T>(id), bytes)
            .await
        {
            self.cache_evict(id).await;
            return Err(e);
        }
        self.cache_store(record.clone()).await;
        Ok(record)
    }

    /// 削除。存在していたら true
    pub async fn delete(&self, id: T::Id) -> Result<bool> {
        self.delete_if(id, |_| Ok(())).await
    }

    /// `check` が通ったときだけ削除する
    ///
    /// `check` は update と同じ ID lock の内側で、ストアから読んだ
    /// レコードに対して呼ばれます。`Err` ならそのまま返して何も消しません。
    pub async fn delete_if<F>(&self, id: T::Id, check: F) -> Result<bool>
    where
        F: FnOnce(&T) -> Result<()> + Send,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(record) = self.load(id).await? else {
            self.cache_evict(id).await;
            return Ok(false);
        };
        check(&record)?;

        let existed = self
            .store
            .delete(T::KEYSPACE, &codec::key_of::<T>(id))
            .await?;
        self.cache_evict(id).await;
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Ok(existed)
    }

    /// ストアを scan して全件を返す（キー順 = 作成順）
    ///
    /// デコードできないレコードは警告を出して読み飛ばします。
    pub async fn list(&self) -> Result<Vec<T>> {
        let seen = self.generation.load(Ordering::SeqCst);
        let rows = self.store.scan(T::KEYSPACE).await?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            match codec::decode::<T>(&bytes) {
                Ok(record) => out.push(record),
                Err(e) => warn!(kind = T::KIND, key = %key, error = %e, "skipping unreadable record"),
            }
        }

        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::SeqCst) == seen {
            for record in &out {
                cache.insert(record.id(), record.clone());
            }
        }
        Ok(out)
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, Task, TaskId, TaskStatus};
    use crate::impls::InMemoryStore;
    use crate::ports::Keyspace;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
    }

    fn task() -> Task {
        Task::from_new(
            TaskId::from_ulid(Ulid::new()),
            NewTask::new("a", "t"),
            now(),
            None,
        )
    }

    /// put だけ失敗させられるストア
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        fail_puts: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn insert(&self, ks: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
            self.inner.insert(ks, key, value).await
        }
        async fn put(&self, ks: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(HeraldError::Storage("disk full".into()));
            }
            self.inner.put(ks, key, value).await
        }
        async fn get(&self, ks: Keyspace, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(ks, key).await
        }
        async fn delete(&self, ks: Keyspace, key: &str) -> Result<bool> {
            self.inner.delete(ks, key).await
        }
        async fn scan(&self, ks: Keyspace) -> Result<Vec<(String, Vec<u8>)>> {
            self.inner.scan(ks).await
        }
        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    /// scan がスナップショットを取った直後で 1 回だけ止まるストア
    #[derive(Default)]
    struct GatedStore {
        inner: InMemoryStore,
        hold_scan: AtomicBool,
        scanned: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RecordStore for GatedStore {
        async fn insert(&self, ks: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
            self.inner.insert(ks, key, value).await
        }
        async fn put(&self, ks: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
            self.inner.put(ks, key, value).await
        }
        async fn get(&self, ks: Keyspace, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(ks, key).await
        }
        async fn delete(&self, ks: Keyspace, key: &str) -> Result<bool> {
            self.inner.delete(ks, key).await
        }
        async fn scan(&self, ks: Keyspace) -> Result<Vec<(String, Vec<u8>)>> {
            let rows = self.inner.scan(ks).await?;
            if self.hold_scan.swap(false, Ordering::SeqCst) {
                self.scanned.notify_one();
                self.release.notified().await;
            }
            Ok(rows)
        }
        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    /// list を scan 直後で止めたまま `during` を走らせ、list を完了させる
    async fn list_around<F, Fut>(store: &Arc<GatedStore>, repo: &Arc<Repository<Task>>, during: F) -> Vec<Task>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        store.hold_scan.store(true, Ordering::SeqCst);
        let lister = {
            let repo = Arc::clone(repo);
            tokio::spawn(async move { repo.list().await.unwrap() })
        };
        store.scanned.notified().await;
        during().await;
        store.release.notify_one();
        lister.await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_reads_through_to_the_store() {
        let store = Arc::new(InMemoryStore::new());
        let t = task();
        Repository::<Task>::new(store.clone()).insert(t.clone()).await.unwrap();

        // 別インスタンス（キャッシュ空）でもストアから読める
        let fresh = Repository::<Task>::new(store);
        assert_eq!(fresh.get(t.id).await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn duplicate_insert_is_refused() {
        let repo = Repository::<Task>::new(Arc::new(InMemoryStore::new()));
        let t = task();
        repo.insert(t.clone()).await.unwrap();
        assert!(matches!(
            repo.insert(t).await,
            Err(HeraldError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn update_rejected_by_closure_writes_nothing() {
        let repo = Repository::<Task>::new(Arc::new(InMemoryStore::new()));
        let t = task();
        repo.insert(t.clone()).await.unwrap();

        let err = repo
            .update(t.id, |t| t.transition(TaskStatus::Completed, now()))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::InvalidTransition { .. }));
        assert_eq!(repo.require(t.id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn failed_write_invalidates_cache() {
        let store = Arc::new(FlakyStore::default());
        let repo = Repository::<Task>::new(store.clone());
        let t = task();
        repo.insert(t.clone()).await.unwrap();

        store.fail_puts.store(true, Ordering::SeqCst);
        let err = repo
            .update(t.id, |t| t.transition(TaskStatus::Running, now()))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::Storage(_)));

        // キャッシュではなくストアの値（Pending のまま）が見える
        assert_eq!(repo.require(t.id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_updates_on_one_id_are_serialized() {
        let repo = Arc::new(Repository::<Task>::new(Arc::new(InMemoryStore::new())));
        let t = task();
        let id = t.id;
        repo.insert(t).await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..20 {
            let repo = Arc::clone(&repo);
            joins.push(tokio::spawn(async move {
                repo.update(id, |t| {
                    t.retry_count += 1;
                    Ok(())
                })
                .await
                .unwrap();
            }));
        }
        for j in joins {
            j.await.unwrap();
        }
        assert_eq!(repo.require(id).await.unwrap().retry_count, 20);
    }

    #[tokio::test]
    async fn delete_and_list() {
        let repo = Repository::<Task>::new(Arc::new(InMemoryStore::new()));
        let a = task();
        let b = task();
        repo.insert(a.clone()).await.unwrap();
        repo.insert(b.clone()).await.unwrap();
        assert_eq!(repo.list().await.unwrap().len(), 2);

        assert!(repo.delete(a.id).await.unwrap());
        assert!(!repo.delete(a.id).await.unwrap());
        assert_eq!(repo.get(a.id).await.unwrap(), None);
        assert_eq!(repo.list().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn stale_list_snapshot_does_not_hide_a_newer_update() {
        let store = Arc::new(GatedStore::default());
        let repo = Arc::new(Repository::<Task>::new(store.clone()));
        let t = task();
        let id = t.id;
        repo.insert(t).await.unwrap();

        let snapshot = list_around(&store, &repo, || async {
            repo.update(id, |t| t.transition(TaskStatus::Running, now()))
                .await
                .unwrap();
        })
        .await;
        assert_eq!(snapshot[0].status, TaskStatus::Pending);

        assert_eq!(repo.require(id).await.unwrap().status, TaskStatus::Running);
        let err = repo
            .update(id, |t| t.transition(TaskStatus::Cancelled, now()))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::InvalidTransition { .. }));
        let stored = Repository::<Task>::new(store).require(id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn stale_list_snapshot_does_not_resurrect_a_deleted_record() {
        let store = Arc::new(GatedStore::default());
        let repo = Arc::new(Repository::<Task>::new(store.clone()));
        let t = task();
        let id = t.id;
        repo.insert(t).await.unwrap();

        let snapshot = list_around(&store, &repo, || async {
            assert!(repo.delete(id).await.unwrap());
        })
        .await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(repo.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_decide_on_the_stored_record_not_the_cache() {
        let store = Arc::new(InMemoryStore::new());
        let repo = Repository::<Task>::new(store.clone());
        let t = task();
        let id = t.id;
        repo.insert(t.clone()).await.unwrap();

        // キャッシュを経由せずにストアだけ RUNNING にする
        let mut running = t;
        running.transition(TaskStatus::Running, now()).unwrap();
        store
            .put(
                Keyspace::Tasks,
                &codec::key_of::<Task>(id),
                codec::encode(&running).unwrap(),
            )
            .await
            .unwrap();

        let refused = repo
            .delete_if(id, |t| {
                if t.status == TaskStatus::Running {
                    return Err(HeraldError::validation("running"));
                }
                Ok(())
            })
            .await;
        assert!(matches!(refused, Err(HeraldError::Validation(_))));

        let err = repo
            .update(id, |t| t.transition(TaskStatus::Cancelled, now()))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::InvalidTransition { .. }));
        assert!(store.get(Keyspace::Tasks, &codec::key_of::<Task>(id)).await.unwrap().is_some());
    }
}

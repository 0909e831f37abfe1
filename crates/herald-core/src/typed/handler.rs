//! Handler trait - 型付き payload を受け取る Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Type erasure パターン (TypedHandler<T, H> → dyn TaskHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::TaskPayload;
use crate::app::TaskHandler;
use crate::domain::{Result, Task};

/// Handler は decode 済みの payload を受け取って結果を返す
///
/// # 使用例
/// ```ignore
/// struct DigestHandler;
///
/// #[async_trait]
/// impl Handler<SendDigest> for DigestHandler {
///     async fn handle(&self, digest: SendDigest, task: &Task) -> Result<serde_json::Value> {
///         tracing::info!(task_id = %task.id, list = %digest.list, "sending digest");
///         Ok(serde_json::json!({"sent": true}))
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `Handler<SendDigest>` は `SendDigest` しか受け取れない
/// - コンパイル時に payload 型と Handler の対応が保証される
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, payload: T, task: &Task) -> Result<serde_json::Value>;
}

/// Handler<T> を object-safe な `TaskHandler` に変換するアダプタ
///
/// payload が T に decode できなければ `Validation`（リトライしても直らない）。
pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> TaskHandler for TypedHandler<T, H> {
    async fn invoke(&self, task: &Task) -> Result<serde_json::Value> {
        let payload = T::from_payload(&task.payload)?;
        self.handler.handle(payload, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HeraldError, NewTask, TaskId};
    use crate::typed::task::fixtures::SendDigest;
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    struct DigestHandler;

    #[async_trait]
    impl Handler<SendDigest> for DigestHandler {
        async fn handle(&self, digest: SendDigest, _task: &Task) -> Result<serde_json::Value> {
            Ok(json!({ "list": digest.list, "items": digest.max_items }))
        }
    }

    fn task(payload: serde_json::Value) -> Task {
        Task::from_new(
            TaskId::from_ulid(Ulid::new()),
            NewTask::new("d", SendDigest::TYPE).payload_json(payload),
            Utc::now(),
            None,
        )
    }

    #[tokio::test]
    async fn typed_handler_decodes_payload() {
        let handler = TypedHandler::<SendDigest, _>::new(DigestHandler);
        let out = handler
            .invoke(&task(json!({ "list": "ops", "max_items": 3 })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "list": "ops", "items": 3 }));
    }

    #[tokio::test]
    async fn malformed_payload_is_not_retryable() {
        let handler = TypedHandler::<SendDigest, _>::new(DigestHandler);
        let err = handler.invoke(&task(json!({ "list": 1 }))).await.unwrap_err();
        assert!(matches!(err, HeraldError::Validation(_)));
        assert!(!err.is_retryable());
    }
}

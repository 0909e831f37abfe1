//! TaskPayload trait - 型付き payload の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{HeraldError, NewTask, Payload, Result};

/// TaskPayload は task_type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendDigest {
///     list: String,
/// }
///
/// impl TaskPayload for SendDigest {
///     const TYPE: &'static str = "send-digest";
/// }
///
/// let new = SendDigest { list: "ops".into() }.into_new_task("daily digest")?;
/// ```
///
/// # Trait Bounds
/// - `Serialize`: Task.payload への保存のため
/// - `DeserializeOwned`: handler に渡す前の復元のため
/// - `Send + Sync + 'static`: Arc に格納された handler から使うため
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task_type の定義
    const TYPE: &'static str;

    /// JSON object としてエンコードする。object にならない型は `Validation`
    fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(HeraldError::validation(format!(
                "payload for {} must serialize to an object, got {other}",
                Self::TYPE
            ))),
        }
    }

    fn from_payload(payload: &Payload) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(payload.clone())).map_err(|e| {
            HeraldError::validation(format!("payload for {} does not decode: {e}", Self::TYPE))
        })
    }

    /// この payload を持つ `NewTask` を作る
    fn into_new_task(self, name: impl Into<String>) -> Result<NewTask>
    where
        Self: Sized,
    {
        Ok(NewTask::new(name, Self::TYPE).payload(self.to_payload()?))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct SendDigest {
        pub list: String,
        pub max_items: u32,
    }

    impl TaskPayload for SendDigest {
        const TYPE: &'static str = "send-digest";
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Scalar(pub u32);

    impl TaskPayload for Scalar {
        const TYPE: &'static str = "scalar";
    }
}

//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! すべての ID は ULID を `Id<T>` で包んだものです。`T` は実行時には使わない
//! マーカー型で、`TaskId` と `RuleId` を取り違えるとコンパイルエラーになります。
//!
//! - **時刻でソート可能**: 生成順に並ぶので、store の scan 結果も作成順になる
//! - **衝突しない**: ランダム部 80 bit。重複は invariant violation として扱う

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

use super::errors::HeraldError;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "rule-", "template-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// シリアライズ時はプレフィックスなしの ULID 文字列になります。
/// store のキーには `Display`（プレフィックス付き）を使います。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// `task-01H...` と素の `01H...` の両方を受け付ける
impl<T: IdMarker> FromStr for Id<T> {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|e| HeraldError::Validation(format!("invalid id '{s}': {e}")))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.ulid.to_string())
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ulid::from_string(&raw)
            .map(Self::from_ulid)
            .map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskMarker {}

impl IdMarker for TaskMarker {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleMarker {}

impl IdMarker for RuleMarker {
    fn prefix() -> &'static str {
        "rule-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateMarker {}

impl IdMarker for TemplateMarker {
    fn prefix() -> &'static str {
        "template-"
    }
}

/// Identifier of a Task (one-off instance or recurring template).
pub type TaskId = Id<TaskMarker>;

/// Identifier of an AutomationRule.
pub type RuleId = Id<RuleMarker>;

/// Identifier of a response Template.
pub type TemplateId = Id<TemplateMarker>;

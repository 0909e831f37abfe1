//! Errors - エラー型と分類

use thiserror::Error;

use super::status::TaskStatus;
use super::task::TaskType;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（store の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum HeraldError {
    /// Rejected synchronously at creation time; never enters the queue.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no handler registered for task_type={0}")]
    UnregisteredHandler(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    /// A handler returned a failure.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("schema mismatch for {kind}: expected v{expected}, found {found}")]
    Schema {
        kind: String,
        expected: u32,
        found: String,
    },
}

impl HeraldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeraldError::Execution(_) | HeraldError::Timeout { .. } => ErrorKind::Transient,
            HeraldError::Storage(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }

    /// Only handler failures and timeouts feed the retry policy.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        HeraldError::Validation(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        HeraldError::Execution(msg.into())
    }
}

impl From<sled::Error> for HeraldError {
    fn from(err: sled::Error) -> Self {
        HeraldError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(err: serde_json::Error) -> Self {
        HeraldError::Storage(format!("serialization: {err}"))
    }
}

pub type Result<T, E = HeraldError> = std::result::Result<T, E>;

//! Versioned record codec.
//!
//! Every persisted entity is wrapped as
//! `{"kind": "task", "version": 1, "data": {...}}`. Decoding checks both the
//! kind and the version so a record written under an incompatible schema
//! surfaces as `HeraldError::Schema` instead of being half-read.

use std::fmt::Display;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AutomationRule, HeraldError, Result, RuleId, Task, TaskId, Template, TemplateId,
};
use crate::ports::Keyspace;

/// Record は永続化できるエンティティ
///
/// # 使用例
/// ```ignore
/// let bytes = codec::encode(&task)?;
/// let back: Task = codec::decode(&bytes)?;
/// ```
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + Display + Send + Sync + 'static;

    const KIND: &'static str;
    const VERSION: u32;
    const KEYSPACE: Keyspace;

    fn id(&self) -> Self::Id;
}

impl Record for Task {
    type Id = TaskId;

    const KIND: &'static str = "task";
    const VERSION: u32 = 1;
    const KEYSPACE: Keyspace = Keyspace::Tasks;

    fn id(&self) -> TaskId {
        self.id
    }
}

impl Record for AutomationRule {
    type Id = RuleId;

    const KIND: &'static str = "rule";
    const VERSION: u32 = 1;
    const KEYSPACE: Keyspace = Keyspace::Rules;

    fn id(&self) -> RuleId {
        self.id
    }
}

impl Record for Template {
    type Id = TemplateId;

    const KIND: &'static str = "template";
    const VERSION: u32 = 1;
    const KEYSPACE: Keyspace = Keyspace::Templates;

    fn id(&self) -> TemplateId {
        self.id
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    kind: &'a str,
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    kind: Option<String>,
    version: Option<u32>,
    data: Option<serde_json::Value>,
}

pub fn encode<T: Record>(record: &T) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        kind: T::KIND,
        version: T::VERSION,
        data: record,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode<T: Record>(bytes: &[u8]) -> Result<T> {
    let schema_error = |found: String| HeraldError::Schema {
        kind: T::KIND.to_string(),
        expected: T::VERSION,
        found,
    };

    let raw: RawEnvelope = serde_json::from_slice(bytes)?;
    let (kind, version, data) = match (raw.kind, raw.version, raw.data) {
        (Some(kind), Some(version), Some(data)) => (kind, version, data),
        _ => return Err(schema_error("unversioned record".to_string())),
    };
    if kind != T::KIND {
        return Err(schema_error(format!("kind '{kind}'")));
    }
    if version != T::VERSION {
        return Err(schema_error(format!("v{version}")));
    }
    Ok(serde_json::from_value(data)?)
}

/// Store key for a record id (the prefixed display form).
pub fn key_of<T: Record>(id: T::Id) -> String {
    id.to_string()
}

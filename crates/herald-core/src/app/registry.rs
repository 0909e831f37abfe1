use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{HeraldError, Result, Task, TaskType};

/// A handler for a specific task type.
///
/// Takes the whole `Task` so the handler can read the payload as it likes.
/// Handlers that want a decoded payload struct go through
/// [`crate::typed::TypedHandler`]. The executor runs `invoke` under the
/// task's timeout; handlers never see the caller's concurrency model.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn invoke(&self, task: &Task) -> Result<serde_json::Value>;
}

/// Registry of handlers (task_type -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared behind `Arc`).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task type. A second registration for the
    /// same type is an error.
    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        let task_type = task_type.into();
        if self.handlers.contains_key(&task_type) {
            return Err(HeraldError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

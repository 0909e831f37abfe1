//! 型付き Handler の登録
//!
//! `HandlerRegistry` は task_type 文字列で引く。ここでは `T::TYPE` を
//! キーにして `TypedHandler` でラップしてから登録するので、task_type の
//! typo が起きない。

use std::sync::Arc;

use super::handler::{Handler, TypedHandler};
use super::task::TaskPayload;
use crate::app::HandlerRegistry;
use crate::domain::Result;

impl HandlerRegistry {
    /// # Example
    /// ```ignore
    /// registry.register_typed::<SendDigest, _>(DigestHandler)?;
    /// ```
    pub fn register_typed<T, H>(&mut self, handler: H) -> Result<()>
    where
        T: TaskPayload,
        H: Handler<T> + 'static,
    {
        self.register(T::TYPE, Arc::new(TypedHandler::<T, H>::new(handler)))
    }
}

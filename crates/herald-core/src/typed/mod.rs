//! Typed - 型付き payload API
//!
//! このモジュールは task_type の typo を型で排除し、
//! Handler と payload 型の対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskPayload` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `app::TaskHandler` trait - object-safe, type erasure

pub mod handler;
pub mod registry;
pub mod response;
pub mod task;

// 主要な trait/型 を再エクスポート
pub use self::handler::{Handler, TypedHandler};
pub use self::response::TemplateResponse;
pub use self::task::TaskPayload;

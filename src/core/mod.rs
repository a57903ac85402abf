//! 核心：调用错误分类

pub mod error;

pub use error::{CallError, FailureKind};

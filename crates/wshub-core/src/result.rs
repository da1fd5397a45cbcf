//! Convenience result type alias for wshub.

use crate::error::AppError;

/// A specialized `Result` type for wshub operations.
pub type AppResult<T> = Result<T, AppError>;

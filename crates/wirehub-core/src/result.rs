//! Convenience result type alias for wirehub.

use crate::error::AppError;

/// A specialized `Result` type for wirehub application-level operations.
pub type AppResult<T> = Result<T, AppError>;

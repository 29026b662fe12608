//! Error types for pmguard-core.

use thiserror::Error;

/// Core error types.
///
/// These are all validation failures: they are returned synchronously to the
/// caller at create/update time and never reach the worker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(String),
}

impl From<rust_decimal::Error> for CoreError {
    fn from(e: rust_decimal::Error) -> Self {
        Self::DecimalParse(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

//! Store error types.

use pmguard_core::{CoreError, RuleId, RuleStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Rule not found: {0}")]
    NotFound(RuleId),

    #[error("Validation failed: {0}")]
    Validation(#[from] CoreError),

    #[error("Cannot {operation} rule {rule_id} in status {from}")]
    InvalidTransition {
        rule_id: RuleId,
        from: RuleStatus,
        operation: &'static str,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

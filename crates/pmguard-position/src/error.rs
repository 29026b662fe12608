//! Position tracker error types.

use pmguard_core::OwnerRef;
use pmguard_upstream::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("Failed to refresh positions for {owner}: {source}")]
    Refresh {
        owner: OwnerRef,
        #[source]
        source: UpstreamError,
    },

    #[error("All {attempted} owner refreshes failed; last error: {last_error}")]
    AllOwnersFailed {
        attempted: usize,
        last_error: UpstreamError,
    },
}

impl PositionError {
    /// The upstream error behind this failure.
    pub fn upstream(&self) -> &UpstreamError {
        match self {
            Self::Refresh { source, .. } => source,
            Self::AllOwnersFailed { last_error, .. } => last_error,
        }
    }
}

pub type PositionResult<T> = Result<T, PositionError>;

//! Feed error types.

use pmguard_upstream::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("No price available for token {0}")]
    Unavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

pub type FeedResult<T> = Result<T, FeedError>;

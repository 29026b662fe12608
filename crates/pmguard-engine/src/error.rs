//! Engine error types.
//!
//! Upstream failures during execution are classified and absorbed by the
//! executor; only local failures (store, tracker) surface here.

use pmguard_feed::FeedError;
use pmguard_position::PositionError;
use pmguard_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Rule store error: {0}")]
    Store(#[from] StoreError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Price feed error: {0}")]
    Feed(#[from] FeedError),
}

pub type EngineResult<T> = Result<T, EngineError>;

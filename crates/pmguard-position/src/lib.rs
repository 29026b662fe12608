//! Position tracking for pmguard.
//!
//! Caches each owner's held outcome-token positions, refreshed from the
//! upstream holdings endpoint. Closed and vanished positions move to a
//! history map so their last-known state stays readable.

pub mod error;
pub mod tracker;

pub use error::{PositionError, PositionResult};
pub use tracker::{PositionLookup, PositionTracker, RefreshSummary};

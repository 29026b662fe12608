//! pmguard application.
//!
//! Wires the components into one process:
//! - Rule store and event log backed by journals in the data directory
//! - Upstream trading API client with per-owner keys
//! - Monitoring worker (poll loop plus optional market stream)
//! - Read-only management endpoints

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};

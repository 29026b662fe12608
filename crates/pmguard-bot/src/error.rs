//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] pmguard_upstream::UpstreamError),

    #[error("Store error: {0}")]
    Store(#[from] pmguard_store::StoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] pmguard_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for AppError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

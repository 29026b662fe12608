//! Upstream error types and permanent/transient classification.

use thiserror::Error;

/// Message fragments that mark an upstream failure as permanent.
///
/// Matched case-insensitively against the error message. Anything not
/// matching (and not carrying a permanent status) is treated as transient.
const PERMANENT_VOCABULARY: &[&str] = &[
    "insufficient",
    "not enough balance",
    "not enough liquidity",
    "no liquidity",
    "no match",
    "invalid token",
    "invalid price",
    "invalid market",
    "market closed",
    "market is closed",
    "market resolved",
    "market has resolved",
    "position not found",
    "policy",
    "denied",
];

/// HTTP statuses that can never succeed on retry.
const PERMANENT_STATUSES: &[u16] = &[400, 403, 404];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// 2xx response whose envelope reports a failure.
    #[error("Upstream rejected request: {0}")]
    Rejected(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("No credentials configured for owner {0}")]
    Unauthorized(String),
}

impl UpstreamError {
    /// Whether retrying the same request can never succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Http { status, message } => {
                PERMANENT_STATUSES.contains(status) || matches_vocabulary(message)
            }
            Self::Rejected(message) => matches_vocabulary(message),
            Self::Timeout(_) | Self::Network(_) | Self::Decode(_) | Self::Unauthorized(_) => false,
        }
    }

    /// Short label for metrics and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Rejected(_) => "rejected",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
            Self::Unauthorized(_) => "unauthorized",
        }
    }
}

fn matches_vocabulary(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    PERMANENT_VOCABULARY.iter().any(|m| lower.contains(m))
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_statuses() {
        for status in [400, 403, 404] {
            let err = UpstreamError::Http {
                status,
                message: "whatever".to_string(),
            };
            assert!(err.is_permanent(), "status {status} should be permanent");
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = UpstreamError::Http {
            status: 503,
            message: "service unavailable".to_string(),
        };
        assert!(!err.is_permanent());
        assert!(!UpstreamError::Timeout(5000).is_permanent());
        assert!(!UpstreamError::Network("connection reset".to_string()).is_permanent());
    }

    #[test]
    fn test_vocabulary_is_permanent() {
        for msg in [
            "Insufficient liquidity",
            "insufficient funds for order",
            "Market is closed",
            "market resolved",
            "no match found",
            "Invalid token id",
            "Position not found",
            "denied by spending policy",
        ] {
            assert!(
                UpstreamError::Rejected(msg.to_string()).is_permanent(),
                "{msg} should be permanent"
            );
        }
    }

    #[test]
    fn test_vocabulary_applies_to_any_status() {
        let err = UpstreamError::Http {
            status: 500,
            message: "market closed".to_string(),
        };
        assert!(err.is_permanent());
    }

    #[test]
    fn test_missing_credentials_is_transient() {
        assert!(!UpstreamError::Unauthorized("alice".to_string()).is_permanent());
    }
}

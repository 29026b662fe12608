//! Circuit breaker around the upstream position refresh.
//!
//! Counts consecutive failures; at the threshold it opens for a cooldown,
//! during which the worker makes no upstream calls. Any success resets the
//! count and closes the breaker early.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// CircuitBreakerConfig
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the breaker stays open.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Longest cooldown the breaker will honor (one week).
pub const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

impl CircuitBreakerConfig {
    /// Cooldown as a signed duration, capped at [`MAX_COOLDOWN_SECS`].
    pub fn cooldown(&self) -> Duration {
        let secs = self.cooldown_secs.min(MAX_COOLDOWN_SECS);
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(MAX_COOLDOWN_SECS as i64))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

// ============================================================================
// CircuitBreaker
// ============================================================================

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub consecutive_failures: u32,
    pub open_until: Option<DateTime<Utc>>,
}

/// Consecutive-failure circuit breaker.
///
/// Thread-safe: share via `Arc<CircuitBreaker>`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    open_until: RwLock<Option<DateTime<Utc>>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            open_until: RwLock::new(None),
        }
    }

    /// Whether upstream calls are suspended at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.open_until.read().is_some_and(|until| now < until)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }

    /// Record a failure. Returns true if this failure opened the breaker.
    pub fn record_failure_at(&self, now: DateTime<Utc>) -> bool {
        let count = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.config.failure_threshold.max(1) {
            info!(
                consecutive_failures = count,
                threshold = self.config.failure_threshold,
                "Upstream failure recorded"
            );
            return false;
        }

        let until = now
            .checked_add_signed(self.config.cooldown())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        *self.open_until.write() = Some(until);
        error!(
            consecutive_failures = count,
            open_until = %until,
            "Circuit breaker opened"
        );
        true
    }

    /// Record a success: reset the count and close early if open.
    pub fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::SeqCst);
        let was_open = self.open_until.write().take().is_some();
        if was_open {
            info!(previous_failures = previous, "Circuit breaker closed");
        }
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Open-until timestamp, kept after expiry until the next success.
    #[must_use]
    pub fn open_until(&self) -> Option<DateTime<Utc>> {
        *self.open_until.read()
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            consecutive_failures: self.consecutive_failures(),
            open_until: self.open_until(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
        })
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, 30);
        let now = Utc::now();
        assert!(!cb.record_failure_at(now));
        assert!(!cb.record_failure_at(now));
        assert!(!cb.is_open_at(now));
        assert!(cb.record_failure_at(now));
        assert!(cb.is_open_at(now));
        assert_eq!(cb.open_until(), Some(now + Duration::seconds(30)));
    }

    #[test]
    fn test_closes_after_cooldown() {
        let cb = breaker(1, 30);
        let now = Utc::now();
        cb.record_failure_at(now);
        assert!(cb.is_open_at(now + Duration::seconds(29)));
        assert!(!cb.is_open_at(now + Duration::seconds(30)));
    }

    #[test]
    fn test_success_resets_and_closes() {
        let cb = breaker(2, 30);
        let now = Utc::now();
        cb.record_failure_at(now);
        cb.record_failure_at(now);
        assert!(cb.is_open_at(now));

        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(!cb.is_open_at(now));
        assert!(cb.open_until().is_none());
    }

    #[test]
    fn test_failure_after_reopen_window_extends() {
        let cb = breaker(1, 10);
        let now = Utc::now();
        cb.record_failure_at(now);
        let later = now + Duration::seconds(15);
        assert!(!cb.is_open_at(later));
        assert!(cb.record_failure_at(later));
        assert!(cb.is_open_at(later + Duration::seconds(5)));
    }

    #[test]
    fn test_oversized_cooldown_is_capped() {
        let cb = breaker(1, u64::MAX);
        let now = Utc::now();
        assert!(cb.record_failure_at(now));
        assert_eq!(
            cb.open_until(),
            Some(now + Duration::seconds(MAX_COOLDOWN_SECS as i64))
        );
    }
}

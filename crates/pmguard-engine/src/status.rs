//! Worker status snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// In-memory health of the monitoring worker. Rebuilt on start, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub active_rules_count: usize,
    pub triggered_rules_count: usize,
    pub open_positions_count: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Set only while the breaker is open.
    pub circuit_breaker_until: Option<DateTime<Utc>>,
    pub stream_connected: bool,
    pub stream_subscription_count: usize,
}

/// What one monitoring cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Breaker was open; no upstream calls were made.
    pub skipped: bool,
    pub refresh_failed: bool,
    pub breaker_opened: bool,
    pub owners: usize,
    pub retried: usize,
    pub evaluated: usize,
    pub triggered: usize,
}

impl CycleReport {
    pub fn result_label(&self) -> &'static str {
        if self.skipped {
            "skipped"
        } else if self.refresh_failed {
            "refresh_failed"
        } else {
            "ok"
        }
    }
}

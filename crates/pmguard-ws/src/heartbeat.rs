//! Heartbeat monitoring for the market channel.
//!
//! The market channel speaks a text-level keepalive: the client sends
//! `PING` and the server answers `PONG`. Any inbound frame counts as proof
//! of life, so a ping is only sent after a quiet interval.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

#[derive(Debug)]
struct HeartbeatState {
    last_ping: Option<DateTime<Utc>>,
    last_message: DateTime<Utc>,
    waiting_for_pong: bool,
}

pub struct HeartbeatMonitor {
    interval_ms: u64,
    timeout_ms: u64,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            state: Mutex::new(HeartbeatState {
                last_ping: None,
                last_message: Utc::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Reset on a fresh connection.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_ping = None;
        state.last_message = Utc::now();
        state.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut state = self.state.lock();
        state.last_ping = Some(Utc::now());
        state.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.waiting_for_pong = false;
        state.last_message = now;
        if let Some(ping) = state.last_ping {
            debug!(rtt_ms = (now - ping).num_milliseconds(), "Received PONG");
        }
    }

    /// Any inbound frame.
    pub fn record_message(&self) {
        self.state.lock().last_message = Utc::now();
    }

    pub fn is_timed_out_at(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        match (state.waiting_for_pong, state.last_ping) {
            (true, Some(ping)) => (now - ping).num_milliseconds() > self.timeout_ms as i64,
            _ => false,
        }
    }

    pub fn should_ping_at(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        !state.waiting_for_pong
            && (now - state.last_message).num_milliseconds() >= self.interval_ms as i64
    }

    /// Period of the check loop.
    pub fn check_period(&self) -> Duration {
        Duration::from_millis((self.interval_ms / 2).max(10))
    }
}

//! Prometheus metrics for pmguard.
//!
//! Covers the monitoring cycle, rule triggers and executions, the circuit
//! breaker and the market stream.
//!
//! # Panics
//!
//! Metric registration panics on a duplicate metric name. This surfaces on
//! first use at startup.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, register_int_gauge,
    Counter, CounterVec, Encoder, Gauge, Histogram, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Completed monitoring cycles.
pub static CYCLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmguard_cycles_total",
        "Monitoring cycles by result",
        &["result"]
    )
    .unwrap()
});

/// Monitoring cycle duration in milliseconds.
pub static CYCLE_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "pmguard_cycle_duration_ms",
        "Monitoring cycle duration in milliseconds",
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// ACTIVE rules at the end of the last cycle.
pub static ACTIVE_RULES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("pmguard_active_rules", "ACTIVE rules after the last cycle").unwrap()
});

/// Rules that fired.
pub static TRIGGERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmguard_triggers_total",
        "Rules triggered",
        &["rule_type", "path"]
    )
    .unwrap()
});

/// Trailing-stop ratchets.
pub static RATCHETS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("pmguard_ratchets_total", "Trailing-stop ratchet updates").unwrap()
});

/// Executor outcomes.
/// Labels: outcome (executed/failed/pending_approval/retry)
pub static EXECUTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmguard_executions_total",
        "Rule executions by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Circuit breaker state (1 = open).
pub static BREAKER_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("pmguard_breaker_open", "Circuit breaker state (1=open)").unwrap()
});

/// Position refresh failures counted by the breaker.
pub static REFRESH_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "pmguard_refresh_failures_total",
        "Position refresh cycles where every owner failed"
    )
    .unwrap()
});

/// Market stream connection state (1 = connected).
pub static STREAM_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "pmguard_stream_connected",
        "Market stream connection state (1=connected)"
    )
    .unwrap()
});

/// Market stream reconnects.
pub static STREAM_RECONNECTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("pmguard_stream_reconnects_total", "Market stream reconnects").unwrap()
});

/// Streamed price updates applied to the cache.
pub static STREAM_PRICE_UPDATES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "pmguard_stream_price_updates_total",
        "Streamed price updates applied"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn cycle_completed(result: &str, duration_ms: f64) {
        CYCLES_TOTAL.with_label_values(&[result]).inc();
        CYCLE_DURATION_MS.observe(duration_ms);
    }

    pub fn active_rules(count: usize) {
        ACTIVE_RULES.set(count as i64);
    }

    /// Record a trigger. `path` is `poll` or `push`.
    pub fn rule_triggered(rule_type: &str, path: &str) {
        TRIGGERS_TOTAL.with_label_values(&[rule_type, path]).inc();
    }

    pub fn trailing_ratchet() {
        RATCHETS_TOTAL.inc();
    }

    pub fn execution(outcome: &str) {
        EXECUTIONS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn breaker_open(is_open: bool) {
        BREAKER_OPEN.set(i64::from(is_open));
    }

    pub fn refresh_failed() {
        REFRESH_FAILURES_TOTAL.inc();
    }

    pub fn stream_connected(connected: bool) {
        STREAM_CONNECTED.set(if connected { 1.0 } else { 0.0 });
    }

    pub fn stream_reconnects(count: u64) {
        STREAM_RECONNECTS_TOTAL.inc_by(count as f64);
    }

    pub fn stream_price_updates(count: usize) {
        STREAM_PRICE_UPDATES_TOTAL.inc_by(count as f64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_touched_metrics() {
        Metrics::execution("executed");
        Metrics::breaker_open(true);
        let text = Metrics::render().unwrap();
        assert!(text.contains("pmguard_executions_total"));
        assert!(text.contains("pmguard_breaker_open 1"));
        Metrics::breaker_open(false);
    }
}

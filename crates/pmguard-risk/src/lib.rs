//! Upstream protection for pmguard.
//!
//! - CircuitBreaker: stops upstream calls for a cooldown after repeated
//!   consecutive failures

pub mod breaker;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, MAX_COOLDOWN_SECS};

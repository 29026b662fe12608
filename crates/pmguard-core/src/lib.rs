//! Core domain types for the pmguard trigger-rule engine.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `TradeRule`, `RuleKind`, `RuleStatus`: Trigger rules and their lifecycle
//! - `RuleEvent`, `EventType`: Audit records
//! - `MonitoredPosition`, `PositionKey`: Cached upstream holdings

pub mod decimal;
pub mod error;
pub mod event;
pub mod position;
pub mod rule;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use event::{EventType, RuleEvent};
pub use position::{MonitoredPosition, OrderSide, PositionKey};
pub use rule::{
    OwnerRef, RuleAction, RuleId, RuleKind, RulePatch, RuleSpec, RuleStatus, RuleType, TradeRule,
};

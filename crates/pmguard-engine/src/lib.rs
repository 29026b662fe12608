//! Rule evaluation, execution and monitoring for pmguard.
//!
//! - `evaluate`: pure trigger decision with trailing-stop ratchet
//! - `RuleExecutor`: TRIGGERED rule to sell, with permanent/transient classification
//! - `MonitoringWorker`: the polling loop, push path, circuit breaker and status
//! - `RuleLocks`: per-rule serialization of evaluation-and-transition

pub mod error;
pub mod evaluator;
pub mod executor;
pub mod locks;
pub mod status;
pub mod worker;

pub use error::{EngineError, EngineResult};
pub use evaluator::{evaluate, Evaluation, Ratchet};
pub use executor::{ExecutionOutcome, RuleExecutor};
pub use locks::RuleLocks;
pub use status::{CycleReport, WorkerStatus};
pub use worker::{MonitoringWorker, TriggerPath, WorkerConfig};

//! Read-only management endpoints for pmguard.
//!
//! ```text
//! GET /api/status              worker health
//! GET /api/rules?status=       rules, optionally by status
//! GET /api/rules/{id}          one rule
//! GET /api/positions           open positions and history
//! GET /api/events?rule_id=&offset=&limit=
//! GET /metrics                 Prometheus text format
//! ```
//!
//! Rule CRUD stays on the `RuleStore` library API.

mod config;
mod server;
mod types;

pub use config::DashboardConfig;
pub use server::{create_router, run_server, AppState, MAX_PAGE_SIZE};
pub use types::{EventsPage, EventsQuery, PositionsView, RulesQuery};

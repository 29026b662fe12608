//! Request and response bodies.

use pmguard_core::{MonitoredPosition, RuleEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    pub rule_id: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsPage {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub events: Vec<RuleEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionsView {
    pub open: Vec<MonitoredPosition>,
    /// Last-known rows of closed or no-longer-held positions.
    pub history: Vec<MonitoredPosition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

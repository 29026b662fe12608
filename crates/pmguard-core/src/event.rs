//! Immutable audit records of everything that happens to a rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::rule::RuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RuleCreated,
    RuleUpdated,
    RuleEvaluated,
    RuleTrailingUpdated,
    RuleTriggered,
    RuleCanceled,
    RuleFailed,
    ActionAttempt,
    ActionExecuted,
    ActionFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleCreated => "RULE_CREATED",
            Self::RuleUpdated => "RULE_UPDATED",
            Self::RuleEvaluated => "RULE_EVALUATED",
            Self::RuleTrailingUpdated => "RULE_TRAILING_UPDATED",
            Self::RuleTriggered => "RULE_TRIGGERED",
            Self::RuleCanceled => "RULE_CANCELED",
            Self::RuleFailed => "RULE_FAILED",
            Self::ActionAttempt => "ACTION_ATTEMPT",
            Self::ActionExecuted => "ACTION_EXECUTED",
            Self::ActionFailed => "ACTION_FAILED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvent {
    pub id: String,
    pub rule_id: RuleId,
    pub event_type: EventType,
    /// Structured, event-specific payload.
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RuleEvent {
    pub fn new(
        rule_id: RuleId,
        event_type: EventType,
        event_data: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id,
            event_type,
            event_data,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::RuleTrailingUpdated).unwrap();
        assert_eq!(json, "\"RULE_TRAILING_UPDATED\"");
        assert_eq!(EventType::ActionFailed.as_str(), "ACTION_FAILED");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let rule_id = RuleId::new();
        let now = Utc::now();
        let a = RuleEvent::new(rule_id.clone(), EventType::RuleCreated, json!({}), now);
        let b = RuleEvent::new(rule_id, EventType::RuleCreated, json!({}), now);
        assert_ne!(a.id, b.id);
    }
}

//! Rule executor: turns a TRIGGERED rule into a sell or a terminal failure.
//!
//! Live state is re-validated before every attempt, so a TRIGGERED rule left
//! behind by a transient failure or a crash is safe to hand back in.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pmguard_core::{EventType, RuleAction, RuleId, RuleStatus, Size, TradeRule};
use pmguard_position::{PositionLookup, PositionTracker};
use pmguard_store::{RuleStore, StoreError};
use pmguard_telemetry::Metrics;
use pmguard_upstream::{with_timeout, BetOutcome, BetRequest, DynTradingApi, UpstreamError};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::EngineResult;

/// What one execution attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Sold; the rule is EXECUTED.
    Executed { trade_ref: String, amount: Size },
    /// Permanent failure; the rule is FAILED.
    Failed { reason: String },
    /// Parked for approval; the rule is ACTIVE again.
    PendingApproval { approval_ref: Option<String> },
    /// Transient failure; the rule stays TRIGGERED for the next cycle.
    Retry { reason: String },
    /// The rule was not TRIGGERED; nothing was sent upstream.
    Skipped { status: RuleStatus },
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Executed { .. } => "executed",
            Self::Failed { .. } => "failed",
            Self::PendingApproval { .. } => "pending_approval",
            Self::Retry { .. } => "retry",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Why the sell quantity could not be resolved.
enum Unresolved {
    Permanent(String),
    Transient(String),
}

pub struct RuleExecutor {
    store: Arc<RuleStore>,
    tracker: Arc<PositionTracker>,
    api: DynTradingApi,
    request_timeout: Duration,
}

impl RuleExecutor {
    pub fn new(
        store: Arc<RuleStore>,
        tracker: Arc<PositionTracker>,
        api: DynTradingApi,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            api,
            request_timeout,
        }
    }

    pub async fn execute(&self, rule_id: &RuleId) -> EngineResult<ExecutionOutcome> {
        self.execute_at(rule_id, Utc::now()).await
    }

    /// Attempt the rule's sell action.
    ///
    /// Callers must hold the rule's lock. Anything but a TRIGGERED rule is
    /// skipped before any upstream call.
    pub async fn execute_at(
        &self,
        rule_id: &RuleId,
        now: DateTime<Utc>,
    ) -> EngineResult<ExecutionOutcome> {
        let rule = self
            .store
            .get(rule_id)
            .ok_or_else(|| StoreError::NotFound(rule_id.clone()))?;
        if rule.status != RuleStatus::Triggered {
            debug!(rule_id = %rule.id, status = %rule.status, "Execution skipped");
            return Ok(ExecutionOutcome::Skipped {
                status: rule.status,
            });
        }

        // 1. The market may have closed since the trigger.
        if let PositionLookup::Closed(position) =
            self.tracker
                .lookup_at(&rule.owner_ref, &rule.market_id, &rule.token_id, now)
        {
            let reason = if position.redeemable {
                "market resolved before execution"
            } else {
                "market closed before execution"
            };
            return self.fail(&rule, reason.to_string(), now);
        }

        // 2. Quantity.
        let amount = match self.resolve_amount(&rule).await {
            Ok(amount) => amount,
            Err(Unresolved::Permanent(reason)) => return self.fail(&rule, reason, now),
            Err(Unresolved::Transient(reason)) => return self.retry(&rule, reason, now),
        };

        // 3. Submit.
        self.store.events().record(
            &rule.id,
            EventType::ActionAttempt,
            json!({
                "market_id": rule.market_id,
                "token_id": rule.token_id,
                "side": "SELL",
                "amount": amount,
            }),
            now,
        );
        let request = BetRequest::sell(rule.market_id.clone(), rule.token_id.clone(), amount);
        let result = with_timeout(
            self.request_timeout,
            self.api.place_bet(&rule.owner_ref, request),
        )
        .await;

        // 4-5. Disposition.
        match result {
            Ok(BetOutcome::Accepted { trade_ref }) => {
                self.store.mark_executed(&rule.id, &trade_ref, amount)?;
                info!(
                    rule_id = %rule.id,
                    owner = %rule.owner_ref,
                    token_id = %rule.token_id,
                    %amount,
                    trade_ref = %trade_ref,
                    "Rule executed"
                );
                Metrics::execution("executed");
                Ok(ExecutionOutcome::Executed { trade_ref, amount })
            }
            Ok(BetOutcome::Denied { reason }) => {
                self.fail(&rule, format!("denied by policy: {reason}"), now)
            }
            Ok(BetOutcome::PendingApproval { approval_ref }) => {
                self.store.revert_to_active(
                    &rule.id,
                    json!({ "approval_ref": approval_ref, "amount": amount }),
                )?;
                info!(
                    rule_id = %rule.id,
                    approval_ref = ?approval_ref,
                    "Sell pending approval, rule re-armed"
                );
                Metrics::execution("pending_approval");
                Ok(ExecutionOutcome::PendingApproval { approval_ref })
            }
            Err(e) => self.classify(&rule, &e, now),
        }
    }

    async fn resolve_amount(&self, rule: &TradeRule) -> Result<Size, Unresolved> {
        match rule.action {
            RuleAction::SellPartial { amount } => Ok(amount),
            RuleAction::SellAll => {
                let live = self
                    .tracker
                    .fetch_live(&rule.owner_ref, &rule.market_id, &rule.token_id)
                    .await;
                match live {
                    Ok(PositionLookup::Open(position)) if position.quantity.is_positive() => {
                        Ok(position.quantity)
                    }
                    Ok(PositionLookup::Open(_)) => {
                        Err(Unresolved::Permanent("no shares left to sell".to_string()))
                    }
                    Ok(PositionLookup::Closed(_)) => Err(Unresolved::Permanent(
                        "market closed or resolved before execution".to_string(),
                    )),
                    Ok(PositionLookup::Gone(_) | PositionLookup::Unknown) => {
                        Err(Unresolved::Permanent("position not found".to_string()))
                    }
                    Err(e) if e.upstream().is_permanent() => {
                        Err(Unresolved::Permanent(e.to_string()))
                    }
                    Err(e) => Err(Unresolved::Transient(e.to_string())),
                }
            }
        }
    }

    fn classify(
        &self,
        rule: &TradeRule,
        err: &UpstreamError,
        now: DateTime<Utc>,
    ) -> EngineResult<ExecutionOutcome> {
        if err.is_permanent() {
            self.fail(rule, err.to_string(), now)
        } else {
            self.retry(rule, err.to_string(), now)
        }
    }

    fn fail(
        &self,
        rule: &TradeRule,
        reason: String,
        now: DateTime<Utc>,
    ) -> EngineResult<ExecutionOutcome> {
        self.store.events().record(
            &rule.id,
            EventType::ActionFailed,
            json!({ "reason": reason, "is_permanent": true }),
            now,
        );
        self.store.mark_failed(&rule.id, &reason)?;
        error!(
            rule_id = %rule.id,
            owner = %rule.owner_ref,
            token_id = %rule.token_id,
            reason = %reason,
            "Rule execution failed permanently"
        );
        Metrics::execution("failed");
        Ok(ExecutionOutcome::Failed { reason })
    }

    fn retry(
        &self,
        rule: &TradeRule,
        reason: String,
        now: DateTime<Utc>,
    ) -> EngineResult<ExecutionOutcome> {
        self.store.events().record(
            &rule.id,
            EventType::ActionFailed,
            json!({ "reason": reason, "is_permanent": false }),
            now,
        );
        warn!(
            rule_id = %rule.id,
            owner = %rule.owner_ref,
            reason = %reason,
            "Rule execution failed transiently, will retry"
        );
        Metrics::execution("retry");
        Ok(ExecutionOutcome::Retry { reason })
    }
}

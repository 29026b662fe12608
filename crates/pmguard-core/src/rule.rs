//! Trigger rules: the standing instructions the engine acts on.
//!
//! A rule is created ACTIVE, mutated only by the engine or by explicit user
//! cancellation/update, and never deleted. Terminal rules stay for audit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};

/// Unique rule identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Generate a new random rule id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id (e.g. from the management surface).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to the account a rule acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerRef(String);

impl OwnerRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant of [`RuleKind`], used for filtering, metrics and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "STOP_LOSS",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TrailingStop => "TRAILING_STOP",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STOP_LOSS" => Ok(Self::StopLoss),
            "TAKE_PROFIT" => Ok(Self::TakeProfit),
            "TRAILING_STOP" => Ok(Self::TrailingStop),
            other => Err(CoreError::Validation(format!("unknown rule type: {other}"))),
        }
    }
}

/// Rule kind with its type-specific state.
///
/// Closed set: the evaluator matches exhaustively on exactly these three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    /// Sell when price falls to or below the trigger.
    StopLoss,
    /// Sell when price rises to or above the trigger.
    TakeProfit,
    /// Stop-loss whose trigger ratchets up with the best observed price.
    TrailingStop {
        /// Percent below the high-water mark, in (0, 100).
        trailing_percent: Decimal,
        /// Best price observed since creation or last ratchet.
        high_water_mark: Price,
    },
}

impl RuleKind {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::StopLoss => RuleType::StopLoss,
            Self::TakeProfit => RuleType::TakeProfit,
            Self::TrailingStop { .. } => RuleType::TrailingStop,
        }
    }
}

/// What to sell once the rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    /// Sell the entire live holding at execution time.
    SellAll,
    /// Sell a fixed number of shares.
    SellPartial { amount: Size },
}

/// Rule lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Active,
    Triggered,
    Executed,
    Failed,
    Canceled,
}

impl RuleStatus {
    /// EXECUTED, FAILED and CANCELED never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Canceled)
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(&self, next: RuleStatus) -> bool {
        use RuleStatus::*;
        matches!(
            (self, next),
            (Active, Triggered)
                | (Active, Canceled)
                | (Active, Failed)
                | (Triggered, Executed)
                | (Triggered, Failed)
                | (Triggered, Active)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Triggered => "TRIGGERED",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "TRIGGERED" => Ok(Self::Triggered),
            "EXECUTED" => Ok(Self::Executed),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(CoreError::Validation(format!("unknown rule status: {other}"))),
        }
    }
}

/// A standing instruction to sell a position when a condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRule {
    pub id: RuleId,
    pub owner_ref: OwnerRef,
    pub market_id: String,
    /// The specific outcome token.
    pub token_id: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    pub trigger_price: Price,
    pub action: RuleAction,
    pub status: RuleStatus,
    /// Upstream order/transaction reference once executed.
    #[serde(default)]
    pub trade_ref: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeRule {
    pub fn rule_type(&self) -> RuleType {
        self.kind.rule_type()
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    pub fn trailing_percent(&self) -> Option<Decimal> {
        match self.kind {
            RuleKind::TrailingStop {
                trailing_percent, ..
            } => Some(trailing_percent),
            _ => None,
        }
    }

    pub fn high_water_mark(&self) -> Option<Price> {
        match self.kind {
            RuleKind::TrailingStop {
                high_water_mark, ..
            } => Some(high_water_mark),
            _ => None,
        }
    }
}

/// Client request to create a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub owner_ref: OwnerRef,
    pub market_id: String,
    pub token_id: String,
    /// Rule type as submitted; parsed and validated on create.
    pub rule_type: String,
    /// Required for STOP_LOSS and TAKE_PROFIT. Derived for TRAILING_STOP.
    #[serde(default)]
    pub trigger_price: Option<Price>,
    /// Required iff TRAILING_STOP.
    #[serde(default)]
    pub trailing_percent: Option<Decimal>,
    /// Initial high-water mark for TRAILING_STOP (entry or current price).
    #[serde(default)]
    pub reference_price: Option<Price>,
    pub action: RuleAction,
}

impl RuleSpec {
    /// Validate and materialize an ACTIVE rule.
    pub fn into_rule(self, now: DateTime<Utc>) -> Result<TradeRule> {
        if self.market_id.trim().is_empty() {
            return Err(CoreError::Validation("market_id must not be empty".into()));
        }
        if self.token_id.trim().is_empty() {
            return Err(CoreError::Validation("token_id must not be empty".into()));
        }
        if self.owner_ref.as_str().trim().is_empty() {
            return Err(CoreError::Validation("owner_ref must not be empty".into()));
        }
        if let RuleAction::SellPartial { amount } = self.action {
            if !amount.is_positive() {
                return Err(CoreError::Validation(format!(
                    "SELL_PARTIAL amount must be > 0, got {amount}"
                )));
            }
        }

        let rule_type: RuleType = self.rule_type.parse()?;
        let (kind, trigger_price) = match rule_type {
            RuleType::StopLoss | RuleType::TakeProfit => {
                if self.trailing_percent.is_some() {
                    return Err(CoreError::Validation(format!(
                        "trailing_percent is only valid for TRAILING_STOP, not {rule_type}"
                    )));
                }
                let trigger = self.trigger_price.ok_or_else(|| {
                    CoreError::Validation(format!("{rule_type} requires trigger_price"))
                })?;
                validate_trigger_price(trigger)?;
                let kind = if rule_type == RuleType::StopLoss {
                    RuleKind::StopLoss
                } else {
                    RuleKind::TakeProfit
                };
                (kind, trigger)
            }
            RuleType::TrailingStop => {
                let pct = self.trailing_percent.ok_or_else(|| {
                    CoreError::Validation("TRAILING_STOP requires trailing_percent".into())
                })?;
                validate_trailing_percent(pct)?;
                let reference = self.reference_price.ok_or_else(|| {
                    CoreError::Validation("TRAILING_STOP requires reference_price".into())
                })?;
                if !reference.is_quotable() {
                    return Err(CoreError::InvalidPrice(format!(
                        "reference_price must be in (0, 1], got {reference}"
                    )));
                }
                let trigger = reference.less_percent(pct);
                (
                    RuleKind::TrailingStop {
                        trailing_percent: pct,
                        high_water_mark: reference,
                    },
                    trigger,
                )
            }
        };

        Ok(TradeRule {
            id: RuleId::new(),
            owner_ref: self.owner_ref,
            market_id: self.market_id,
            token_id: self.token_id,
            kind,
            trigger_price,
            action: self.action,
            status: RuleStatus::Active,
            trade_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Client request to update an ACTIVE rule.
///
/// `rule_type`, `market_id` and `token_id` are immutable; they are carried
/// here only so a request trying to change them can be rejected explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default)]
    pub trigger_price: Option<Price>,
    #[serde(default)]
    pub trailing_percent: Option<Decimal>,
    #[serde(default)]
    pub rule_type: Option<String>,
    #[serde(default)]
    pub market_id: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
}

impl RulePatch {
    /// Apply the patch to an ACTIVE rule, returning the updated copy.
    pub fn apply(&self, rule: &TradeRule, now: DateTime<Utc>) -> Result<TradeRule> {
        if let Some(rt) = &self.rule_type {
            let requested: RuleType = rt.parse()?;
            if requested != rule.rule_type() {
                return Err(CoreError::Validation("rule_type cannot be changed".into()));
            }
        }
        if self.market_id.as_ref().is_some_and(|m| *m != rule.market_id) {
            return Err(CoreError::Validation("market_id cannot be changed".into()));
        }
        if self.token_id.as_ref().is_some_and(|t| *t != rule.token_id) {
            return Err(CoreError::Validation("token_id cannot be changed".into()));
        }

        let mut updated = rule.clone();
        match &mut updated.kind {
            RuleKind::StopLoss | RuleKind::TakeProfit => {
                if self.trailing_percent.is_some() {
                    return Err(CoreError::Validation(
                        "trailing_percent is only valid for TRAILING_STOP".into(),
                    ));
                }
                if let Some(trigger) = self.trigger_price {
                    validate_trigger_price(trigger)?;
                    updated.trigger_price = trigger;
                }
            }
            RuleKind::TrailingStop {
                trailing_percent,
                high_water_mark,
            } => {
                if self.trigger_price.is_some() {
                    return Err(CoreError::Validation(
                        "TRAILING_STOP trigger_price is derived from the high-water mark".into(),
                    ));
                }
                if let Some(pct) = self.trailing_percent {
                    validate_trailing_percent(pct)?;
                    *trailing_percent = pct;
                    updated.trigger_price = high_water_mark.less_percent(pct);
                }
            }
        }
        updated.updated_at = now;
        Ok(updated)
    }
}

fn validate_trigger_price(price: Price) -> Result<()> {
    if price.is_probability() {
        Ok(())
    } else {
        Err(CoreError::InvalidPrice(format!(
            "trigger_price must be in [0, 1], got {price}"
        )))
    }
}

fn validate_trailing_percent(pct: Decimal) -> Result<()> {
    if pct > Decimal::ZERO && pct < Decimal::ONE_HUNDRED {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "trailing_percent must be in (0, 100), got {pct}"
        )))
    }
}

//! Cached view of held outcome-token positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::{Price, Size};
use crate::rule::OwnerRef;

/// Order side. Rules always protect the long (BUY) side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Upsert key for a monitored position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub owner_ref: OwnerRef,
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
}

impl PositionKey {
    /// Key of the long position a sell rule protects.
    pub fn long(owner_ref: OwnerRef, market_id: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            owner_ref,
            market_id: market_id.into(),
            token_id: token_id.into(),
            side: OrderSide::Buy,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.owner_ref, self.market_id, self.token_id, self.side
        )
    }
}

/// A held position as last seen upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredPosition {
    pub key: PositionKey,
    pub quantity: Size,
    pub avg_entry_price: Price,
    pub current_price: Price,
    #[serde(default)]
    pub market_title: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub redeemable: bool,
    pub last_updated_at: DateTime<Utc>,
}

impl MonitoredPosition {
    /// Market closed: redeemable or past its end date.
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        self.redeemable || self.end_date.is_some_and(|end| end <= now)
    }

    /// Eligible for trigger evaluation.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_closed_at(now) && self.quantity.is_positive()
    }
}

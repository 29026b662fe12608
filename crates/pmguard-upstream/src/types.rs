//! Canonical upstream shapes.
//!
//! Every upstream response is normalized into one of these on receipt
//! (see [`crate::normalize`]); nothing downstream sees raw envelopes.

use chrono::{DateTime, Utc};
use pmguard_core::{OrderSide, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One held outcome token as reported by the upstream holdings endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub market_id: String,
    pub token_id: String,
    pub quantity: Size,
    pub avg_entry_price: Price,
    pub current_price: Price,
    pub market_title: Option<String>,
    pub outcome: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub redeemable: bool,
}

/// Price level in an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Size,
}

/// Order book snapshot for one token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Highest bid, ignoring non-positive levels.
    pub fn best_bid(&self) -> Option<Price> {
        self.bids
            .iter()
            .filter(|l| l.price.is_positive() && l.size.is_positive())
            .map(|l| l.price)
            .max()
    }

    /// Lowest ask, ignoring non-positive levels.
    pub fn best_ask(&self) -> Option<Price> {
        self.asks
            .iter()
            .filter(|l| l.price.is_positive() && l.size.is_positive())
            .map(|l| l.price)
            .min()
    }
}

/// Market order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRequest {
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub amount: Size,
}

impl BetRequest {
    pub fn sell(market_id: impl Into<String>, token_id: impl Into<String>, amount: Size) -> Self {
        Self {
            market_id: market_id.into(),
            token_id: token_id.into(),
            side: OrderSide::Sell,
            amount,
        }
    }
}

/// How the upstream disposed of a bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BetOutcome {
    /// Order placed; `trade_ref` identifies the order or transaction.
    Accepted { trade_ref: String },
    /// Refused by the account's spending/authorization policy.
    Denied { reason: String },
    /// Held for human approval out-of-band.
    PendingApproval { approval_ref: Option<String> },
}

/// Account balance (informational).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Decimal,
    pub currency: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> BookLevel {
        BookLevel {
            price: Price::new(price),
            size: Size::new(size),
        }
    }

    #[test]
    fn test_best_levels_ignore_ordering() {
        let book = OrderBook {
            token_id: "t".to_string(),
            bids: vec![level(dec!(0.40), dec!(10)), level(dec!(0.42), dec!(5))],
            asks: vec![level(dec!(0.47), dec!(10)), level(dec!(0.45), dec!(1))],
        };
        assert_eq!(book.best_bid(), Some(Price::new(dec!(0.42))));
        assert_eq!(book.best_ask(), Some(Price::new(dec!(0.45))));
    }

    #[test]
    fn test_best_levels_skip_empty() {
        let book = OrderBook {
            token_id: "t".to_string(),
            bids: vec![level(dec!(0.40), dec!(0))],
            asks: vec![],
        };
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
    }
}

//! Market-channel message parser.
//!
//! Turns stream messages into per-token midpoint updates. Handles full book
//! snapshots, price-change batches and best-bid/ask ticks; anything else
//! (trades, acks, unknown events) yields nothing. Frames may arrive as a
//! single object or an array of them.

use pmguard_core::Price;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tracing::trace;

use crate::midpoint::midpoint;

/// A fresh streamed price for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub token_id: String,
    pub price: Price,
}

pub fn parse_market_message(value: &Value) -> Vec<PriceUpdate> {
    let mut updates = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                parse_event(item, &mut updates);
            }
        }
        other => parse_event(other, &mut updates),
    }
    updates
}

fn parse_event(value: &Value, out: &mut Vec<PriceUpdate>) {
    let event_type = value.get("event_type").and_then(Value::as_str);
    match event_type {
        Some("book") => {
            let Some(token) = asset_id(value) else { return };
            let bids = value.get("bids").or_else(|| value.get("buys"));
            let asks = value.get("asks").or_else(|| value.get("sells"));
            let best_bid = bids.and_then(|l| best_level(l, true));
            let best_ask = asks.and_then(|l| best_level(l, false));
            push(out, token, best_bid, best_ask);
        }
        Some("price_change") => {
            if let Some(changes) = value.get("price_changes").and_then(Value::as_array) {
                for change in changes {
                    if let Some(token) = asset_id(change) {
                        push(
                            out,
                            token,
                            price_field(change, "best_bid"),
                            price_field(change, "best_ask"),
                        );
                    }
                }
            } else if let Some(token) = asset_id(value) {
                push(
                    out,
                    token,
                    price_field(value, "best_bid"),
                    price_field(value, "best_ask"),
                );
            }
        }
        Some("best_bid_ask") => {
            if let Some(token) = asset_id(value) {
                push(
                    out,
                    token,
                    price_field(value, "best_bid"),
                    price_field(value, "best_ask"),
                );
            }
        }
        other => trace!(event_type = ?other, "Ignoring market message"),
    }
}

fn push(out: &mut Vec<PriceUpdate>, token: &str, bid: Option<Price>, ask: Option<Price>) {
    if let Some(price) = midpoint(bid, ask) {
        out.push(PriceUpdate {
            token_id: token.to_string(),
            price,
        });
    }
}

fn asset_id(value: &Value) -> Option<&str> {
    value
        .get("asset_id")
        .or_else(|| value.get("token_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn price_field(value: &Value, key: &str) -> Option<Price> {
    value.get(key).and_then(decimal).map(Price::new)
}

/// Best level of a side; levels are not assumed sorted.
fn best_level(levels: &Value, highest: bool) -> Option<Price> {
    let prices = levels
        .as_array()?
        .iter()
        .filter_map(|l| l.get("price").and_then(decimal))
        .filter(|p| *p > Decimal::ZERO);
    let best = if highest { prices.max() } else { prices.min() };
    best.map(Price::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_book_snapshot_unsorted_levels() {
        let msg = json!({
            "event_type": "book",
            "asset_id": "tok",
            "bids": [{"price": "0.38", "size": "10"}, {"price": "0.40", "size": "5"}],
            "asks": [{"price": "0.46", "size": "10"}, {"price": "0.44", "size": "1"}]
        });
        assert_eq!(
            parse_market_message(&msg),
            vec![PriceUpdate {
                token_id: "tok".to_string(),
                price: Price::new(dec!(0.42)),
            }]
        );
    }

    #[test]
    fn test_price_change_batch() {
        let msg = json!({
            "event_type": "price_change",
            "market": "0xmarket",
            "price_changes": [
                {"asset_id": "a", "best_bid": "0.60", "best_ask": "0.62"},
                {"asset_id": "b", "best_bid": "0.38", "best_ask": "0"}
            ]
        });
        let updates = parse_market_message(&msg);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].price, Price::new(dec!(0.61)));
        assert_eq!(updates[1].price, Price::new(dec!(0.38)));
    }

    #[test]
    fn test_best_bid_ask_in_array() {
        let msg = json!([
            {"event_type": "best_bid_ask", "asset_id": "a", "best_bid": 0.5, "best_ask": 0.52},
            {"event_type": "last_trade_price", "asset_id": "a", "price": "0.51"}
        ]);
        let updates = parse_market_message(&msg);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].price, Price::new(dec!(0.51)));
    }

    #[test]
    fn test_empty_book_yields_nothing() {
        let msg = json!({"event_type": "book", "asset_id": "tok", "bids": [], "asks": []});
        assert!(parse_market_message(&msg).is_empty());
    }
}

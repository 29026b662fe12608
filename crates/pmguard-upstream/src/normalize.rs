//! Response envelope normalization.
//!
//! The upstream is inconsistent about envelopes: lists arrive bare or wrapped
//! in `data`/`result`/`positions`, field names come in camelCase or
//! snake_case, numbers come as strings or JSON numbers, and failures may be
//! reported inside a 2xx body. This module is the only place that knows.

use chrono::{DateTime, Utc};
use pmguard_core::{OwnerRef, Price, Size};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{UpstreamError, UpstreamResult};
use crate::types::{Balance, BetOutcome, BookLevel, Holding, OrderBook};

/// Wrapper keys that may enclose the actual payload.
const ENVELOPE_KEYS: &[&str] = &["data", "result", "payload", "positions", "holdings"];

/// Strip wrappers and surface in-body failures.
pub fn unwrap_envelope(value: Value) -> UpstreamResult<Value> {
    let mut current = value;
    // Nested wrappers are bounded in practice; cap the depth anyway.
    for _ in 0..3 {
        let Value::Object(mut map) = current else {
            return Ok(current);
        };
        if let Some(message) = error_message(&map) {
            return Err(UpstreamError::Rejected(message));
        }
        let Some(key) = ENVELOPE_KEYS.iter().find(|k| map.contains_key(**k)) else {
            return Ok(Value::Object(map));
        };
        current = map.remove(*key).unwrap_or(Value::Null);
    }
    Ok(current)
}

fn error_message(map: &serde_json::Map<String, Value>) -> Option<String> {
    let failed = map.get("success").and_then(Value::as_bool) == Some(false)
        || map.get("ok").and_then(Value::as_bool) == Some(false);
    let error = map
        .get("error")
        .filter(|v| !v.is_null())
        .map(value_to_message);
    match (failed, error) {
        (_, Some(msg)) => Some(msg),
        (true, None) => Some(
            map.get("message")
                .map(value_to_message)
                .unwrap_or_else(|| "request failed".to_string()),
        ),
        (false, None) => None,
    }
}

fn value_to_message(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Object(m) => m
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| v.to_string()),
        other => other.to_string(),
    }
}

/// Extract a human-readable message from an error body, if it has one.
pub fn error_body_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => error_message(&map)
            .or_else(|| map.get("message").map(value_to_message))
            .unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RawHolding {
    #[serde(alias = "marketId", alias = "conditionId", alias = "condition_id")]
    market_id: String,
    #[serde(alias = "tokenId", alias = "asset", alias = "asset_id")]
    token_id: String,
    #[serde(alias = "size", alias = "shares")]
    quantity: Decimal,
    #[serde(default, alias = "avgPrice", alias = "avg_price", alias = "avgEntryPrice")]
    avg_entry_price: Option<Decimal>,
    #[serde(default, alias = "curPrice", alias = "cur_price", alias = "currentPrice")]
    current_price: Option<Decimal>,
    #[serde(default, alias = "title", alias = "marketTitle")]
    market_title: Option<String>,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default, alias = "endDate")]
    end_date: Option<String>,
    #[serde(default)]
    redeemable: bool,
}

impl RawHolding {
    fn into_holding(self) -> Holding {
        Holding {
            market_id: self.market_id,
            token_id: self.token_id,
            quantity: Size::new(self.quantity),
            avg_entry_price: Price::new(self.avg_entry_price.unwrap_or_default()),
            current_price: Price::new(self.current_price.unwrap_or_default()),
            market_title: self.market_title,
            outcome: self.outcome,
            end_date: self.end_date.as_deref().and_then(parse_end_date),
            redeemable: self.redeemable,
        }
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (end of day UTC).
fn parse_end_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
}

/// Normalize a holdings response body.
pub fn holdings(owner: &OwnerRef, value: Value) -> UpstreamResult<Vec<Holding>> {
    let payload = unwrap_envelope(value)?;
    let items = match payload {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single @ Value::Object(_) => vec![single],
        other => {
            return Err(UpstreamError::Decode(format!(
                "holdings payload is not a list: {other}"
            )))
        }
    };
    let rows = items
        .into_iter()
        .filter_map(|item| {
            let token = first_token(&item);
            match serde_json::from_value::<RawHolding>(item) {
                Ok(raw) => Some(raw.into_holding()),
                Err(e) => {
                    warn!(
                        owner = %owner,
                        token_id = token.as_deref().unwrap_or("-"),
                        error = %e,
                        "Skipping malformed holding row"
                    );
                    None
                }
            }
        })
        .collect();
    Ok(rows)
}

/// Token id of a raw row, for logging rows that fail to decode.
fn first_token(item: &Value) -> Option<String> {
    match item {
        Value::Object(map) => first_string(map, &["tokenId", "token_id", "asset", "asset_id"]),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    #[serde(alias = "p")]
    price: Decimal,
    #[serde(alias = "s", alias = "amount")]
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default, alias = "buys")]
    bids: Vec<RawLevel>,
    #[serde(default, alias = "sells")]
    asks: Vec<RawLevel>,
}

/// Normalize an order book response body.
pub fn order_book(token_id: &str, value: Value) -> UpstreamResult<OrderBook> {
    let payload = unwrap_envelope(value)?;
    let raw: RawBook = serde_json::from_value(payload)?;
    let convert = |levels: Vec<RawLevel>| {
        levels
            .into_iter()
            .map(|l| BookLevel {
                price: Price::new(l.price),
                size: Size::new(l.size),
            })
            .collect()
    };
    Ok(OrderBook {
        token_id: token_id.to_string(),
        bids: convert(raw.bids),
        asks: convert(raw.asks),
    })
}

/// Normalize a bet submission response body.
///
/// Only 2xx bodies reach this function; non-2xx responses are errors.
pub fn bet_outcome(value: Value) -> UpstreamResult<BetOutcome> {
    let payload = match unwrap_envelope(value) {
        Ok(v) => v,
        // A rejection naming the policy is a denial, not a failure.
        Err(UpstreamError::Rejected(msg)) if is_policy_denial(&msg) => {
            return Ok(BetOutcome::Denied { reason: msg });
        }
        Err(e) => return Err(e),
    };
    let map = match payload {
        Value::Object(map) => map,
        Value::String(trade_ref) if !trade_ref.is_empty() => {
            return Ok(BetOutcome::Accepted { trade_ref });
        }
        other => {
            warn!(body = %other, "Bet accepted with a non-object body");
            return Ok(BetOutcome::Accepted {
                trade_ref: String::new(),
            });
        }
    };
    let map = &map;

    let status = map
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let requires_approval = ["requiresApproval", "requires_approval", "pendingApproval"]
        .iter()
        .any(|k| map.get(*k).and_then(Value::as_bool) == Some(true));

    if requires_approval || status.starts_with("pending") || status == "awaiting_approval" {
        let approval_ref = first_string(map, &["approvalId", "approval_id", "requestId", "id"]);
        return Ok(BetOutcome::PendingApproval { approval_ref });
    }

    if matches!(status.as_str(), "denied" | "rejected" | "blocked") {
        let reason = first_string(map, &["reason", "message", "error"])
            .unwrap_or_else(|| format!("bet {status} by policy"));
        return Ok(BetOutcome::Denied { reason });
    }

    let trade_ref = first_string(
        map,
        &[
            "tradeRef",
            "trade_ref",
            "orderId",
            "order_id",
            "orderID",
            "transactionHash",
            "txHash",
            "tx_hash",
            "id",
        ],
    );
    // A 2xx body without a failure marker means the sell went through, so it
    // must not be resent even when no reference came back.
    let trade_ref = trade_ref.unwrap_or_else(|| {
        warn!(status = %status, "Bet accepted without a trade reference");
        String::new()
    });
    Ok(BetOutcome::Accepted { trade_ref })
}

fn is_policy_denial(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("policy") || lower.contains("denied")
}

fn first_string(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    #[serde(alias = "balance", alias = "availableBalance", alias = "usdc")]
    available: Decimal,
    #[serde(default)]
    currency: Option<String>,
}

/// Normalize a balance response body.
pub fn balance(value: Value) -> UpstreamResult<Balance> {
    let raw: RawBalance = serde_json::from_value(unwrap_envelope(value)?)?;
    Ok(Balance {
        available: raw.available,
        currency: raw.currency,
    })
}

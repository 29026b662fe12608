//! Pure trigger evaluation.
//!
//! `evaluate` decides, for one rule and one observed price, whether a
//! trailing stop ratchets and whether the rule fires. It performs no I/O;
//! the worker persists the ratchet, records events and transitions status.

use pmguard_core::{Price, RuleKind, TradeRule};
use rust_decimal::Decimal;

/// A favorable trailing-stop move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratchet {
    pub high_water_mark: Price,
    pub trigger_price: Price,
}

/// Result of evaluating one rule at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub price: Price,
    /// Trigger price the decision was made against (post-ratchet).
    pub trigger_price: Price,
    pub ratchet: Option<Ratchet>,
    pub triggered: bool,
}

/// Evaluate `rule` at `price`.
///
/// For trailing stops the ratchet runs first: a new high-water mark lifts the
/// trigger to `hwm * (1 - pct/100)`, never lower than the current trigger.
/// Stops fire at `price <= trigger`, take-profits at `price >= trigger`.
pub fn evaluate(rule: &TradeRule, price: Price) -> Evaluation {
    let (trigger_price, ratchet) = match rule.kind {
        RuleKind::TrailingStop {
            trailing_percent,
            high_water_mark,
        } => match ratchet(rule.trigger_price, high_water_mark, trailing_percent, price) {
            Some(r) => (r.trigger_price, Some(r)),
            None => (rule.trigger_price, None),
        },
        RuleKind::StopLoss | RuleKind::TakeProfit => (rule.trigger_price, None),
    };

    let triggered = match rule.kind {
        RuleKind::StopLoss | RuleKind::TrailingStop { .. } => price <= trigger_price,
        RuleKind::TakeProfit => price >= trigger_price,
    };

    Evaluation {
        price,
        trigger_price,
        ratchet,
        triggered,
    }
}

fn ratchet(
    current_trigger: Price,
    high_water_mark: Price,
    trailing_percent: Decimal,
    price: Price,
) -> Option<Ratchet> {
    if price <= high_water_mark {
        return None;
    }
    let trigger_price = price.less_percent(trailing_percent).max(current_trigger);
    Some(Ratchet {
        high_water_mark: price,
        trigger_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pmguard_core::{OwnerRef, RuleAction, RuleId, RuleStatus};
    use rust_decimal_macros::dec;

    fn rule(kind: RuleKind, trigger: Decimal) -> TradeRule {
        let now = Utc::now();
        TradeRule {
            id: RuleId::new(),
            owner_ref: OwnerRef::new("alice"),
            market_id: "mkt".to_string(),
            token_id: "tok".to_string(),
            kind,
            trigger_price: Price::new(trigger),
            action: RuleAction::SellAll,
            status: RuleStatus::Active,
            trade_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn trailing(pct: Decimal, hwm: Decimal) -> TradeRule {
        rule(
            RuleKind::TrailingStop {
                trailing_percent: pct,
                high_water_mark: Price::new(hwm),
            },
            Price::new(hwm).less_percent(pct).inner(),
        )
    }

    fn p(v: Decimal) -> Price {
        Price::new(v)
    }

    #[test]
    fn test_stop_loss_fires_at_or_below() {
        let r = rule(RuleKind::StopLoss, dec!(0.30));
        assert!(!evaluate(&r, p(dec!(0.31))).triggered);
        assert!(evaluate(&r, p(dec!(0.30))).triggered);
        assert!(evaluate(&r, p(dec!(0.25))).triggered);
    }

    #[test]
    fn test_take_profit_fires_at_or_above() {
        let r = rule(RuleKind::TakeProfit, dec!(0.70));
        assert!(!evaluate(&r, p(dec!(0.65))).triggered);
        assert!(evaluate(&r, p(dec!(0.70))).triggered);
        assert!(evaluate(&r, p(dec!(0.72))).triggered);
    }

    #[test]
    fn test_trailing_ratchets_then_fires() {
        let r = trailing(dec!(10), dec!(0.50));
        assert_eq!(r.trigger_price, p(dec!(0.45)));

        let up = evaluate(&r, p(dec!(0.60)));
        assert!(!up.triggered);
        assert_eq!(
            up.ratchet,
            Some(Ratchet {
                high_water_mark: p(dec!(0.60)),
                trigger_price: p(dec!(0.54)),
            })
        );

        let r = trailing(dec!(10), dec!(0.60));
        assert!(!evaluate(&r, p(dec!(0.55))).triggered);
        assert!(evaluate(&r, p(dec!(0.54))).triggered);
    }

    #[test]
    fn test_trailing_never_moves_down() {
        let r = trailing(dec!(10), dec!(0.60));
        let eval = evaluate(&r, p(dec!(0.58)));
        assert_eq!(eval.ratchet, None);
        assert_eq!(eval.trigger_price, p(dec!(0.54)));
    }

    #[test]
    fn test_trailing_ratchet_monotone_over_sequence() {
        let mut r = trailing(dec!(5), dec!(0.40));
        let prices = [
            dec!(0.42),
            dec!(0.41),
            dec!(0.50),
            dec!(0.49),
            dec!(0.50),
            dec!(0.61),
            dec!(0.60),
        ];
        for price in prices {
            let before_hwm = r.high_water_mark();
            let before_trigger = r.trigger_price;
            let eval = evaluate(&r, p(price));
            if let Some(ratchet) = eval.ratchet {
                r.kind = RuleKind::TrailingStop {
                    trailing_percent: dec!(5),
                    high_water_mark: ratchet.high_water_mark,
                };
                r.trigger_price = ratchet.trigger_price;
            }
            assert!(r.high_water_mark() >= before_hwm);
            assert!(r.trigger_price >= before_trigger);
        }
        assert_eq!(r.high_water_mark(), Some(p(dec!(0.61))));
    }

    #[test]
    fn test_ratchet_and_fire_same_price_is_impossible() {
        // A ratchet price sits above its own derived trigger.
        let r = trailing(dec!(10), dec!(0.50));
        let eval = evaluate(&r, p(dec!(0.70)));
        assert!(eval.ratchet.is_some());
        assert!(!eval.triggered);
    }
}

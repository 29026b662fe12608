//! Precision-safe decimal types for outcome-token trading.
//!
//! Outcome tokens are priced as implied probabilities in `[0, 1]`, so
//! float rounding would directly move trigger thresholds. Everything
//! goes through `rust_decimal` instead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Outcome-token price with exact decimal precision.
///
/// Wraps `Decimal` to prevent mixing prices with share quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// True when the price is a valid probability in `[0, 1]`.
    #[inline]
    pub fn is_probability(&self) -> bool {
        self.0 >= Decimal::ZERO && self.0 <= Decimal::ONE
    }

    /// True when the price is a usable market quote in `(0, 1]`.
    ///
    /// Zero means "no quote" upstream and is never a tradable price.
    #[inline]
    pub fn is_quotable(&self) -> bool {
        self.is_positive() && self.0 <= Decimal::ONE
    }

    /// Midpoint of two prices.
    #[inline]
    pub fn midpoint(&self, other: Price) -> Self {
        Self((self.0 + other.0) / Decimal::TWO)
    }

    /// Price reduced by `percent` (e.g. 10 -> 90% of self).
    #[inline]
    pub fn less_percent(&self, percent: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE - percent / Decimal::ONE_HUNDRED))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Share quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Notional value: shares * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_probability_bounds() {
        assert!(Price::new(dec!(0)).is_probability());
        assert!(Price::new(dec!(1)).is_probability());
        assert!(!Price::new(dec!(1.01)).is_probability());
        assert!(!Price::new(dec!(-0.01)).is_probability());
    }

    #[test]
    fn test_price_quotable_excludes_zero() {
        assert!(!Price::ZERO.is_quotable());
        assert!(Price::new(dec!(0.01)).is_quotable());
        assert!(Price::ONE.is_quotable());
        assert!(!Price::new(dec!(1.5)).is_quotable());
    }

    #[test]
    fn test_price_midpoint() {
        let bid = Price::new(dec!(0.40));
        let ask = Price::new(dec!(0.44));
        assert_eq!(bid.midpoint(ask), Price::new(dec!(0.42)));
    }

    #[test]
    fn test_price_less_percent() {
        let hwm = Price::new(dec!(0.60));
        assert_eq!(hwm.less_percent(dec!(10)), Price::new(dec!(0.54)));
    }

    #[test]
    fn test_notional_calculation() {
        let size = Size::new(dec!(150));
        let price = Price::new(dec!(0.5));
        assert_eq!(size.notional(price), dec!(75));
    }
}

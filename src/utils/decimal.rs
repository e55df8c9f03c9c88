//! Decimal arithmetic utilities for cash accounting.
//!
//! Prices and weights are `f64` in the allocation core; cash, commissions and
//! realised P&L are `Decimal`. These helpers sit at that boundary.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Convert an `f64` amount to `Decimal`, mapping non-finite values to zero.
pub fn dec_from_f64(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Convert a `Decimal` amount to `f64`.
pub fn dec_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Round a monetary amount to cents.
pub fn round_to_cents(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conversions() {
        assert_eq!(dec_from_f64(105.25), dec!(105.25));
        assert_eq!(dec_from_f64(f64::NAN), Decimal::ZERO);
        assert_eq!(dec_to_f64(dec!(10000)), 10000.0);
    }

    #[test]
    fn test_round_to_cents() {
        assert_eq!(round_to_cents(dec!(12.345)), dec!(12.34));
        assert_eq!(round_to_cents(dec!(12.3451)), dec!(12.35));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(0)), Decimal::ZERO);
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
    }
}

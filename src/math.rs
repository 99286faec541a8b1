//! Fixed-point helpers shared by the ledgers.
//!
//! All ledger math runs on Scrypto's `Decimal` (18 decimal places). Multiplication and division
//! truncate toward zero. Where a value is scaled by a ratio (`a * b / c`) the intermediate result is
//! carried in `PreciseDecimal` so that only the final result is truncated.

use scrypto::prelude::*;
use scrypto_math::*;

/// Upper bound on the exponent fed to `checked_powi` for time-based decay (1000 years in minutes).
pub const MAX_DECAY_MINUTES: i64 = 525_600_000;

pub const SECONDS_IN_ONE_MINUTE: i64 = 60;

/// Multiplier applied to the stability pool product when it would drop below `1 / scale_factor()`.
pub fn scale_factor() -> Decimal {
    dec!(1000000000)
}

/// The smallest representable `Decimal` step.
pub fn one_atto() -> Decimal {
    Decimal::from_attos(I192::ONE)
}

/// `a * b / c`, truncated once at the end.
///
/// # Panics
/// * If `c` is zero or the result does not fit a `Decimal`.
pub fn mul_div(a: Decimal, b: Decimal, c: Decimal) -> Decimal {
    assert!(!c.is_zero(), "Division by zero in mul_div");
    (PreciseDecimal::from(a) * PreciseDecimal::from(b) / PreciseDecimal::from(c))
        .checked_truncate(RoundingMode::ToZero)
        .expect("mul_div result out of range")
}

/// `base ^ exponent` for a base in `[0, 1]`, with the exponent capped at `MAX_DECAY_MINUTES`.
/// An underflow to nothing is reported as zero.
pub fn decay_pow(base: Decimal, exponent: i64) -> Decimal {
    if exponent <= 0 {
        return Decimal::ONE;
    }
    base.checked_powi(exponent.min(MAX_DECAY_MINUTES))
        .unwrap_or(Decimal::ZERO)
}

/// Whole minutes elapsed between two unix timestamps (seconds). Negative spans count as zero.
pub fn minutes_between(from: i64, to: i64) -> i64 {
    ((to - from) / SECONDS_IN_ONE_MINUTE).max(0)
}

/// Per-minute decay factor for a quantity that halves every `half_life_minutes`.
///
/// Returns `None` for a non-positive half life.
pub fn per_minute_factor(half_life_minutes: Decimal) -> Option<Decimal> {
    if half_life_minutes <= Decimal::ZERO {
        return None;
    }
    dec!("0.5").pow(Decimal::ONE / half_life_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_truncates_once() {
        assert_eq!(mul_div(dec!(10), dec!(1), dec!(3)), dec!("3.333333333333333333"));
        assert_eq!(mul_div(dec!(2), dec!(3), dec!(6)), Decimal::ONE);
    }

    #[test]
    fn decay_pow_handles_edges() {
        assert_eq!(decay_pow(dec!("0.5"), 0), Decimal::ONE);
        assert_eq!(decay_pow(dec!("0.5"), -5), Decimal::ONE);
        assert_eq!(decay_pow(dec!("0.5"), 2), dec!("0.25"));
        assert_eq!(decay_pow(dec!("0.5"), i64::MAX), Decimal::ZERO);
    }

    #[test]
    fn minutes_are_floored() {
        assert_eq!(minutes_between(0, 59), 0);
        assert_eq!(minutes_between(0, 60), 1);
        assert_eq!(minutes_between(100, 10), 0);
    }

    #[test]
    fn twelve_hour_half_life_matches_fee_decay_factor() {
        let factor = per_minute_factor(dec!(720)).unwrap();
        let expected = dec!("0.999037758833783");
        assert!((factor - expected).checked_abs().unwrap() < dec!("0.000000001"));
        assert!(per_minute_factor(Decimal::ZERO).is_none());
    }
}

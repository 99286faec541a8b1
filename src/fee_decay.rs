//! The decaying `baseRate` behind borrowing and redemption fees.
//!
//! `baseRate` decays per whole minute since the last fee operation. Redemptions push it up by the
//! redeemed share of system debt (divided by `beta`); borrowing only decays it unless
//! `issuance_feedback` is set. The decay clock (`last_fee_operation_time`) only moves when at least a
//! full minute has passed, so a burst of fee operations inside one minute cannot keep resetting the
//! clock while the stored rate is never decayed.

use crate::errors::ProtocolError;
use crate::math::*;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Debug)]
pub struct FeeParameters {
    /// Minimum borrowing rate.
    pub fee_floor: Decimal,
    /// Minimum redemption rate.
    pub redemption_fee_floor: Decimal,
    /// Maximum rate and `baseRate` cap.
    pub max_fee: Decimal,
    pub minute_decay_factor: Decimal,
    /// Redemption sensitivity divisor.
    pub beta: Decimal,
    /// Multiplier on `issued / totalDebt` added to `baseRate` by borrowing. Zero disables it.
    pub issuance_feedback: Decimal,
}

impl Default for FeeParameters {
    fn default() -> Self {
        Self {
            fee_floor: dec!("0.005"),
            redemption_fee_floor: dec!("0.005"),
            max_fee: Decimal::ONE,
            minute_decay_factor: dec!("0.999037758833783"),
            beta: dec!(2),
            issuance_feedback: Decimal::ZERO,
        }
    }
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct FeeDecayModel {
    pub base_rate: Decimal,
    /// Unix seconds of the last recorded fee operation.
    pub last_fee_operation_time: i64,
    pub parameters: FeeParameters,
}

impl FeeDecayModel {
    pub fn new(parameters: FeeParameters, now: i64) -> Self {
        Self {
            base_rate: Decimal::ZERO,
            last_fee_operation_time: now,
            parameters,
        }
    }

    pub fn minutes_passed_since_last_fee_operation(&self, now: i64) -> i64 {
        minutes_between(self.last_fee_operation_time, now)
    }

    pub fn decayed_base_rate(&self, now: i64) -> Decimal {
        let minutes = self.minutes_passed_since_last_fee_operation(now);
        self.base_rate * decay_pow(self.parameters.minute_decay_factor, minutes)
    }

    pub fn borrowing_rate(&self, now: i64) -> Decimal {
        self.calc_rate(self.parameters.fee_floor, self.decayed_base_rate(now))
    }

    pub fn redemption_rate(&self, now: i64) -> Decimal {
        self.calc_rate(self.parameters.redemption_fee_floor, self.decayed_base_rate(now))
    }

    pub fn borrowing_fee(&self, debt: Decimal, now: i64) -> Decimal {
        self.borrowing_rate(now) * debt
    }

    pub fn redemption_fee(&self, collateral_drawn: Decimal, now: i64) -> Decimal {
        self.redemption_rate(now) * collateral_drawn
    }

    /// Decays `baseRate` ahead of a debt issuance and applies the issuance feedback term.
    pub fn decay_base_rate_from_borrowing(&mut self, issued: Decimal, total_debt: Decimal, now: i64) -> Decimal {
        let mut new_base_rate = self.decayed_base_rate(now);
        if !self.parameters.issuance_feedback.is_zero() && total_debt > Decimal::ZERO {
            new_base_rate += mul_div(issued, self.parameters.issuance_feedback, total_debt);
        }
        self.base_rate = new_base_rate.min(self.parameters.max_fee);
        self.update_last_fee_operation_time(now);
        self.base_rate
    }

    /// Decays `baseRate` and adds `redeemed / total_debt / beta`.
    pub fn update_base_rate_from_redemption(
        &mut self,
        redeemed: Decimal,
        total_debt: Decimal,
        now: i64,
    ) -> Result<Decimal, ProtocolError> {
        if total_debt <= Decimal::ZERO || self.parameters.beta <= Decimal::ZERO {
            return Err(ProtocolError::InvalidParameter);
        }
        let redeemed_fraction = redeemed / total_debt;
        let new_base_rate = (self.decayed_base_rate(now) + redeemed_fraction / self.parameters.beta)
            .min(self.parameters.max_fee);
        self.base_rate = new_base_rate;
        self.update_last_fee_operation_time(now);
        Ok(self.base_rate)
    }

    /// Checks a caller's fee bound. In Recovery Mode no borrowing fee is charged, so only the upper
    /// bound applies.
    pub fn require_valid_max_fee(&self, max_fee_percentage: Decimal, recovery_mode: bool) -> Result<(), ProtocolError> {
        let valid = if recovery_mode {
            max_fee_percentage <= self.parameters.max_fee
        } else {
            max_fee_percentage >= self.parameters.fee_floor && max_fee_percentage <= self.parameters.max_fee
        };
        if valid {
            Ok(())
        } else {
            Err(ProtocolError::MaxFeeOutOfRange)
        }
    }

    pub fn require_valid_redemption_max_fee(&self, max_fee_percentage: Decimal) -> Result<(), ProtocolError> {
        if max_fee_percentage >= self.parameters.redemption_fee_floor
            && max_fee_percentage <= self.parameters.max_fee
        {
            Ok(())
        } else {
            Err(ProtocolError::MaxFeeOutOfRange)
        }
    }

    pub fn require_user_accepts_fee(fee: Decimal, amount: Decimal, max_fee_percentage: Decimal) -> Result<(), ProtocolError> {
        if amount.is_zero() {
            return Ok(());
        }
        if fee / amount > max_fee_percentage {
            return Err(ProtocolError::FeeExceedsMaximum);
        }
        Ok(())
    }

    pub fn set_parameters(&mut self, parameters: FeeParameters, now: i64) -> Result<(), ProtocolError> {
        if parameters.fee_floor > parameters.max_fee
            || parameters.redemption_fee_floor > parameters.max_fee
            || parameters.max_fee > Decimal::ONE
            || parameters.minute_decay_factor <= Decimal::ZERO
            || parameters.minute_decay_factor > Decimal::ONE
            || parameters.beta <= Decimal::ZERO
            || parameters.issuance_feedback < Decimal::ZERO
        {
            return Err(ProtocolError::InvalidParameter);
        }
        // Bank the decay accrued under the old factor before switching.
        self.base_rate = self.decayed_base_rate(now);
        self.last_fee_operation_time = now;
        self.parameters = parameters;
        Ok(())
    }

    fn calc_rate(&self, floor: Decimal, base_rate: Decimal) -> Decimal {
        floor.max(base_rate).min(self.parameters.max_fee)
    }

    fn update_last_fee_operation_time(&mut self, now: i64) {
        if now - self.last_fee_operation_time >= SECONDS_IN_ONE_MINUTE {
            self.last_fee_operation_time = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_700_000_000;

    fn model_at_five_percent() -> FeeDecayModel {
        let mut model = FeeDecayModel::new(FeeParameters::default(), START);
        model.base_rate = dec!("0.05");
        model
    }

    #[test]
    fn base_rate_halves_after_twelve_hours() {
        let model = model_at_five_percent();
        let decayed = model.decayed_base_rate(START + 720 * 60);
        assert!((decayed - dec!("0.025")).checked_abs().unwrap() < dec!("0.0000000001"));
    }

    #[test]
    fn no_decay_within_the_same_minute() {
        let model = model_at_five_percent();
        assert_eq!(model.decayed_base_rate(START + 59), dec!("0.05"));
    }

    #[test]
    fn fee_clock_only_moves_after_a_full_minute() {
        let mut model = model_at_five_percent();

        model.decay_base_rate_from_borrowing(dec!(100), dec!(10000), START + 10);
        assert_eq!(model.last_fee_operation_time, START);
        assert_eq!(model.base_rate, dec!("0.05"));

        model.decay_base_rate_from_borrowing(dec!(100), dec!(10000), START + 70);
        assert_eq!(model.last_fee_operation_time, START + 70);
        assert!(model.base_rate < dec!("0.05"));
    }

    #[test]
    fn redemption_increases_base_rate() {
        let mut model = FeeDecayModel::new(FeeParameters::default(), START);
        let base_rate = model
            .update_base_rate_from_redemption(dec!(1000), dec!(10000), START + 3600)
            .unwrap();
        assert_eq!(base_rate, dec!("0.05"));
        assert_eq!(model.last_fee_operation_time, START + 3600);
    }

    #[test]
    fn base_rate_is_capped_at_max_fee() {
        let mut model = model_at_five_percent();
        model
            .update_base_rate_from_redemption(dec!(10000), dec!(10000), START)
            .unwrap();
        assert_eq!(model.base_rate, dec!("0.55"));
        model
            .update_base_rate_from_redemption(dec!(10000), dec!(10000), START)
            .unwrap();
        assert_eq!(model.base_rate, Decimal::ONE);
    }

    #[test]
    fn borrowing_rate_is_floored() {
        let model = FeeDecayModel::new(FeeParameters::default(), START);
        assert_eq!(model.borrowing_rate(START), dec!("0.005"));
        assert_eq!(model.borrowing_fee(dec!(2000), START), dec!(10));
        let model = model_at_five_percent();
        assert_eq!(model.borrowing_fee(dec!(2000), START), dec!(100));
    }

    #[test]
    fn issuance_feedback_raises_base_rate_when_enabled() {
        let mut parameters = FeeParameters::default();
        parameters.issuance_feedback = Decimal::ONE;
        let mut model = FeeDecayModel::new(parameters, START);
        model.decay_base_rate_from_borrowing(dec!(100), dec!(10000), START);
        assert_eq!(model.base_rate, dec!("0.01"));
    }

    #[test]
    fn max_fee_bounds() {
        let model = model_at_five_percent();
        assert_eq!(model.require_valid_max_fee(dec!("0.001"), false), Err(ProtocolError::MaxFeeOutOfRange));
        assert_eq!(model.require_valid_max_fee(dec!("1.01"), false), Err(ProtocolError::MaxFeeOutOfRange));
        assert!(model.require_valid_max_fee(dec!("0.001"), true).is_ok());
        assert!(model.require_valid_max_fee(dec!("0.005"), false).is_ok());
        assert_eq!(
            FeeDecayModel::require_user_accepts_fee(dec!(11), dec!(1000), dec!("0.01")),
            Err(ProtocolError::FeeExceedsMaximum)
        );
        assert!(FeeDecayModel::require_user_accepts_fee(dec!(10), dec!(1000), dec!("0.01")).is_ok());
    }
}

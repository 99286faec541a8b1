//! TIDE issuance schedule for stability pool depositors.
//!
//! Cumulative issuance after `t` minutes is `supply_cap * (1 - issuance_factor ^ t)`, so half the cap
//! is issued in the first year and the schedule approaches the cap asymptotically.

use crate::math::*;
use scrypto::prelude::*;

/// TIDE set aside for stability pool depositors.
pub fn tide_supply_cap() -> Decimal {
    dec!(32000000)
}

/// Per-minute factor that halves the remaining issuance every year.
pub fn yearly_halving_factor() -> Decimal {
    dec!("0.999998681227695")
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct CommunityIssuance {
    pub supply_cap: Decimal,
    /// Per-minute factor; `issuance_factor ^ 525600 = 0.5`.
    pub issuance_factor: Decimal,
    /// Unix seconds.
    pub deployment_time: i64,
    pub total_issued: Decimal,
}

impl CommunityIssuance {
    pub fn new(supply_cap: Decimal, issuance_factor: Decimal, deployment_time: i64) -> Self {
        Self {
            supply_cap,
            issuance_factor,
            deployment_time,
            total_issued: Decimal::ZERO,
        }
    }

    pub fn cumulative_issuance_fraction(&self, now: i64) -> Decimal {
        let minutes = minutes_between(self.deployment_time, now);
        Decimal::ONE - decay_pow(self.issuance_factor, minutes)
    }

    /// Issues what the schedule allows since the last issuance and returns the amount.
    pub fn issue(&mut self, now: i64) -> Decimal {
        let latest_total = self.supply_cap * self.cumulative_issuance_fraction(now);
        if latest_total <= self.total_issued {
            return Decimal::ZERO;
        }
        let issuance = latest_total - self.total_issued;
        self.total_issued = latest_total;
        issuance
    }
}

//! Fee sharing for TIDE stakers.
//!
//! Borrowing fees (tUSD) and redemption fees (collateral) grow the per-unit accumulators `F_debt` and
//! `F_coll`. A stake earns `stake * (F - F_snapshot)` and collects it in full on every stake change.

use crate::collateral_registry::*;
use crate::errors::ProtocolError;
use crate::shared_structs::*;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Debug)]
pub struct StakeRecord {
    pub amount: Decimal,
    pub f_debt_snapshot: Decimal,
    pub f_coll_snapshots: CollateralAmounts,
}

impl StakeRecord {
    pub fn new() -> Self {
        Self {
            amount: Decimal::ZERO,
            f_debt_snapshot: Decimal::ZERO,
            f_coll_snapshots: CollateralAmounts::default(),
        }
    }
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct StakingGains {
    pub debt_gain: Decimal,
    pub collateral_gains: CollateralAmounts,
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct StakingRewardLedger {
    pub total_staked: Decimal,
    pub f_debt: Decimal,
    pub f_coll: CollateralAmounts,
}

impl StakingRewardLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tUSD fee. Returns false, and records nothing, while nothing is staked.
    pub fn increase_f_debt(&mut self, fee: Decimal) -> bool {
        if self.total_staked.is_zero() || fee.is_zero() {
            return false;
        }
        self.f_debt += fee / self.total_staked;
        true
    }

    /// Records a collateral fee. Returns false, and records nothing, while nothing is staked.
    pub fn increase_f_coll(&mut self, address: ResourceAddress, fee: Decimal) -> bool {
        if self.total_staked.is_zero() || fee.is_zero() {
            return false;
        }
        let increment = fee / self.total_staked;
        add_amount(&mut self.f_coll, address, increment);
        true
    }

    pub fn pending_gains(&self, record: &StakeRecord) -> StakingGains {
        let mut gains = StakingGains::default();
        if record.amount.is_zero() {
            return gains;
        }
        gains.debt_gain = record.amount * (self.f_debt - record.f_debt_snapshot);
        for (address, f_coll) in &self.f_coll {
            let snapshot = record.f_coll_snapshots.get(address).cloned().unwrap_or(Decimal::ZERO);
            add_amount(&mut gains.collateral_gains, *address, record.amount * (*f_coll - snapshot));
        }
        gains
    }

    fn update_snapshots(&self, record: &mut StakeRecord) {
        record.f_debt_snapshot = self.f_debt;
        record.f_coll_snapshots = self.f_coll.clone();
    }

    /// Adds `amount` TIDE to a stake and pays out its gains.
    pub fn stake(&mut self, record: &mut StakeRecord, amount: Decimal) -> Result<StakingGains, ProtocolError> {
        if amount <= Decimal::ZERO {
            return Err(ProtocolError::ZeroAmount);
        }
        let gains = self.pending_gains(record);
        self.update_snapshots(record);
        record.amount += amount;
        self.total_staked += amount;
        Ok(gains)
    }

    /// Removes `amount` TIDE from a stake and pays out its gains. Zero only claims gains.
    pub fn unstake(&mut self, record: &mut StakeRecord, amount: Decimal) -> Result<StakingGains, ProtocolError> {
        if record.amount.is_zero() {
            return Err(ProtocolError::NoStake);
        }
        if amount < Decimal::ZERO {
            return Err(ProtocolError::InvalidParameter);
        }
        if amount > record.amount {
            return Err(ProtocolError::UnstakeExceedsStake);
        }
        let gains = self.pending_gains(record);
        self.update_snapshots(record);
        record.amount -= amount;
        self.total_staked -= amount;
        Ok(gains)
    }
}

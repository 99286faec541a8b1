//! Trove accounting: positions, stakes, redistribution accumulators and the solvency rules for
//! opening, adjusting and closing troves.
//!
//! The ledger itself holds only system-wide figures. Troves live in receipt NFT data and are passed
//! in by reference, so every function here works the same on-ledger and in plain unit tests.
//!
//! ## Redistribution rewards
//! Liquidated debt and collateral the stability pool cannot absorb is shared over all active troves
//! holding the same collateral type, proportionally to their stake, by growing the per-type
//! accumulators `L_coll` and `L_debt`. A trove realises its share lazily: the difference between the
//! current accumulators and its reward snapshot, times its stake. [`TroveLedger::apply_pending_rewards`]
//! is idempotent and runs before anything reads or changes a trove's position.
//!
//! ## Corrected stakes
//! Collateral added after a redistribution would otherwise earn a share of rewards it never backed.
//! New stake is therefore `collateral * totalStakesSnapshot / totalCollateralSnapshot`, using the
//! totals frozen at the last redistribution.

use crate::collateral_registry::*;
use crate::errors::ProtocolError;
use crate::fee_decay::FeeDecayModel;
use crate::math::*;
use crate::shared_structs::*;
use scrypto::prelude::*;

/// System figures of one collateral type.
#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct CollateralTotals {
    /// Collateral recorded in active troves.
    pub active_collateral: Decimal,
    /// Collateral redistributed to troves but not yet applied to them.
    pub default_collateral: Decimal,
    pub total_stakes: Decimal,
    pub total_stakes_snapshot: Decimal,
    pub total_collateral_snapshot: Decimal,
    pub l_coll: Decimal,
    pub l_debt: Decimal,
    pub last_coll_error: Decimal,
    pub last_debt_error: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct TroveLedger {
    pub totals: IndexMap<ResourceAddress, CollateralTotals>,
    /// Debt recorded in active troves.
    pub active_debt: Decimal,
    /// Debt redistributed to troves but not yet applied to them.
    pub default_debt: Decimal,
    pub active_troves: u64,
}

/// Read-only inputs of a ledger operation.
pub struct LedgerContext<'a> {
    pub registry: &'a CollateralRegistry,
    pub prices: &'a PriceSet,
    pub parameters: &'a ProtocolParameters,
    /// Unix seconds.
    pub now: i64,
}

#[derive(ScryptoSbor, Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingRewards {
    pub collateral: CollateralAmounts,
    pub debt: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct Redistribution {
    /// Slices of collateral types without any stake left. They stay in the system unassigned.
    pub retained_collateral: CollateralAmounts,
    pub retained_debt: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct OpenOutcome {
    /// tUSD the borrower receives.
    pub debt_to_borrower: Decimal,
    pub fee: Decimal,
    pub gas_compensation: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct AdjustRequest {
    pub collateral_added: CollateralAmounts,
    pub collateral_withdrawn: CollateralAmounts,
    pub debt_change: Decimal,
    pub is_debt_increase: bool,
    pub max_fee_percentage: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct AdjustOutcome {
    pub debt_to_borrower: Decimal,
    pub fee: Decimal,
    pub repaid: Decimal,
    pub collateral_withdrawn: CollateralAmounts,
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct CloseOutcome {
    pub collateral: CollateralAmounts,
    /// tUSD the owner must burn: the debt minus the gas compensation reserve.
    pub repayment: Decimal,
    /// Reserve burned from the gas pool.
    pub gas_compensation: Decimal,
}

impl TroveLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_collateral(&mut self, address: ResourceAddress) {
        self.totals.entry(address).or_default();
    }

    pub fn totals_of(&self, address: &ResourceAddress) -> CollateralTotals {
        self.totals.get(address).cloned().unwrap_or_default()
    }

    pub fn total_debt(&self) -> Decimal {
        self.active_debt + self.default_debt
    }

    /// All collateral the system accounts for, per type.
    pub fn system_collateral(&self) -> CollateralAmounts {
        let mut collateral = CollateralAmounts::default();
        for (address, totals) in &self.totals {
            add_amount(&mut collateral, *address, totals.active_collateral + totals.default_collateral);
        }
        collateral
    }

    pub fn tcr(&self, registry: &CollateralRegistry, prices: &PriceSet) -> Result<Decimal, ProtocolError> {
        let value = registry.value_of(&self.system_collateral(), prices)?;
        Ok(collateral_ratio(value, self.total_debt()))
    }

    pub fn is_recovery_mode(&self, ctx: &LedgerContext) -> Result<bool, ProtocolError> {
        Ok(self.tcr(ctx.registry, ctx.prices)? < ctx.parameters.ccr)
    }

    //==================================================================
    //                       REWARDS AND STAKES
    //==================================================================

    pub fn pending_rewards(&self, trove: &Trove) -> PendingRewards {
        let mut pending = PendingRewards::default();
        if !trove.is_active() {
            return pending;
        }
        for (address, stake) in &trove.stakes {
            let totals = self.totals_of(address);
            let snapshot = trove.reward_snapshots.get(address).cloned().unwrap_or_default();
            add_amount(&mut pending.collateral, *address, *stake * (totals.l_coll - snapshot.l_coll));
            pending.debt += *stake * (totals.l_debt - snapshot.l_debt);
        }
        pending
    }

    /// Moves a trove's share of past redistributions into its position and refreshes its snapshots.
    pub fn apply_pending_rewards(&mut self, trove: &mut Trove) -> PendingRewards {
        let pending = self.pending_rewards(trove);
        if !trove.is_active() {
            return pending;
        }
        for (address, amount) in &pending.collateral {
            let totals = self.totals.entry(*address).or_default();
            let moved = (*amount).min(totals.default_collateral);
            totals.default_collateral -= moved;
            totals.active_collateral += *amount;
            add_amount(&mut trove.collateral, *address, *amount);
        }
        if pending.debt > Decimal::ZERO {
            self.default_debt -= pending.debt.min(self.default_debt);
            self.active_debt += pending.debt;
            trove.debt += pending.debt;
        }
        self.update_reward_snapshots(trove);
        pending
    }

    /// Debt and collateral of a trove including unapplied rewards.
    pub fn entire_debt_and_coll(&self, trove: &Trove) -> (Decimal, CollateralAmounts) {
        let pending = self.pending_rewards(trove);
        let mut collateral = trove.collateral.clone();
        for (address, amount) in pending.collateral {
            add_amount(&mut collateral, address, amount);
        }
        (trove.debt + pending.debt, collateral)
    }

    pub fn current_icr(&self, trove: &Trove, registry: &CollateralRegistry, prices: &PriceSet) -> Result<Decimal, ProtocolError> {
        let (debt, collateral) = self.entire_debt_and_coll(trove);
        Ok(collateral_ratio(registry.value_of(&collateral, prices)?, debt))
    }

    pub fn nominal_icr(
        registry: &CollateralRegistry,
        collateral: &CollateralAmounts,
        debt: Decimal,
    ) -> Result<Decimal, ProtocolError> {
        Ok(collateral_ratio(registry.nominal_value_of(collateral)?, debt))
    }

    pub fn compute_new_stake(&self, address: &ResourceAddress, collateral: Decimal) -> Decimal {
        match self.totals.get(address) {
            Some(totals)
                if !totals.total_collateral_snapshot.is_zero() && !totals.total_stakes_snapshot.is_zero() =>
            {
                mul_div(collateral, totals.total_stakes_snapshot, totals.total_collateral_snapshot)
            }
            _ => collateral,
        }
    }

    pub fn update_stake_and_total_stakes(&mut self, trove: &mut Trove) {
        let mut addresses: Vec<ResourceAddress> = trove.stakes.keys().cloned().collect();
        for address in trove.collateral.keys() {
            if !addresses.contains(address) {
                addresses.push(*address);
            }
        }

        for address in addresses {
            let old_stake = trove.stakes.get(&address).cloned().unwrap_or(Decimal::ZERO);
            let collateral = trove.collateral.get(&address).cloned().unwrap_or(Decimal::ZERO);
            let new_stake = self.compute_new_stake(&address, collateral);

            let totals = self.totals.entry(address).or_default();
            totals.total_stakes = totals.total_stakes - old_stake + new_stake;

            if new_stake.is_zero() {
                trove.stakes.shift_remove(&address);
            } else {
                trove.stakes.insert(address, new_stake);
            }
        }
    }

    pub fn remove_stake(&mut self, trove: &mut Trove) {
        for (address, stake) in trove.stakes.drain(..) {
            let totals = self.totals.entry(address).or_default();
            totals.total_stakes -= stake.min(totals.total_stakes);
        }
    }

    pub fn update_reward_snapshots(&self, trove: &mut Trove) {
        let mut snapshots = IndexMap::default();
        for address in trove.collateral.keys().chain(trove.stakes.keys()) {
            let totals = self.totals_of(address);
            snapshots.insert(
                *address,
                RewardSnapshot {
                    l_coll: totals.l_coll,
                    l_debt: totals.l_debt,
                },
            );
        }
        trove.reward_snapshots = snapshots;
    }

    /// Freezes the stake correction ratio of every collateral type at the current totals.
    pub fn update_system_snapshots(&mut self) {
        for totals in self.totals.values_mut() {
            totals.total_stakes_snapshot = totals.total_stakes;
            totals.total_collateral_snapshot = totals.active_collateral + totals.default_collateral;
        }
    }

    /// Shares debt and collateral over all stakes of each collateral type.
    ///
    /// A type without any stake cannot absorb its slice. That slice is retained by the system
    /// (accounted for, but owned by no trove) and reported back instead of failing.
    pub fn redistribute(&mut self, debt_by_type: &CollateralAmounts, collateral: &CollateralAmounts) -> Redistribution {
        let mut result = Redistribution::default();
        let mut addresses: Vec<ResourceAddress> = collateral.keys().cloned().collect();
        for address in debt_by_type.keys() {
            if !addresses.contains(address) {
                addresses.push(*address);
            }
        }

        for address in addresses {
            let debt = debt_by_type.get(&address).cloned().unwrap_or(Decimal::ZERO);
            let coll = collateral.get(&address).cloned().unwrap_or(Decimal::ZERO);
            if debt.is_zero() && coll.is_zero() {
                continue;
            }

            let totals = self.totals.entry(address).or_default();
            totals.default_collateral += coll;
            self.default_debt += debt;

            if totals.total_stakes.is_zero() {
                add_amount(&mut result.retained_collateral, address, coll);
                result.retained_debt += debt;
                continue;
            }

            let coll_numerator = coll + totals.last_coll_error;
            let coll_reward_per_unit = coll_numerator / totals.total_stakes;
            totals.last_coll_error = coll_numerator - coll_reward_per_unit * totals.total_stakes;

            let debt_numerator = debt + totals.last_debt_error;
            let debt_reward_per_unit = debt_numerator / totals.total_stakes;
            totals.last_debt_error = debt_numerator - debt_reward_per_unit * totals.total_stakes;

            totals.l_coll += coll_reward_per_unit;
            totals.l_debt += debt_reward_per_unit;
        }
        result
    }

    /// Removes a trove's recorded position from the active totals. The trove must have its pending
    /// rewards applied and its stake removed.
    pub(crate) fn remove_from_active(&mut self, trove: &Trove) {
        for (address, amount) in &trove.collateral {
            let totals = self.totals.entry(*address).or_default();
            totals.active_collateral -= (*amount).min(totals.active_collateral);
        }
        self.active_debt -= trove.debt.min(self.active_debt);
        self.active_troves = self.active_troves.saturating_sub(1);
    }

    //==================================================================
    //                          OPERATIONS
    //==================================================================

    /// Opens `trove` with `collateral`, issuing `requested_debt` to the borrower.
    ///
    /// The trove's debt becomes `requested_debt + fee + gas compensation`. In Recovery Mode no
    /// borrowing fee is charged and the new ICR must reach CCR.
    pub fn open(
        &mut self,
        trove: &mut Trove,
        collateral: CollateralAmounts,
        requested_debt: Decimal,
        max_fee_percentage: Decimal,
        ctx: &LedgerContext,
        fees: &mut FeeDecayModel,
    ) -> Result<OpenOutcome, ProtocolError> {
        if trove.is_active() {
            return Err(ProtocolError::TroveAlreadyActive);
        }
        if collateral.is_empty() || collateral.values().any(|amount| *amount <= Decimal::ZERO) {
            return Err(ProtocolError::ZeroAmount);
        }
        ctx.registry.require_depositable(&collateral)?;

        let recovery_mode = self.is_recovery_mode(ctx)?;
        fees.require_valid_max_fee(max_fee_percentage, recovery_mode)?;

        let mut next_fees = fees.clone();
        let fee = if recovery_mode {
            Decimal::ZERO
        } else {
            next_fees.decay_base_rate_from_borrowing(requested_debt, self.total_debt(), ctx.now);
            let fee = next_fees.borrowing_fee(requested_debt, ctx.now);
            FeeDecayModel::require_user_accepts_fee(fee, requested_debt, max_fee_percentage)?;
            fee
        };

        let net_debt = requested_debt + fee;
        if net_debt < ctx.parameters.min_net_debt {
            return Err(ProtocolError::NetDebtBelowMinimum);
        }
        let composite_debt = net_debt + ctx.parameters.gas_compensation;

        let value = ctx.registry.value_of(&collateral, ctx.prices)?;
        let icr = collateral_ratio(value, composite_debt);

        if recovery_mode {
            if icr < ctx.parameters.ccr {
                return Err(ProtocolError::IcrBelowCcr);
            }
        } else {
            if icr < ctx.parameters.mcr {
                return Err(ProtocolError::IcrBelowMcr);
            }
            if self.active_troves > 0 {
                let system_value = ctx.registry.value_of(&self.system_collateral(), ctx.prices)?;
                let new_tcr = collateral_ratio(system_value + value, self.total_debt() + composite_debt);
                if new_tcr < ctx.parameters.ccr {
                    return Err(ProtocolError::TcrBelowCcr);
                }
            }
        }

        *fees = next_fees;

        trove.status = TroveStatus::Active;
        trove.collateral = collateral.clone();
        trove.debt = composite_debt;
        trove.stakes = IndexMap::default();
        self.update_stake_and_total_stakes(trove);
        self.update_reward_snapshots(trove);
        trove.nominal_icr = Self::nominal_icr(ctx.registry, &trove.collateral, trove.debt)?;

        for (address, amount) in &collateral {
            self.totals.entry(*address).or_default().active_collateral += *amount;
        }
        self.active_debt += composite_debt;
        self.active_troves += 1;

        Ok(OpenOutcome {
            debt_to_borrower: requested_debt,
            fee,
            gas_compensation: ctx.parameters.gas_compensation,
        })
    }

    /// Applies a collateral and/or debt change to an active trove.
    ///
    /// Pending redistribution rewards are applied first, so the change acts on the trove's current
    /// position.
    pub fn adjust(
        &mut self,
        trove: &mut Trove,
        request: AdjustRequest,
        ctx: &LedgerContext,
        fees: &mut FeeDecayModel,
    ) -> Result<AdjustOutcome, ProtocolError> {
        if !trove.is_active() {
            return Err(ProtocolError::TroveNotActive);
        }
        let adding = request.collateral_added.values().any(|amount| *amount > Decimal::ZERO);
        let withdrawing = request.collateral_withdrawn.values().any(|amount| *amount > Decimal::ZERO);
        if adding && withdrawing {
            return Err(ProtocolError::CollateralTopUpAndWithdrawal);
        }
        if request.is_debt_increase && request.debt_change.is_zero() {
            return Err(ProtocolError::ZeroDebtIncrease);
        }
        if !adding && !withdrawing && request.debt_change.is_zero() {
            return Err(ProtocolError::ZeroAdjustment);
        }
        if request.debt_change < Decimal::ZERO {
            return Err(ProtocolError::InvalidParameter);
        }
        if adding {
            ctx.registry.require_depositable(&request.collateral_added)?;
        }

        let recovery_mode = self.is_recovery_mode(ctx)?;
        if request.is_debt_increase {
            fees.require_valid_max_fee(request.max_fee_percentage, recovery_mode)?;
        }

        let mut next = self.clone();
        let mut next_trove = trove.clone();
        let mut next_fees = fees.clone();

        next.apply_pending_rewards(&mut next_trove);
        let old_debt = next_trove.debt;
        let old_value = ctx.registry.value_of(&next_trove.collateral, ctx.prices)?;
        let old_icr = collateral_ratio(old_value, old_debt);

        let mut fee = Decimal::ZERO;
        if request.is_debt_increase && !recovery_mode {
            next_fees.decay_base_rate_from_borrowing(request.debt_change, next.total_debt(), ctx.now);
            fee = next_fees.borrowing_fee(request.debt_change, ctx.now);
            FeeDecayModel::require_user_accepts_fee(fee, request.debt_change, request.max_fee_percentage)?;
        }

        let mut new_collateral = next_trove.collateral.clone();
        for (address, amount) in &request.collateral_added {
            add_amount(&mut new_collateral, *address, *amount);
        }
        for (address, amount) in &request.collateral_withdrawn {
            sub_amount(&mut new_collateral, *address, *amount)?;
        }

        let new_debt = if request.is_debt_increase {
            old_debt + request.debt_change + fee
        } else {
            if request.debt_change > old_debt - ctx.parameters.gas_compensation {
                return Err(ProtocolError::RepaymentExceedsDebt);
            }
            old_debt - request.debt_change
        };

        let new_value = ctx.registry.value_of(&new_collateral, ctx.prices)?;
        let new_icr = collateral_ratio(new_value, new_debt);

        if recovery_mode {
            if withdrawing {
                return Err(ProtocolError::CollateralWithdrawalInRecoveryMode);
            }
            if request.is_debt_increase {
                if new_icr < ctx.parameters.ccr {
                    return Err(ProtocolError::IcrBelowCcr);
                }
                if new_icr < old_icr {
                    return Err(ProtocolError::IcrDecreasedInRecoveryMode);
                }
            }
        } else {
            if new_icr < ctx.parameters.mcr {
                return Err(ProtocolError::IcrBelowMcr);
            }
            let system_value = ctx.registry.value_of(&next.system_collateral(), ctx.prices)?;
            let new_tcr = collateral_ratio(
                system_value - old_value + new_value,
                next.total_debt() - old_debt + new_debt,
            );
            if new_tcr < ctx.parameters.ccr {
                return Err(ProtocolError::TcrBelowCcr);
            }
        }

        if !request.is_debt_increase
            && request.debt_change > Decimal::ZERO
            && new_debt - ctx.parameters.gas_compensation < ctx.parameters.min_net_debt
        {
            return Err(ProtocolError::NetDebtBelowMinimum);
        }

        next_trove.collateral = new_collateral;
        next_trove.debt = new_debt;
        next.update_stake_and_total_stakes(&mut next_trove);
        next.update_reward_snapshots(&mut next_trove);
        next_trove.nominal_icr = Self::nominal_icr(ctx.registry, &next_trove.collateral, next_trove.debt)?;

        for (address, amount) in &request.collateral_added {
            next.totals.entry(*address).or_default().active_collateral += *amount;
        }
        for (address, amount) in &request.collateral_withdrawn {
            next.totals.entry(*address).or_default().active_collateral -= *amount;
        }
        next.active_debt = next.active_debt - old_debt + new_debt;

        *self = next;
        *trove = next_trove;
        if request.is_debt_increase && !recovery_mode {
            *fees = next_fees;
        }

        Ok(AdjustOutcome {
            debt_to_borrower: if request.is_debt_increase { request.debt_change } else { Decimal::ZERO },
            fee,
            repaid: if request.is_debt_increase { Decimal::ZERO } else { request.debt_change },
            collateral_withdrawn: request
                .collateral_withdrawn
                .into_iter()
                .filter(|(_, amount)| *amount > Decimal::ZERO)
                .collect(),
        })
    }

    /// Closes an active trove owned by the caller, returning its collateral.
    pub fn close(&mut self, trove: &mut Trove, ctx: &LedgerContext) -> Result<CloseOutcome, ProtocolError> {
        if !trove.is_active() {
            return Err(ProtocolError::TroveNotActive);
        }
        if self.active_troves <= 1 {
            return Err(ProtocolError::OnlyOneTroveInSystem);
        }
        if self.is_recovery_mode(ctx)? {
            return Err(ProtocolError::CloseInRecoveryMode);
        }

        let mut next = self.clone();
        let mut next_trove = trove.clone();
        next.apply_pending_rewards(&mut next_trove);

        let value = ctx.registry.value_of(&next_trove.collateral, ctx.prices)?;
        let system_value = ctx.registry.value_of(&next.system_collateral(), ctx.prices)?;
        let new_tcr = collateral_ratio(system_value - value, next.total_debt() - next_trove.debt);
        if new_tcr < ctx.parameters.ccr {
            return Err(ProtocolError::TcrBelowCcr);
        }

        next.remove_stake(&mut next_trove);
        next.remove_from_active(&next_trove);

        let outcome = CloseOutcome {
            collateral: next_trove.collateral.clone(),
            repayment: next_trove.debt - ctx.parameters.gas_compensation,
            gas_compensation: ctx.parameters.gas_compensation,
        };
        next_trove.close(TroveStatus::ClosedByOwner);

        *self = next;
        *trove = next_trove;
        Ok(outcome)
    }
}

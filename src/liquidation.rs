//! Liquidation of undercollateralized troves.
//!
//! A liquidated trove's debt is first offset against the stability pool, with the matching share of
//! its collateral going to depositors. Whatever the pool cannot absorb is redistributed over the
//! remaining troves. The liquidator is paid the trove's tUSD gas reserve plus `1 / divisor` of its
//! collateral.
//!
//! In Recovery Mode (TCR < CCR) troves up to TCR are liquidatable. Troves with `MCR <= ICR < TCR`
//! are only offset, never redistributed, and only while the pool covers their whole debt. Their
//! loss is capped at `debt * MCR` worth of collateral and the rest is left claimable by the owner.

use crate::collateral_registry::*;
use crate::errors::ProtocolError;
use crate::math::*;
use crate::shared_structs::*;
use crate::trove_ledger::*;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Copy, PartialEq, Eq, Debug)]
pub enum LiquidationMode {
    /// ICR < MCR: offset what the pool covers, redistribute the rest.
    Normal,
    /// Recovery Mode with ICR <= 100%: everything is redistributed.
    FullRedistribution,
    /// Recovery Mode with MCR <= ICR < TCR: offset only, loss capped at `debt * MCR`.
    Capped,
}

#[derive(ScryptoSbor, Clone, Debug)]
pub struct LiquidationValues {
    pub trove_id: NonFungibleLocalId,
    pub mode: LiquidationMode,
    pub entire_debt: Decimal,
    pub entire_collateral: CollateralAmounts,
    pub debt_to_offset: Decimal,
    pub collateral_to_stability_pool: CollateralAmounts,
    pub debt_to_redistribute: Decimal,
    pub collateral_to_redistribute: CollateralAmounts,
    /// Collateral left over by a capped liquidation, claimable by the trove owner.
    pub collateral_surplus: CollateralAmounts,
    pub gas_compensation: Decimal,
    pub collateral_gas_compensation: CollateralAmounts,
    pub retained_debt: Decimal,
    pub retained_collateral: CollateralAmounts,
}

/// Aggregate result of a liquidation batch.
#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct LiquidationTotals {
    pub liquidated: Vec<LiquidationValues>,
    pub debt_to_offset: Decimal,
    pub collateral_to_stability_pool: CollateralAmounts,
    pub debt_redistributed: Decimal,
    pub collateral_redistributed: CollateralAmounts,
    pub gas_compensation: Decimal,
    pub collateral_gas_compensation: CollateralAmounts,
}

impl LiquidationTotals {
    fn add(&mut self, values: LiquidationValues) {
        self.debt_to_offset += values.debt_to_offset;
        self.debt_redistributed += values.debt_to_redistribute;
        self.gas_compensation += values.gas_compensation;
        merge(&mut self.collateral_to_stability_pool, &values.collateral_to_stability_pool);
        merge(&mut self.collateral_redistributed, &values.collateral_to_redistribute);
        merge(&mut self.collateral_gas_compensation, &values.collateral_gas_compensation);
        self.liquidated.push(values);
    }
}

fn merge(into: &mut CollateralAmounts, from: &CollateralAmounts) {
    for (address, amount) in from {
        add_amount(into, *address, *amount);
    }
}

fn scaled(amounts: &CollateralAmounts, numerator: Decimal, denominator: Decimal) -> CollateralAmounts {
    let mut result = CollateralAmounts::default();
    if denominator.is_zero() {
        return result;
    }
    for (address, amount) in amounts {
        add_amount(&mut result, *address, mul_div(*amount, numerator, denominator));
    }
    result
}

fn difference(from: &CollateralAmounts, minus: &CollateralAmounts) -> CollateralAmounts {
    let mut result = CollateralAmounts::default();
    for (address, amount) in from {
        let taken = minus.get(address).cloned().unwrap_or(Decimal::ZERO);
        add_amount(&mut result, *address, *amount - taken);
    }
    result
}

/// Splits `debt` over collateral types in proportion to the value each contributes to `collateral`.
/// The last type takes the rounding remainder, so the parts add up to `debt` exactly.
pub fn split_debt_by_value(
    debt: Decimal,
    collateral: &CollateralAmounts,
    registry: &CollateralRegistry,
    prices: &PriceSet,
) -> Result<CollateralAmounts, ProtocolError> {
    let mut shares = CollateralAmounts::default();
    if debt.is_zero() || collateral.is_empty() {
        return Ok(shares);
    }
    let total_value = registry.value_of(collateral, prices)?;
    if total_value.is_zero() {
        return Err(ProtocolError::InvalidPrice);
    }

    let mut assigned = Decimal::ZERO;
    let last = collateral.len() - 1;
    for (index, (address, amount)) in collateral.iter().enumerate() {
        let share = if index == last {
            debt - assigned
        } else {
            mul_div(debt, registry.value_of_one(address, *amount, prices)?, total_value)
        };
        assigned += share;
        add_amount(&mut shares, *address, share);
    }
    Ok(shares)
}

/// Offset as much debt as the pool holds, with proportional collateral. The rest is redistributed.
fn offset_and_redistribution(
    debt: Decimal,
    collateral: &CollateralAmounts,
    stability_pool_deposits: Decimal,
) -> (Decimal, CollateralAmounts, Decimal, CollateralAmounts) {
    if stability_pool_deposits > Decimal::ZERO && debt > Decimal::ZERO {
        let debt_to_offset = debt.min(stability_pool_deposits);
        let collateral_to_stability_pool = scaled(collateral, debt_to_offset, debt);
        let collateral_to_redistribute = difference(collateral, &collateral_to_stability_pool);
        (
            debt_to_offset,
            collateral_to_stability_pool,
            debt - debt_to_offset,
            collateral_to_redistribute,
        )
    } else {
        (Decimal::ZERO, CollateralAmounts::default(), debt, collateral.clone())
    }
}

/// Liquidates a single trove, whose pending rewards must already be applied.
fn liquidate_one(
    ledger: &mut TroveLedger,
    trove_id: &NonFungibleLocalId,
    trove: &mut Trove,
    mode: LiquidationMode,
    stability_pool_deposits: Decimal,
    ctx: &LedgerContext,
) -> Result<LiquidationValues, ProtocolError> {
    let entire_debt = trove.debt;
    let entire_collateral = trove.collateral.clone();
    let divisor = ctx.parameters.collateral_gas_compensation_divisor;

    let mut collateral_surplus = CollateralAmounts::default();
    let (collateral_gas_compensation, debt_to_offset, collateral_to_stability_pool, debt_to_redistribute, collateral_to_redistribute) =
        match mode {
            LiquidationMode::Normal => {
                let gas = scaled(&entire_collateral, Decimal::ONE, divisor);
                let remaining = difference(&entire_collateral, &gas);
                let (offset, to_pool, redistributed_debt, redistributed_coll) =
                    offset_and_redistribution(entire_debt, &remaining, stability_pool_deposits);
                (gas, offset, to_pool, redistributed_debt, redistributed_coll)
            }
            LiquidationMode::FullRedistribution => {
                let gas = scaled(&entire_collateral, Decimal::ONE, divisor);
                let remaining = difference(&entire_collateral, &gas);
                (gas, Decimal::ZERO, CollateralAmounts::default(), entire_debt, remaining)
            }
            LiquidationMode::Capped => {
                let value = ctx.registry.value_of(&entire_collateral, ctx.prices)?;
                let capped_value = entire_debt * ctx.parameters.mcr;
                let capped = scaled(&entire_collateral, capped_value, value);
                collateral_surplus = difference(&entire_collateral, &capped);
                let gas = scaled(&capped, Decimal::ONE, divisor);
                let to_pool = difference(&capped, &gas);
                (gas, entire_debt, to_pool, Decimal::ZERO, CollateralAmounts::default())
            }
        };

    ledger.remove_stake(trove);
    ledger.remove_from_active(trove);

    let debt_by_type = split_debt_by_value(debt_to_redistribute, &collateral_to_redistribute, ctx.registry, ctx.prices)?;
    let redistribution = ledger.redistribute(&debt_by_type, &collateral_to_redistribute);
    ledger.update_system_snapshots();

    trove.close(TroveStatus::ClosedByLiquidation);

    Ok(LiquidationValues {
        trove_id: trove_id.clone(),
        mode,
        entire_debt,
        entire_collateral,
        debt_to_offset,
        collateral_to_stability_pool,
        debt_to_redistribute,
        collateral_to_redistribute,
        collateral_surplus,
        gas_compensation: ctx.parameters.gas_compensation,
        collateral_gas_compensation,
        retained_debt: redistribution.retained_debt,
        retained_collateral: redistribution.retained_collateral,
    })
}

/// Liquidates every qualifying trove among `troves`, lowest ICR first.
///
/// System TCR and Recovery Mode are re-evaluated after each liquidation, and the pool capacity
/// left for offsets shrinks as troves are offset. The walk stops at the first trove that no longer
/// qualifies, and never liquidates the last active trove.
///
/// Every trove in `troves` may come back modified: liquidated ones closed, others with pending
/// rewards applied. Callers persist all of them.
pub fn liquidate_batch(
    ledger: &mut TroveLedger,
    troves: &mut Vec<(NonFungibleLocalId, Trove)>,
    stability_pool_deposits: Decimal,
    ctx: &LedgerContext,
) -> Result<LiquidationTotals, ProtocolError> {
    let mut next = ledger.clone();
    let mut next_troves = troves.clone();

    let mut order: Vec<(usize, Decimal)> = Vec::new();
    for (index, (_, trove)) in next_troves.iter().enumerate() {
        if trove.is_active() {
            order.push((index, next.current_icr(trove, ctx.registry, ctx.prices)?));
        }
    }
    order.sort_by(|a, b| a.1.cmp(&b.1));

    let mut totals = LiquidationTotals::default();
    let mut pool_remaining = stability_pool_deposits;

    for (index, _) in order {
        if next.active_troves <= 1 {
            break;
        }
        let tcr = next.tcr(ctx.registry, ctx.prices)?;
        let recovery_mode = tcr < ctx.parameters.ccr;

        let (trove_id, trove) = &mut next_troves[index];
        if !trove.is_active() {
            continue;
        }
        next.apply_pending_rewards(trove);
        let icr = collateral_ratio(ctx.registry.value_of(&trove.collateral, ctx.prices)?, trove.debt);

        let mode = if !recovery_mode {
            if icr >= ctx.parameters.mcr {
                break;
            }
            LiquidationMode::Normal
        } else {
            if icr >= tcr {
                break;
            }
            if icr <= Decimal::ONE {
                LiquidationMode::FullRedistribution
            } else if icr < ctx.parameters.mcr {
                LiquidationMode::Normal
            } else if trove.debt <= pool_remaining {
                LiquidationMode::Capped
            } else {
                continue;
            }
        };

        let values = liquidate_one(&mut next, trove_id, trove, mode, pool_remaining, ctx)?;
        pool_remaining -= values.debt_to_offset;
        totals.add(values);
    }

    if totals.liquidated.is_empty() {
        return Err(ProtocolError::NothingToLiquidate);
    }

    *ledger = next;
    *troves = next_troves;
    Ok(totals)
}

//! Redemption of tUSD for collateral at face value.
//!
//! Redeemers burn tUSD and draw collateral from the riskiest troves first (lowest ICR at or above
//! MCR). Each trove pays out collateral worth the debt it sheds, in proportion to the market value of
//! each collateral type it holds. A trove redeemed down to its gas reserve is closed and its leftover
//! collateral becomes a claimable surplus. The redemption fee is taken from the drawn collateral.

use crate::collateral_registry::*;
use crate::errors::ProtocolError;
use crate::fee_decay::FeeDecayModel;
use crate::math::*;
use crate::shared_structs::*;
use crate::trove_ledger::*;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Debug)]
pub struct ClosedByRedemption {
    pub trove_id: NonFungibleLocalId,
    pub collateral_surplus: CollateralAmounts,
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct RedemptionOutcome {
    /// tUSD taken off trove debt. The redeemer burns exactly this much.
    pub redeemed_debt: Decimal,
    pub collateral_drawn: CollateralAmounts,
    pub fee: CollateralAmounts,
    /// `collateral_drawn` minus `fee`.
    pub collateral_to_redeemer: CollateralAmounts,
    pub closed: Vec<ClosedByRedemption>,
    /// Gas reserves of closed troves, burned from the gas pool.
    pub gas_compensation_released: Decimal,
    pub base_rate: Decimal,
}

/// Redeems up to `amount` tUSD against `troves`.
///
/// `troves` holds the candidates in any order. They are walked by ascending ICR; troves below MCR
/// are skipped. The walk stops when `amount` is used up, or at a trove whose partial redemption
/// would leave it below the minimum net debt.
pub fn redeem(
    ledger: &mut TroveLedger,
    troves: &mut Vec<(NonFungibleLocalId, Trove)>,
    amount: Decimal,
    max_fee_percentage: Decimal,
    ctx: &LedgerContext,
    fees: &mut FeeDecayModel,
) -> Result<RedemptionOutcome, ProtocolError> {
    if amount <= Decimal::ZERO {
        return Err(ProtocolError::ZeroAmount);
    }
    fees.require_valid_redemption_max_fee(max_fee_percentage)?;
    if ledger.tcr(ctx.registry, ctx.prices)? < ctx.parameters.mcr {
        return Err(ProtocolError::RedemptionBelowMcr);
    }

    let mut next = ledger.clone();
    let mut next_troves = troves.clone();
    let mut next_fees = fees.clone();
    let total_debt_at_start = next.total_debt();
    let gas_compensation = ctx.parameters.gas_compensation;

    let mut order: Vec<(usize, Decimal)> = Vec::new();
    for (index, (_, trove)) in next_troves.iter().enumerate() {
        if trove.is_active() {
            order.push((index, next.current_icr(trove, ctx.registry, ctx.prices)?));
        }
    }
    order.sort_by(|a, b| a.1.cmp(&b.1));

    let mut outcome = RedemptionOutcome::default();
    let mut remaining = amount;

    for (index, icr) in order {
        if remaining.is_zero() {
            break;
        }
        if icr < ctx.parameters.mcr {
            continue;
        }
        let (trove_id, trove) = &mut next_troves[index];
        next.apply_pending_rewards(trove);

        let redeemable = remaining.min(trove.debt - gas_compensation);
        if redeemable <= Decimal::ZERO {
            continue;
        }

        let market_value = ctx.registry.market_value_of(&trove.collateral, ctx.prices)?;
        let mut drawn = CollateralAmounts::default();
        for (address, held) in &trove.collateral {
            add_amount(&mut drawn, *address, mul_div(*held, redeemable, market_value));
        }

        let new_debt = trove.debt - redeemable;
        if new_debt == gas_compensation {
            let mut surplus = trove.collateral.clone();
            for (address, taken) in &drawn {
                sub_amount(&mut surplus, *address, *taken)?;
            }
            next.remove_stake(trove);
            next.remove_from_active(trove);
            trove.close(TroveStatus::ClosedByRedemption);
            outcome.gas_compensation_released += gas_compensation;
            outcome.closed.push(ClosedByRedemption {
                trove_id: trove_id.clone(),
                collateral_surplus: surplus,
            });
        } else {
            if new_debt - gas_compensation < ctx.parameters.min_net_debt {
                break;
            }
            for (address, taken) in &drawn {
                sub_amount(&mut trove.collateral, *address, *taken)?;
                let totals = next.totals.entry(*address).or_default();
                totals.active_collateral -= (*taken).min(totals.active_collateral);
            }
            trove.debt = new_debt;
            next.active_debt -= redeemable;
            next.update_stake_and_total_stakes(trove);
            next.update_reward_snapshots(trove);
            trove.nominal_icr = TroveLedger::nominal_icr(ctx.registry, &trove.collateral, trove.debt)?;
        }

        remaining -= redeemable;
        outcome.redeemed_debt += redeemable;
        for (address, taken) in drawn {
            add_amount(&mut outcome.collateral_drawn, address, taken);
        }
    }

    if outcome.redeemed_debt.is_zero() {
        return Err(ProtocolError::NothingToRedeem);
    }

    outcome.base_rate =
        next_fees.update_base_rate_from_redemption(outcome.redeemed_debt, total_debt_at_start, ctx.now)?;
    let rate = next_fees.redemption_rate(ctx.now);
    if rate > max_fee_percentage {
        return Err(ProtocolError::FeeExceedsMaximum);
    }
    for (address, drawn) in &outcome.collateral_drawn {
        let fee = *drawn * rate;
        add_amount(&mut outcome.fee, *address, fee);
        add_amount(&mut outcome.collateral_to_redeemer, *address, *drawn - fee);
    }

    *ledger = next;
    *troves = next_troves;
    *fees = next_fees;
    Ok(outcome)
}

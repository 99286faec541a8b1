//! Defines events emitted by the Tidal protocol components.

use scrypto::prelude::*;
use crate::liquidation::LiquidationMode;
use crate::shared_structs::*;

/// Kind of operation that changed a trove.
#[derive(ScryptoSbor, Clone, Copy, PartialEq, Eq, Debug)]
pub enum TroveOperation {
    Open,
    Adjust,
    Close,
    ApplyPendingRewards,
    Liquidate,
    Redeem,
}

/// Kind of fee charged by the protocol.
#[derive(ScryptoSbor, Clone, Copy, PartialEq, Eq, Debug)]
pub enum FeeKind {
    Borrowing,
    Redemption,
}

/// Event emitted when a new collateral type is accepted.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct NewCollateralEvent {
    /// The `ResourceAddress` of the newly accepted collateral token.
    pub address: ResourceAddress,
    /// Weight applied to the collateral's market value in all ratio math.
    pub ratio: Decimal,
    /// Identifier of the collateral at the price source.
    pub market_id: String,
}

/// Event emitted whenever a trove's recorded position changes.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct TroveUpdatedEvent {
    /// The `NonFungibleLocalId` of the trove receipt.
    pub trove_id: NonFungibleLocalId,
    /// Debt after the operation, gas compensation included.
    pub debt: Decimal,
    /// Collateral after the operation.
    pub collateral: CollateralAmounts,
    /// Stakes after the operation.
    pub stakes: IndexMap<ResourceAddress, Decimal>,
    pub operation: TroveOperation,
}

/// Event emitted for each liquidated trove.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct LiquidationEvent {
    pub trove_id: NonFungibleLocalId,
    /// Entire debt of the trove at liquidation, pending rewards included.
    pub liquidated_debt: Decimal,
    /// Entire collateral of the trove at liquidation, pending rewards included.
    pub liquidated_collateral: CollateralAmounts,
    /// Part of the debt absorbed by the stability pool.
    pub debt_offset: Decimal,
    /// tUSD paid to the liquidator from the gas pool.
    pub gas_compensation: Decimal,
    /// Collateral paid to the liquidator.
    pub collateral_gas_compensation: CollateralAmounts,
    pub mode: LiquidationMode,
}

/// Event emitted when a liquidation batch redistributes debt and collateral over active troves.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct RedistributionEvent {
    /// `L_coll` per collateral type after the redistribution.
    pub l_coll: IndexMap<ResourceAddress, Decimal>,
    /// `L_debt` per collateral type after the redistribution.
    pub l_debt: IndexMap<ResourceAddress, Decimal>,
    /// Collateral redistributed.
    pub collateral: CollateralAmounts,
    /// Collateral of types without any stake left, kept by the system unassigned.
    pub retained_collateral: CollateralAmounts,
    /// Debt share of those types.
    pub retained_debt: Decimal,
}

/// Event emitted when a fee is charged.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct FeePaidEvent {
    pub kind: FeeKind,
    pub amount: Decimal,
    /// tUSD for borrowing fees, the collateral drawn for redemption fees.
    pub resource: ResourceAddress,
}

/// Event emitted when the `baseRate` is recalculated.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct BaseRateUpdatedEvent {
    pub base_rate: Decimal,
    /// Unix seconds of the decay clock.
    pub last_fee_operation_time: i64,
}

/// Event emitted when an offset changes the stability pool's product and sums.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct StabilityPoolStateChangedEvent {
    pub p: Decimal,
    /// Collateral sums `S` at the current epoch and scale.
    pub sums: CollateralAmounts,
    /// TIDE sum `G` at the current epoch and scale.
    pub g: Decimal,
    pub epoch: u64,
    pub scale: u64,
    pub total_deposits: Decimal,
}

/// Event emitted when a stability pool deposit is touched.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct DepositUpdatedEvent {
    /// The `NonFungibleLocalId` of the deposit receipt.
    pub deposit_id: NonFungibleLocalId,
    pub front_end: Option<NonFungibleLocalId>,
    pub new_deposit: Decimal,
    pub collateral_gains: CollateralAmounts,
    pub tide_gain: Decimal,
}

/// Event emitted when TIDE is issued to the stability pool.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct TideIssuedEvent {
    pub amount: Decimal,
    pub total_issued: Decimal,
}

/// Event emitted when a staker collects fee gains.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct StakeRewardClaimedEvent {
    /// The `NonFungibleLocalId` of the stake receipt.
    pub staker: NonFungibleLocalId,
    pub debt_gain: Decimal,
    pub collateral_gains: CollateralAmounts,
}

/// Event emitted when a stake changes size.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct StakeChangedEvent {
    pub staker: NonFungibleLocalId,
    pub new_stake: Decimal,
    pub total_staked: Decimal,
}

/// Event emitted when collateral becomes claimable by a trove owner, or is claimed.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct CollateralSurplusEvent {
    pub trove_id: NonFungibleLocalId,
    /// Claimable collateral after the change.
    pub claimable: CollateralAmounts,
}

/// Event emitted at the end of a redemption.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct RedemptionEvent {
    pub attempted_amount: Decimal,
    pub redeemed_amount: Decimal,
    pub collateral_sent: CollateralAmounts,
    pub fee: CollateralAmounts,
}

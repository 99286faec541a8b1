use crate::errors::ProtocolError;
use scrypto::prelude::*;

/// Collateral prices for one operation, keyed by collateral resource. Read from the oracle on every
/// operation and never stored between operations.
pub type PriceSet = IndexMap<ResourceAddress, Decimal>;

/// Amounts per collateral resource.
pub type CollateralAmounts = IndexMap<ResourceAddress, Decimal>;

/// Data of a trove receipt NFT. The receipt is the trove: all position state lives here.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug)]
pub struct Trove {
    pub key_image_url: Url,
    /// Lifecycle state. Only `Active` troves carry debt, collateral and stake.
    #[mutable]
    pub status: TroveStatus,
    /// One entry per collateral type held. Zero entries are removed.
    #[mutable]
    pub collateral: CollateralAmounts,
    /// Recorded debt including the gas compensation reserve, excluding unapplied redistribution rewards.
    #[mutable]
    pub debt: Decimal,
    /// Corrected stake per collateral type, the weight used to share redistributions.
    #[mutable]
    pub stakes: IndexMap<ResourceAddress, Decimal>,
    /// Accumulator values at the last reward application, per collateral type.
    #[mutable]
    pub reward_snapshots: IndexMap<ResourceAddress, RewardSnapshot>,
    /// Key of the trove in the sorted trove index (nominal ICR of the recorded position).
    #[mutable]
    pub nominal_icr: Decimal,
}

impl Trove {
    pub fn new() -> Self {
        Self {
            key_image_url: Url::of("https://tidal.finance/trove.png"),
            status: TroveStatus::NonExistent,
            collateral: IndexMap::default(),
            debt: Decimal::ZERO,
            stakes: IndexMap::default(),
            reward_snapshots: IndexMap::default(),
            nominal_icr: Decimal::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TroveStatus::Active
    }

    /// Clears all position fields and sets a terminal status.
    pub fn close(&mut self, status: TroveStatus) {
        self.status = status;
        self.collateral = IndexMap::default();
        self.debt = Decimal::ZERO;
        self.stakes = IndexMap::default();
        self.reward_snapshots = IndexMap::default();
        self.nominal_icr = Decimal::ZERO;
    }
}

#[derive(ScryptoSbor, Clone, Copy, PartialEq, Eq, Debug)]
pub enum TroveStatus {
    NonExistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

/// Redistribution accumulator values (`L_coll`, `L_debt`) a trove last had applied.
#[derive(ScryptoSbor, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RewardSnapshot {
    pub l_coll: Decimal,
    pub l_debt: Decimal,
}

/// Receipt for a stability pool deposit. The deposit itself is tracked by the pool.
#[derive(ScryptoSbor, NonFungibleData, Clone)]
pub struct DepositReceipt {
    pub key_image_url: Url,
}

/// Badge of a registered front end.
#[derive(ScryptoSbor, NonFungibleData, Clone)]
pub struct FrontEndBadge {
    pub key_image_url: Url,
    pub kickback_rate: Decimal,
}

/// Receipt for a TIDE stake. The stake itself is tracked by the staking component.
#[derive(ScryptoSbor, NonFungibleData, Clone)]
pub struct StakeReceipt {
    pub key_image_url: Url,
}

/// Static system risk parameters, consumed by the ledgers and set by the owner.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct ProtocolParameters {
    /// Minimum collateral ratio.
    pub mcr: Decimal,
    /// Critical collateral ratio. The system is in Recovery Mode while TCR is below it.
    pub ccr: Decimal,
    /// Minimum debt of a trove, gas compensation excluded.
    pub min_net_debt: Decimal,
    /// tUSD reserved per trove, paid to the liquidator.
    pub gas_compensation: Decimal,
    /// Share of a liquidated trove's collateral paid to the liquidator is `1 / divisor`.
    pub collateral_gas_compensation_divisor: Decimal,
    /// Number of sorted index entries looked at when searching liquidation or redemption candidates.
    pub max_troves_scanned: u64,
}

impl ProtocolParameters {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.mcr < Decimal::ONE
            || self.ccr <= self.mcr
            || self.min_net_debt < Decimal::ZERO
            || self.gas_compensation <= Decimal::ZERO
            || self.collateral_gas_compensation_divisor < Decimal::ONE
            || self.max_troves_scanned == 0
        {
            return Err(ProtocolError::InvalidParameter);
        }
        Ok(())
    }
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            mcr: dec!("1.1"),
            ccr: dec!("1.5"),
            min_net_debt: dec!(1800),
            gas_compensation: dec!(200),
            collateral_gas_compensation_divisor: dec!(200),
            max_troves_scanned: 100,
        }
    }
}

/// Last oracle price accepted for a collateral type.
#[derive(ScryptoSbor, Clone, Copy, Debug)]
pub struct PriceRecord {
    pub price: Decimal,
    /// Unix seconds reported by the oracle.
    pub timestamp: i64,
}

/// A trove's position including unapplied redistribution rewards.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct TroveSummary {
    pub status: TroveStatus,
    pub collateral: CollateralAmounts,
    pub debt: Decimal,
    pub pending_collateral: CollateralAmounts,
    pub pending_debt: Decimal,
    pub icr: Decimal,
}

/// Snapshot of the stability pool's global accounting.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct PoolState {
    pub total_deposits: Decimal,
    pub p: Decimal,
    pub current_epoch: u64,
    pub current_scale: u64,
    pub total_tide_issued: Decimal,
}

/// Gains a stability pool depositor could collect right now.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct DepositorGains {
    pub compounded_deposit: Decimal,
    pub collateral_gains: CollateralAmounts,
    pub tide_gain: Decimal,
}

/// Gains a staker could collect right now.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct StakerGains {
    pub stake: Decimal,
    pub debt_gain: Decimal,
    pub collateral_gains: CollateralAmounts,
}

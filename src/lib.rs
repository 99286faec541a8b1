//! # Tidal Protocol Crate
//!
//! This crate contains the Scrypto blueprints of the Tidal protocol, a decentralized borrowing protocol
//! that lets users mint the tUSD stablecoin against troves holding one or more collateral types.
//!
//! Troves are liquidated against a stability pool of tUSD deposits, with any remainder redistributed
//! over the other troves. tUSD can be redeemed for collateral at face value, and borrowing and
//! redemption fees are paid to TIDE stakers.
//!
//! ## Modules
//!
//! Ledger modules hold the protocol's accounting as plain data and return `Result`s:
//!
//! - `math`: Decimal helpers, minute-based decay and half-life conversion.
//! - `errors`: The `ProtocolError` taxonomy shared by all ledgers.
//! - `shared_structs`: NFT data, parameters and return structs used across components.
//! - `collateral_registry`: Accepted collateral types and ratio-weighted valuation.
//! - `fee_decay`: The decaying base rate behind borrowing and redemption fees.
//! - `trove_ledger`: Trove positions, stakes and redistribution accumulators.
//! - `liquidation`: Planning of normal and recovery mode liquidations.
//! - `redemption`: Redemption of tUSD against the lowest collateralized troves.
//! - `stability_pool_ledger`: Product-sum accounting of stability pool deposits.
//! - `community_issuance`: The TIDE issuance schedule.
//! - `staking_ledger`: Fee sharing among TIDE stakers.
//! - `events`: Events emitted by the protocol components.
//!
//! Blueprints hold the resources and route calls:
//!
//! - `trove_manager`: The `TroveManager` component, owning tUSD, trove receipts and trove collateral.
//! - `stability_pool`: The `StabilityPool` component, holding deposits, collateral gains and TIDE.
//! - `staking`: The `Staking` component, holding staked TIDE and protocol fees.
//! - `borrower_operations`: The `BorrowerOperations` component, the public entry point that
//!   instantiates the protocol, reads prices and authorizes calls to the other components.

pub mod math;
pub mod errors;
pub mod shared_structs;
pub mod collateral_registry;
pub mod fee_decay;
pub mod trove_ledger;
pub mod liquidation;
pub mod redemption;
pub mod stability_pool_ledger;
pub mod community_issuance;
pub mod staking_ledger;
pub mod events;
pub mod trove_manager;
pub mod stability_pool;
pub mod staking;
pub mod borrower_operations;

#![allow(deprecated)]

//! # Tidal Staking Blueprint
//!
//! Holds staked TIDE and the protocol fees earned by it. Borrowing fees arrive as tUSD and
//! redemption fees as collateral; both are shared among stakers in proportion to their stake.
//! Gains are paid out in full whenever a stake changes.

use crate::errors::*;
use crate::events::*;
use crate::shared_structs::*;
use crate::staking_ledger::*;
use scrypto::prelude::*;

#[blueprint]
#[types(ResourceAddress, Vault, NonFungibleLocalId, StakeRecord, StakeReceipt)]
#[events(StakeRewardClaimedEvent, StakeChangedEvent)]
mod staking {
    enable_method_auth! {
        methods {
            stake => restrict_to: [OWNER];
            unstake => restrict_to: [OWNER];
            receive_debt_fee => restrict_to: [OWNER];
            receive_collateral_fee => restrict_to: [OWNER];
            get_staker_gains => PUBLIC;
            get_total_staked => PUBLIC;
            get_stake_receipt_address => PUBLIC;
        }
    }

    struct Staking {
        ledger: StakingRewardLedger,
        stakes: KeyValueStore<NonFungibleLocalId, StakeRecord>,
        tide_vault: Vault,
        /// Borrowing fees not yet paid out.
        tusd_fees: Vault,
        /// Redemption fees not yet paid out, per collateral type.
        collateral_fees: KeyValueStore<ResourceAddress, Vault>,
        stake_receipt_manager: ResourceManager,
        stake_counter: u64,
    }

    impl Staking {
        /// Instantiates the `Staking` component.
        ///
        /// # Arguments
        /// * `controller_badge_address`: The controller badge. Holding 0.75 grants OWNER.
        /// * `tide_address`: The TIDE resource.
        /// * `tusd_address`: The tUSD resource.
        /// * `dapp_def_address`: The `GlobalAddress` of the DApp Definition account.
        pub fn instantiate(
            controller_badge_address: ResourceAddress,
            tide_address: ResourceAddress,
            tusd_address: ResourceAddress,
            dapp_def_address: GlobalAddress,
        ) -> Global<Staking> {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(Staking::blueprint_id());

            let stake_receipt_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<StakeReceipt>(OwnerRole::Fixed(rule!(
                    require_amount(dec!("0.75"), controller_badge_address)
                )))
                .metadata(metadata!(
                    init {
                        "name" => "Tidal Stake", locked;
                        "symbol" => "tideSTAKE", locked;
                        "description" => "A receipt for your staked TIDE.", locked;
                        "info_url" => "https://tidal.finance", updatable;
                        "icon_url" => Url::of("https://tidal.finance/stake.png"), updatable;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address)));
                    minter_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
                ))
                .create_with_no_initial_supply()
                .into();

            Self {
                ledger: StakingRewardLedger::new(),
                stakes: KeyValueStore::new_with_registered_type(),
                tide_vault: Vault::new(tide_address),
                tusd_fees: Vault::new(tusd_address),
                collateral_fees: KeyValueStore::new_with_registered_type(),
                stake_receipt_manager,
                stake_counter: 0,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Tidal Staking".to_string(), updatable;
                    "description" => "TIDE staking and fee sharing for the Tidal protocol".to_string(), updatable;
                    "info_url" => Url::of("https://tidal.finance"), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize()
        }

        /// Stakes TIDE, paying out the stake's gains so far.
        ///
        /// # Returns
        /// * `Option<Bucket>`: A new stake receipt, if one was minted.
        /// * `Bucket`: tUSD gain.
        /// * `Vec<Bucket>`: Collateral gains.
        pub fn stake(&mut self, stake_id: Option<NonFungibleLocalId>, tide: Bucket) -> (Option<Bucket>, Bucket, Vec<Bucket>) {
            assert!(
                tide.resource_address() == self.tide_vault.resource_address(),
                "Invalid TIDE."
            );

            let (stake_id, mut record, receipt) = match stake_id {
                Some(stake_id) => {
                    let record = self
                        .stakes
                        .get(&stake_id)
                        .map(|record| (*record).clone())
                        .unwrap_or_else(StakeRecord::new);
                    (stake_id, record, None)
                }
                None => {
                    self.stake_counter += 1;
                    let stake_id = NonFungibleLocalId::integer(self.stake_counter);
                    let receipt = self.stake_receipt_manager.mint_non_fungible(
                        &stake_id,
                        StakeReceipt {
                            key_image_url: Url::of("https://tidal.finance/stake.png"),
                        },
                    );
                    (stake_id, StakeRecord::new(), Some(receipt))
                }
            };

            let gains = self.ledger.stake(&mut record, tide.amount()).or_panic();
            self.tide_vault.put(tide);
            self.stakes.insert(stake_id.clone(), record.clone());

            let (tusd_gain, collateral_gains) = self.pay_out(&stake_id, gains);
            Runtime::emit_event(StakeChangedEvent {
                staker: stake_id,
                new_stake: record.amount,
                total_staked: self.ledger.total_staked,
            });

            (receipt, tusd_gain, collateral_gains)
        }

        /// Unstakes `amount` TIDE, paying out the stake's gains. Zero only claims gains.
        ///
        /// # Returns
        /// * `Bucket`: The unstaked TIDE.
        /// * `Bucket`: tUSD gain.
        /// * `Vec<Bucket>`: Collateral gains.
        pub fn unstake(&mut self, stake_id: NonFungibleLocalId, amount: Decimal) -> (Bucket, Bucket, Vec<Bucket>) {
            let mut record = self
                .stakes
                .get(&stake_id)
                .map(|record| (*record).clone())
                .unwrap_or_else(StakeRecord::new);

            let gains = self.ledger.unstake(&mut record, amount).or_panic();
            self.stakes.insert(stake_id.clone(), record.clone());

            let tide = self.tide_vault.take(amount);
            let (tusd_gain, collateral_gains) = self.pay_out(&stake_id, gains);
            if amount > Decimal::ZERO {
                Runtime::emit_event(StakeChangedEvent {
                    staker: stake_id,
                    new_stake: record.amount,
                    total_staked: self.ledger.total_staked,
                });
            }

            (tide, tusd_gain, collateral_gains)
        }

        /// Takes in a borrowing fee. Without stakers the fee stays in the vault unassigned.
        pub fn receive_debt_fee(&mut self, fee: Bucket) {
            self.ledger.increase_f_debt(fee.amount());
            self.tusd_fees.put(fee);
        }

        /// Takes in redemption fees. Without stakers the fees stay in the vaults unassigned.
        pub fn receive_collateral_fee(&mut self, fees: Vec<Bucket>) {
            for fee in fees {
                let address = fee.resource_address();
                self.ledger.increase_f_coll(address, fee.amount());
                if self.collateral_fees.get(&address).is_none() {
                    self.collateral_fees.insert(address, Vault::new(address));
                }
                self.collateral_fees
                    .get_mut(&address)
                    .expect("Fee vault missing after creation")
                    .put(fee);
            }
        }

        pub fn get_staker_gains(&self, stake_id: NonFungibleLocalId) -> StakerGains {
            let record = self
                .stakes
                .get(&stake_id)
                .map(|record| (*record).clone())
                .unwrap_or_else(StakeRecord::new);
            let gains = self.ledger.pending_gains(&record);
            StakerGains {
                stake: record.amount,
                debt_gain: gains.debt_gain,
                collateral_gains: gains.collateral_gains,
            }
        }

        pub fn get_total_staked(&self) -> Decimal {
            self.ledger.total_staked
        }

        pub fn get_stake_receipt_address(&self) -> ResourceAddress {
            self.stake_receipt_manager.address()
        }

        fn pay_out(&mut self, stake_id: &NonFungibleLocalId, gains: StakingGains) -> (Bucket, Vec<Bucket>) {
            let tusd_amount = gains.debt_gain.min(self.tusd_fees.amount());
            let tusd_gain = self
                .tusd_fees
                .take_advanced(tusd_amount, WithdrawStrategy::Rounded(RoundingMode::ToZero));

            let mut collateral_gains: Vec<Bucket> = vec![];
            for (address, amount) in &gains.collateral_gains {
                if *amount <= Decimal::ZERO {
                    continue;
                }
                if let Some(mut vault) = self.collateral_fees.get_mut(address) {
                    let amount = (*amount).min(vault.amount());
                    collateral_gains.push(vault.take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero)));
                }
            }

            if !tusd_gain.is_empty() || !collateral_gains.is_empty() {
                Runtime::emit_event(StakeRewardClaimedEvent {
                    staker: stake_id.clone(),
                    debt_gain: tusd_gain.amount(),
                    collateral_gains: gains.collateral_gains,
                });
            }

            (tusd_gain, collateral_gains)
        }
    }
}

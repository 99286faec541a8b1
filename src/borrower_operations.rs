#![allow(deprecated)]

//! # Tidal Borrower Operations Blueprint
//!
//! The `BorrowerOperations` component is the public entry point of the Tidal protocol. It creates
//! the protocol's components and resources, and routes every user and admin action to them.
//!
//! ## Responsibilities
//! - **Routing:** Forwards trove, liquidation and redemption calls to the `TroveManager`, deposits
//!   to the `StabilityPool` and stakes to `Staking`. Liquidations are completed here by offsetting the
//!   liquidated debt against the stability pool and burning the consumed deposits.
//! - **Authorization:** Holds the controller badges and uses them to call the restricted methods of
//!   the other components.
//! - **Prices:** Reads a price per collateral type from the oracle on every operation and applies the
//!   fault policy of [`resolve_price`].
//! - **Proof handling:** Checks trove, deposit, front end and stake receipts before forwarding calls
//!   acting on them.
//! - **Fees:** Passes borrowing and redemption fees on to `Staking`.
//! - **DApp Definition Management:** Creates and manages the DApp Definition of the protocol.

use crate::community_issuance::*;
use crate::errors::*;
use crate::fee_decay::*;
use crate::math::*;
use crate::shared_structs::*;
use crate::stability_pool::stability_pool::*;
use crate::staking::staking::*;
use crate::trove_manager::trove_manager::*;
use scrypto::prelude::*;

/// Applies the oracle fault policy to one reading.
///
/// A reading is usable if its price is positive and it is at most `max_price_age` seconds old.
/// Otherwise the last good price is used if it is at most `2 * max_price_age` seconds old.
///
/// # Returns
/// * `Decimal`: The price to use.
/// * `bool`: Whether the reading itself was usable and should be recorded as the last good price.
pub fn resolve_price(
    price: Decimal,
    timestamp: i64,
    last_good: Option<PriceRecord>,
    now: i64,
    max_price_age: i64,
) -> Result<(Decimal, bool), ProtocolError> {
    if price > Decimal::ZERO && now - timestamp <= max_price_age {
        return Ok((price, true));
    }
    match last_good {
        Some(record) if now - record.timestamp <= max_price_age * 2 => Ok((record.price, false)),
        _ if price <= Decimal::ZERO => Err(ProtocolError::InvalidPrice),
        _ => Err(ProtocolError::StalePrice),
    }
}

#[blueprint]
#[types(ResourceAddress, PriceRecord)]
mod borrower_operations {
    enable_method_auth! {
        methods {
            open_trove => PUBLIC;
            add_collateral_to_trove => PUBLIC;
            withdraw_collateral => PUBLIC;
            withdraw_debt => PUBLIC;
            repay_debt => PUBLIC;
            adjust_trove => PUBLIC;
            close_trove => PUBLIC;
            claim_collateral_surplus => PUBLIC;
            liquidate => PUBLIC;
            liquidate_troves => PUBLIC;
            batch_liquidate_troves => PUBLIC;
            redeem => PUBLIC;
            provide_to_stability_pool => PUBLIC;
            withdraw_from_stability_pool => PUBLIC;
            register_front_end => PUBLIC;
            claim_front_end_rewards => PUBLIC;
            stake => PUBLIC;
            unstake => PUBLIC;
            get_prices => PUBLIC;
            get_trove_summary => PUBLIC;
            get_icr => PUBLIC;
            get_tcr => PUBLIC;
            is_recovery_mode => PUBLIC;

            receive_badges => restrict_to: [OWNER];
            add_collateral => restrict_to: [OWNER];
            set_collateral_ratio => restrict_to: [OWNER];
            set_collateral_active => restrict_to: [OWNER];
            set_protocol_parameters => restrict_to: [OWNER];
            set_fee_parameters => restrict_to: [OWNER];
            set_base_rate => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
            add_claimed_website => restrict_to: [OWNER];
        }
    }

    /// Entry point and authorization layer of the Tidal protocol.
    struct BorrowerOperations {
        /// Vault holding controller badges used to authorize calls to the other protocol components.
        badge_vault: FungibleVault,
        /// Global reference to the price oracle component.
        oracle: Global<AnyComponent>,
        /// The method called on the oracle, taking a collateral address and returning `(price, timestamp)`.
        oracle_method_name: String,
        /// Maximum age in seconds of a usable oracle reading.
        max_price_age: i64,
        /// Last usable oracle reading per collateral type.
        last_good_prices: KeyValueStore<ResourceAddress, PriceRecord>,
        /// All accepted collateral types, active or not.
        collaterals: Vec<ResourceAddress>,
        trove_manager: Global<TroveManager>,
        stability_pool: Global<StabilityPool>,
        staking: Global<Staking>,
        trove_receipt_manager: ResourceManager,
        deposit_receipt_address: ResourceAddress,
        front_end_badge_address: ResourceAddress,
        stake_receipt_address: ResourceAddress,
        /// Global reference to the DApp Definition account associated with the protocol.
        dapp_def_account: Global<Account>,
    }

    impl BorrowerOperations {
        /// Instantiates the Tidal protocol: `BorrowerOperations`, `TroveManager`, `StabilityPool` and
        /// `Staking`, the tUSD and TIDE resources, all receipt NFTs and the DApp Definition.
        ///
        /// # Arguments
        /// * `owner_badge_address`: The badge required for OWNER actions on this component.
        /// * `oracle_address`: The `ComponentAddress` of the price oracle.
        /// * `tide_allocation`: TIDE minted on top of the stability pool supply and returned to the caller.
        ///
        /// # Returns
        /// * The four components.
        /// * `Bucket`: One controller badge, for the instantiator to finish setup with.
        /// * `Bucket`: The TIDE allocation.
        pub fn new(
            owner_badge_address: ResourceAddress,
            oracle_address: ComponentAddress,
            tide_allocation: Decimal,
        ) -> (
            Global<BorrowerOperations>,
            Global<TroveManager>,
            Global<StabilityPool>,
            Global<Staking>,
            Bucket,
            Bucket,
        ) {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(BorrowerOperations::blueprint_id());

            let dapp_def_account =
                Blueprint::<Account>::create_advanced(OwnerRole::Updatable(rule!(allow_all)), None); // owner role is reset once metadata is set
            let dapp_def_address = GlobalAddress::from(dapp_def_account.address());

            let (trove_manager, mut controller_badge, tusd_address, trove_receipt_address) =
                TroveManager::instantiate(dapp_def_address);
            let controller_badge_address = controller_badge.resource_address();
            let controller_badge_to_return = controller_badge.take(Decimal::ONE);

            let owner_role_access_rule = rule!(
                require_amount(dec!("0.75"), owner_badge_address)
                    || require_amount(dec!("0.75"), controller_badge_address)
            );
            let owner_role = OwnerRole::Fixed(owner_role_access_rule.clone());

            let mut tide: Bucket = ResourceBuilder::new_fungible(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_badge_address
            ))))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata!(
                init {
                    "name" => "Tidal", updatable;
                    "symbol" => "TIDE", updatable;
                    "info_url" => "https://tidal.finance", updatable;
                    "icon_url" => Url::of("https://tidal.finance/tide-logo.png"), updatable;
                    "dapp_definitions" => vec![dapp_def_address], updatable;
                }
            ))
            .mint_initial_supply(tide_supply_cap() + tide_allocation)
            .into();
            let tide_address = tide.resource_address();

            let stability_pool = StabilityPool::instantiate(
                controller_badge_address,
                tusd_address,
                tide.take(tide_supply_cap()),
                yearly_halving_factor(),
                dapp_def_address,
            );
            let staking = Staking::instantiate(controller_badge_address, tide_address, tusd_address, dapp_def_address);

            let deposit_receipt_address = stability_pool.get_deposit_receipt_address();
            let front_end_badge_address = stability_pool.get_front_end_badge_address();
            let stake_receipt_address = staking.get_stake_receipt_address();

            dapp_def_account.set_metadata("account_type", String::from("dapp definition"));
            dapp_def_account.set_metadata("name", "Tidal Protocol".to_string());
            dapp_def_account
                .set_metadata("description", "Tidal lets you borrow tUSD against a basket of collaterals.".to_string());
            dapp_def_account.set_metadata("info_url", Url::of("https://tidal.finance"));
            dapp_def_account.set_metadata("icon_url", Url::of("https://tidal.finance/tidal-logo.png"));
            dapp_def_account.set_metadata(
                "claimed_websites",
                vec![UncheckedOrigin::of("https://tidal.finance")],
            );
            dapp_def_account.set_metadata(
                "tags",
                vec![
                    String::from("defi"),
                    String::from("stablecoin"),
                    String::from("borrowing"),
                    String::from("usd"),
                ],
            );
            dapp_def_account.set_metadata("dapp_category", String::from("defi"));
            dapp_def_account.set_metadata(
                "claimed_entities",
                vec![
                    GlobalAddress::from(component_address.clone()),
                    GlobalAddress::from(trove_manager.address()),
                    GlobalAddress::from(stability_pool.address()),
                    GlobalAddress::from(staking.address()),
                    GlobalAddress::from(oracle_address),
                    GlobalAddress::from(tusd_address),
                    GlobalAddress::from(tide_address),
                    GlobalAddress::from(trove_receipt_address),
                    GlobalAddress::from(deposit_receipt_address),
                    GlobalAddress::from(front_end_badge_address),
                    GlobalAddress::from(stake_receipt_address),
                ],
            );

            dapp_def_account.set_owner_role(owner_role_access_rule);

            let borrower_operations = Self {
                badge_vault: FungibleVault::with_bucket(controller_badge.as_fungible()),
                oracle: Global::from(oracle_address),
                oracle_method_name: "get_price".to_string(),
                max_price_age: 3600,
                last_good_prices: KeyValueStore::new_with_registered_type(),
                collaterals: vec![],
                trove_manager,
                stability_pool,
                staking,
                trove_receipt_manager: ResourceManager::from_address(trove_receipt_address),
                deposit_receipt_address,
                front_end_badge_address,
                stake_receipt_address,
                dapp_def_account,
            }
            .instantiate()
            .prepare_to_globalize(owner_role)
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Tidal Borrower Operations".to_string(), updatable;
                    "description" => "The entry point of the Tidal protocol".to_string(), updatable;
                    "info_url" => Url::of("https://tidal.finance"), updatable;
                    "icon_url" => Url::of("https://tidal.finance/tidal-logo.png"), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (
                borrower_operations,
                trove_manager,
                stability_pool,
                staking,
                controller_badge_to_return,
                tide,
            )
        }

        //==================================================================
        //                         ADMIN METHODS
        //==================================================================

        /// Takes back controller badges, e.g. the one handed out at instantiation.
        pub fn receive_badges(&mut self, badge_bucket: Bucket) {
            self.badge_vault.put(badge_bucket.as_fungible());
        }

        /// Accepts a new collateral type in the trove manager and the stability pool.
        ///
        /// # Arguments
        /// * `address`: The collateral resource.
        /// * `ratio`: Weight applied to the collateral's value in all ratio math, in `(0, 1]`.
        /// * `market_id`: Identifier of the collateral at the price source.
        pub fn add_collateral(&mut self, address: ResourceAddress, ratio: Decimal, market_id: String) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.new_collateral(address, ratio, market_id);
                self.stability_pool.new_collateral(address);
            });
            self.collaterals.push(address);
        }

        pub fn set_collateral_ratio(&mut self, address: ResourceAddress, ratio: Decimal) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.set_collateral_ratio(address, ratio)
            });
        }

        pub fn set_collateral_active(&mut self, address: ResourceAddress, active: bool) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.set_collateral_active(address, active)
            });
        }

        pub fn set_protocol_parameters(&mut self, parameters: ProtocolParameters) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.set_protocol_parameters(parameters)
            });
        }

        /// Sets the fee parameters.
        ///
        /// # Arguments
        /// * `fee_floor`: Minimum borrowing rate.
        /// * `redemption_fee_floor`: Minimum redemption rate.
        /// * `max_fee`: Maximum rate, also the cap of the base rate.
        /// * `base_rate_half_life`: Half-life of the base rate in minutes.
        /// * `beta`: Redemption sensitivity divisor.
        /// * `issuance_feedback`: Weight of borrowing on the base rate. Zero disables it.
        pub fn set_fee_parameters(
            &mut self,
            fee_floor: Decimal,
            redemption_fee_floor: Decimal,
            max_fee: Decimal,
            base_rate_half_life: Decimal,
            beta: Decimal,
            issuance_feedback: Decimal,
        ) {
            let minute_decay_factor = match per_minute_factor(base_rate_half_life) {
                Some(factor) => factor,
                None => panic!("{}", ProtocolError::InvalidParameter),
            };
            let parameters = FeeParameters {
                fee_floor,
                redemption_fee_floor,
                max_fee,
                minute_decay_factor,
                beta,
                issuance_feedback,
            };
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.set_fee_parameters(parameters)
            });
        }

        pub fn set_base_rate(&mut self, base_rate: Decimal) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.set_base_rate(base_rate)
            });
        }

        /// Updates the oracle used for all price reads.
        ///
        /// # Arguments
        /// * `oracle_address`: The `ComponentAddress` of the new oracle.
        /// * `method_name`: The oracle method taking a collateral address and returning `(price, timestamp)`.
        /// * `max_price_age`: Maximum age in seconds of a usable reading.
        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, method_name: String, max_price_age: i64) {
            assert!(max_price_age > 0, "Maximum price age must be positive.");
            self.oracle = Global::from(oracle_address);
            self.oracle_method_name = method_name;
            self.max_price_age = max_price_age;
        }

        /// Adds a website origin to the claimed websites of the DApp Definition.
        pub fn add_claimed_website(&mut self, website: UncheckedOrigin) {
            match self.dapp_def_account.get_metadata("claimed_websites") {
                Ok(Some(claimed_websites)) => {
                    let mut claimed_websites: Vec<UncheckedOrigin> = claimed_websites;
                    claimed_websites.push(website);
                    self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                        self.dapp_def_account
                            .set_metadata("claimed_websites", claimed_websites);
                    });
                }
                Ok(None) | Err(_) => {
                    self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                        self.dapp_def_account
                            .set_metadata("claimed_websites", vec![website]);
                    });
                }
            }
        }

        //==================================================================
        //                             TROVES
        //==================================================================

        /// Opens a trove. The debt recorded is `tusd_amount` plus the borrowing fee plus the gas
        /// compensation reserve.
        ///
        /// # Arguments
        /// * `trove_proof`: Proof of a closed trove receipt to reopen. `None` mints a new receipt.
        /// * `collateral`: Buckets of one or more accepted collateral types.
        /// * `tusd_amount`: tUSD to receive.
        /// * `max_fee_percentage`: The highest borrowing rate accepted.
        ///
        /// # Returns
        /// * `Bucket`: The borrowed tUSD.
        /// * `Option<Bucket>`: The new trove receipt, if one was minted.
        pub fn open_trove(
            &mut self,
            trove_proof: Option<NonFungibleProof>,
            collateral: Vec<Bucket>,
            tusd_amount: Decimal,
            max_fee_percentage: Decimal,
        ) -> (Bucket, Option<Bucket>) {
            let trove_id = trove_proof.map(|proof| self.trove_id_of(proof));
            let prices = self.fetch_prices();

            let (tusd, fee, receipt) = self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager
                    .open_trove(trove_id, collateral, tusd_amount, max_fee_percentage, prices)
            });
            self.pay_borrowing_fee(fee);

            (tusd, receipt)
        }

        /// Adds collateral to a trove.
        pub fn add_collateral_to_trove(&mut self, trove_proof: NonFungibleProof, collateral: Vec<Bucket>) {
            let (withdrawn, tusd) = self.adjust(
                trove_proof,
                collateral,
                IndexMap::default(),
                Decimal::ZERO,
                false,
                Decimal::ZERO,
                None,
            );
            Self::expect_nothing(withdrawn, tusd);
        }

        /// Withdraws collateral from a trove.
        ///
        /// # Arguments
        /// * `amounts`: Amount to withdraw per collateral type.
        pub fn withdraw_collateral(
            &mut self,
            trove_proof: NonFungibleProof,
            amounts: IndexMap<ResourceAddress, Decimal>,
        ) -> Vec<Bucket> {
            let (withdrawn, tusd) = self.adjust(trove_proof, vec![], amounts, Decimal::ZERO, false, Decimal::ZERO, None);
            Self::expect_nothing(vec![], tusd);
            withdrawn
        }

        /// Borrows more tUSD against a trove.
        pub fn withdraw_debt(&mut self, trove_proof: NonFungibleProof, amount: Decimal, max_fee_percentage: Decimal) -> Bucket {
            let (withdrawn, tusd) = self.adjust(
                trove_proof,
                vec![],
                IndexMap::default(),
                amount,
                true,
                max_fee_percentage,
                None,
            );
            Self::expect_nothing(withdrawn, None);
            match tusd {
                Some(tusd) => tusd,
                None => panic!("{}", ProtocolError::ZeroDebtIncrease),
            }
        }

        /// Repays `amount` of a trove's debt out of `payment` and returns the rest of `payment`.
        pub fn repay_debt(&mut self, trove_proof: NonFungibleProof, payment: Bucket, amount: Decimal) -> Bucket {
            let (withdrawn, leftover) = self.adjust(
                trove_proof,
                vec![],
                IndexMap::default(),
                amount,
                false,
                Decimal::ZERO,
                Some(payment),
            );
            Self::expect_nothing(withdrawn, None);
            match leftover {
                Some(leftover) => leftover,
                None => panic!("{}", ProtocolError::InsufficientDebtTokenBalance),
            }
        }

        /// Changes collateral and debt of a trove in one operation.
        ///
        /// # Arguments
        /// * `trove_proof`: Proof of the trove receipt.
        /// * `collateral_added`: Collateral to deposit. Cannot be combined with a withdrawal.
        /// * `collateral_withdrawn`: Collateral to withdraw, per type.
        /// * `debt_change`: tUSD to borrow or repay.
        /// * `is_debt_increase`: Whether `debt_change` is borrowed.
        /// * `max_fee_percentage`: The highest borrowing rate accepted.
        /// * `repayment`: tUSD covering a repayment.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: Withdrawn collateral.
        /// * `Option<Bucket>`: Borrowed tUSD, or what is left of `repayment`.
        pub fn adjust_trove(
            &mut self,
            trove_proof: NonFungibleProof,
            collateral_added: Vec<Bucket>,
            collateral_withdrawn: IndexMap<ResourceAddress, Decimal>,
            debt_change: Decimal,
            is_debt_increase: bool,
            max_fee_percentage: Decimal,
            repayment: Option<Bucket>,
        ) -> (Vec<Bucket>, Option<Bucket>) {
            self.adjust(
                trove_proof,
                collateral_added,
                collateral_withdrawn,
                debt_change,
                is_debt_increase,
                max_fee_percentage,
                repayment,
            )
        }

        /// Closes a trove, repaying its debt minus the gas compensation reserve out of `payment`.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: The trove's collateral.
        /// * `Bucket`: What is left of `payment`.
        pub fn close_trove(&mut self, trove_proof: NonFungibleProof, payment: Bucket) -> (Vec<Bucket>, Bucket) {
            let trove_id = self.trove_id_of(trove_proof);
            let prices = self.fetch_prices();

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.close_trove(trove_id, payment, prices)
            })
        }

        /// Claims collateral left to a trove's owner by a capped liquidation or a redemption.
        pub fn claim_collateral_surplus(&mut self, trove_proof: NonFungibleProof) -> Vec<Bucket> {
            let trove_id = self.trove_id_of(trove_proof);
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.claim_collateral_surplus(trove_id)
            })
        }

        //==================================================================
        //                          LIQUIDATIONS
        //==================================================================

        /// Liquidates a single trove.
        ///
        /// # Returns
        /// * `Bucket`: tUSD gas compensation.
        /// * `Vec<Bucket>`: Collateral gas compensation.
        pub fn liquidate(&mut self, trove_id: NonFungibleLocalId) -> (Bucket, Vec<Bucket>) {
            self.batch_liquidate_troves(vec![trove_id])
        }

        /// Liquidates up to `max_troves` of the riskiest troves.
        ///
        /// # Returns
        /// * `Bucket`: tUSD gas compensation.
        /// * `Vec<Bucket>`: Collateral gas compensation.
        pub fn liquidate_troves(&mut self, max_troves: u64) -> (Bucket, Vec<Bucket>) {
            let prices = self.fetch_prices();
            let stability_pool_deposits = self.stability_pool.get_total_deposits();

            let (debt_to_offset, pool_collateral, gas_compensation, collateral_gas_compensation) =
                self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                    self.trove_manager
                        .liquidate_troves(max_troves, stability_pool_deposits, prices)
                });
            self.offset(debt_to_offset, pool_collateral);

            (gas_compensation, collateral_gas_compensation)
        }

        /// Liquidates the given troves as far as they qualify.
        ///
        /// # Returns
        /// * `Bucket`: tUSD gas compensation.
        /// * `Vec<Bucket>`: Collateral gas compensation.
        pub fn batch_liquidate_troves(&mut self, trove_ids: Vec<NonFungibleLocalId>) -> (Bucket, Vec<Bucket>) {
            let prices = self.fetch_prices();
            let stability_pool_deposits = self.stability_pool.get_total_deposits();

            let (debt_to_offset, pool_collateral, gas_compensation, collateral_gas_compensation) =
                self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                    self.trove_manager
                        .batch_liquidate_troves(trove_ids, stability_pool_deposits, prices)
                });
            self.offset(debt_to_offset, pool_collateral);

            (gas_compensation, collateral_gas_compensation)
        }

        //==================================================================
        //                           REDEMPTIONS
        //==================================================================

        /// Redeems tUSD for collateral at face value, minus the redemption fee.
        ///
        /// # Arguments
        /// * `payment`: tUSD to redeem.
        /// * `max_fee_percentage`: The highest redemption rate accepted.
        /// * `max_iterations`: Upper bound on the troves considered. Zero uses the protocol default.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: Redeemed collateral.
        /// * `Bucket`: Unredeemed tUSD.
        pub fn redeem(&mut self, payment: Bucket, max_fee_percentage: Decimal, max_iterations: u64) -> (Vec<Bucket>, Bucket) {
            let prices = self.fetch_prices();

            let (collateral, fee, leftover) = self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager
                    .redeem_collateral(payment, max_fee_percentage, max_iterations, prices)
            });
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.staking.receive_collateral_fee(fee)
            });

            (collateral, leftover)
        }

        //==================================================================
        //                         STABILITY POOL
        //==================================================================

        /// Deposits tUSD into the stability pool.
        ///
        /// # Arguments
        /// * `deposit_proof`: Proof of an existing deposit receipt. `None` mints a new one.
        /// * `front_end_id`: Front end to tag a new deposit with.
        /// * `tusd`: tUSD to deposit.
        ///
        /// # Returns
        /// * `Option<Bucket>`: The new deposit receipt, if one was minted.
        /// * `Vec<Bucket>`: Collateral gains.
        /// * `Bucket`: TIDE gain.
        pub fn provide_to_stability_pool(
            &mut self,
            deposit_proof: Option<NonFungibleProof>,
            front_end_id: Option<NonFungibleLocalId>,
            tusd: Bucket,
        ) -> (Option<Bucket>, Vec<Bucket>, Bucket) {
            let deposit_id = deposit_proof.map(|proof| {
                Self::checked_id(proof, self.deposit_receipt_address, "Incorrect proof! Are you sure this deposit is yours?")
            });
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool.provide_to_pool(deposit_id, front_end_id, tusd)
            })
        }

        /// Withdraws up to `amount` tUSD from a deposit. Zero only claims gains.
        ///
        /// # Panics
        /// * If `amount` is positive while any trove has ICR < MCR.
        pub fn withdraw_from_stability_pool(
            &mut self,
            deposit_proof: NonFungibleProof,
            amount: Decimal,
        ) -> (Bucket, Vec<Bucket>, Bucket) {
            let deposit_id = Self::checked_id(
                deposit_proof,
                self.deposit_receipt_address,
                "Incorrect proof! Are you sure this deposit is yours?",
            );
            if amount > Decimal::ZERO {
                let prices = self.fetch_prices();
                if self.trove_manager.has_undercollateralized_troves(prices) {
                    panic!("{}", ProtocolError::UndercollateralizedTroves);
                }
            }
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool.withdraw_from_pool(deposit_id, amount)
            })
        }

        /// Registers a front end with the share of TIDE gains it passes on to its depositors.
        pub fn register_front_end(&mut self, kickback_rate: Decimal) -> Bucket {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool.register_front_end(kickback_rate)
            })
        }

        /// Pays out the TIDE a front end has earned.
        pub fn claim_front_end_rewards(&mut self, front_end_proof: NonFungibleProof) -> Bucket {
            let front_end_id = Self::checked_id(
                front_end_proof,
                self.front_end_badge_address,
                "Incorrect proof! Are you sure this front end is yours?",
            );
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.stability_pool.claim_front_end_rewards(front_end_id)
            })
        }

        //==================================================================
        //                             STAKING
        //==================================================================

        /// Stakes TIDE.
        ///
        /// # Returns
        /// * `Option<Bucket>`: The new stake receipt, if one was minted.
        /// * `Bucket`: tUSD gain.
        /// * `Vec<Bucket>`: Collateral gains.
        pub fn stake(&mut self, stake_proof: Option<NonFungibleProof>, tide: Bucket) -> (Option<Bucket>, Bucket, Vec<Bucket>) {
            let stake_id = stake_proof.map(|proof| {
                Self::checked_id(proof, self.stake_receipt_address, "Incorrect proof! Are you sure this stake is yours?")
            });
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.staking.stake(stake_id, tide)
            })
        }

        /// Unstakes `amount` TIDE, failing if it exceeds the stake. Zero only claims gains.
        ///
        /// # Returns
        /// * `Bucket`: Unstaked TIDE.
        /// * `Bucket`: tUSD gain.
        /// * `Vec<Bucket>`: Collateral gains.
        pub fn unstake(&mut self, stake_proof: NonFungibleProof, amount: Decimal) -> (Bucket, Bucket, Vec<Bucket>) {
            let stake_id = Self::checked_id(
                stake_proof,
                self.stake_receipt_address,
                "Incorrect proof! Are you sure this stake is yours?",
            );
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.staking.unstake(stake_id, amount)
            })
        }

        //==================================================================
        //                         GETTER METHODS
        //==================================================================

        /// Current prices of all collateral types, after the oracle fault policy.
        pub fn get_prices(&self) -> PriceSet {
            self.read_prices().into_iter().map(|(address, (price, _))| (address, price)).collect()
        }

        pub fn get_trove_summary(&self, trove_id: NonFungibleLocalId) -> TroveSummary {
            self.trove_manager.get_trove_summary(trove_id, self.get_prices())
        }

        pub fn get_icr(&self, trove_id: NonFungibleLocalId) -> Decimal {
            self.trove_manager.get_icr(trove_id, self.get_prices())
        }

        pub fn get_tcr(&self) -> Decimal {
            self.trove_manager.get_tcr(self.get_prices())
        }

        pub fn is_recovery_mode(&self) -> bool {
            self.trove_manager.is_recovery_mode(self.get_prices())
        }

        //==================================================================
        //                         HELPER METHODS
        //==================================================================

        fn adjust(
            &mut self,
            trove_proof: NonFungibleProof,
            collateral_added: Vec<Bucket>,
            collateral_withdrawn: IndexMap<ResourceAddress, Decimal>,
            debt_change: Decimal,
            is_debt_increase: bool,
            max_fee_percentage: Decimal,
            repayment: Option<Bucket>,
        ) -> (Vec<Bucket>, Option<Bucket>) {
            let trove_id = self.trove_id_of(trove_proof);
            let prices = self.fetch_prices();

            let (withdrawn, tusd, fee) = self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.trove_manager.adjust_trove(
                    trove_id,
                    collateral_added,
                    collateral_withdrawn,
                    debt_change,
                    is_debt_increase,
                    max_fee_percentage,
                    repayment,
                    prices,
                )
            });
            if let Some(fee) = fee {
                self.pay_borrowing_fee(fee);
            }

            (withdrawn, tusd)
        }

        /// Completes a liquidation: cancels the offset debt against the stability pool, which hands
        /// back the consumed deposits for burning.
        fn offset(&mut self, debt_to_offset: Decimal, pool_collateral: Vec<Bucket>) {
            if debt_to_offset.is_zero() && pool_collateral.is_empty() {
                return;
            }
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                let consumed = self.stability_pool.offset(debt_to_offset, pool_collateral);
                self.trove_manager.burn_tusd(consumed);
            });
        }

        fn pay_borrowing_fee(&mut self, fee: Bucket) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.staking.receive_debt_fee(fee)
            });
        }

        /// Reads the oracle for every collateral type and records usable readings.
        fn fetch_prices(&mut self) -> PriceSet {
            let mut prices = PriceSet::default();
            for (address, (price, reading)) in self.read_prices() {
                if let Some(record) = reading {
                    self.last_good_prices.insert(address, record);
                }
                prices.insert(address, price);
            }
            prices
        }

        /// Oracle prices per collateral type, with the reading to record as the last good price.
        fn read_prices(&self) -> IndexMap<ResourceAddress, (Decimal, Option<PriceRecord>)> {
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            let mut prices = IndexMap::default();
            for address in &self.collaterals {
                let (price, timestamp): (Decimal, i64) = self
                    .oracle
                    .call_raw(&self.oracle_method_name, scrypto_args!(*address));
                let last_good = self.last_good_prices.get(address).map(|record| *record);
                let (price, usable) = resolve_price(price, timestamp, last_good, now, self.max_price_age).or_panic();
                let reading = if usable {
                    Some(PriceRecord { price, timestamp })
                } else {
                    None
                };
                prices.insert(*address, (price, reading));
            }
            prices
        }

        fn trove_id_of(&self, trove_proof: NonFungibleProof) -> NonFungibleLocalId {
            let trove_proof = trove_proof.check_with_message(
                self.trove_receipt_manager.address(),
                "Incorrect proof! Are you sure this trove is yours?",
            );
            let trove = trove_proof.non_fungible::<Trove>();
            trove.local_id().clone()
        }

        fn checked_id(proof: NonFungibleProof, address: ResourceAddress, message: &str) -> NonFungibleLocalId {
            proof.check_with_message(address, message).non_fungible_local_id()
        }

        /// Single-purpose trove calls never return the other kind of output.
        fn expect_nothing(withdrawn: Vec<Bucket>, tusd: Option<Bucket>) {
            for bucket in withdrawn {
                assert!(bucket.is_empty(), "Unexpected collateral returned.");
                bucket.drop_empty();
            }
            if let Some(tusd) = tusd {
                assert!(tusd.is_empty(), "Unexpected tUSD returned.");
                tusd.drop_empty();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const MAX_AGE: i64 = 3600;

    fn last_good(age: i64) -> Option<PriceRecord> {
        Some(PriceRecord {
            price: dec!(180),
            timestamp: NOW - age,
        })
    }

    #[test]
    fn fresh_reading_is_used_and_recorded() {
        let resolved = resolve_price(dec!(200), NOW - MAX_AGE, last_good(10), NOW, MAX_AGE);
        assert_eq!(resolved, Ok((dec!(200), true)));
    }

    #[test]
    fn stale_reading_falls_back_within_twice_the_max_age() {
        let resolved = resolve_price(dec!(200), NOW - MAX_AGE - 1, last_good(2 * MAX_AGE), NOW, MAX_AGE);
        assert_eq!(resolved, Ok((dec!(180), false)));

        let resolved = resolve_price(dec!(200), NOW - MAX_AGE - 1, last_good(2 * MAX_AGE + 1), NOW, MAX_AGE);
        assert_eq!(resolved, Err(ProtocolError::StalePrice));

        let resolved = resolve_price(dec!(200), NOW - MAX_AGE - 1, None, NOW, MAX_AGE);
        assert_eq!(resolved, Err(ProtocolError::StalePrice));
    }

    #[test]
    fn non_positive_price_falls_back_or_fails() {
        let resolved = resolve_price(Decimal::ZERO, NOW, last_good(60), NOW, MAX_AGE);
        assert_eq!(resolved, Ok((dec!(180), false)));

        let resolved = resolve_price(dec!(-1), NOW, None, NOW, MAX_AGE);
        assert_eq!(resolved, Err(ProtocolError::InvalidPrice));
    }
}

#![allow(deprecated)]

//! # Trove Manager Blueprint
//!
//! Core component of the Tidal protocol. It owns the tUSD stablecoin, the trove receipt NFTs and all
//! collateral backing troves, and executes every change to trove state.
//!
//! ## Responsibilities
//! - **Troves:** Opening, adjusting and closing troves through the [`TroveLedger`], with the receipt
//!   NFT data as the single record of each position.
//! - **Sorted index:** Active troves are indexed in an `AvlTree` by nominal ICR. Liquidation and
//!   redemption scans start at the lowest entries and re-sort the candidates by real ICR.
//! - **Liquidations:** Planned by [`liquidate_batch`]. Collateral going to the stability pool and the
//!   liquidator's compensation are handed back to the caller, which routes them.
//! - **Redemptions:** Executed by [`redeem`]. Redeemed tUSD is burned here.
//! - **Collateral surplus:** Collateral left over by capped liquidations and by redemptions that close
//!   a trove, claimable by the trove's owner.
//! - **Fees:** The [`FeeDecayModel`] behind borrowing and redemption fees. Fees are returned as
//!   buckets for the caller to pass on to stakers.
//!
//! All methods are restricted to holders of the controller badge. Prices are supplied by the caller
//! on every operation and never stored.

use crate::collateral_registry::*;
use crate::errors::*;
use crate::events::*;
use crate::fee_decay::*;
use crate::liquidation::*;
use crate::redemption::*;
use crate::shared_structs::*;
use crate::trove_ledger::*;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

#[blueprint]
#[types(ResourceAddress, Vault, Decimal, NonFungibleLocalId, Vec<NonFungibleLocalId>, AvlTree<Decimal, Vec<NonFungibleLocalId>>, IndexMap<ResourceAddress, Decimal>, Trove)]
#[events(
    NewCollateralEvent,
    TroveUpdatedEvent,
    LiquidationEvent,
    RedistributionEvent,
    FeePaidEvent,
    BaseRateUpdatedEvent,
    CollateralSurplusEvent,
    RedemptionEvent,
)]
mod trove_manager {
    enable_method_auth! {
        methods {
            new_collateral => restrict_to: [OWNER];
            set_collateral_ratio => restrict_to: [OWNER];
            set_collateral_active => restrict_to: [OWNER];
            set_protocol_parameters => restrict_to: [OWNER];
            set_fee_parameters => restrict_to: [OWNER];
            set_base_rate => restrict_to: [OWNER];
            open_trove => restrict_to: [OWNER];
            adjust_trove => restrict_to: [OWNER];
            close_trove => restrict_to: [OWNER];
            claim_collateral_surplus => restrict_to: [OWNER];
            liquidate_troves => restrict_to: [OWNER];
            batch_liquidate_troves => restrict_to: [OWNER];
            redeem_collateral => restrict_to: [OWNER];
            burn_tusd => restrict_to: [OWNER];
            get_trove => PUBLIC;
            get_trove_summary => PUBLIC;
            get_entire_debt_and_coll => PUBLIC;
            get_pending_rewards => PUBLIC;
            get_icr => PUBLIC;
            get_nominal_icr => PUBLIC;
            get_tcr => PUBLIC;
            is_recovery_mode => PUBLIC;
            has_undercollateralized_troves => PUBLIC;
            get_sorted_troves => PUBLIC;
            get_base_rate => PUBLIC;
            get_borrowing_rate => PUBLIC;
            get_borrowing_fee => PUBLIC;
            get_redemption_rate => PUBLIC;
            get_collateral_types => PUBLIC;
            get_collateral_totals => PUBLIC;
            get_total_debt => PUBLIC;
            get_active_trove_count => PUBLIC;
            get_claimable_surplus => PUBLIC;
            get_protocol_parameters => PUBLIC;
            get_tusd_address => PUBLIC;
            get_trove_receipt_address => PUBLIC;
        }
    }

    struct TroveManager {
        /// Accepted collateral types and their ratio weights.
        registry: CollateralRegistry,
        /// System totals and redistribution accumulators.
        ledger: TroveLedger,
        /// The decaying base rate behind all fees.
        fees: FeeDecayModel,
        parameters: ProtocolParameters,
        /// Collateral of active troves plus redistributed collateral not yet applied, per type.
        collateral_vaults: KeyValueStore<ResourceAddress, Vault>,
        /// Collateral claimable by owners of closed troves, per type.
        surplus_vaults: KeyValueStore<ResourceAddress, Vault>,
        /// Claimable collateral per trove receipt.
        surplus_claims: KeyValueStore<NonFungibleLocalId, IndexMap<ResourceAddress, Decimal>>,
        /// tUSD gas compensation reserves of all active troves.
        gas_pool: Vault,
        /// Active troves keyed by nominal ICR.
        sorted_troves: AvlTree<Decimal, Vec<NonFungibleLocalId>>,
        trove_counter: u64,
        tusd_manager: ResourceManager,
        trove_receipt_manager: ResourceManager,
    }

    impl TroveManager {
        /// Instantiates the `TroveManager` component with its resources.
        ///
        /// # Arguments
        /// * `dapp_def_address`: The `GlobalAddress` of the DApp Definition account.
        ///
        /// # Returns
        /// * `Global<TroveManager>`: The new component.
        /// * `Bucket`: The initially minted controller badges. Holding 0.75 of them grants OWNER on all
        ///   protocol components.
        /// * `ResourceAddress`: The tUSD resource.
        /// * `ResourceAddress`: The trove receipt NFT resource.
        pub fn instantiate(dapp_def_address: GlobalAddress) -> (Global<TroveManager>, Bucket, ResourceAddress, ResourceAddress) {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(TroveManager::blueprint_id());

            let controller_role: Bucket = ResourceBuilder::new_fungible(OwnerRole::Fixed(rule!(
                require(global_caller(component_address))
            )))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "controller badge tidal", locked;
                    "symbol" => "tusdCTRL", locked;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .mint_initial_supply(10)
            .into();

            let controller_badge_address = controller_role.resource_address();

            let tusd_manager: ResourceManager = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(controller_badge_address)),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "Tidal USD", updatable;
                    "symbol" => "tUSD", updatable;
                    "info_url" => "https://tidal.finance", updatable;
                    "icon_url" => Url::of("https://tidal.finance/tusd-logo.png"), updatable;
                    "tags" => vec!["stablecoin", "defi", "usd"], updatable;
                    "dapp_definitions" => vec![dapp_def_address], updatable;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address))
                || require_amount(dec!("0.75"), controller_badge_address));
                minter_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
            ))
            .burn_roles(burn_roles!(
                burner => rule!(require(global_caller(component_address))
                || require_amount(dec!("0.75"), controller_badge_address));
                burner_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
            ))
            .create_with_no_initial_supply()
            .into();

            let trove_receipt_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<Trove>(OwnerRole::Fixed(rule!(
                    require_amount(dec!("0.75"), controller_badge_address)
                )))
                .metadata(metadata!(
                    init {
                        "name" => "Tidal Trove", locked;
                        "symbol" => "tusdTROVE", locked;
                        "description" => "A receipt for your tUSD trove.", locked;
                        "info_url" => "https://tidal.finance", updatable;
                        "icon_url" => Url::of("https://tidal.finance/trove.png"), updatable;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                    non_fungible_data_updater => rule!(require(global_caller(component_address))
                        || require_amount(dec!("0.75"), controller_badge_address));
                    non_fungible_data_updater_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address))
                    || require_amount(dec!("0.75"), controller_badge_address));
                    minter_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
                ))
                .burn_roles(burn_roles!(
                    burner => rule!(require_amount(dec!("0.75"), controller_badge_address));
                    burner_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
                ))
                .create_with_no_initial_supply()
                .into();

            let now = Self::now();

            let trove_manager = Self {
                registry: CollateralRegistry::new(),
                ledger: TroveLedger::new(),
                fees: FeeDecayModel::new(FeeParameters::default(), now),
                parameters: ProtocolParameters::default(),
                collateral_vaults: KeyValueStore::new_with_registered_type(),
                surplus_vaults: KeyValueStore::new_with_registered_type(),
                surplus_claims: KeyValueStore::new_with_registered_type(),
                gas_pool: Vault::new(tusd_manager.address()),
                sorted_troves: AvlTree::new(),
                trove_counter: 0,
                tusd_manager,
                trove_receipt_manager,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Tidal Trove Manager".to_string(), updatable;
                    "description" => "The trove accounting component of the Tidal protocol".to_string(), updatable;
                    "info_url" => Url::of("https://tidal.finance"), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize();

            (trove_manager, controller_role, tusd_manager.address(), trove_receipt_manager.address())
        }

        //==================================================================
        //                         ADMIN METHODS
        //==================================================================

        /// Accepts a new collateral type.
        ///
        /// # Panics
        /// * If the ratio is not in `(0, 1]` or the collateral is already registered.
        pub fn new_collateral(&mut self, address: ResourceAddress, ratio: Decimal, market_id: String) {
            self.registry.add(address, ratio, market_id.clone()).or_panic();
            self.ledger.register_collateral(address);
            self.collateral_vaults.insert(address, Vault::new(address));
            self.surplus_vaults.insert(address, Vault::new(address));

            Runtime::emit_event(NewCollateralEvent {
                address,
                ratio,
                market_id,
            });
        }

        pub fn set_collateral_ratio(&mut self, address: ResourceAddress, ratio: Decimal) {
            self.registry.set_ratio(address, ratio).or_panic();
        }

        pub fn set_collateral_active(&mut self, address: ResourceAddress, active: bool) {
            self.registry.set_active(address, active).or_panic();
        }

        pub fn set_protocol_parameters(&mut self, parameters: ProtocolParameters) {
            parameters.validate().or_panic();
            self.parameters = parameters;
        }

        pub fn set_fee_parameters(&mut self, parameters: FeeParameters) {
            self.fees.set_parameters(parameters, Self::now()).or_panic();
            self.emit_base_rate();
        }

        /// Overrides the base rate and restarts its decay clock.
        pub fn set_base_rate(&mut self, base_rate: Decimal) {
            assert!(
                base_rate >= Decimal::ZERO && base_rate <= self.fees.parameters.max_fee,
                "Base rate out of range."
            );
            self.fees.base_rate = base_rate;
            self.fees.last_fee_operation_time = Self::now();
            self.emit_base_rate();
        }

        /// Burns tUSD handed back by other protocol components, e.g. deposits consumed by an offset.
        pub fn burn_tusd(&mut self, tusd: Bucket) {
            assert!(
                tusd.resource_address() == self.tusd_manager.address(),
                "Invalid tUSD."
            );
            tusd.burn();
        }

        //==================================================================
        //                         TROVE METHODS
        //==================================================================

        /// Opens a trove, or reopens a closed one.
        ///
        /// # Arguments
        /// * `trove_id`: Receipt of a closed trove to reopen. `None` mints a new receipt.
        /// * `collateral`: Buckets of one or more accepted collateral types.
        /// * `tusd_amount`: tUSD the borrower receives. The trove's debt also carries the borrowing fee
        ///   and the gas compensation reserve.
        /// * `max_fee_percentage`: The highest borrowing rate the borrower accepts.
        /// * `prices`: Current prices of all collateral types.
        ///
        /// # Returns
        /// * `Bucket`: The borrowed tUSD.
        /// * `Bucket`: The borrowing fee in tUSD, to be paid to stakers.
        /// * `Option<Bucket>`: The new trove receipt, if one was minted.
        ///
        /// # Panics
        /// * On any ledger rule violation (see [`TroveLedger::open`]).
        pub fn open_trove(
            &mut self,
            trove_id: Option<NonFungibleLocalId>,
            collateral: Vec<Bucket>,
            tusd_amount: Decimal,
            max_fee_percentage: Decimal,
            prices: PriceSet,
        ) -> (Bucket, Bucket, Option<Bucket>) {
            let amounts = Self::amounts_of(&collateral);
            let (trove_id, before) = match trove_id {
                Some(trove_id) => {
                    let trove: Trove = self.trove_receipt_manager.get_non_fungible_data(&trove_id);
                    (trove_id, trove)
                }
                None => {
                    self.trove_counter += 1;
                    (NonFungibleLocalId::integer(self.trove_counter), Trove::new())
                }
            };
            let mut trove = before.clone();

            let ctx = LedgerContext {
                registry: &self.registry,
                prices: &prices,
                parameters: &self.parameters,
                now: Self::now(),
            };
            let base_rate_before = (self.fees.base_rate, self.fees.last_fee_operation_time);
            let outcome = self
                .ledger
                .open(&mut trove, amounts, tusd_amount, max_fee_percentage, &ctx, &mut self.fees)
                .or_panic();

            let receipt: Option<Bucket> = if before.status == TroveStatus::NonExistent
                && !self.trove_receipt_manager.non_fungible_exists(&trove_id)
            {
                Some(self.trove_receipt_manager.mint_non_fungible(&trove_id, Trove::new()))
            } else {
                None
            };
            self.store_trove(&trove_id, &before, trove, TroveOperation::Open);

            self.put_collateral(collateral);
            let mut tusd = self
                .tusd_manager
                .mint(outcome.debt_to_borrower + outcome.fee + outcome.gas_compensation);
            self.gas_pool.put(tusd.take(outcome.gas_compensation));
            let fee = tusd.take(outcome.fee);

            self.emit_fee(FeeKind::Borrowing, outcome.fee, self.tusd_manager.address());
            if base_rate_before != (self.fees.base_rate, self.fees.last_fee_operation_time) {
                self.emit_base_rate();
            }

            (tusd, fee, receipt)
        }

        /// Changes the collateral and/or debt of an active trove.
        ///
        /// # Arguments
        /// * `trove_id`: The trove to adjust.
        /// * `collateral_added`: Collateral to deposit. Cannot be combined with a withdrawal.
        /// * `collateral_withdrawn`: Collateral amounts to withdraw, per type.
        /// * `debt_change`: tUSD to borrow or repay.
        /// * `is_debt_increase`: Whether `debt_change` is borrowed.
        /// * `max_fee_percentage`: The highest borrowing rate accepted. Ignored for repayments.
        /// * `repayment`: tUSD covering a repayment.
        /// * `prices`: Current prices of all collateral types.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: The withdrawn collateral.
        /// * `Option<Bucket>`: Borrowed tUSD, or what is left of `repayment`.
        /// * `Option<Bucket>`: The borrowing fee, if debt was increased.
        ///
        /// # Panics
        /// * If a repayment is not covered by `repayment`.
        /// * On any ledger rule violation (see [`TroveLedger::adjust`]).
        pub fn adjust_trove(
            &mut self,
            trove_id: NonFungibleLocalId,
            collateral_added: Vec<Bucket>,
            collateral_withdrawn: IndexMap<ResourceAddress, Decimal>,
            debt_change: Decimal,
            is_debt_increase: bool,
            max_fee_percentage: Decimal,
            repayment: Option<Bucket>,
            prices: PriceSet,
        ) -> (Vec<Bucket>, Option<Bucket>, Option<Bucket>) {
            assert!(
                !(is_debt_increase && repayment.is_some()),
                "No repayment expected when borrowing."
            );
            if !is_debt_increase && debt_change > Decimal::ZERO {
                let covered = repayment
                    .as_ref()
                    .map(|bucket| {
                        bucket.resource_address() == self.tusd_manager.address() && bucket.amount() >= debt_change
                    })
                    .unwrap_or(false);
                if !covered {
                    panic!("{}", ProtocolError::InsufficientDebtTokenBalance);
                }
            }

            let before: Trove = self.trove_receipt_manager.get_non_fungible_data(&trove_id);
            let mut trove = before.clone();
            let request = AdjustRequest {
                collateral_added: Self::amounts_of(&collateral_added),
                collateral_withdrawn,
                debt_change,
                is_debt_increase,
                max_fee_percentage,
            };

            let ctx = LedgerContext {
                registry: &self.registry,
                prices: &prices,
                parameters: &self.parameters,
                now: Self::now(),
            };
            let base_rate_before = (self.fees.base_rate, self.fees.last_fee_operation_time);
            let outcome = self
                .ledger
                .adjust(&mut trove, request, &ctx, &mut self.fees)
                .or_panic();
            self.store_trove(&trove_id, &before, trove, TroveOperation::Adjust);

            self.put_collateral(collateral_added);
            let withdrawn = self.take_collateral(&outcome.collateral_withdrawn);

            let (tusd, fee) = if is_debt_increase {
                let mut tusd = self.tusd_manager.mint(outcome.debt_to_borrower + outcome.fee);
                let fee = tusd.take(outcome.fee);
                self.emit_fee(FeeKind::Borrowing, outcome.fee, self.tusd_manager.address());
                (Some(tusd), Some(fee))
            } else {
                let remainder = repayment.map(|mut bucket| {
                    if outcome.repaid > Decimal::ZERO {
                        bucket.take(outcome.repaid).burn();
                    }
                    bucket
                });
                (remainder, None)
            };

            if base_rate_before != (self.fees.base_rate, self.fees.last_fee_operation_time) {
                self.emit_base_rate();
            }

            (withdrawn, tusd, fee)
        }

        /// Closes an active trove. The owner repays the debt minus the gas compensation reserve,
        /// which is burned from the gas pool.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: The trove's collateral.
        /// * `Bucket`: What is left of `payment`.
        ///
        /// # Panics
        /// * If `payment` is not tUSD or does not cover the repayment.
        /// * On any ledger rule violation (see [`TroveLedger::close`]).
        pub fn close_trove(
            &mut self,
            trove_id: NonFungibleLocalId,
            mut payment: Bucket,
            prices: PriceSet,
        ) -> (Vec<Bucket>, Bucket) {
            assert!(
                payment.resource_address() == self.tusd_manager.address(),
                "Invalid tUSD payment."
            );

            let before: Trove = self.trove_receipt_manager.get_non_fungible_data(&trove_id);
            let mut trove = before.clone();
            let ctx = LedgerContext {
                registry: &self.registry,
                prices: &prices,
                parameters: &self.parameters,
                now: Self::now(),
            };
            let outcome = self.ledger.close(&mut trove, &ctx).or_panic();
            if payment.amount() < outcome.repayment {
                panic!("{}", ProtocolError::InsufficientDebtTokenBalance);
            }
            self.store_trove(&trove_id, &before, trove, TroveOperation::Close);

            payment.take(outcome.repayment).burn();
            self.gas_pool.take(outcome.gas_compensation).burn();
            let collateral = self.take_collateral(&outcome.collateral);

            (collateral, payment)
        }

        /// Pays out the collateral surplus left to a trove's owner.
        ///
        /// # Panics
        /// * If nothing is claimable for the trove.
        pub fn claim_collateral_surplus(&mut self, trove_id: NonFungibleLocalId) -> Vec<Bucket> {
            let claimable = match self.surplus_claims.remove(&trove_id) {
                Some(claimable) => claimable,
                None => panic!("No collateral available to claim"),
            };

            let mut buckets: Vec<Bucket> = vec![];
            for (address, amount) in &claimable {
                let mut vault = self.surplus_vaults
                    .get_mut(address)
                    .expect("No surplus vault for this collateral");
                let amount = (*amount).min(vault.amount());
                buckets.push(vault.take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero)));
            }

            Runtime::emit_event(CollateralSurplusEvent {
                trove_id,
                claimable: IndexMap::default(),
            });

            buckets
        }

        //==================================================================
        //                          LIQUIDATIONS
        //==================================================================

        /// Liquidates up to `max_troves` troves, picked by lowest ICR among the lowest entries of the
        /// sorted index.
        ///
        /// # Returns
        /// See [`TroveManager::batch_liquidate_troves`].
        pub fn liquidate_troves(
            &mut self,
            max_troves: u64,
            stability_pool_deposits: Decimal,
            prices: PriceSet,
        ) -> (Decimal, Vec<Bucket>, Bucket, Vec<Bucket>) {
            assert!(max_troves > 0, "Nothing to liquidate");
            let mut ranked: Vec<(Decimal, (NonFungibleLocalId, Trove))> = self
                .load_troves(self.lowest_troves(self.parameters.max_troves_scanned))
                .into_iter()
                .map(|(trove_id, trove)| {
                    let icr = self.ledger.current_icr(&trove, &self.registry, &prices).or_panic();
                    (icr, (trove_id, trove))
                })
                .collect();
            ranked.sort_by(|a, b| a.0.cmp(&b.0));
            let candidates: Vec<(NonFungibleLocalId, Trove)> = ranked
                .into_iter()
                .take(max_troves as usize)
                .map(|(_, candidate)| candidate)
                .collect();

            self.execute_liquidations(candidates, stability_pool_deposits, prices)
        }

        /// Liquidates the given troves, lowest ICR first, as far as they qualify.
        ///
        /// # Returns
        /// * `Decimal`: Debt to offset against the stability pool.
        /// * `Vec<Bucket>`: Collateral for the stability pool.
        /// * `Bucket`: tUSD gas compensation for the liquidator.
        /// * `Vec<Bucket>`: Collateral compensation for the liquidator.
        ///
        /// # Panics
        /// * If none of the troves can be liquidated.
        pub fn batch_liquidate_troves(
            &mut self,
            trove_ids: Vec<NonFungibleLocalId>,
            stability_pool_deposits: Decimal,
            prices: PriceSet,
        ) -> (Decimal, Vec<Bucket>, Bucket, Vec<Bucket>) {
            let mut unique_ids: Vec<NonFungibleLocalId> = vec![];
            for trove_id in trove_ids {
                assert!(
                    self.trove_receipt_manager.non_fungible_exists(&trove_id),
                    "Trove does not exist"
                );
                if !unique_ids.contains(&trove_id) {
                    unique_ids.push(trove_id);
                }
            }
            let candidates = self.load_troves(unique_ids);
            self.execute_liquidations(candidates, stability_pool_deposits, prices)
        }

        //==================================================================
        //                           REDEMPTIONS
        //==================================================================

        /// Redeems tUSD for collateral at face value.
        ///
        /// # Arguments
        /// * `payment`: tUSD to redeem. Whatever could not be redeemed is returned.
        /// * `max_fee_percentage`: The highest redemption rate accepted.
        /// * `max_iterations`: Upper bound on the troves considered. Zero uses the protocol default.
        /// * `prices`: Current prices of all collateral types.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: Collateral for the redeemer, net of the fee.
        /// * `Vec<Bucket>`: The fee, to be paid to stakers.
        /// * `Bucket`: Unredeemed tUSD.
        pub fn redeem_collateral(
            &mut self,
            mut payment: Bucket,
            max_fee_percentage: Decimal,
            max_iterations: u64,
            prices: PriceSet,
        ) -> (Vec<Bucket>, Vec<Bucket>, Bucket) {
            assert!(
                payment.resource_address() == self.tusd_manager.address(),
                "Invalid tUSD payment."
            );

            let limit = if max_iterations == 0 {
                self.parameters.max_troves_scanned
            } else {
                max_iterations.min(self.parameters.max_troves_scanned)
            };
            let mut troves = self.load_troves(self.lowest_troves(limit));
            let before = troves.clone();

            let ctx = LedgerContext {
                registry: &self.registry,
                prices: &prices,
                parameters: &self.parameters,
                now: Self::now(),
            };
            let attempted_amount = payment.amount();
            let outcome = redeem(
                &mut self.ledger,
                &mut troves,
                attempted_amount,
                max_fee_percentage,
                &ctx,
                &mut self.fees,
            )
            .or_panic();

            for ((trove_id, trove), (_, old)) in troves.into_iter().zip(before.iter()) {
                self.store_trove(&trove_id, old, trove, TroveOperation::Redeem);
            }
            for closed in &outcome.closed {
                self.add_surplus(&closed.trove_id, &closed.collateral_surplus);
            }

            payment.take(outcome.redeemed_debt).burn();
            if outcome.gas_compensation_released > Decimal::ZERO {
                self.gas_pool.take(outcome.gas_compensation_released).burn();
            }
            let collateral = self.take_collateral(&outcome.collateral_to_redeemer);
            let fee = self.take_collateral(&outcome.fee);

            for (address, amount) in &outcome.fee {
                self.emit_fee(FeeKind::Redemption, *amount, *address);
            }
            self.emit_base_rate();
            Runtime::emit_event(RedemptionEvent {
                attempted_amount,
                redeemed_amount: outcome.redeemed_debt,
                collateral_sent: outcome.collateral_to_redeemer.clone(),
                fee: outcome.fee.clone(),
            });

            (collateral, fee, payment)
        }

        //==================================================================
        //                         GETTER METHODS
        //==================================================================

        /// Raw receipt data of a trove, without pending rewards.
        pub fn get_trove(&self, trove_id: NonFungibleLocalId) -> Trove {
            self.trove_receipt_manager.get_non_fungible_data(&trove_id)
        }

        pub fn get_trove_summary(&self, trove_id: NonFungibleLocalId, prices: PriceSet) -> TroveSummary {
            let trove = self.get_trove(trove_id);
            let pending = self.ledger.pending_rewards(&trove);
            let icr = if trove.is_active() {
                self.ledger.current_icr(&trove, &self.registry, &prices).or_panic()
            } else {
                Decimal::ZERO
            };
            TroveSummary {
                status: trove.status,
                collateral: trove.collateral,
                debt: trove.debt,
                pending_collateral: pending.collateral,
                pending_debt: pending.debt,
                icr,
            }
        }

        pub fn get_entire_debt_and_coll(&self, trove_id: NonFungibleLocalId) -> (Decimal, IndexMap<ResourceAddress, Decimal>) {
            let trove = self.get_trove(trove_id);
            self.ledger.entire_debt_and_coll(&trove)
        }

        pub fn get_pending_rewards(&self, trove_id: NonFungibleLocalId) -> (Decimal, IndexMap<ResourceAddress, Decimal>) {
            let pending = self.ledger.pending_rewards(&self.get_trove(trove_id));
            (pending.debt, pending.collateral)
        }

        pub fn get_icr(&self, trove_id: NonFungibleLocalId, prices: PriceSet) -> Decimal {
            let trove = self.get_trove(trove_id);
            self.ledger.current_icr(&trove, &self.registry, &prices).or_panic()
        }

        /// Price-free ratio of a trove, pending rewards included.
        pub fn get_nominal_icr(&self, trove_id: NonFungibleLocalId) -> Decimal {
            let (debt, collateral) = self.get_entire_debt_and_coll(trove_id);
            TroveLedger::nominal_icr(&self.registry, &collateral, debt).or_panic()
        }

        pub fn get_tcr(&self, prices: PriceSet) -> Decimal {
            self.ledger.tcr(&self.registry, &prices).or_panic()
        }

        pub fn is_recovery_mode(&self, prices: PriceSet) -> bool {
            self.get_tcr(prices) < self.parameters.ccr
        }

        /// Whether any trove among the lowest entries of the sorted index has ICR < MCR.
        pub fn has_undercollateralized_troves(&self, prices: PriceSet) -> bool {
            for trove_id in self.lowest_troves(self.parameters.max_troves_scanned) {
                let trove = self.get_trove(trove_id);
                if self.ledger.current_icr(&trove, &self.registry, &prices).or_panic() < self.parameters.mcr {
                    return true;
                }
            }
            false
        }

        /// The first `amount` active troves of the sorted index, lowest nominal ICR first.
        pub fn get_sorted_troves(&self, amount: u64) -> Vec<(NonFungibleLocalId, Decimal)> {
            self.lowest_troves(amount)
                .into_iter()
                .map(|trove_id| {
                    let nominal_icr = self.get_trove(trove_id.clone()).nominal_icr;
                    (trove_id, nominal_icr)
                })
                .collect()
        }

        pub fn get_base_rate(&self) -> Decimal {
            self.fees.base_rate
        }

        pub fn get_borrowing_rate(&self) -> Decimal {
            self.fees.borrowing_rate(Self::now())
        }

        pub fn get_borrowing_fee(&self, tusd_amount: Decimal) -> Decimal {
            self.fees.borrowing_fee(tusd_amount, Self::now())
        }

        pub fn get_redemption_rate(&self) -> Decimal {
            self.fees.redemption_rate(Self::now())
        }

        pub fn get_collateral_types(&self) -> Vec<CollateralType> {
            self.registry.types.values().cloned().collect()
        }

        pub fn get_collateral_totals(&self, address: ResourceAddress) -> CollateralTotals {
            self.ledger.totals_of(&address)
        }

        pub fn get_total_debt(&self) -> Decimal {
            self.ledger.total_debt()
        }

        pub fn get_active_trove_count(&self) -> u64 {
            self.ledger.active_troves
        }

        pub fn get_claimable_surplus(&self, trove_id: NonFungibleLocalId) -> IndexMap<ResourceAddress, Decimal> {
            self.surplus_claims
                .get(&trove_id)
                .map(|claimable| (*claimable).clone())
                .unwrap_or_default()
        }

        pub fn get_protocol_parameters(&self) -> ProtocolParameters {
            self.parameters.clone()
        }

        pub fn get_tusd_address(&self) -> ResourceAddress {
            self.tusd_manager.address()
        }

        pub fn get_trove_receipt_address(&self) -> ResourceAddress {
            self.trove_receipt_manager.address()
        }

        //==================================================================
        //                         HELPER METHODS
        //==================================================================

        fn now() -> i64 {
            Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch
        }

        fn amounts_of(buckets: &[Bucket]) -> CollateralAmounts {
            let mut amounts = CollateralAmounts::default();
            for bucket in buckets {
                add_amount(&mut amounts, bucket.resource_address(), bucket.amount());
            }
            amounts
        }

        fn put_collateral(&mut self, buckets: Vec<Bucket>) {
            for bucket in buckets {
                self.collateral_vaults
                    .get_mut(&bucket.resource_address())
                    .expect("Collateral not accepted")
                    .put(bucket);
            }
        }

        fn take_collateral(&mut self, amounts: &CollateralAmounts) -> Vec<Bucket> {
            let mut buckets: Vec<Bucket> = vec![];
            for (address, amount) in amounts {
                if *amount <= Decimal::ZERO {
                    continue;
                }
                let mut vault = self.collateral_vaults
                    .get_mut(address)
                    .expect("Collateral not accepted");
                let amount = (*amount).min(vault.amount());
                buckets.push(vault.take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero)));
            }
            buckets
        }

        /// Moves collateral into the surplus vaults and credits it to a trove's owner.
        fn add_surplus(&mut self, trove_id: &NonFungibleLocalId, surplus: &CollateralAmounts) {
            if surplus.is_empty() {
                return;
            }
            for bucket in self.take_collateral(surplus) {
                self.surplus_vaults
                    .get_mut(&bucket.resource_address())
                    .expect("No surplus vault for this collateral")
                    .put(bucket);
            }

            let mut claimable = self.get_claimable_surplus(trove_id.clone());
            for (address, amount) in surplus {
                add_amount(&mut claimable, *address, *amount);
            }
            self.surplus_claims.insert(trove_id.clone(), claimable.clone());

            Runtime::emit_event(CollateralSurplusEvent {
                trove_id: trove_id.clone(),
                claimable,
            });
        }

        fn load_troves(&self, trove_ids: Vec<NonFungibleLocalId>) -> Vec<(NonFungibleLocalId, Trove)> {
            trove_ids
                .into_iter()
                .map(|trove_id| {
                    let trove: Trove = self.trove_receipt_manager.get_non_fungible_data(&trove_id);
                    (trove_id, trove)
                })
                .collect()
        }

        /// Writes a trove back to its receipt and keeps the sorted index in line with it.
        /// Only changed fields are written.
        fn store_trove(&mut self, trove_id: &NonFungibleLocalId, before: &Trove, mut after: Trove, operation: TroveOperation) {
            if after.is_active() {
                after.nominal_icr = TroveLedger::nominal_icr(&self.registry, &after.collateral, after.debt).or_panic();
            }

            if before.is_active() != after.is_active() || before.nominal_icr != after.nominal_icr {
                if before.is_active() {
                    self.remove_trove_from_index(before.nominal_icr, trove_id);
                }
                if after.is_active() {
                    self.insert_trove_into_index(after.nominal_icr, trove_id.clone());
                }
            }

            if before.status != after.status {
                self.trove_receipt_manager
                    .update_non_fungible_data(trove_id, "status", after.status);
            }
            if before.collateral != after.collateral {
                self.trove_receipt_manager
                    .update_non_fungible_data(trove_id, "collateral", after.collateral.clone());
            }
            if before.debt != after.debt {
                self.trove_receipt_manager
                    .update_non_fungible_data(trove_id, "debt", after.debt);
            }
            if before.stakes != after.stakes {
                self.trove_receipt_manager
                    .update_non_fungible_data(trove_id, "stakes", after.stakes.clone());
            }
            if before.reward_snapshots != after.reward_snapshots {
                self.trove_receipt_manager.update_non_fungible_data(
                    trove_id,
                    "reward_snapshots",
                    after.reward_snapshots.clone(),
                );
            }
            if before.nominal_icr != after.nominal_icr {
                self.trove_receipt_manager
                    .update_non_fungible_data(trove_id, "nominal_icr", after.nominal_icr);
            }

            let position_changed = before.status != after.status
                || before.collateral != after.collateral
                || before.debt != after.debt
                || before.stakes != after.stakes;
            if position_changed {
                let operation = if operation == TroveOperation::Liquidate && after.is_active() {
                    TroveOperation::ApplyPendingRewards
                } else {
                    operation
                };
                Runtime::emit_event(TroveUpdatedEvent {
                    trove_id: trove_id.clone(),
                    debt: after.debt,
                    collateral: after.collateral,
                    stakes: after.stakes,
                    operation,
                });
            }
        }

        fn execute_liquidations(
            &mut self,
            mut troves: Vec<(NonFungibleLocalId, Trove)>,
            stability_pool_deposits: Decimal,
            prices: PriceSet,
        ) -> (Decimal, Vec<Bucket>, Bucket, Vec<Bucket>) {
            let before = troves.clone();
            let ctx = LedgerContext {
                registry: &self.registry,
                prices: &prices,
                parameters: &self.parameters,
                now: Self::now(),
            };
            let totals = liquidate_batch(&mut self.ledger, &mut troves, stability_pool_deposits, &ctx).or_panic();

            for ((trove_id, trove), (_, old)) in troves.into_iter().zip(before.iter()) {
                self.store_trove(&trove_id, old, trove, TroveOperation::Liquidate);
            }

            let mut retained_debt = Decimal::ZERO;
            let mut retained_collateral = CollateralAmounts::default();
            for values in &totals.liquidated {
                self.add_surplus(&values.trove_id, &values.collateral_surplus);
                retained_debt += values.retained_debt;
                for (address, amount) in &values.retained_collateral {
                    add_amount(&mut retained_collateral, *address, *amount);
                }

                Runtime::emit_event(LiquidationEvent {
                    trove_id: values.trove_id.clone(),
                    liquidated_debt: values.entire_debt,
                    liquidated_collateral: values.entire_collateral.clone(),
                    debt_offset: values.debt_to_offset,
                    gas_compensation: values.gas_compensation,
                    collateral_gas_compensation: values.collateral_gas_compensation.clone(),
                    mode: values.mode,
                });
            }

            if totals.debt_redistributed > Decimal::ZERO || !totals.collateral_redistributed.is_empty() {
                let mut l_coll = IndexMap::default();
                let mut l_debt = IndexMap::default();
                for (address, collateral_totals) in &self.ledger.totals {
                    l_coll.insert(*address, collateral_totals.l_coll);
                    l_debt.insert(*address, collateral_totals.l_debt);
                }
                Runtime::emit_event(RedistributionEvent {
                    l_coll,
                    l_debt,
                    collateral: totals.collateral_redistributed.clone(),
                    retained_collateral,
                    retained_debt,
                });
            }

            let pool_collateral = self.take_collateral(&totals.collateral_to_stability_pool);
            let collateral_gas_compensation = self.take_collateral(&totals.collateral_gas_compensation);
            let gas_compensation = self.gas_pool.take(totals.gas_compensation);

            (totals.debt_to_offset, pool_collateral, gas_compensation, collateral_gas_compensation)
        }

        /// Active troves from the lowest entries of the sorted index.
        fn lowest_troves(&self, limit: u64) -> Vec<NonFungibleLocalId> {
            let mut trove_ids: Vec<NonFungibleLocalId> = vec![];
            if limit == 0 {
                return trove_ids;
            }
            for (_, ids, next_nominal_icr) in self.sorted_troves.range(Decimal::ZERO..) {
                for trove_id in ids {
                    trove_ids.push(trove_id.clone());
                    if trove_ids.len() as u64 >= limit {
                        return trove_ids;
                    }
                }
                if next_nominal_icr.is_none() {
                    break;
                }
            }
            trove_ids
        }

        fn insert_trove_into_index(&mut self, nominal_icr: Decimal, trove_id: NonFungibleLocalId) {
            let mut trove_ids: Vec<NonFungibleLocalId> = match self.sorted_troves.get_mut(&nominal_icr) {
                Some(trove_ids) => trove_ids.to_vec(),
                None => vec![],
            };
            trove_ids.push(trove_id);
            self.sorted_troves.insert(nominal_icr, trove_ids);
        }

        fn remove_trove_from_index(&mut self, nominal_icr: Decimal, trove_id: &NonFungibleLocalId) {
            let mut trove_ids: Vec<NonFungibleLocalId> = match self.sorted_troves.get_mut(&nominal_icr) {
                Some(trove_ids) => trove_ids.to_vec(),
                None => return,
            };
            trove_ids.retain(|id| id != trove_id);
            if trove_ids.is_empty() {
                self.sorted_troves.remove(&nominal_icr);
            } else {
                self.sorted_troves.insert(nominal_icr, trove_ids);
            }
        }

        fn emit_fee(&self, kind: FeeKind, amount: Decimal, resource: ResourceAddress) {
            if amount > Decimal::ZERO {
                Runtime::emit_event(FeePaidEvent { kind, amount, resource });
            }
        }

        fn emit_base_rate(&self) {
            Runtime::emit_event(BaseRateUpdatedEvent {
                base_rate: self.fees.base_rate,
                last_fee_operation_time: self.fees.last_fee_operation_time,
            });
        }
    }
}

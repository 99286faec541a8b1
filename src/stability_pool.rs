#![allow(deprecated)]

//! # Tidal Stability Pool Blueprint
//!
//! The `StabilityPool` component holds tUSD deposited by users, which is the first line of defense in
//! liquidations. Debt of liquidated troves is cancelled against pool deposits, and the liquidated
//! collateral is shared among depositors in proportion to their deposits.
//!
//! ## Functionality
//! - **Deposits:** Users deposit tUSD and receive a deposit receipt NFT. Every touch of a deposit pays
//!   out its collateral and TIDE gains in full.
//! - **Offsets:** The protocol burns deposit tUSD against liquidated debt and hands the collateral to
//!   the pool. Accounting uses the running product and sums of the [`StabilityPoolLedger`].
//! - **TIDE issuance:** TIDE is released from this component's vault on a yearly halving schedule and
//!   spread over all deposits on every pool operation.
//! - **Front ends:** Registered front ends tag deposits made through them and earn the non-kickback
//!   share of those deposits' TIDE.
//!
//! All methods except getters are restricted to holders of the controller badge, so users reach this
//! component through the borrower operations component.

use crate::collateral_registry::*;
use crate::community_issuance::*;
use crate::errors::*;
use crate::events::*;
use crate::shared_structs::*;
use crate::stability_pool_ledger::*;
use scrypto::prelude::*;

#[blueprint]
#[types(ResourceAddress, Vault, NonFungibleLocalId, Deposit, FrontEnd, DepositReceipt, FrontEndBadge)]
#[events(
    StabilityPoolStateChangedEvent,
    DepositUpdatedEvent,
    TideIssuedEvent,
)]
mod stability_pool {
    enable_method_auth! {
        methods {
            new_collateral => restrict_to: [OWNER];
            provide_to_pool => restrict_to: [OWNER];
            withdraw_from_pool => restrict_to: [OWNER];
            register_front_end => restrict_to: [OWNER];
            claim_front_end_rewards => restrict_to: [OWNER];
            offset => restrict_to: [OWNER];
            get_pool_state => PUBLIC;
            get_total_deposits => PUBLIC;
            get_compounded_deposit => PUBLIC;
            get_depositor_gains => PUBLIC;
            get_front_end => PUBLIC;
            get_collateral_balance => PUBLIC;
            get_deposit_receipt_address => PUBLIC;
            get_front_end_badge_address => PUBLIC;
        }
    }

    struct StabilityPool {
        /// Product, sums and totals of all deposits.
        ledger: StabilityPoolLedger,
        /// TIDE release schedule.
        issuance: CommunityIssuance,
        deposits: KeyValueStore<NonFungibleLocalId, Deposit>,
        front_ends: KeyValueStore<NonFungibleLocalId, FrontEnd>,
        /// Deposited tUSD, minus what offsets consumed.
        tusd_vault: Vault,
        /// TIDE not yet paid out, issued or not.
        tide_vault: Vault,
        /// Collateral gains not yet paid out, per type.
        collateral_vaults: KeyValueStore<ResourceAddress, Vault>,
        collaterals: Vec<ResourceAddress>,
        deposit_receipt_manager: ResourceManager,
        front_end_badge_manager: ResourceManager,
        deposit_counter: u64,
        front_end_counter: u64,
    }

    impl StabilityPool {
        /// Instantiates the `StabilityPool` component.
        ///
        /// # Arguments
        /// * `controller_badge_address`: The controller badge. Holding 0.75 grants OWNER.
        /// * `tusd_address`: The tUSD resource.
        /// * `tide`: The full TIDE allocation for depositors. Its amount is the issuance supply cap.
        /// * `issuance_factor`: Per-minute issuance factor.
        /// * `dapp_def_address`: The `GlobalAddress` of the DApp Definition account.
        ///
        /// # Returns
        /// * `Global<StabilityPool>`: The new component.
        pub fn instantiate(
            controller_badge_address: ResourceAddress,
            tusd_address: ResourceAddress,
            tide: Bucket,
            issuance_factor: Decimal,
            dapp_def_address: GlobalAddress,
        ) -> Global<StabilityPool> {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(StabilityPool::blueprint_id());

            let deposit_receipt_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<DepositReceipt>(OwnerRole::Fixed(rule!(
                    require_amount(dec!("0.75"), controller_badge_address)
                )))
                .metadata(metadata!(
                    init {
                        "name" => "Tidal Stability Deposit", locked;
                        "symbol" => "tusdSP", locked;
                        "description" => "A receipt for your tUSD stability pool deposit.", locked;
                        "info_url" => "https://tidal.finance", updatable;
                        "icon_url" => Url::of("https://tidal.finance/deposit.png"), updatable;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address)));
                    minter_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
                ))
                .burn_roles(burn_roles!(
                    burner => rule!(require_amount(dec!("0.75"), controller_badge_address));
                    burner_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
                ))
                .create_with_no_initial_supply()
                .into();

            let front_end_badge_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<FrontEndBadge>(OwnerRole::Fixed(rule!(
                    require_amount(dec!("0.75"), controller_badge_address)
                )))
                .metadata(metadata!(
                    init {
                        "name" => "Tidal Front End", locked;
                        "symbol" => "tusdFE", locked;
                        "description" => "A badge identifying a registered Tidal front end.", locked;
                        "info_url" => "https://tidal.finance", updatable;
                        "icon_url" => Url::of("https://tidal.finance/front-end.png"), updatable;
                        "dapp_definitions" => vec![dapp_def_address], updatable;
                    }
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address)));
                    minter_updater => rule!(require_amount(dec!("0.75"), controller_badge_address));
                ))
                .create_with_no_initial_supply()
                .into();

            let issuance = CommunityIssuance::new(
                tide.amount(),
                issuance_factor,
                Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch,
            );

            Self {
                ledger: StabilityPoolLedger::new(),
                issuance,
                deposits: KeyValueStore::new_with_registered_type(),
                front_ends: KeyValueStore::new_with_registered_type(),
                tusd_vault: Vault::new(tusd_address),
                tide_vault: Vault::with_bucket(tide),
                collateral_vaults: KeyValueStore::new_with_registered_type(),
                collaterals: vec![],
                deposit_receipt_manager,
                front_end_badge_manager,
                deposit_counter: 0,
                front_end_counter: 0,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Tidal Stability Pool".to_string(), updatable;
                    "description" => "The stability pool of the Tidal protocol".to_string(), updatable;
                    "info_url" => Url::of("https://tidal.finance"), updatable;
                    "icon_url" => Url::of("https://tidal.finance/tidal-logo.png"), updatable;
                    "dapp_definition" => dapp_def_address, updatable;
                }
            })
            .globalize()
        }

        /// Creates the vault for collateral gains of a newly accepted collateral type.
        pub fn new_collateral(&mut self, address: ResourceAddress) {
            assert!(!self.collaterals.contains(&address), "Collateral already accepted.");
            self.collateral_vaults.insert(address, Vault::new(address));
            self.collaterals.push(address);
        }

        /// Deposits tUSD, paying out all gains of the deposit.
        ///
        /// # Arguments
        /// * `deposit_id`: Receipt of an existing deposit to top up. `None` mints a new receipt.
        /// * `front_end_id`: Front end to tag a new deposit with. Existing deposits keep their tag.
        /// * `tusd`: The tUSD to deposit.
        ///
        /// # Returns
        /// * `Option<Bucket>`: A new deposit receipt, if one was minted.
        /// * `Vec<Bucket>`: Collateral gains.
        /// * `Bucket`: TIDE gain.
        ///
        /// # Panics
        /// * If `front_end_id` is not a registered front end.
        pub fn provide_to_pool(
            &mut self,
            deposit_id: Option<NonFungibleLocalId>,
            front_end_id: Option<NonFungibleLocalId>,
            tusd: Bucket,
        ) -> (Option<Bucket>, Vec<Bucket>, Bucket) {
            assert!(
                tusd.resource_address() == self.tusd_vault.resource_address(),
                "Invalid tUSD."
            );
            self.issue_tide();

            let (deposit_id, mut deposit, receipt) = match deposit_id {
                Some(deposit_id) => {
                    let deposit = self.deposits.get(&deposit_id).map(|deposit| (*deposit).clone()).unwrap_or_else(Deposit::new);
                    (deposit_id, deposit, None)
                }
                None => {
                    self.deposit_counter += 1;
                    let deposit_id = NonFungibleLocalId::integer(self.deposit_counter);
                    let receipt = self.deposit_receipt_manager.mint_non_fungible(
                        &deposit_id,
                        DepositReceipt {
                            key_image_url: Url::of("https://tidal.finance/deposit.png"),
                        },
                    );
                    (deposit_id, Deposit::new(), Some(receipt))
                }
            };

            let tagged = if deposit.initial_value.is_zero() {
                front_end_id
            } else {
                deposit.front_end.clone()
            };
            let mut front_end = tagged.as_ref().map(|front_end_id| self.load_front_end(front_end_id));

            let change = self
                .ledger
                .provide(
                    &mut deposit,
                    tagged.as_ref().zip(front_end.as_mut()),
                    tusd.amount(),
                )
                .or_panic();

            self.tusd_vault.put(tusd);
            if let (Some(front_end_id), Some(front_end)) = (tagged, front_end) {
                self.front_ends.insert(front_end_id, front_end);
            }
            self.deposits.insert(deposit_id.clone(), deposit.clone());

            let (collateral_gains, tide_gain) = self.pay_out(&change);
            Self::emit_deposit_update(deposit_id, &deposit, &change);

            (receipt, collateral_gains, tide_gain)
        }

        /// Withdraws up to `amount` tUSD from a deposit, paying out all its gains. Zero only claims gains.
        ///
        /// # Returns
        /// * `Bucket`: The withdrawn tUSD.
        /// * `Vec<Bucket>`: Collateral gains.
        /// * `Bucket`: TIDE gain.
        pub fn withdraw_from_pool(
            &mut self,
            deposit_id: NonFungibleLocalId,
            amount: Decimal,
        ) -> (Bucket, Vec<Bucket>, Bucket) {
            self.issue_tide();

            let mut deposit = self
                .deposits
                .get(&deposit_id)
                .map(|deposit| (*deposit).clone())
                .unwrap_or_else(Deposit::new);
            let tagged = deposit.front_end.clone();
            let mut front_end = tagged.as_ref().map(|front_end_id| self.load_front_end(front_end_id));

            let change = self
                .ledger
                .withdraw(&mut deposit, front_end.as_mut(), amount)
                .or_panic();

            if let (Some(front_end_id), Some(front_end)) = (tagged, front_end) {
                self.front_ends.insert(front_end_id, front_end);
            }
            self.deposits.insert(deposit_id.clone(), deposit.clone());

            let withdrawn_amount = change.withdrawn.min(self.tusd_vault.amount());
            let withdrawn = self.tusd_vault.take(withdrawn_amount);
            let (collateral_gains, tide_gain) = self.pay_out(&change);
            Self::emit_deposit_update(deposit_id, &deposit, &change);

            (withdrawn, collateral_gains, tide_gain)
        }

        /// Registers a front end and returns its badge.
        ///
        /// # Arguments
        /// * `kickback_rate`: Share of TIDE gains passed on to the front end's depositors, in `[0, 1]`.
        pub fn register_front_end(&mut self, kickback_rate: Decimal) -> Bucket {
            let front_end = FrontEnd::new(kickback_rate).or_panic();

            self.front_end_counter += 1;
            let front_end_id = NonFungibleLocalId::integer(self.front_end_counter);
            self.front_ends.insert(front_end_id.clone(), front_end);

            self.front_end_badge_manager.mint_non_fungible(
                &front_end_id,
                FrontEndBadge {
                    key_image_url: Url::of("https://tidal.finance/front-end.png"),
                    kickback_rate,
                },
            )
        }

        /// Pays out all TIDE a front end has earned.
        pub fn claim_front_end_rewards(&mut self, front_end_id: NonFungibleLocalId) -> Bucket {
            self.issue_tide();

            let mut front_end = self.load_front_end(&front_end_id);
            self.ledger.settle_front_end(&mut front_end);
            let amount = front_end.unclaimed_tide.min(self.tide_vault.amount());
            front_end.unclaimed_tide = Decimal::ZERO;
            self.front_ends.insert(front_end_id, front_end);

            self.tide_vault.take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero))
        }

        /// Cancels liquidated debt against pool deposits and takes in the liquidated collateral.
        ///
        /// # Arguments
        /// * `debt`: Debt to cancel. At most the total deposits.
        /// * `collateral`: Collateral of the liquidated troves for depositors.
        ///
        /// # Returns
        /// * `Bucket`: Deposited tUSD equal to `debt`, to be burned.
        pub fn offset(&mut self, debt: Decimal, collateral: Vec<Bucket>) -> Bucket {
            self.issue_tide();

            let mut amounts = CollateralAmounts::default();
            for bucket in &collateral {
                assert!(
                    self.collateral_vaults.get(&bucket.resource_address()).is_some(),
                    "Collateral not registered with the stability pool"
                );
                add_amount(&mut amounts, bucket.resource_address(), bucket.amount());
            }
            self.ledger.offset(debt, &amounts).or_panic();

            for bucket in collateral {
                self.collateral_vaults
                    .get_mut(&bucket.resource_address())
                    .expect("Collateral not registered with the stability pool")
                    .put(bucket);
            }

            let key = (self.ledger.current_epoch, self.ledger.current_scale);
            Runtime::emit_event(StabilityPoolStateChangedEvent {
                p: self.ledger.p,
                sums: self.ledger.epoch_to_scale_to_sum.get(&key).cloned().unwrap_or_default(),
                g: self.ledger.g_at(key.0, key.1),
                epoch: key.0,
                scale: key.1,
                total_deposits: self.ledger.total_deposits,
            });

            self.tusd_vault.take(debt)
        }

        //==================================================================
        //                         GETTER METHODS
        //==================================================================

        pub fn get_pool_state(&self) -> PoolState {
            PoolState {
                total_deposits: self.ledger.total_deposits,
                p: self.ledger.p,
                current_epoch: self.ledger.current_epoch,
                current_scale: self.ledger.current_scale,
                total_tide_issued: self.issuance.total_issued,
            }
        }

        pub fn get_total_deposits(&self) -> Decimal {
            self.ledger.total_deposits
        }

        pub fn get_compounded_deposit(&self, deposit_id: NonFungibleLocalId) -> Decimal {
            self.deposits
                .get(&deposit_id)
                .map(|deposit| self.ledger.compounded_deposit(&deposit))
                .unwrap_or(Decimal::ZERO)
        }

        /// Gains the deposit would collect right now, excluding TIDE not yet issued.
        pub fn get_depositor_gains(&self, deposit_id: NonFungibleLocalId) -> DepositorGains {
            let deposit = self
                .deposits
                .get(&deposit_id)
                .map(|deposit| (*deposit).clone())
                .unwrap_or_else(Deposit::new);
            let kickback_rate = deposit
                .front_end
                .as_ref()
                .and_then(|front_end_id| self.front_ends.get(front_end_id).map(|front_end| front_end.kickback_rate))
                .unwrap_or(Decimal::ONE);

            DepositorGains {
                compounded_deposit: self.ledger.compounded_deposit(&deposit),
                collateral_gains: self.ledger.collateral_gains(&deposit),
                tide_gain: self.ledger.depositor_tide_gain(&deposit, kickback_rate),
            }
        }

        pub fn get_front_end(&self, front_end_id: NonFungibleLocalId) -> Option<FrontEnd> {
            self.front_ends.get(&front_end_id).map(|front_end| (*front_end).clone())
        }

        pub fn get_collateral_balance(&self, address: ResourceAddress) -> Decimal {
            self.collateral_vaults
                .get(&address)
                .map(|vault| vault.amount())
                .unwrap_or(Decimal::ZERO)
        }

        pub fn get_deposit_receipt_address(&self) -> ResourceAddress {
            self.deposit_receipt_manager.address()
        }

        pub fn get_front_end_badge_address(&self) -> ResourceAddress {
            self.front_end_badge_manager.address()
        }

        //==================================================================
        //                         HELPER METHODS
        //==================================================================

        /// Releases TIDE due under the schedule. While the pool is empty the schedule still advances,
        /// and that TIDE stays in the vault unallocated.
        fn issue_tide(&mut self) {
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            let issued = self.issuance.issue(now);
            if issued.is_zero() {
                return;
            }
            self.ledger.distribute_tide(issued);

            Runtime::emit_event(TideIssuedEvent {
                amount: issued,
                total_issued: self.issuance.total_issued,
            });
        }

        fn load_front_end(&self, front_end_id: &NonFungibleLocalId) -> FrontEnd {
            match self.front_ends.get(front_end_id) {
                Some(front_end) => (*front_end).clone(),
                None => panic!("{}", ProtocolError::UnknownFrontEnd),
            }
        }

        /// Takes a deposit's gains from the vaults. Rounding leftovers can leave a vault a few atto
        /// short of the ledger, so payouts are capped by vault balances.
        fn pay_out(&mut self, change: &DepositChange) -> (Vec<Bucket>, Bucket) {
            let mut collateral_gains: Vec<Bucket> = vec![];
            for (address, amount) in &change.collateral_gains {
                if *amount <= Decimal::ZERO {
                    continue;
                }
                let mut vault = self.collateral_vaults
                    .get_mut(address)
                    .expect("Collateral not registered with the stability pool");
                let amount = (*amount).min(vault.amount());
                collateral_gains.push(vault.take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero)));
            }

            let tide_amount = change.tide_gain.min(self.tide_vault.amount());
            let tide_gain = self
                .tide_vault
                .take_advanced(tide_amount, WithdrawStrategy::Rounded(RoundingMode::ToZero));

            (collateral_gains, tide_gain)
        }

        fn emit_deposit_update(deposit_id: NonFungibleLocalId, deposit: &Deposit, change: &DepositChange) {
            Runtime::emit_event(DepositUpdatedEvent {
                deposit_id,
                front_end: deposit.front_end.clone(),
                new_deposit: change.new_deposit,
                collateral_gains: change.collateral_gains.clone(),
                tide_gain: change.tide_gain,
            });
        }
    }
}

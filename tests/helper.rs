#![allow(dead_code)]

use tidal_protocol::borrower_operations::borrower_operations_test::*;
use tidal_protocol::trove_manager::trove_manager_test::*;
use tidal_protocol::stability_pool::stability_pool_test::*;
use tidal_protocol::staking::staking_test::*;
use tidal_protocol::shared_structs::*;
use dummy_oracle_component::oracle_test::*;
use scrypto_test::prelude::*;

pub struct Helper {
    pub env: TestEnvironment<InMemorySubstateDatabase>,
    pub package_address: PackageAddress,
    pub admin: Bucket,
    pub alpha: Bucket,
    pub beta: Bucket,
    pub tide: Bucket,
    pub admin_address: ResourceAddress,
    pub alpha_address: ResourceAddress,
    pub beta_address: ResourceAddress,
    pub tide_address: ResourceAddress,
    pub tusd_address: ResourceAddress,
    pub trove_receipt_address: ResourceAddress,
    pub deposit_receipt_address: ResourceAddress,
    pub front_end_badge_address: ResourceAddress,
    pub stake_receipt_address: ResourceAddress,
    pub borrower_operations: BorrowerOperations,
    pub trove_manager: TroveManager,
    pub stability_pool: StabilityPool,
    pub staking: Staking,
    pub dummy_oracle: Oracle,
    pub oracle_address: ComponentAddress,
}

impl Helper {
    /// Deploys the protocol with two accepted collaterals: alpha priced at 200 and beta at 100.
    pub fn new() -> Result<Self, RuntimeError> {
        let mut env = TestEnvironmentBuilder::new()
            .build();

        let alpha = ResourceBuilder::new_fungible(OwnerRole::None)
            .divisibility(18)
            .mint_initial_supply(1000000, &mut env)?;
        let beta = ResourceBuilder::new_fungible(OwnerRole::None)
            .divisibility(18)
            .mint_initial_supply(1000000, &mut env)?;
        let admin = ResourceBuilder::new_fungible(OwnerRole::None)
            .divisibility(18)
            .mint_initial_supply(1000000, &mut env)?;

        let alpha_address = alpha.resource_address(&mut env)?;
        let beta_address = beta.resource_address(&mut env)?;
        let admin_address = admin.resource_address(&mut env)?;

        let dummy_oracle_package_address = PackageFactory::compile_and_publish(
            "./dummy_oracle_component",
            &mut env,
            CompileProfile::Standard,
        )?;

        let dummy_oracle = Oracle::instantiate_oracle(
            vec![(alpha_address, dec!(200)), (beta_address, dec!(100))],
            dummy_oracle_package_address,
            &mut env
        )?;

        let oracle_address = ComponentAddress::try_from(dummy_oracle.0.clone()).unwrap();

        let package_address = PackageFactory::compile_and_publish(
            this_package!(),
            &mut env,
            CompileProfile::Standard,
        )?;

        let (
            mut borrower_operations,
            trove_manager,
            stability_pool,
            staking,
            controller_badge,
            tide,
        ) = BorrowerOperations::new(
            admin_address,
            oracle_address,
            dec!(1000000),
            package_address,
            &mut env,
        )?;

        let trove_manager = TroveManager(*trove_manager.as_node_id());
        let stability_pool = StabilityPool(*stability_pool.as_node_id());
        let staking = Staking(*staking.as_node_id());

        env.disable_auth_module();

        borrower_operations.receive_badges(controller_badge, &mut env)?;
        borrower_operations.add_collateral(alpha_address, dec!(1), "ALPHA".to_string(), &mut env)?;
        borrower_operations.add_collateral(beta_address, dec!(1), "BETA".to_string(), &mut env)?;

        env.enable_auth_module();

        let tide_address = tide.resource_address(&mut env)?;
        let tusd_address = trove_manager.get_tusd_address(&mut env)?;
        let trove_receipt_address = trove_manager.get_trove_receipt_address(&mut env)?;
        let deposit_receipt_address = stability_pool.get_deposit_receipt_address(&mut env)?;
        let front_end_badge_address = stability_pool.get_front_end_badge_address(&mut env)?;
        let stake_receipt_address = staking.get_stake_receipt_address(&mut env)?;

        Ok(Self {
            env,
            package_address,
            admin: admin.into(),
            alpha: alpha.into(),
            beta: beta.into(),
            tide,
            admin_address,
            alpha_address,
            beta_address,
            tide_address,
            tusd_address,
            trove_receipt_address,
            deposit_receipt_address,
            front_end_badge_address,
            stake_receipt_address,
            borrower_operations,
            trove_manager,
            stability_pool,
            staking,
            dummy_oracle: Oracle(dummy_oracle.0),
            oracle_address,
        })
    }

    /////////////////////////////////////////////////
    ///////////////////// TROVES ////////////////////
    /////////////////////////////////////////////////

    /// Opens a trove with the given alpha and beta collateral. Returns the tUSD and the receipt.
    pub fn open_trove(
        &mut self,
        alpha_amount: Decimal,
        beta_amount: Decimal,
        tusd_amount: Decimal,
    ) -> Result<(Bucket, Bucket), RuntimeError> {
        let collateral = self.collateral(alpha_amount, beta_amount)?;
        let (tusd, receipt) = self.borrower_operations.open_trove(
            None,
            collateral,
            tusd_amount,
            dec!("0.05"),
            &mut self.env
        )?;

        Ok((tusd, receipt.unwrap()))
    }

    /// Takes collateral from the helper's supply, skipping zero amounts.
    pub fn collateral(&mut self, alpha_amount: Decimal, beta_amount: Decimal) -> Result<Vec<Bucket>, RuntimeError> {
        let mut collateral: Vec<Bucket> = vec![];
        if alpha_amount > Decimal::ZERO {
            collateral.push(self.alpha.take(alpha_amount, &mut self.env)?);
        }
        if beta_amount > Decimal::ZERO {
            collateral.push(self.beta.take(beta_amount, &mut self.env)?);
        }

        Ok(collateral)
    }

    pub fn proof_of(&mut self, receipt: &Bucket) -> Result<NonFungibleProof, RuntimeError> {
        Ok(NonFungibleProof(receipt.create_proof_of_all(&mut self.env)?))
    }

    pub fn provide_to_pool(&mut self, tusd: Bucket) -> Result<Bucket, RuntimeError> {
        let (receipt, gains, tide) = self.borrower_operations.provide_to_stability_pool(
            None,
            None,
            tusd,
            &mut self.env
        )?;
        assert!(gains.is_empty());
        assert_eq!(tide.amount(&mut self.env)?, Decimal::ZERO);

        Ok(receipt.unwrap())
    }

    /////////////////////////////////////////////////
    ///////////////// ERSATZ GETTERS ////////////////
    /////////////////////////////////////////////////

    pub fn get_trove(&mut self, trove_id: u64) -> Result<Trove, RuntimeError> {
        self.trove_manager.get_trove(NonFungibleLocalId::integer(trove_id), &mut self.env)
    }

    pub fn get_trove_summary(&mut self, trove_id: u64) -> Result<TroveSummary, RuntimeError> {
        self.borrower_operations.get_trove_summary(NonFungibleLocalId::integer(trove_id), &mut self.env)
    }

    /// Total amount of `address` in `buckets`.
    pub fn amount_of(&mut self, buckets: &[Bucket], address: ResourceAddress) -> Result<Decimal, RuntimeError> {
        let mut total = Decimal::ZERO;
        for bucket in buckets {
            if bucket.resource_address(&mut self.env)? == address {
                total += bucket.amount(&mut self.env)?;
            }
        }

        Ok(total)
    }

    /////////////////////////////////////////////////
    //////////////////// TEST HELPERS ///////////////
    /////////////////////////////////////////////////

    pub fn change_collateral_price(&mut self, address: ResourceAddress, price: Decimal) -> Result<(), RuntimeError> {
        self.dummy_oracle.set_price(address, price, &mut self.env)?;

        Ok(())
    }

    /// Makes the oracle report a fixed timestamp for `address`, or the current time again if `None`.
    pub fn pin_price_timestamp(&mut self, address: ResourceAddress, timestamp: Option<i64>) -> Result<(), RuntimeError> {
        self.dummy_oracle.set_price_timestamp(address, timestamp, &mut self.env)?;

        Ok(())
    }

    pub fn now(&mut self) -> i64 {
        self.env.get_current_time().seconds_since_unix_epoch
    }

    pub fn advance_seconds(&mut self, seconds: i64) {
        let new_time = self.env.get_current_time().add_seconds(seconds).unwrap();
        self.env.set_current_time(new_time);
    }

    pub fn advance_days(&mut self, days: i64) {
        let new_time = self.env.get_current_time().add_days(days).unwrap();
        self.env.set_current_time(new_time);
    }

    pub fn assert_bucket_eq(
        &mut self,
        bucket: &Bucket,
        address: ResourceAddress,
        amount: Decimal,
    ) -> Result<(), RuntimeError> {
        assert_eq!(bucket.resource_address(&mut self.env)?, address);
        assert_eq!(bucket.amount(&mut self.env)?, amount);

        Ok(())
    }
}

/// Asserts `actual` is within `tolerance` of `expected`.
pub fn assert_close(actual: Decimal, expected: Decimal, tolerance: Decimal) {
    assert!(
        (actual - expected).checked_abs().unwrap() <= tolerance,
        "expected {} but got {}",
        expected,
        actual
    );
}

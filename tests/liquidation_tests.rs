mod helper;
use helper::{assert_close, Helper};
use tidal_protocol::shared_structs::*;

use scrypto_test::prelude::*;

#[test]
fn test_liquidate_with_stability_pool_offset() -> Result<(), RuntimeError> {
    // Initialize helper
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;
    let tusd_address = helper.tusd_address;

    // Alice borrows close to the edge, Bob backs the stability pool
    let (_alice_tusd, _alice_receipt) = helper.open_trove(dec!(20), dec!(0), dec!(2000))?;
    let (bob_tusd, _bob_receipt) = helper.open_trove(dec!(200), dec!(0), dec!(10000))?;
    let deposit_receipt = helper.provide_to_pool(bob_tusd)?;

    // Alice: 2400 against 2210 of debt
    helper.change_collateral_price(alpha_address, dec!(120))?;
    assert!(!helper.borrower_operations.is_recovery_mode(&mut helper.env)?);

    let (gas_compensation, collateral_gas_compensation) =
        helper.borrower_operations.liquidate(NonFungibleLocalId::integer(1), &mut helper.env)?;

    // The liquidator gets the gas reserve and 0.5% of the collateral
    helper.assert_bucket_eq(&gas_compensation, tusd_address, dec!(200))?;
    assert_eq!(helper.amount_of(&collateral_gas_compensation, alpha_address)?, dec!("0.1"));

    let trove = helper.get_trove(1)?;
    assert_eq!(trove.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(helper.trove_manager.get_total_debt(&mut helper.env)?, dec!(10250));
    assert_eq!(helper.trove_manager.get_active_trove_count(&mut helper.env)?, 1);

    // The whole debt was absorbed by the pool, which received the rest of the collateral
    assert_close(
        helper.stability_pool.get_total_deposits(&mut helper.env)?,
        dec!(7790),
        dec!("0.000001"),
    );
    assert_close(
        helper.stability_pool.get_collateral_balance(alpha_address, &mut helper.env)?,
        dec!("19.9"),
        dec!("0.000001"),
    );

    let deposit_id = NonFungibleLocalId::integer(1);
    assert_close(
        helper.stability_pool.get_compounded_deposit(deposit_id, &mut helper.env)?,
        dec!(7790),
        dec!("0.000001"),
    );

    // Bob claims the collateral gain without withdrawing
    let proof = helper.proof_of(&deposit_receipt)?;
    let (withdrawn, gains, _tide) =
        helper.borrower_operations.withdraw_from_stability_pool(proof, dec!(0), &mut helper.env)?;
    assert_eq!(withdrawn.amount(&mut helper.env)?, Decimal::ZERO);
    assert_close(helper.amount_of(&gains, alpha_address)?, dec!("19.9"), dec!("0.000001"));

    Ok(())
}

#[test]
fn test_liquidate_with_redistribution() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    let (_alice_tusd, _alice_receipt) = helper.open_trove(dec!(20), dec!(0), dec!(2000))?;
    let (_bob_tusd, bob_receipt) = helper.open_trove(dec!(200), dec!(0), dec!(10000))?;
    let (_carol_tusd, _carol_receipt) = helper.open_trove(dec!(0), dec!(50), dec!(2000))?;

    // The stability pool is empty, so everything is redistributed
    helper.change_collateral_price(alpha_address, dec!(120))?;
    helper.borrower_operations.liquidate(NonFungibleLocalId::integer(1), &mut helper.env)?;

    assert_eq!(helper.get_trove(1)?.status, TroveStatus::ClosedByLiquidation);

    // Only Bob holds alpha, so he takes the whole alpha share
    let (bob_pending_debt, bob_pending_collateral) =
        helper.trove_manager.get_pending_rewards(NonFungibleLocalId::integer(2), &mut helper.env)?;
    assert_close(bob_pending_debt, dec!(2210), dec!("0.000001"));
    assert_close(
        *bob_pending_collateral.get(&alpha_address).unwrap(),
        dec!("19.9"),
        dec!("0.000001"),
    );

    let (carol_pending_debt, _) =
        helper.trove_manager.get_pending_rewards(NonFungibleLocalId::integer(3), &mut helper.env)?;
    assert_eq!(carol_pending_debt, Decimal::ZERO);

    let (bob_debt, bob_collateral) =
        helper.trove_manager.get_entire_debt_and_coll(NonFungibleLocalId::integer(2), &mut helper.env)?;
    assert_close(bob_debt, dec!(12460), dec!("0.000001"));
    assert_close(*bob_collateral.get(&alpha_address).unwrap(), dec!("219.9"), dec!("0.000001"));

    // Total debt is unchanged by a redistribution
    assert_close(helper.trove_manager.get_total_debt(&mut helper.env)?, dec!(14670), dec!("0.000001"));

    // Touching Bob's trove moves the rewards into it
    let collateral = helper.collateral(dec!(1), dec!(0))?;
    let proof = helper.proof_of(&bob_receipt)?;
    helper.borrower_operations.add_collateral_to_trove(proof, collateral, &mut helper.env)?;

    let bob = helper.get_trove(2)?;
    assert_close(bob.debt, dec!(12460), dec!("0.000001"));
    assert_close(*bob.collateral.get(&alpha_address).unwrap(), dec!("220.9"), dec!("0.000001"));

    let (bob_pending_debt, _) =
        helper.trove_manager.get_pending_rewards(NonFungibleLocalId::integer(2), &mut helper.env)?;
    assert_eq!(bob_pending_debt, Decimal::ZERO);

    // Bob's stake is the only alpha stake left
    let totals = helper.trove_manager.get_collateral_totals(alpha_address, &mut helper.env)?;
    assert_eq!(totals.total_stakes, *bob.stakes.get(&alpha_address).unwrap());

    Ok(())
}

#[test]
fn test_liquidate_healthy_trove() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;
    helper.open_trove(dec!(40), dec!(0), dec!(2000))?;

    let result = helper.borrower_operations.liquidate(NonFungibleLocalId::integer(1), &mut helper.env);
    assert!(result.is_err(), "Should not liquidate a healthy trove");

    let result = helper.borrower_operations.liquidate_troves(10, &mut helper.env);
    assert!(result.is_err(), "Should find nothing to liquidate");

    assert_eq!(helper.trove_manager.get_active_trove_count(&mut helper.env)?, 2);

    Ok(())
}

#[test]
fn test_liquidate_troves_sequentially() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;
    helper.open_trove(dec!(21), dec!(0), dec!(2000))?;
    let (bob_tusd, _bob_receipt) = helper.open_trove(dec!(300), dec!(0), dec!(10000))?;
    helper.provide_to_pool(bob_tusd)?;

    // Both small troves fall below MCR
    helper.change_collateral_price(alpha_address, dec!(115))?;

    let (gas_compensation, _) = helper.borrower_operations.liquidate_troves(10, &mut helper.env)?;
    assert_eq!(gas_compensation.amount(&mut helper.env)?, dec!(400));

    assert_eq!(helper.get_trove(1)?.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(helper.get_trove(2)?.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(helper.get_trove(3)?.status, TroveStatus::Active);

    assert_close(
        helper.stability_pool.get_total_deposits(&mut helper.env)?,
        dec!(5580),
        dec!("0.000001"),
    );

    Ok(())
}

#[test]
fn test_batch_liquidate_skips_healthy_troves() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;
    let (bob_tusd, _bob_receipt) = helper.open_trove(dec!(200), dec!(0), dec!(10000))?;
    helper.provide_to_pool(bob_tusd)?;

    helper.change_collateral_price(alpha_address, dec!(120))?;

    let ids = vec![NonFungibleLocalId::integer(2), NonFungibleLocalId::integer(1)];
    helper.borrower_operations.batch_liquidate_troves(ids, &mut helper.env)?;

    assert_eq!(helper.get_trove(1)?.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(helper.get_trove(2)?.status, TroveStatus::Active);

    Ok(())
}

#[test]
fn test_capped_liquidation_in_recovery_mode() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    let (bob_tusd, _bob_receipt) = helper.open_trove(dec!(50), dec!(0), dec!(5000))?;
    let (_alice_tusd, alice_receipt) = helper.open_trove(dec!(30), dec!(0), dec!(3000))?;
    helper.provide_to_pool(bob_tusd)?;

    // TCR 12000 / 8440 is below CCR, Alice sits between MCR and TCR
    helper.change_collateral_price(alpha_address, dec!(150))?;
    assert!(helper.borrower_operations.is_recovery_mode(&mut helper.env)?);

    helper.borrower_operations.liquidate(NonFungibleLocalId::integer(2), &mut helper.env)?;
    assert_eq!(helper.get_trove(2)?.status, TroveStatus::ClosedByLiquidation);

    // The pool pays for collateral worth 1.1 times the debt, the rest stays claimable by Alice
    let claimable = helper
        .trove_manager
        .get_claimable_surplus(NonFungibleLocalId::integer(2), &mut helper.env)?;
    let surplus = *claimable.get(&alpha_address).unwrap();
    assert_close(surplus, dec!(30) - dec!("3536.5") / dec!(150), dec!("0.000001"));

    let proof = helper.proof_of(&alice_receipt)?;
    let claimed = helper.borrower_operations.claim_collateral_surplus(proof, &mut helper.env)?;
    assert_eq!(helper.amount_of(&claimed, alpha_address)?, surplus);

    // Nothing left to claim
    let proof = helper.proof_of(&alice_receipt)?;
    let result = helper.borrower_operations.claim_collateral_surplus(proof, &mut helper.env);
    assert!(result.is_err(), "Should not claim a surplus twice");

    Ok(())
}

#[test]
fn test_stability_pool_withdrawal_blocked_by_undercollateralized_trove() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;
    let (bob_tusd, _bob_receipt) = helper.open_trove(dec!(200), dec!(0), dec!(10000))?;
    let deposit_receipt = helper.provide_to_pool(bob_tusd)?;

    helper.change_collateral_price(alpha_address, dec!(120))?;

    let proof = helper.proof_of(&deposit_receipt)?;
    let result = helper
        .borrower_operations
        .withdraw_from_stability_pool(proof, dec!(100), &mut helper.env);
    assert!(result.is_err(), "Should not withdraw while a trove is below MCR");

    // Claiming gains only is still allowed
    let proof = helper.proof_of(&deposit_receipt)?;
    helper
        .borrower_operations
        .withdraw_from_stability_pool(proof, dec!(0), &mut helper.env)?;

    // After the liquidation the withdrawal goes through
    helper.borrower_operations.liquidate(NonFungibleLocalId::integer(1), &mut helper.env)?;
    let proof = helper.proof_of(&deposit_receipt)?;
    let (withdrawn, _, _) = helper
        .borrower_operations
        .withdraw_from_stability_pool(proof, dec!(100), &mut helper.env)?;
    assert_eq!(withdrawn.amount(&mut helper.env)?, dec!(100));

    Ok(())
}

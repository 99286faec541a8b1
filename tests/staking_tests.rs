mod helper;
use helper::Helper;

use scrypto_test::prelude::*;

/// Stakes TIDE from the helper's allocation and returns the stake receipt.
fn stake(helper: &mut Helper, amount: Decimal) -> Result<Bucket, RuntimeError> {
    let tide = helper.tide.take(amount, &mut helper.env)?;
    let (receipt, tusd_gain, collateral_gains) = helper.borrower_operations.stake(None, tide, &mut helper.env)?;
    assert_eq!(tusd_gain.amount(&mut helper.env)?, Decimal::ZERO);
    assert!(collateral_gains.is_empty());

    Ok(receipt.unwrap())
}

#[test]
fn test_staking_shares_borrowing_fees() -> Result<(), RuntimeError> {
    // Initialize helper
    let mut helper = Helper::new().unwrap();
    let tide_address = helper.tide_address;
    let tusd_address = helper.tusd_address;
    let stake_receipt_address = helper.stake_receipt_address;

    let first = stake(&mut helper, dec!(100))?;
    let _second = stake(&mut helper, dec!(200))?;
    let _third = stake(&mut helper, dec!(300))?;
    assert_eq!(first.resource_address(&mut helper.env)?, stake_receipt_address);
    assert_eq!(helper.staking.get_total_staked(&mut helper.env)?, dec!(600));

    // 0.5% of 12000 is 60 tUSD in fees
    helper.open_trove(dec!(100), dec!(0), dec!(12000))?;

    let gains = helper.staking.get_staker_gains(NonFungibleLocalId::integer(1), &mut helper.env)?;
    assert_eq!(gains.debt_gain, dec!(10));
    let gains = helper.staking.get_staker_gains(NonFungibleLocalId::integer(2), &mut helper.env)?;
    assert_eq!(gains.debt_gain, dec!(20));
    let gains = helper.staking.get_staker_gains(NonFungibleLocalId::integer(3), &mut helper.env)?;
    assert_eq!(gains.debt_gain, dec!(30));

    // Unstaking zero only claims
    let proof = helper.proof_of(&first)?;
    let (tide, tusd_gain, _) = helper.borrower_operations.unstake(proof, dec!(0), &mut helper.env)?;
    assert_eq!(tide.amount(&mut helper.env)?, Decimal::ZERO);
    helper.assert_bucket_eq(&tusd_gain, tusd_address, dec!(10))?;

    // Unstaking the whole stake
    let proof = helper.proof_of(&first)?;
    let (tide, tusd_gain, _) = helper.borrower_operations.unstake(proof, dec!(100), &mut helper.env)?;
    helper.assert_bucket_eq(&tide, tide_address, dec!(100))?;
    assert_eq!(tusd_gain.amount(&mut helper.env)?, Decimal::ZERO);

    assert_eq!(helper.staking.get_total_staked(&mut helper.env)?, dec!(500));

    Ok(())
}

#[test]
fn test_stake_top_up_pays_out_gains() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    let receipt = stake(&mut helper, dec!(100))?;
    helper.open_trove(dec!(100), dec!(0), dec!(12000))?;

    let tide = helper.tide.take(dec!(100), &mut helper.env)?;
    let proof = helper.proof_of(&receipt)?;
    let (new_receipt, tusd_gain, _) = helper.borrower_operations.stake(Some(proof), tide, &mut helper.env)?;
    assert!(new_receipt.is_none());
    assert_eq!(tusd_gain.amount(&mut helper.env)?, dec!(60));

    let gains = helper.staking.get_staker_gains(NonFungibleLocalId::integer(1), &mut helper.env)?;
    assert_eq!(gains.stake, dec!(200));
    assert_eq!(gains.debt_gain, Decimal::ZERO);

    Ok(())
}

#[test]
fn test_staking_shares_redemption_fees() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    let receipt = stake(&mut helper, dec!(100))?;

    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;
    let (mut bob_tusd, _bob_receipt) = helper.open_trove(dec!(100), dec!(0), dec!(10000))?;

    // 100 tUSD draws 0.5 alpha from Alice, the 0.5% floor fee goes to the staker
    let payment = bob_tusd.take(dec!(100), &mut helper.env)?;
    helper.borrower_operations.redeem(payment, dec!("0.05"), 0, &mut helper.env)?;

    let gains = helper.staking.get_staker_gains(NonFungibleLocalId::integer(1), &mut helper.env)?;
    assert_eq!(gains.collateral_gains.get(&alpha_address), Some(&dec!("0.0025")));

    let proof = helper.proof_of(&receipt)?;
    let (_, _, collateral_gains) = helper.borrower_operations.unstake(proof, dec!(0), &mut helper.env)?;
    assert_eq!(helper.amount_of(&collateral_gains, alpha_address)?, dec!("0.0025"));

    Ok(())
}

#[test]
fn test_unstake_with_foreign_receipt() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    let _receipt = stake(&mut helper, dec!(100))?;
    let (_tusd, trove_receipt) = helper.open_trove(dec!(20), dec!(0), dec!(2000))?;

    let proof = helper.proof_of(&trove_receipt)?;
    let result = helper.borrower_operations.unstake(proof, dec!(100), &mut helper.env);
    assert!(result.is_err(), "Should not unstake with a trove receipt");

    Ok(())
}

#[test]
fn test_unstake_more_than_staked() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();

    let receipt = stake(&mut helper, dec!(100))?;

    let proof = helper.proof_of(&receipt)?;
    let result = helper.borrower_operations.unstake(proof, dec!(1000), &mut helper.env);
    assert!(result.is_err(), "Should not unstake more than the stake");

    assert_eq!(helper.staking.get_total_staked(&mut helper.env)?, dec!(100));
    let gains = helper.staking.get_staker_gains(NonFungibleLocalId::integer(1), &mut helper.env)?;
    assert_eq!(gains.stake, dec!(100));

    Ok(())
}

mod helper;
use helper::Helper;

use scrypto_test::prelude::*;

#[test]
fn test_stale_price_falls_back_to_last_good_price() -> Result<(), RuntimeError> {
    // Initialize helper
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    // Opening a trove records the current prices as last good
    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;

    // The oracle moves but reports an old timestamp
    let now = helper.now();
    helper.change_collateral_price(alpha_address, dec!(150))?;
    helper.pin_price_timestamp(alpha_address, Some(now - 4000))?;

    let prices = helper.borrower_operations.get_prices(&mut helper.env)?;
    assert_eq!(prices.get(&alpha_address), Some(&dec!(200)));

    // Operations keep working on the last good price
    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;

    // Two hours on, the last good price is too old as well
    helper.advance_seconds(7201);
    let result = helper.borrower_operations.get_prices(&mut helper.env);
    assert!(result.is_err(), "Should not use a last good price older than twice the max age");

    let collateral = helper.collateral(dec!(20), dec!(0))?;
    let result = helper.borrower_operations.open_trove(None, collateral, dec!(2000), dec!("0.05"), &mut helper.env);
    assert!(result.is_err(), "Should not open a trove without a usable price");

    // A fresh reading restores service
    helper.pin_price_timestamp(alpha_address, None)?;
    let prices = helper.borrower_operations.get_prices(&mut helper.env)?;
    assert_eq!(prices.get(&alpha_address), Some(&dec!(150)));

    Ok(())
}

#[test]
fn test_zero_price_falls_back_to_last_good_price() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;
    let beta_address = helper.beta_address;

    helper.open_trove(dec!(20), dec!(0), dec!(2000))?;

    helper.change_collateral_price(alpha_address, dec!(0))?;
    let prices = helper.borrower_operations.get_prices(&mut helper.env)?;
    assert_eq!(prices.get(&alpha_address), Some(&dec!(200)));
    assert_eq!(prices.get(&beta_address), Some(&dec!(100)));

    helper.advance_seconds(7201);
    let result = helper.borrower_operations.get_prices(&mut helper.env);
    assert!(result.is_err(), "Should not use a last good price older than twice the max age");

    Ok(())
}

#[test]
fn test_zero_price_without_history() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let alpha_address = helper.alpha_address;

    // Nothing has been recorded yet
    helper.change_collateral_price(alpha_address, dec!(0))?;
    let result = helper.borrower_operations.get_prices(&mut helper.env);
    assert!(result.is_err(), "Should not accept a zero price");

    Ok(())
}

#[test]
fn test_set_oracle_requires_owner() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let oracle_address = helper.oracle_address;
    let alpha_address = helper.alpha_address;

    let result = helper.borrower_operations.set_oracle(
        oracle_address,
        "get_price".to_string(),
        60,
        &mut helper.env,
    );
    assert!(result.is_err(), "Should not set the oracle without the owner badge");

    // With a one minute max age, a reading two minutes old is stale
    helper.env.disable_auth_module();
    helper.borrower_operations.set_oracle(oracle_address, "get_price".to_string(), 60, &mut helper.env)?;
    helper.env.enable_auth_module();

    let now = helper.now();
    helper.pin_price_timestamp(alpha_address, Some(now - 120))?;
    let result = helper.borrower_operations.get_prices(&mut helper.env);
    assert!(result.is_err(), "Should not use a stale reading without a last good price");

    Ok(())
}

//! Collateral types accepted by the protocol and the value math shared by every ratio computation.
//!
//! A collateral amount is converted into *value units* (VC) as `amount * price * ratio`. The ratio
//! weighting lets a basket of heterogeneous collateral be compared against a single MCR/CCR.

use crate::errors::ProtocolError;
use crate::shared_structs::*;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Debug)]
pub struct CollateralType {
    pub address: ResourceAddress,
    /// Weight in `(0, 1]` applied to the collateral's market value.
    pub ratio: Decimal,
    /// Identifier of the collateral at the price source.
    pub market_id: String,
    /// Inactive collateral can still be withdrawn, liquidated and redeemed, but not deposited.
    pub active: bool,
}

#[derive(ScryptoSbor, Clone, Debug, Default)]
pub struct CollateralRegistry {
    pub types: IndexMap<ResourceAddress, CollateralType>,
}

impl CollateralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        address: ResourceAddress,
        ratio: Decimal,
        market_id: String,
    ) -> Result<(), ProtocolError> {
        Self::check_ratio(ratio)?;
        if self.types.contains_key(&address) {
            return Err(ProtocolError::InvalidParameter);
        }
        self.types.insert(
            address,
            CollateralType {
                address,
                ratio,
                market_id,
                active: true,
            },
        );
        Ok(())
    }

    pub fn set_ratio(&mut self, address: ResourceAddress, ratio: Decimal) -> Result<(), ProtocolError> {
        Self::check_ratio(ratio)?;
        self.types
            .get_mut(&address)
            .ok_or(ProtocolError::UnknownCollateral)?
            .ratio = ratio;
        Ok(())
    }

    pub fn set_active(&mut self, address: ResourceAddress, active: bool) -> Result<(), ProtocolError> {
        self.types
            .get_mut(&address)
            .ok_or(ProtocolError::UnknownCollateral)?
            .active = active;
        Ok(())
    }

    pub fn get(&self, address: &ResourceAddress) -> Result<&CollateralType, ProtocolError> {
        self.types.get(address).ok_or(ProtocolError::UnknownCollateral)
    }

    pub fn addresses(&self) -> Vec<ResourceAddress> {
        self.types.keys().cloned().collect()
    }

    /// Checks that every collateral in `amounts` may be deposited.
    pub fn require_depositable(&self, amounts: &CollateralAmounts) -> Result<(), ProtocolError> {
        for address in amounts.keys() {
            if !self.get(address)?.active {
                return Err(ProtocolError::CollateralNotActive);
            }
        }
        Ok(())
    }

    /// Ratio-weighted market value (VC) of a collateral basket.
    pub fn value_of(&self, amounts: &CollateralAmounts, prices: &PriceSet) -> Result<Decimal, ProtocolError> {
        let mut value = Decimal::ZERO;
        for (address, amount) in amounts {
            value += self.value_of_one(address, *amount, prices)?;
        }
        Ok(value)
    }

    pub fn value_of_one(
        &self,
        address: &ResourceAddress,
        amount: Decimal,
        prices: &PriceSet,
    ) -> Result<Decimal, ProtocolError> {
        let ratio = self.get(address)?.ratio;
        let price = *prices.get(address).ok_or(ProtocolError::InvalidPrice)?;
        Ok(amount * price * ratio)
    }

    /// Unweighted market value of a collateral basket. Redemptions pay out at market value.
    pub fn market_value_of(&self, amounts: &CollateralAmounts, prices: &PriceSet) -> Result<Decimal, ProtocolError> {
        let mut value = Decimal::ZERO;
        for (address, amount) in amounts {
            self.get(address)?;
            let price = *prices.get(address).ok_or(ProtocolError::InvalidPrice)?;
            value += *amount * price;
        }
        Ok(value)
    }

    /// Price-free ratio-weighted amount of a basket. Used to key the sorted trove index.
    pub fn nominal_value_of(&self, amounts: &CollateralAmounts) -> Result<Decimal, ProtocolError> {
        let mut value = Decimal::ZERO;
        for (address, amount) in amounts {
            value += *amount * self.get(address)?.ratio;
        }
        Ok(value)
    }

    fn check_ratio(ratio: Decimal) -> Result<(), ProtocolError> {
        if ratio <= Decimal::ZERO || ratio > Decimal::ONE {
            return Err(ProtocolError::InvalidParameter);
        }
        Ok(())
    }
}

/// Collateral ratio of `value` against `debt`. A debt of zero yields `Decimal::MAX`.
pub fn collateral_ratio(value: Decimal, debt: Decimal) -> Decimal {
    if debt.is_zero() {
        Decimal::MAX
    } else {
        value / debt
    }
}

pub fn add_amount(amounts: &mut CollateralAmounts, address: ResourceAddress, amount: Decimal) {
    if amount.is_zero() {
        return;
    }
    *amounts.entry(address).or_insert(Decimal::ZERO) += amount;
}

/// Subtracts `amount`, removing the entry when it reaches zero.
pub fn sub_amount(
    amounts: &mut CollateralAmounts,
    address: ResourceAddress,
    amount: Decimal,
) -> Result<(), ProtocolError> {
    if amount.is_zero() {
        return Ok(());
    }
    let held = amounts.get(&address).cloned().unwrap_or(Decimal::ZERO);
    if amount > held {
        return Err(ProtocolError::WithdrawalExceedsCollateral);
    }
    if held == amount {
        amounts.shift_remove(&address);
    } else {
        amounts.insert(address, held - amount);
    }
    Ok(())
}

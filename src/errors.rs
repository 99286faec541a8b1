//! Failure taxonomy of the ledgers.
//!
//! Ledger functions return `Result<_, ProtocolError>` and never leave partial state behind when they
//! fail: every check runs before the first mutation. Blueprints turn an `Err` into a transaction
//! abort with [`OrPanic::or_panic`], which rolls back all vault movements of the transaction as well.

use scrypto::prelude::*;

#[derive(ScryptoSbor, Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    // Solvency violations
    #[error("An operation that would result in ICR < MCR is not permitted")]
    IcrBelowMcr,
    #[error("Operation must leave trove with ICR >= CCR")]
    IcrBelowCcr,
    #[error("An operation that would result in TCR < CCR is not permitted")]
    TcrBelowCcr,
    #[error("Cannot decrease your trove's ICR in Recovery Mode")]
    IcrDecreasedInRecoveryMode,
    #[error("Collateral withdrawal not permitted in Recovery Mode")]
    CollateralWithdrawalInRecoveryMode,
    #[error("Operation not permitted during Recovery Mode")]
    CloseInRecoveryMode,
    #[error("Cannot redeem when TCR < MCR")]
    RedemptionBelowMcr,
    // Invalid request shape
    #[error("There must be either a collateral change or a debt change")]
    ZeroAdjustment,
    #[error("Cannot withdraw and add collateral in one operation")]
    CollateralTopUpAndWithdrawal,
    #[error("Debt increase requires non-zero debt change")]
    ZeroDebtIncrease,
    #[error("Amount must be non-zero")]
    ZeroAmount,
    #[error("Trove's net debt must be greater than minimum")]
    NetDebtBelowMinimum,
    #[error("Cannot withdraw more collateral than the trove holds")]
    WithdrawalExceedsCollateral,
    #[error("Amount repaid must not be larger than the trove's debt")]
    RepaymentExceedsDebt,
    #[error("Collateral type is not registered")]
    UnknownCollateral,
    #[error("Collateral type is not accepted for new deposits")]
    CollateralNotActive,
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("Kickback rate must be in [0, 1]")]
    InvalidKickbackRate,
    // State mismatches
    #[error("Trove is active")]
    TroveAlreadyActive,
    #[error("Trove does not exist or is closed")]
    TroveNotActive,
    #[error("Only one trove in the system")]
    OnlyOneTroveInSystem,
    #[error("Nothing to liquidate")]
    NothingToLiquidate,
    #[error("Unable to redeem any amount")]
    NothingToRedeem,
    #[error("User must have a non-zero deposit")]
    NoDeposit,
    #[error("User must have a non-zero stake")]
    NoStake,
    #[error("Cannot unstake more than the staked amount")]
    UnstakeExceedsStake,
    #[error("Tag must be a registered front end, or none")]
    UnknownFrontEnd,
    #[error("Debt to offset exceeds stability pool deposits")]
    InsufficientStabilityPoolDeposits,
    #[error("Cannot withdraw while there are troves with ICR < MCR")]
    UndercollateralizedTroves,
    #[error("Stability pool product would truncate to zero")]
    ProductUnderflow,
    // Fee bounds
    #[error("Max fee percentage must be between the fee floor and 100%")]
    MaxFeeOutOfRange,
    #[error("Fee exceeded provided maximum")]
    FeeExceedsMaximum,
    // Balance shortfalls
    #[error("Caller doesn't have enough tUSD to make repayment")]
    InsufficientDebtTokenBalance,
    // Price collaborator faults
    #[error("Oracle returned an invalid price")]
    InvalidPrice,
    #[error("Oracle price is stale and no fallback is available")]
    StalePrice,
}

/// Aborts the running transaction on a ledger error.
pub trait OrPanic<T> {
    fn or_panic(self) -> T;
}

impl<T> OrPanic<T> for Result<T, ProtocolError> {
    fn or_panic(self) -> T {
        match self {
            Ok(value) => value,
            Err(error) => panic!("{}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_display_their_message() {
        assert_eq!(
            ProtocolError::UnstakeExceedsStake.to_string(),
            "Cannot unstake more than the staked amount"
        );
        assert_eq!(ProtocolError::StalePrice.to_string(), "Oracle price is stale and no fallback is available");
    }
}

//! Validation Helpers for the Tranche Protocol
//!
//! Reusable checks shared by the fee policy, the perp and the vault.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tranche_common::validation::{check, require_perc};
//!
//! check!(amount > 0, TrancheError::ZeroAmount);
//! require_perc(skim_perc, "skim_perc")?;
//! ```

use crate::{
    constants::fixed_point::ONE,
    errors::{TrancheError, TrancheResult},
    types::{Address, Range, ZERO_ADDRESS},
};

// ============ Validation Macro ============

/// Check a condition and return an error if it fails.
///
/// # Examples
///
/// ```rust,ignore
/// check!(
///     amount <= supply,
///     TrancheError::UnacceptableBurnAmt { amount, supply }
/// );
/// ```
#[macro_export]
macro_rules! check {
    ($condition:expr, $error:expr) => {
        if !($condition) {
            return Err($error);
        }
    };
}

pub use check;

// ============ Common Validation Helpers ============

/// Require a value to be positive (non-zero).
pub fn require_positive(value: u64, param: &'static str) -> TrancheResult<()> {
    if value == 0 {
        return Err(TrancheError::InvalidInput {
            param,
            reason: "must be positive",
        });
    }
    Ok(())
}

/// Require a fixed-point percentage within `[0, ONE]`.
pub fn require_perc(value: u64, param: &'static str) -> TrancheResult<()> {
    if value > ONE {
        return Err(TrancheError::InvalidPerc { param, value });
    }
    Ok(())
}

/// Require a range whose bounds are both valid percentages and ordered.
pub fn require_perc_range(range: &Range, param: &'static str) -> TrancheResult<()> {
    require_perc(range.lower, param)?;
    require_perc(range.upper, param)?;
    if !range.is_ordered() {
        return Err(TrancheError::InvalidFeeRange);
    }
    Ok(())
}

/// Require sufficient balance for an operation.
pub fn require_sufficient_balance(available: u64, requested: u64) -> TrancheResult<()> {
    if available < requested {
        return Err(TrancheError::InsufficientBalance {
            available,
            requested,
        });
    }
    Ok(())
}

/// Require the signer to be the owner.
pub fn require_owner(owner: Address, signer: Address) -> TrancheResult<()> {
    if owner != signer {
        return Err(TrancheError::Unauthorized {
            expected: owner,
            actual: signer,
        });
    }
    Ok(())
}

/// Require address to not be zero.
pub fn require_valid_address(address: Address, param: &'static str) -> TrancheResult<()> {
    if address == ZERO_ADDRESS {
        return Err(TrancheError::InvalidAddress { reason: param });
    }
    Ok(())
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded(amount: u64) -> TrancheResult<u64> {
        check!(amount > 0, TrancheError::ZeroAmount);
        Ok(amount)
    }

    #[test]
    fn test_check_macro() {
        assert_eq!(guarded(5), Ok(5));
        assert_eq!(guarded(0), Err(TrancheError::ZeroAmount));
    }

    #[test]
    fn test_require_perc() {
        assert!(require_perc(0, "fee").is_ok());
        assert!(require_perc(ONE, "fee").is_ok());
        assert_eq!(
            require_perc(ONE + 1, "fee"),
            Err(TrancheError::InvalidPerc { param: "fee", value: ONE + 1 })
        );
    }

    #[test]
    fn test_require_perc_range() {
        assert!(require_perc_range(&Range::new(1, 2), "flash").is_ok());
        assert_eq!(require_perc_range(&Range::new(2, 1), "flash"), Err(TrancheError::InvalidFeeRange));
        assert!(require_perc_range(&Range::new(0, ONE + 1), "flash").is_err());
    }

    #[test]
    fn test_require_owner() {
        let owner = [1u8; 32];
        assert!(require_owner(owner, owner).is_ok());
        assert!(matches!(
            require_owner(owner, [2u8; 32]),
            Err(TrancheError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_require_helpers() {
        assert!(require_positive(1, "amount").is_ok());
        assert!(require_positive(0, "amount").is_err());
        assert!(require_sufficient_balance(10, 10).is_ok());
        assert!(require_sufficient_balance(9, 10).is_err());
        assert!(require_valid_address(ZERO_ADDRESS, "collector").is_err());
    }
}

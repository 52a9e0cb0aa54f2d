//! Error Types for the Tranche Protocol
//!
//! Every failure aborts the whole operation; the ledgers restore their
//! pre-operation state before surfacing one of these to the caller.

use crate::types::{Address, BondId, TokenId};

/// Result type alias for protocol operations
pub type TrancheResult<T> = Result<T, TrancheError>;

/// Main error enum for all protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrancheError {
    // ============ Input Rejection ============
    /// Tranche does not belong to the current deposit bond
    UnacceptableDepositTranche { token: TokenId },

    /// Tranche in / token out pair may not be rolled over
    UnacceptableRollover { tranche_in: TokenId, token_out: TokenId },

    /// Mint would produce zero perps
    UnacceptableMintAmt,

    /// Burn amount is zero or exceeds supply
    UnacceptableBurnAmt { amount: u64, supply: u64 },

    /// One of the rollover amounts resolved to zero
    UnacceptableRolloverAmt,

    /// A swap resolved to zero in or out
    UnacceptableSwap,

    /// Zero amount not allowed
    ZeroAmount,

    /// Insufficient balance for operation
    InsufficientBalance { available: u64, requested: u64 },

    /// Percentage outside of [0, ONE]
    InvalidPerc { param: &'static str, value: u64 },

    /// Caller is not authorized for this operation
    Unauthorized { expected: Address, actual: Address },

    /// Caller is not a registered roller
    UnauthorizedRoller { caller: Address },

    /// Bond is not known to the chain
    UnknownBond { bond: BondId },

    /// Token is not a tranche of any known bond
    UnknownTranche { token: TokenId },

    /// Invalid input parameter
    InvalidInput { param: &'static str, reason: &'static str },

    // ============ Policy Breach ============
    /// Operation would push perp supply over its cap
    ExceededMaxSupply { supply: u64, max_supply: u64 },

    /// Operation would push perps minted against one tranche over its cap
    ExceededMaxMintPerTranche { token: TokenId, minted: u64, max_mint: u64 },

    /// Vault has nothing it can deploy, or nothing was rolled
    InsufficientDeployment,

    /// Vault underlying balance would fall to or below its floor
    InsufficientLiquidity { balance: u64, floor: u64 },

    /// Vault would track more deployed assets than allowed
    DeployedCountOverLimit { count: usize, limit: usize },

    /// Redenomination attempted while tranches remain or nothing is held
    UnacceptableRedenomination,

    /// Rebalance called before the configured interval elapsed
    LastRebalanceTooRecent { last: u64, now: u64 },

    /// Perp has no deposit bond yet
    NoDepositBond,

    /// Ledger entered while an operation is already in flight
    Reentrancy,

    // ============ Configuration ============
    /// Hard deviation bound does not contain the soft one
    InvalidDeviationBounds,

    /// Rebalance equilibrium band does not bracket ONE
    InvalidRebalanceBand,

    /// Target subscription ratio outside the allowed range
    InvalidTargetSubscriptionRatio { value: u64 },

    /// Sigmoid asymptotes or growth out of range
    InvalidSigmoidParams,

    /// Fee range with lower above upper
    InvalidFeeRange,

    /// Strategy reports decimals different from the declared precision
    InvalidStrategyDecimals { expected: u8, actual: u8 },

    /// Tranche ratios do not sum to the granularity
    InvalidTrancheRatios,

    /// Bond does not have exactly the supported number of tranches
    UnsupportedTrancheCount { count: usize },

    /// Invalid address (e.g., zero address)
    InvalidAddress { reason: &'static str },

    // ============ Bond Primitive ============
    /// Operation requires an immature bond
    BondMature { bond: BondId },

    /// Operation requires a mature bond
    BondNotMature { bond: BondId },

    /// Redemption amounts do not match the tranche ratios
    InvalidRedemptionRatio,

    // ============ Arithmetic / Domain ============
    /// Power primitive asked for more than the supported half-life units
    ExponentTooLarge { exponent: i128 },

    /// Interval with lower bound above upper bound
    InvalidRange { lower: u64, upper: u64 },

    /// Arithmetic overflow occurred
    Overflow,

    /// Arithmetic underflow occurred
    Underflow,

    /// Division by zero
    DivisionByZero,
}

/// Broad classes of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error, fix the request and resubmit
    InputRejection,
    /// System-protective refusal
    PolicyBreach,
    /// Invalid admin configuration
    Configuration,
    /// Implementation invariant violation
    Arithmetic,
}

impl TrancheError {
    /// Returns a human-readable error code for logging/debugging
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnacceptableDepositTranche { .. } => "E001_UNACCEPTABLE_DEPOSIT_TRANCHE",
            Self::UnacceptableRollover { .. } => "E002_UNACCEPTABLE_ROLLOVER",
            Self::UnacceptableMintAmt => "E003_UNACCEPTABLE_MINT_AMT",
            Self::UnacceptableBurnAmt { .. } => "E004_UNACCEPTABLE_BURN_AMT",
            Self::UnacceptableRolloverAmt => "E005_UNACCEPTABLE_ROLLOVER_AMT",
            Self::UnacceptableSwap => "E006_UNACCEPTABLE_SWAP",
            Self::ZeroAmount => "E007_ZERO_AMOUNT",
            Self::InsufficientBalance { .. } => "E008_INSUFFICIENT_BALANCE",
            Self::InvalidPerc { .. } => "E009_INVALID_PERC",
            Self::Unauthorized { .. } => "E010_UNAUTHORIZED",
            Self::UnauthorizedRoller { .. } => "E011_UNAUTHORIZED_ROLLER",
            Self::UnknownBond { .. } => "E012_UNKNOWN_BOND",
            Self::UnknownTranche { .. } => "E013_UNKNOWN_TRANCHE",
            Self::InvalidInput { .. } => "E014_INVALID_INPUT",
            Self::ExceededMaxSupply { .. } => "E020_MAX_SUPPLY",
            Self::ExceededMaxMintPerTranche { .. } => "E021_MAX_MINT_PER_TRANCHE",
            Self::InsufficientDeployment => "E022_INSUFFICIENT_DEPLOYMENT",
            Self::InsufficientLiquidity { .. } => "E023_INSUFFICIENT_LIQUIDITY",
            Self::DeployedCountOverLimit { .. } => "E024_DEPLOYED_COUNT",
            Self::UnacceptableRedenomination => "E025_UNACCEPTABLE_REDENOMINATION",
            Self::LastRebalanceTooRecent { .. } => "E026_REBALANCE_TOO_RECENT",
            Self::NoDepositBond => "E027_NO_DEPOSIT_BOND",
            Self::Reentrancy => "E028_REENTRANCY",
            Self::InvalidDeviationBounds => "E030_INVALID_DR_BOUNDS",
            Self::InvalidRebalanceBand => "E031_INVALID_REBAL_BAND",
            Self::InvalidTargetSubscriptionRatio { .. } => "E032_INVALID_TARGET_SR",
            Self::InvalidSigmoidParams => "E033_INVALID_SIGMOID",
            Self::InvalidFeeRange => "E034_INVALID_FEE_RANGE",
            Self::InvalidStrategyDecimals { .. } => "E035_INVALID_STRATEGY_DECIMALS",
            Self::InvalidTrancheRatios => "E036_INVALID_TRANCHE_RATIOS",
            Self::UnsupportedTrancheCount { .. } => "E037_UNSUPPORTED_TRANCHE_COUNT",
            Self::InvalidAddress { .. } => "E038_INVALID_ADDRESS",
            Self::BondMature { .. } => "E040_BOND_MATURE",
            Self::BondNotMature { .. } => "E041_BOND_NOT_MATURE",
            Self::InvalidRedemptionRatio => "E042_INVALID_REDEMPTION_RATIO",
            Self::ExponentTooLarge { .. } => "E050_EXPONENT_TOO_LARGE",
            Self::InvalidRange { .. } => "E051_INVALID_RANGE",
            Self::Overflow => "E052_OVERFLOW",
            Self::Underflow => "E053_UNDERFLOW",
            Self::DivisionByZero => "E054_DIV_ZERO",
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnacceptableDepositTranche { .. }
            | Self::UnacceptableRollover { .. }
            | Self::UnacceptableMintAmt
            | Self::UnacceptableBurnAmt { .. }
            | Self::UnacceptableRolloverAmt
            | Self::UnacceptableSwap
            | Self::ZeroAmount
            | Self::InsufficientBalance { .. }
            | Self::InvalidPerc { .. }
            | Self::Unauthorized { .. }
            | Self::UnauthorizedRoller { .. }
            | Self::UnknownBond { .. }
            | Self::UnknownTranche { .. }
            | Self::InvalidInput { .. }
            | Self::BondMature { .. }
            | Self::BondNotMature { .. }
            | Self::InvalidRedemptionRatio => ErrorKind::InputRejection,

            Self::ExceededMaxSupply { .. }
            | Self::ExceededMaxMintPerTranche { .. }
            | Self::InsufficientDeployment
            | Self::InsufficientLiquidity { .. }
            | Self::DeployedCountOverLimit { .. }
            | Self::UnacceptableRedenomination
            | Self::LastRebalanceTooRecent { .. }
            | Self::NoDepositBond
            | Self::Reentrancy => ErrorKind::PolicyBreach,

            Self::InvalidDeviationBounds
            | Self::InvalidRebalanceBand
            | Self::InvalidTargetSubscriptionRatio { .. }
            | Self::InvalidSigmoidParams
            | Self::InvalidFeeRange
            | Self::InvalidStrategyDecimals { .. }
            | Self::InvalidTrancheRatios
            | Self::UnsupportedTrancheCount { .. }
            | Self::InvalidAddress { .. } => ErrorKind::Configuration,

            Self::ExponentTooLarge { .. }
            | Self::InvalidRange { .. }
            | Self::Overflow
            | Self::Underflow
            | Self::DivisionByZero => ErrorKind::Arithmetic,
        }
    }

    /// Returns true if this error is recoverable (user can fix it)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InsufficientBalance { .. } => true, // Get more funds
            Self::UnacceptableDepositTranche { .. } => true, // Use the current deposit bond
            Self::LastRebalanceTooRecent { .. } => true, // Wait for the next window
            Self::InsufficientDeployment => true, // Wait for more deposits
            _ => false,
        }
    }
}

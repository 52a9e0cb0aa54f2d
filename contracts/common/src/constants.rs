//! Protocol Constants
//!
//! All fixed-point units, granularities and default configuration values
//! for the perpetual tranche protocol.
//!
//! Percentages use `fixed_point::PERC_DECIMALS` decimals, so `ONE`
//! (`10^8`) denotes 100%.

/// Fixed-point units
pub mod fixed_point {
    /// Decimal places for percentages, ratios and yields
    pub const PERC_DECIMALS: u8 = 8;
    /// One unit (100%) in fixed point
    pub const ONE: u64 = 100_000_000;
    /// `ONE` as a signed value for sigmoid/line computations
    pub const ONE_I128: i128 = ONE as i128;
}

/// Tranche configuration
pub mod tranches {
    /// Tranche ratios of a bond always sum to this value
    pub const TRANCHE_RATIO_GRANULARITY: u64 = 1_000;

    /// The perp and the vault only work with two-tranche bonds
    pub const REQUIRED_TRANCHE_COUNT: usize = 2;

    /// Index of the senior tranche within a bond
    pub const SENIOR_INDEX: usize = 0;

    /// Index of the junior tranche within a bond
    pub const JUNIOR_INDEX: usize = 1;

    /// Bond deposit fees are quoted in basis points
    pub const BOND_FEE_BPS_DENOMINATOR: u64 = 10_000;
}

/// Pricing and yield strategy precision
pub mod pricing {
    /// Decimals every pricing strategy must report
    pub const PRICE_DECIMALS: u8 = 8;
    /// Price of one unit at par
    pub const UNIT_PRICE: u64 = 100_000_000;
    /// Decimals every yield strategy must report
    pub const YIELD_DECIMALS: u8 = 8;
    /// Yield factor of a fully counted tranche
    pub const UNIT_YIELD: u64 = 100_000_000;
}

/// Fee policy bounds and defaults (fixed point, `ONE` = 100%)
pub mod fees {
    use super::fixed_point::ONE;

    /// Lowest configurable target subscription ratio (0.75)
    pub const TARGET_SR_LOWER_BOUND: u64 = ONE * 3 / 4;

    /// Highest configurable target subscription ratio (2.0)
    pub const TARGET_SR_UPPER_BOUND: u64 = ONE * 2;

    /// Default target subscription ratio (1.33)
    pub const DEFAULT_TARGET_SUBSCRIPTION_RATIO: u64 = 133_000_000;

    /// Default hard deviation bound, swaps are disabled outside of it
    pub const DEFAULT_DR_HARD_LOWER: u64 = ONE * 3 / 4;
    pub const DEFAULT_DR_HARD_UPPER: u64 = ONE * 2;

    /// Default soft deviation bound, cheapest swaps inside of it
    pub const DEFAULT_DR_SOFT_LOWER: u64 = ONE * 9 / 10;
    pub const DEFAULT_DR_SOFT_UPPER: u64 = ONE * 5 / 4;

    /// Default rebalance equilibrium band
    pub const DEFAULT_REBAL_EQ_LOWER: u64 = ONE * 95 / 100;
    pub const DEFAULT_REBAL_EQ_UPPER: u64 = ONE * 105 / 100;

    /// Default flash fee levels (0.1% inside soft bound, 5% at the hard bound)
    pub const DEFAULT_FLASH_FEE_LOWER: u64 = ONE / 1_000;
    pub const DEFAULT_FLASH_FEE_UPPER: u64 = ONE / 20;

    /// Default daily rebalance caps as a share of system TVL (0.1%)
    pub const DEFAULT_DEBASEMENT_SYSTEM_TVL_PERC: u64 = ONE / 1_000;
    pub const DEFAULT_ENRICHMENT_SYSTEM_TVL_PERC: u64 = ONE / 1_000;

    /// Default protocol share of rebalance flows (1%)
    pub const DEFAULT_PROTOCOL_SHARE_PERC: u64 = ONE / 100;
}

/// Sigmoid configuration
pub mod sigmoid {
    use super::fixed_point::ONE_I128;

    /// The exponent handed to the power primitive is clamped to +/- this
    /// many whole units
    pub const MAX_EXPONENT_WHOLE: i128 = 100;

    /// Absolute bound on sigmoid asymptotes used as fee percentages
    pub const MAX_ASYMPTOTE: i128 = ONE_I128;

    /// Default perp rollover fee curve: -1% .. 5%, growth 4
    pub const DEFAULT_ROLLOVER_FEE_LOWER: i128 = -ONE_I128 / 100;
    pub const DEFAULT_ROLLOVER_FEE_UPPER: i128 = ONE_I128 / 20;
    pub const DEFAULT_ROLLOVER_FEE_GROWTH: i128 = 4 * ONE_I128;
}

/// Rollover vault configuration
pub mod vault {
    /// Notes minted per underlying unit on the first deposit
    pub const INITIAL_RATE: u64 = 1_000_000;

    /// Tranche balances at or below this are dust and never redeemed
    pub const TRANCHE_DUST_AMT: u64 = 10_000_000;

    /// Upper bound on the number of deployed assets the vault tracks
    pub const MAX_DEPLOYED_COUNT: usize = 47;
}

/// Time-related constants (seconds)
pub mod time {
    /// Seconds per day
    pub const DAY: u64 = 86_400;

    /// Seconds per week
    pub const WEEK: u64 = 7 * DAY;

    /// Minimum spacing between vault rebalances
    pub const DEFAULT_REBALANCE_FREQ_SEC: u64 = DAY;
}

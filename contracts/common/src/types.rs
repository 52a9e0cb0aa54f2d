//! Core Types for the Tranche Protocol
//!
//! Identifiers, fixed-point ranges and lines, and the value objects passed
//! between the fee policy and the two ledgers.

use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Type alias for holder addresses (32-byte hash)
pub type Address = [u8; 32];

/// Type alias for token identifiers; a token's custody address is its id
pub type TokenId = [u8; 32];

/// Type alias for bond identifiers; a bond's custody address is its id
pub type BondId = [u8; 32];

/// The zero address, never a valid holder
pub const ZERO_ADDRESS: Address = [0u8; 32];

// ============ Fixed-point Shapes ============

/// Closed interval `[lower, upper]` of fixed-point values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Range {
    pub lower: u64,
    pub upper: u64,
}

impl Range {
    pub const fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// Returns true if `x` lies inside the closed interval
    pub fn contains(&self, x: u64) -> bool {
        self.lower <= x && x <= self.upper
    }

    /// Returns true if `other` lies entirely within this range
    pub fn encloses(&self, other: &Range) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    /// Returns true if `lower <= upper`
    pub fn is_ordered(&self) -> bool {
        self.lower <= self.upper
    }
}

/// Line through `(x1, y1)` and `(x2, y2)`; y values may be negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Line {
    pub x1: u64,
    pub y1: i128,
    pub x2: u64,
    pub y2: i128,
}

impl Line {
    pub const fn new(x1: u64, y1: i128, x2: u64, y2: i128) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Horizontal line at `y`
    pub const fn flat(y: i128) -> Self {
        Self { x1: 0, y1: y, x2: 1, y2: y }
    }
}

/// Sigmoid curve parameters (signed fixed point)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SigmoidParams {
    pub lower: i128,
    pub upper: i128,
    pub growth: i128,
}

// ============ Subscription ============

/// Snapshot of both pools, taken once at the start of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SubscriptionState {
    /// Perp TVL, denominated in underlying
    pub perp_tvl: u64,
    /// Vault TVL, denominated in underlying
    pub vault_tvl: u64,
    /// Senior tranche ratio of the deposit bond, out of the granularity
    pub senior_tr: u64,
}

/// Output of the rebalance computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RebalanceData {
    /// Net underlying moving into perp (negative: out of perp into the vault)
    pub underlying_amt_into_perp: i128,
    /// Underlying paid to the protocol on top of the net flow
    pub protocol_fee_amt: u64,
}

impl RebalanceData {
    /// Returns true if nothing moves
    pub fn is_noop(&self) -> bool {
        self.underlying_amt_into_perp == 0 && self.protocol_fee_amt == 0
    }
}

// ============ Token Amounts ============

/// A token paired with an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TokenAmount {
    pub token: TokenId,
    pub amount: u64,
}

impl TokenAmount {
    pub const fn new(token: TokenId, amount: u64) -> Self {
        Self { token, amount }
    }
}

/// A tranche token and its ratio within the parent bond
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Tranche {
    pub token: TokenId,
    pub ratio: u64,
}

/// Tranche tokens and ratios of a bond, seniors first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TrancheData {
    pub tranches: Vec<Tranche>,
}

impl TrancheData {
    /// Number of tranches
    pub fn count(&self) -> usize {
        self.tranches.len()
    }

    /// Index of `token` within the bond
    pub fn index_of(&self, token: &TokenId) -> Option<usize> {
        self.tranches.iter().position(|t| t.token == *token)
    }

    /// Returns true if `token` is one of the bond's tranches
    pub fn contains(&self, token: &TokenId) -> bool {
        self.index_of(token).is_some()
    }

    /// Tranche ratios in seniority order
    pub fn ratios(&self) -> Vec<u64> {
        self.tranches.iter().map(|t| t.ratio).collect()
    }
}

/// Amounts resolved for a rollover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RolloverData {
    /// Tranche tokens moving into the perp reserve
    pub tranche_in_amt: u64,
    /// Tokens moving out of the perp reserve
    pub token_out_amt: u64,
    /// Perp-denominated value of the tranches rolled in
    pub perp_rollover_amt: u64,
    /// Standardized amount entering the reserve
    pub std_tranche_in_amt: u64,
    /// Standardized amount leaving the reserve
    pub std_tranche_out_amt: u64,
}

impl RolloverData {
    /// Returns true if every leg of the rollover is non-zero
    pub fn is_complete(&self) -> bool {
        self.tranche_in_amt > 0 && self.token_out_amt > 0 && self.perp_rollover_amt > 0
    }
}

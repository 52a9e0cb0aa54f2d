//! Tranche Protocol Common Library
//!
//! Shared building blocks for the perpetual tranche (perp) and the rollover
//! vault:
//!
//! - **Fixed-point math**: checked mul-div with explicit rounding, the
//!   bounded sigmoid curve and piecewise-linear averaging helpers.
//! - **Errors and events**: the protocol error taxonomy and the event log
//!   every ledger writes to.
//! - **External collaborators**: an in-memory fungible token ledger
//!   (rebasing aware), the two-tranche bond primitive, the periodic bond
//!   issuer and the [`chain::Chain`] that owns them.
//! - **BondView**: the read-only adapter the ledgers use to reason about a
//!   bond (ratios, maturity, collateralization, redeemable amounts).
//!
//! This crate is `no_std` compatible (with `alloc`) when built without the
//! default `std` feature.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

// Re-export collections for submodules based on feature
#[cfg(not(feature = "std"))]
pub use alloc::collections::{BTreeMap, BTreeSet};
#[cfg(not(feature = "std"))]
pub use alloc::vec::Vec;
#[cfg(feature = "std")]
pub use std::collections::{BTreeMap, BTreeSet};
#[cfg(feature = "std")]
pub use std::vec::Vec;

pub mod constants;
pub mod errors;
pub mod types;
pub mod math;
pub mod sigmoid;
pub mod line;
pub mod events;
pub mod validation;
pub mod guard;
pub mod tokens;
pub mod bond;
pub mod bond_view;
pub mod issuer;
pub mod chain;

// Re-exports for convenience
pub use constants::*;
pub use errors::*;
pub use types::*;
pub use events::{ConfigParam, EventLog, EventType, ProtocolEvent};
pub use guard::ReentrancyGuard;
pub use tokens::TokenLedger;
pub use bond::Bond;
pub use bond_view::{BondView, Collateralization};
pub use issuer::BondIssuer;
pub use chain::Chain;
pub use line::compute_piecewise_avg_y;
pub use sigmoid::{sigmoid, two_power};

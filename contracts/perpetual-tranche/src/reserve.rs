//! Reserve Set
//!
//! Tokens backing the perp. The mature token is a permanent member; a
//! tranche is a member exactly while the perp holds a non-zero balance
//! of it.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use tranche_common::{types::TokenId, BTreeSet, Vec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ReserveSet {
    mature: TokenId,
    tranches: BTreeSet<TokenId>,
}

impl ReserveSet {
    pub fn new(mature: TokenId) -> Self {
        Self { mature, tranches: BTreeSet::new() }
    }

    /// The underlying collateral token
    pub fn mature(&self) -> TokenId {
        self.mature
    }

    pub fn is_mature(&self, token: &TokenId) -> bool {
        *token == self.mature
    }

    pub fn contains(&self, token: &TokenId) -> bool {
        self.is_mature(token) || self.tranches.contains(token)
    }

    /// Adds a tranche; returns true if it was not yet a member
    pub fn insert(&mut self, tranche: TokenId) -> bool {
        if self.is_mature(&tranche) {
            return false;
        }
        self.tranches.insert(tranche)
    }

    /// Removes a tranche; the mature token can never be removed
    pub fn remove(&mut self, tranche: &TokenId) -> bool {
        self.tranches.remove(tranche)
    }

    pub fn tranches(&self) -> impl Iterator<Item = &TokenId> {
        self.tranches.iter()
    }

    pub fn tranche_count(&self) -> usize {
        self.tranches.len()
    }

    /// Number of members, the mature token included
    pub fn len(&self) -> usize {
        self.tranches.len() + 1
    }

    /// All members, mature token first
    pub fn tokens(&self) -> Vec<TokenId> {
        let mut tokens = Vec::with_capacity(self.len());
        tokens.push(self.mature);
        tokens.extend(self.tranches.iter().copied());
        tokens
    }
}

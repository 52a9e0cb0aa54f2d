//! Vault Asset Set
//!
//! The underlying token plus every tranche the vault holds a balance of.
//! The number of deployed tranches is capped so that recovery and TVL
//! walks stay bounded.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use tranche_common::{
    constants::vault::MAX_DEPLOYED_COUNT,
    errors::{TrancheError, TrancheResult},
    types::TokenId,
    BTreeSet, Vec,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct VaultAssetSet {
    underlying: TokenId,
    deployed: BTreeSet<TokenId>,
}

impl VaultAssetSet {
    pub fn new(underlying: TokenId) -> Self {
        Self { underlying, deployed: BTreeSet::new() }
    }

    pub fn underlying(&self) -> TokenId {
        self.underlying
    }

    pub fn contains(&self, token: &TokenId) -> bool {
        *token == self.underlying || self.deployed.contains(token)
    }

    pub fn is_deployed(&self, token: &TokenId) -> bool {
        self.deployed.contains(token)
    }

    /// Tracks a deployed tranche. Fails once `MAX_DEPLOYED_COUNT` tranches
    /// are tracked; returns true if the tranche was new.
    pub fn insert(&mut self, tranche: TokenId) -> TrancheResult<bool> {
        if tranche == self.underlying || self.deployed.contains(&tranche) {
            return Ok(false);
        }
        if self.deployed.len() >= MAX_DEPLOYED_COUNT {
            return Err(TrancheError::DeployedCountOverLimit {
                count: self.deployed.len() + 1,
                limit: MAX_DEPLOYED_COUNT,
            });
        }
        Ok(self.deployed.insert(tranche))
    }

    pub fn remove(&mut self, tranche: &TokenId) -> bool {
        self.deployed.remove(tranche)
    }

    pub fn deployed(&self) -> impl Iterator<Item = &TokenId> {
        self.deployed.iter()
    }

    pub fn deployed_count(&self) -> usize {
        self.deployed.len()
    }

    /// Snapshot of the deployed tranches, safe to iterate while syncing
    pub fn deployed_tokens(&self) -> Vec<TokenId> {
        self.deployed.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNDERLYING: TokenId = [0xCC; 32];

    fn token(i: usize) -> TokenId {
        let mut id = [0u8; 32];
        id[..8].copy_from_slice(&(i as u64).to_le_bytes());
        id
    }

    #[test]
    fn test_underlying_is_not_deployed() {
        let mut assets = VaultAssetSet::new(UNDERLYING);
        assert!(assets.contains(&UNDERLYING));
        assert!(!assets.insert(UNDERLYING).unwrap());
        assert!(!assets.is_deployed(&UNDERLYING));
        assert_eq!(assets.deployed_count(), 0);
    }

    #[test]
    fn test_cardinality_cap() {
        let mut assets = VaultAssetSet::new(UNDERLYING);
        for i in 0..MAX_DEPLOYED_COUNT {
            assert!(assets.insert(token(i)).unwrap());
        }
        // Re-inserting a tracked tranche is fine at the cap
        assert!(!assets.insert(token(0)).unwrap());
        assert_eq!(
            assets.insert(token(MAX_DEPLOYED_COUNT)),
            Err(TrancheError::DeployedCountOverLimit { count: MAX_DEPLOYED_COUNT + 1, limit: MAX_DEPLOYED_COUNT })
        );

        assert!(assets.remove(&token(3)));
        assert!(assets.insert(token(MAX_DEPLOYED_COUNT)).unwrap());
    }
}

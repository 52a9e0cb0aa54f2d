//! Reentrancy Guard
//!
//! One flag per ledger instance. Every mutating entry point enters the
//! guard before touching state and leaves it on the way out, success or not.

use crate::errors::{TrancheError, TrancheResult};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ReentrancyGuard {
    entered: bool,
}

impl ReentrancyGuard {
    pub const fn new() -> Self {
        Self { entered: false }
    }

    /// Marks the ledger busy; fails if an operation is already in flight
    pub fn enter(&mut self) -> TrancheResult<()> {
        if self.entered {
            return Err(TrancheError::Reentrancy);
        }
        self.entered = true;
        Ok(())
    }

    pub fn exit(&mut self) {
        self.entered = false;
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_blocks_reentry() {
        let mut guard = ReentrancyGuard::new();
        assert!(guard.enter().is_ok());
        assert_eq!(guard.enter(), Err(TrancheError::Reentrancy));
        guard.exit();
        assert!(!guard.is_entered());
        assert!(guard.enter().is_ok());
    }
}

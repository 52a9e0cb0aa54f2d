//! Periodic Bond Issuer
//!
//! Issues at most one bond per window. Windows are aligned to
//! `min_issue_time_interval_sec` and shifted by `issue_window_offset_sec`;
//! every bond matures `max_maturity_duration` after its window opens.

use crate::bond::{generate_bond_id, Bond};
use crate::errors::{TrancheError, TrancheResult};
use crate::types::{Address, BondId, TokenId};
use crate::validation::require_positive;
use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct BondIssuer {
    pub owner: Address,
    pub collateral_token: TokenId,
    pub tranche_ratios: Vec<u64>,
    pub deposit_fee_bps: u64,
    pub min_issue_time_interval_sec: u64,
    pub issue_window_offset_sec: u64,
    pub max_maturity_duration: u64,
    pub last_issue_window_timestamp: u64,
    issued: Vec<BondId>,
}

impl BondIssuer {
    pub fn new(
        owner: Address,
        collateral_token: TokenId,
        tranche_ratios: Vec<u64>,
        min_issue_time_interval_sec: u64,
        issue_window_offset_sec: u64,
        max_maturity_duration: u64,
    ) -> TrancheResult<Self> {
        require_positive(min_issue_time_interval_sec, "min_issue_time_interval_sec")?;
        require_positive(max_maturity_duration, "max_maturity_duration")?;
        Ok(Self {
            owner,
            collateral_token,
            tranche_ratios,
            deposit_fee_bps: 0,
            min_issue_time_interval_sec,
            issue_window_offset_sec,
            max_maturity_duration,
            last_issue_window_timestamp: 0,
            issued: Vec::new(),
        })
    }

    /// Issues a new bond if the current window has not produced one yet
    pub fn issue(&mut self, now: u64) -> TrancheResult<Option<Bond>> {
        let next_window = self
            .last_issue_window_timestamp
            .checked_add(self.min_issue_time_interval_sec)
            .ok_or(TrancheError::Overflow)?;
        if next_window >= now {
            return Ok(None);
        }

        let window = now - now % self.min_issue_time_interval_sec + self.issue_window_offset_sec;
        let maturity = window
            .checked_add(self.max_maturity_duration)
            .ok_or(TrancheError::Overflow)?;
        let id = generate_bond_id(&self.collateral_token, maturity, self.issued.len() as u64);
        let bond = Bond::new(
            id,
            self.owner,
            self.collateral_token,
            &self.tranche_ratios,
            now,
            maturity,
            self.deposit_fee_bps,
        )?;

        self.last_issue_window_timestamp = window;
        self.issued.push(id);
        Ok(Some(bond))
    }

    /// Most recently issued bond
    pub fn latest_bond(&self) -> Option<BondId> {
        self.issued.last().copied()
    }

    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}

//! In-memory Chain
//!
//! Owns the clock, token balances, every bond and the bond issuer. The
//! ledgers receive `&mut Chain` for each operation and never keep a handle
//! to it between operations.

use crate::bond::Bond;
use crate::bond_view::BondView;
use crate::errors::{TrancheError, TrancheResult};
use crate::issuer::BondIssuer;
use crate::tokens::TokenLedger;
use crate::types::{Address, BondId, TokenId};
use crate::{BTreeMap, Vec};

#[derive(Debug, Clone)]
pub struct Chain {
    now: u64,
    tokens: TokenLedger,
    bonds: BTreeMap<BondId, Bond>,
    tranche_bonds: BTreeMap<TokenId, BondId>,
    issuer: BondIssuer,
}

impl Chain {
    pub fn new(issuer: BondIssuer, now: u64) -> Self {
        Self {
            now,
            tokens: TokenLedger::new(),
            bonds: BTreeMap::new(),
            tranche_bonds: BTreeMap::new(),
            issuer,
        }
    }

    // ============ Clock ============

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advances the clock by `secs`
    pub fn warp(&mut self, secs: u64) {
        self.now = self.now.saturating_add(secs);
    }

    // ============ Tokens ============

    pub fn tokens(&self) -> &TokenLedger {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut TokenLedger {
        &mut self.tokens
    }

    pub fn balance_of(&self, token: &TokenId, holder: &Address) -> u64 {
        self.tokens.balance_of(token, holder)
    }

    pub fn transfer(&mut self, token: &TokenId, from: &Address, to: &Address, amount: u64) -> TrancheResult<()> {
        self.tokens.transfer(token, from, to, amount)
    }

    // ============ Issuer ============

    pub fn issuer(&self) -> &BondIssuer {
        &self.issuer
    }

    /// Lets the issuer create a bond for the current window
    pub fn issue_bond(&mut self) -> TrancheResult<Option<BondId>> {
        match self.issuer.issue(self.now)? {
            Some(bond) => {
                let id = bond.id;
                self.register_bond(bond);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Latest issued bond; read-only, never triggers issuance
    pub fn latest_bond(&self) -> Option<BondId> {
        self.issuer.latest_bond()
    }

    // ============ Bonds ============

    pub fn register_bond(&mut self, bond: Bond) {
        for tranche in bond.tranches.iter() {
            self.tranche_bonds.insert(tranche.token, bond.id);
        }
        self.bonds.insert(bond.id, bond);
    }

    pub fn bond(&self, id: &BondId) -> TrancheResult<&Bond> {
        self.bonds.get(id).ok_or(TrancheError::UnknownBond { bond: *id })
    }

    fn bond_mut(&mut self, id: &BondId) -> TrancheResult<&mut Bond> {
        self.bonds.get_mut(id).ok_or(TrancheError::UnknownBond { bond: *id })
    }

    /// Parent bond of a tranche token
    pub fn bond_of_tranche(&self, token: &TokenId) -> Option<BondId> {
        self.tranche_bonds.get(token).copied()
    }

    pub fn is_tranche(&self, token: &TokenId) -> bool {
        self.tranche_bonds.contains_key(token)
    }

    pub fn bond_view(&self, id: &BondId) -> TrancheResult<BondView<'_>> {
        Ok(BondView::new(self.bond(id)?, &self.tokens, self.now))
    }

    pub fn bond_view_of_tranche(&self, token: &TokenId) -> TrancheResult<BondView<'_>> {
        let id = self.bond_of_tranche(token).ok_or(TrancheError::UnknownTranche { token: *token })?;
        self.bond_view(&id)
    }

    pub fn deposit_into_bond(&mut self, id: &BondId, depositor: &Address, amount: u64) -> TrancheResult<Vec<u64>> {
        let now = self.now;
        let bond = self.bonds.get_mut(id).ok_or(TrancheError::UnknownBond { bond: *id })?;
        bond.deposit(&mut self.tokens, now, depositor, amount)
    }

    pub fn redeem_bond(&mut self, id: &BondId, holder: &Address, amounts: &[u64]) -> TrancheResult<u64> {
        let bond = self.bonds.get_mut(id).ok_or(TrancheError::UnknownBond { bond: *id })?;
        bond.redeem(&mut self.tokens, holder, amounts)
    }

    /// Matures the bond if that has not happened yet
    pub fn ensure_mature(&mut self, id: &BondId) -> TrancheResult<()> {
        let now = self.now;
        if self.bond(id)?.is_mature {
            return Ok(());
        }
        let bond = self.bonds.get_mut(id).ok_or(TrancheError::UnknownBond { bond: *id })?;
        bond.mature(&mut self.tokens, now)
    }

    pub fn redeem_mature(&mut self, id: &BondId, holder: &Address, tranche: &TokenId, amount: u64) -> TrancheResult<u64> {
        let bond = self.bonds.get_mut(id).ok_or(TrancheError::UnknownBond { bond: *id })?;
        bond.redeem_mature(&mut self.tokens, holder, tranche, amount)
    }

    /// Returns true if the bond's maturity date has passed
    pub fn is_bond_past_maturity(&self, id: &BondId) -> TrancheResult<bool> {
        Ok(self.bond(id)?.is_past_maturity(self.now))
    }

    /// Changes the deposit fee charged by a bond
    pub fn set_bond_fee(&mut self, id: &BondId, deposit_fee_bps: u64) -> TrancheResult<()> {
        self.bond_mut(id)?.deposit_fee_bps = deposit_fee_bps;
        Ok(())
    }
}

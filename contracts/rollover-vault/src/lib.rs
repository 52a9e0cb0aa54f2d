//! Rollover Vault
//!
//! Holds underlying collateral and issues vault notes against it. The vault
//! keeps the perp supplied with fresh senior tranches:
//!
//! - **deploy** tranches idle underlying through the perp's deposit bond and
//!   rolls the seniors into the perp, keeping the juniors;
//! - **recover** turns matured tranches, and senior/junior pairs of live
//!   bonds, back into underlying;
//! - **swaps** trade underlying for perps and back, priced at the perp's
//!   pre-trade TVL and charged by the fee policy;
//! - **rebalance** moves value between the two pools once per period.
//!
//! Every entry point takes the perp ledger and the chain explicitly and
//! starts by advancing the perp's lazy state. Failures restore the vault,
//! the perp and the chain together.

pub mod assets;

pub use assets::VaultAssetSet;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use tranche_common::{
    check,
    constants::{
        fixed_point::ONE,
        time::DEFAULT_REBALANCE_FREQ_SEC,
        tranches::{JUNIOR_INDEX, SENIOR_INDEX},
        vault::{INITIAL_RATE, TRANCHE_DUST_AMT},
    },
    errors::{TrancheError, TrancheResult},
    events::{ConfigParam, EventLog, ProtocolEvent},
    math::{mul_div, safe_add},
    types::{Address, BondId, RebalanceData, RolloverData, SubscriptionState, TokenAmount, TokenId},
    validation::{require_owner, require_perc, require_valid_address},
    BTreeSet, Chain, ReentrancyGuard, Vec,
};
use tranche_perp::{PerpLedger, RolloverRequest};

// ============ Configuration ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct VaultConfig {
    /// Deployments must exceed this amount of usable underlying
    pub min_deployment_amt: u64,
    /// Underlying never deployed and kept after every swap
    pub min_underlying_bal: u64,
    /// Underlying kept after every swap, as a share of vault TVL
    pub min_underlying_perc: u64,
    pub rebalance_freq_sec: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            min_deployment_amt: 0,
            min_underlying_bal: 0,
            min_underlying_perc: 0,
            rebalance_freq_sec: DEFAULT_REBALANCE_FREQ_SEC,
        }
    }
}

impl VaultConfig {
    pub fn validate(&self) -> TrancheResult<()> {
        require_perc(self.min_underlying_perc, "min_underlying_perc")
    }
}

// ============ State ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct VaultState {
    /// Note token id, also the address vault assets are held at
    pub id: TokenId,
    pub owner: Address,
    /// Allowed to trigger the periodic rebalance
    pub keeper: Address,
    /// Receives the protocol share of rebalances
    pub fee_collector: Address,
    pub config: VaultConfig,
    pub assets: VaultAssetSet,
    pub last_rebalance_timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct VaultLedger {
    state: VaultState,
    guard: ReentrancyGuard,
    events: EventLog,
}

impl VaultLedger {
    /// Creates a vault over `underlying`. The owner starts out as keeper and
    /// fee collector.
    pub fn new(id: TokenId, owner: Address, underlying: TokenId, config: VaultConfig) -> TrancheResult<Self> {
        require_valid_address(id, "vault id")?;
        require_valid_address(owner, "owner")?;
        config.validate()?;

        Ok(Self {
            state: VaultState {
                id,
                owner,
                keeper: owner,
                fee_collector: owner,
                config,
                assets: VaultAssetSet::new(underlying),
                last_rebalance_timestamp: 0,
            },
            guard: ReentrancyGuard::new(),
            events: EventLog::new(),
        })
    }

    // ============ Accessors ============

    pub fn id(&self) -> TokenId {
        self.state.id
    }

    pub fn state(&self) -> &VaultState {
        &self.state
    }

    pub fn config(&self) -> &VaultConfig {
        &self.state.config
    }

    pub fn assets(&self) -> &VaultAssetSet {
        &self.state.assets
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn underlying(&self) -> TokenId {
        self.state.assets.underlying()
    }

    pub fn underlying_balance(&self, chain: &Chain) -> u64 {
        chain.balance_of(&self.underlying(), &self.state.id)
    }

    pub fn note_supply(&self, chain: &Chain) -> u64 {
        chain.tokens().total_supply(&self.state.id)
    }

    // ============ Admin ============

    pub fn transfer_ownership(&mut self, chain: &Chain, caller: &Address, new_owner: Address) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        require_valid_address(new_owner, "owner")?;
        self.state.owner = new_owner;
        self.emit_param(chain, ConfigParam::Owner, caller);
        Ok(())
    }

    pub fn set_keeper(&mut self, chain: &Chain, caller: &Address, keeper: Address) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        require_valid_address(keeper, "keeper")?;
        self.state.keeper = keeper;
        self.emit_param(chain, ConfigParam::Keeper, caller);
        Ok(())
    }

    pub fn set_fee_collector(&mut self, chain: &Chain, caller: &Address, collector: Address) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        require_valid_address(collector, "fee_collector")?;
        self.state.fee_collector = collector;
        self.emit_param(chain, ConfigParam::FeeCollector, caller);
        Ok(())
    }

    pub fn set_liquidity_floor(&mut self, chain: &Chain, caller: &Address, min_bal: u64, min_perc: u64) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        require_perc(min_perc, "min_underlying_perc")?;
        self.state.config.min_underlying_bal = min_bal;
        self.state.config.min_underlying_perc = min_perc;
        self.emit_param(chain, ConfigParam::LiquidityFloor, caller);
        Ok(())
    }

    pub fn set_min_deployment_amt(&mut self, chain: &Chain, caller: &Address, amount: u64) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        self.state.config.min_deployment_amt = amount;
        self.emit_param(chain, ConfigParam::MinDeployment, caller);
        Ok(())
    }

    pub fn set_rebalance_freq(&mut self, chain: &Chain, caller: &Address, freq_sec: u64) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        self.state.config.rebalance_freq_sec = freq_sec;
        self.emit_param(chain, ConfigParam::RebalanceFreq, caller);
        Ok(())
    }

    // ============ Notes ============

    /// Deposits underlying for vault notes. Returns the notes minted.
    pub fn deposit(&mut self, perp: &mut PerpLedger, chain: &mut Chain, depositor: &Address, amount: u64) -> TrancheResult<u64> {
        self.atomic(perp, chain, |vault, perp, chain| {
            perp.update_state(chain)?;
            check!(amount > 0, TrancheError::ZeroAmount);

            // 1. Notes at the pre-deposit rate
            let supply = vault.note_supply(chain);
            let notes = if supply == 0 {
                amount.checked_mul(INITIAL_RATE).ok_or(TrancheError::Overflow)?
            } else {
                mul_div(amount, supply, vault.tvl(perp, chain)?)?
            };

            // 2. Mint fee stays with the vault
            let notes = perp.fee_policy().deduct_fee(notes, perp.fee_policy().compute_vault_mint_fee_perc())?;
            check!(notes > 0, TrancheError::UnacceptableMintAmt);

            let id = vault.state.id;
            chain.transfer(&vault.underlying(), depositor, &id, amount)?;
            chain.tokens_mut().mint(&id, depositor, notes)?;
            vault.sync_asset(chain, &vault.underlying())?;

            vault.emit(ProtocolEvent::VaultDeposited {
                depositor: *depositor,
                underlying_amt: amount,
                notes_minted: notes,
                timestamp: chain.now(),
            });
            Ok(notes)
        })
    }

    /// Burns notes for a pro-rata share of every vault asset, perps
    /// included. Tranche shares at or below the dust amount stay behind.
    pub fn redeem(&mut self, perp: &mut PerpLedger, chain: &mut Chain, holder: &Address, notes: u64) -> TrancheResult<Vec<TokenAmount>> {
        self.atomic(perp, chain, |vault, perp, chain| {
            perp.update_state(chain)?;
            let supply = vault.note_supply(chain);
            check!(notes > 0 && notes <= supply, TrancheError::UnacceptableBurnAmt { amount: notes, supply });

            // 1. Burn fee leaves its share with the remaining holders
            let claim = perp.fee_policy().deduct_fee(notes, perp.fee_policy().compute_vault_burn_fee_perc())?;

            // 2. Pro-rata shares
            let id = vault.state.id;
            let underlying = vault.underlying();
            let mut redemptions = Vec::with_capacity(vault.state.assets.deployed_count() + 2);
            let underlying_amt = mul_div(chain.balance_of(&underlying, &id), claim, supply)?;
            redemptions.push(TokenAmount::new(underlying, underlying_amt));
            for tranche in vault.state.assets.deployed_tokens() {
                let amount = mul_div(chain.balance_of(&tranche, &id), claim, supply)?;
                let amount = if amount <= TRANCHE_DUST_AMT { 0 } else { amount };
                redemptions.push(TokenAmount::new(tranche, amount));
            }
            let perp_id = perp.id();
            redemptions.push(TokenAmount::new(perp_id, mul_div(chain.balance_of(&perp_id, &id), claim, supply)?));

            // 3. Burn and pay out
            chain.tokens_mut().burn(&id, holder, notes)?;
            let mut assets_out = 0u64;
            for out in redemptions.iter() {
                chain.transfer(&out.token, &id, holder, out.amount)?;
                if out.token != perp_id {
                    vault.sync_asset(chain, &out.token)?;
                }
                if out.amount > 0 {
                    assets_out += 1;
                }
            }

            vault.emit(ProtocolEvent::VaultRedeemed {
                holder: *holder,
                notes_burned: notes,
                assets_out,
                timestamp: chain.now(),
            });
            Ok(redemptions)
        })
    }

    // ============ Deploy / Recover ============

    /// Tranches the usable underlying and rolls the seniors into the perp.
    ///
    /// Reserve tokens are tried mature collateral first. A token the perp
    /// cannot take anything for is skipped; the call fails if nothing was
    /// rolled at all. Leftover senior/junior pairs are redeemed.
    pub fn deploy(&mut self, perp: &mut PerpLedger, chain: &mut Chain) -> TrancheResult<Vec<RolloverData>> {
        self.atomic(perp, chain, |vault, perp, chain| {
            perp.update_state(chain)?;
            let vault_tvl = vault.tvl(perp, chain)?;

            // 1. Usable underlying
            let balance = vault.underlying_balance(chain);
            let usable = balance.saturating_sub(vault.state.config.min_underlying_bal);
            check!(
                usable > 0 && usable > vault.state.config.min_deployment_amt,
                TrancheError::InsufficientDeployment
            );

            // 2. Tranche
            let bond = perp.deposit_bond().ok_or(TrancheError::NoDepositBond)?;
            let (senior, junior) = bond_tranches(chain, &bond)?;
            let id = vault.state.id;
            chain.deposit_into_bond(&bond, &id, usable)?;
            vault.sync_asset(chain, &senior)?;
            vault.sync_asset(chain, &junior)?;

            // 3. Roll
            let mut rollovers = Vec::new();
            for token_out in perp.reserve_tokens_up_for_rollover(chain)? {
                let available = chain.balance_of(&senior, &id);
                if available == 0 {
                    break;
                }
                let request = RolloverRequest {
                    tranche_in: senior,
                    token_out,
                    tranche_in_amt_available: available,
                    max_token_out_amt: u64::MAX,
                };
                match perp.rollover(chain, &id, vault_tvl, &request) {
                    Ok(r) => {
                        vault.sync_asset(chain, &token_out)?;
                        rollovers.push(r);
                    }
                    Err(TrancheError::UnacceptableRolloverAmt) => continue,
                    Err(e) => return Err(e),
                }
            }
            check!(!rollovers.is_empty(), TrancheError::InsufficientDeployment);

            // 4. Leftovers
            vault.redeem_pairs(chain, &bond)?;
            vault.sync_asset(chain, &senior)?;
            vault.sync_asset(chain, &junior)?;
            vault.sync_asset(chain, &vault.underlying())?;

            vault.emit(ProtocolEvent::VaultDeployed {
                underlying_deployed: usable,
                rollovers: rollovers.len() as u64,
                timestamp: chain.now(),
            });
            Ok(rollovers)
        })
    }

    /// Recovers every deployed tranche it can and melds held perps
    pub fn recover(&mut self, perp: &mut PerpLedger, chain: &mut Chain) -> TrancheResult<()> {
        self.atomic(perp, chain, |vault, perp, chain| {
            perp.update_state(chain)?;
            vault.meld_perps(perp, chain)?;
            vault.recover_all(chain)
        })
    }

    /// Recovers a single deployed tranche
    pub fn recover_token(&mut self, perp: &mut PerpLedger, chain: &mut Chain, token: &TokenId) -> TrancheResult<()> {
        self.atomic(perp, chain, |vault, perp, chain| {
            perp.update_state(chain)?;
            check!(
                vault.state.assets.is_deployed(token),
                TrancheError::InvalidInput { param: "token", reason: "not a deployed tranche" }
            );
            vault.recover_one(chain, token, &mut BTreeSet::new())?;
            vault.sync_asset(chain, &vault.underlying())?;
            Ok(())
        })
    }

    // ============ Swaps ============

    /// Swaps underlying for perps at the perp's pre-trade mint price, the
    /// same price the seniors minted for them are charged at.
    ///
    /// The perp mint fee is paid by retiring perps; the vault fee is kept
    /// by minting that much less. Fails if the vault's underlying ends at
    /// or below its liquidity floor.
    pub fn swap_underlying_for_perps(&mut self, perp: &mut PerpLedger, chain: &mut Chain, account: &Address, underlying_in: u64) -> TrancheResult<u64> {
        self.atomic(perp, chain, |vault, perp, chain| {
            perp.update_state(chain)?;
            check!(underlying_in > 0, TrancheError::ZeroAmount);

            // 1. Snapshot
            let s = vault.subscription_state(perp, chain)?;

            // 2. Quote
            let perp_amt = perp.compute_perp_amt_for_value(chain, underlying_in)?;
            let post = SubscriptionState { perp_tvl: safe_add(s.perp_tvl, underlying_in)?, ..s };
            let policy = perp.fee_policy();
            let dr_pre = policy.compute_deviation_ratio(&s)?;
            let dr_post = policy.compute_deviation_ratio(&post)?;
            let perp_fee_amt = mul_div(perp_amt, policy.compute_perp_mint_fee_perc(), ONE)?;
            let vault_fee_amt = mul_div(perp_amt, policy.compute_underlying_to_perp_vault_swap_fee_perc(dr_pre, dr_post)?, ONE)?;
            let perp_out = perp_amt.saturating_sub(perp_fee_amt.saturating_add(vault_fee_amt));
            check!(perp_out > 0, TrancheError::UnacceptableSwap);

            // 3. Mint and pay out
            let id = vault.state.id;
            chain.transfer(&vault.underlying(), account, &id, underlying_in)?;
            vault.tranche_and_mint(perp, chain, perp_out + perp_fee_amt)?;
            if perp_fee_amt > 0 {
                perp.retire(chain, &id, perp_fee_amt)?;
            }
            chain.transfer(&perp.id(), &id, account, perp_out)?;

            // 4. Floor
            vault.enforce_liquidity(chain, s.vault_tvl)?;

            vault.emit(ProtocolEvent::UnderlyingSwapped {
                account: *account,
                underlying_in,
                perp_out,
                timestamp: chain.now(),
            });
            Ok(perp_out)
        })
    }

    /// Swaps perps for underlying at the perp's pre-trade TVL.
    ///
    /// The perp burn fee is paid by retiring perps; the rest are melded
    /// back into underlying. Fails if the vault's underlying ends at or
    /// below its liquidity floor.
    pub fn swap_perps_for_underlying(&mut self, perp: &mut PerpLedger, chain: &mut Chain, account: &Address, perp_in: u64) -> TrancheResult<u64> {
        self.atomic(perp, chain, |vault, perp, chain| {
            perp.update_state(chain)?;
            check!(perp_in > 0, TrancheError::ZeroAmount);

            // 1. Snapshot
            let s = vault.subscription_state(perp, chain)?;

            // 2. Quote
            let perp_supply = perp.total_supply(chain);
            check!(perp_in <= perp_supply, TrancheError::UnacceptableBurnAmt { amount: perp_in, supply: perp_supply });
            let underlying_amt = mul_div(perp_in, s.perp_tvl, perp_supply)?;
            let post = SubscriptionState { perp_tvl: s.perp_tvl - underlying_amt, ..s };
            let policy = perp.fee_policy();
            let dr_pre = policy.compute_deviation_ratio(&s)?;
            let dr_post = policy.compute_deviation_ratio(&post)?;
            let perp_fee_amt = mul_div(perp_in, policy.compute_perp_burn_fee_perc(), ONE)?;
            let vault_fee_perc = policy.compute_perp_to_underlying_vault_swap_fee_perc(dr_pre, dr_post)?;
            let total_fee_perc = policy.compute_perp_burn_fee_perc().saturating_add(vault_fee_perc);
            let underlying_out = policy.deduct_fee(underlying_amt, total_fee_perc)?;
            check!(underlying_out > 0, TrancheError::UnacceptableSwap);

            // 3. Take perps, pay the perp fee, meld the rest
            let id = vault.state.id;
            chain.transfer(&perp.id(), account, &id, perp_in)?;
            if perp_fee_amt > 0 {
                perp.retire(chain, &id, perp_fee_amt)?;
            }
            vault.meld_perps(perp, chain)?;
            vault.recover_all(chain)?;
            chain.transfer(&vault.underlying(), &id, account, underlying_out)?;
            vault.sync_asset(chain, &vault.underlying())?;

            // 4. Floor
            vault.enforce_liquidity(chain, s.vault_tvl)?;

            vault.emit(ProtocolEvent::PerpsSwapped {
                account: *account,
                perp_in,
                underlying_out,
                timestamp: chain.now(),
            });
            Ok(underlying_out)
        })
    }

    // ============ Rebalance ============

    /// Moves value between the pools as the fee policy prescribes. Keeper
    /// only, at most once per `rebalance_freq_sec`.
    pub fn rebalance(&mut self, perp: &mut PerpLedger, chain: &mut Chain, caller: &Address) -> TrancheResult<RebalanceData> {
        self.atomic(perp, chain, |vault, perp, chain| {
            require_owner(vault.state.keeper, *caller)?;
            perp.update_state(chain)?;

            let now = chain.now();
            let last = vault.state.last_rebalance_timestamp;
            let due = last.saturating_add(vault.state.config.rebalance_freq_sec);
            check!(last == 0 || now >= due, TrancheError::LastRebalanceTooRecent { last, now });

            let s = vault.subscription_state(perp, chain)?;
            let mut r = perp.fee_policy().compute_rebalance_data(&s)?;
            let id = vault.state.id;
            let collector = vault.state.fee_collector;

            if r.underlying_amt_into_perp > 0 {
                // Enrichment: vault underlying into perp
                let amount = u64::try_from(r.underlying_amt_into_perp).map_err(|_| TrancheError::Overflow)?;
                perp.receive_rebalance(chain, &id, amount)?;
                chain.transfer(&vault.underlying(), &id, &collector, r.protocol_fee_amt)?;
            } else if r.underlying_amt_into_perp < 0 {
                // Debasement: perp mature collateral into the vault
                let amount = u64::try_from(r.underlying_amt_into_perp.unsigned_abs()).map_err(|_| TrancheError::Overflow)?;
                let (sent, fee) = perp.rebalance_to_vault(chain, &id, amount, r.protocol_fee_amt, &collector)?;
                r = RebalanceData { underlying_amt_into_perp: -(sent as i128), protocol_fee_amt: fee };
            }

            vault.state.last_rebalance_timestamp = now;
            vault.sync_asset(chain, &vault.underlying())?;
            vault.emit(ProtocolEvent::Rebalanced {
                underlying_into_perp: r.underlying_amt_into_perp,
                protocol_fee: r.protocol_fee_amt,
                timestamp: now,
            });
            Ok(r)
        })
    }

    // ============ Valuation ============

    /// Underlying plus the collateral claim of every non-dust deployed
    /// tranche plus the value of held perps
    pub fn tvl(&self, perp: &PerpLedger, chain: &Chain) -> TrancheResult<u64> {
        let id = self.state.id;
        let mut total = self.underlying_balance(chain);
        for tranche in self.state.assets.deployed() {
            let balance = chain.balance_of(tranche, &id);
            if balance <= TRANCHE_DUST_AMT {
                continue;
            }
            let value = chain.bond_view_of_tranche(tranche)?.tranche_value(tranche, balance)?;
            total = safe_add(total, value)?;
        }

        let perps = chain.balance_of(&perp.id(), &id);
        if perps > 0 {
            let value = mul_div(perps, perp.tvl(chain)?, perp.total_supply(chain))?;
            total = safe_add(total, value)?;
        }
        Ok(total)
    }

    /// Snapshot of both pools with the vault's current TVL
    pub fn subscription_state(&self, perp: &PerpLedger, chain: &Chain) -> TrancheResult<SubscriptionState> {
        perp.subscription_state(chain, self.tvl(perp, chain)?)
    }

    // ============ Previews ============

    pub fn preview_deposit(&self, perp: &PerpLedger, chain: &Chain, depositor: &Address, amount: u64) -> TrancheResult<u64> {
        self.preview(perp, chain, |vault, perp, chain| vault.deposit(perp, chain, depositor, amount))
    }

    pub fn preview_redeem(&self, perp: &PerpLedger, chain: &Chain, holder: &Address, notes: u64) -> TrancheResult<Vec<TokenAmount>> {
        self.preview(perp, chain, |vault, perp, chain| vault.redeem(perp, chain, holder, notes))
    }

    pub fn preview_deploy(&self, perp: &PerpLedger, chain: &Chain) -> TrancheResult<Vec<RolloverData>> {
        self.preview(perp, chain, |vault, perp, chain| vault.deploy(perp, chain))
    }

    pub fn preview_recover(&self, perp: &PerpLedger, chain: &Chain) -> TrancheResult<u64> {
        self.preview(perp, chain, |vault, perp, chain| {
            vault.recover(perp, chain)?;
            Ok(vault.underlying_balance(chain))
        })
    }

    pub fn preview_swap_underlying_for_perps(&self, perp: &PerpLedger, chain: &Chain, account: &Address, underlying_in: u64) -> TrancheResult<u64> {
        self.preview(perp, chain, |vault, perp, chain| vault.swap_underlying_for_perps(perp, chain, account, underlying_in))
    }

    pub fn preview_swap_perps_for_underlying(&self, perp: &PerpLedger, chain: &Chain, account: &Address, perp_in: u64) -> TrancheResult<u64> {
        self.preview(perp, chain, |vault, perp, chain| vault.swap_perps_for_underlying(perp, chain, account, perp_in))
    }

    pub fn preview_rebalance(&self, perp: &PerpLedger, chain: &Chain, caller: &Address) -> TrancheResult<RebalanceData> {
        self.preview(perp, chain, |vault, perp, chain| vault.rebalance(perp, chain, caller))
    }

    // ============ Internals ============

    /// Runs `op` as one all-or-nothing operation over vault, perp and chain
    fn atomic<T>(
        &mut self,
        perp: &mut PerpLedger,
        chain: &mut Chain,
        op: impl FnOnce(&mut Self, &mut PerpLedger, &mut Chain) -> TrancheResult<T>,
    ) -> TrancheResult<T> {
        self.guard.enter()?;
        let vault_snapshot = self.clone();
        let perp_snapshot = perp.clone();
        let chain_snapshot = chain.clone();

        let result = op(self, perp, chain);
        if result.is_err() {
            *self = vault_snapshot;
            *perp = perp_snapshot;
            *chain = chain_snapshot;
        }
        self.guard.exit();
        result
    }

    fn preview<T>(
        &self,
        perp: &PerpLedger,
        chain: &Chain,
        op: impl FnOnce(&mut Self, &mut PerpLedger, &mut Chain) -> TrancheResult<T>,
    ) -> TrancheResult<T> {
        let (mut vault, mut perp, mut chain) = (self.clone(), perp.clone(), chain.clone());
        op(&mut vault, &mut perp, &mut chain)
    }

    /// Deposits just enough underlying into the deposit bond to mint
    /// `perp_amt` perps from its senior tranche
    fn tranche_and_mint(&mut self, perp: &mut PerpLedger, chain: &mut Chain, perp_amt: u64) -> TrancheResult<u64> {
        let bond = perp.deposit_bond().ok_or(TrancheError::NoDepositBond)?;
        let (senior, junior) = bond_tranches(chain, &bond)?;
        let id = self.state.id;

        let senior_needed = perp.compute_tranche_in_for_perp(chain, &senior, perp_amt)?;
        let collateral = chain.bond_view(&bond)?.estimate_deposit_for_tranche(SENIOR_INDEX, senior_needed)?;
        chain.deposit_into_bond(&bond, &id, collateral)?;
        self.sync_asset(chain, &junior)?;

        let minted = perp.deposit(chain, &id, &senior, senior_needed)?;
        self.sync_asset(chain, &senior)?;
        self.sync_asset(chain, &self.underlying())?;
        Ok(minted)
    }

    /// Burns every perp the vault holds for its share of the perp reserve
    fn meld_perps(&mut self, perp: &mut PerpLedger, chain: &mut Chain) -> TrancheResult<()> {
        let id = self.state.id;
        let held = chain.balance_of(&perp.id(), &id);
        if held == 0 {
            return Ok(());
        }
        for out in perp.burn(chain, &id, held)? {
            self.sync_asset(chain, &out.token)?;
        }
        Ok(())
    }

    fn recover_all(&mut self, chain: &mut Chain) -> TrancheResult<()> {
        let mut redeemed_bonds = BTreeSet::new();
        for tranche in self.state.assets.deployed_tokens() {
            self.recover_one(chain, &tranche, &mut redeemed_bonds)?;
        }
        let underlying_balance = self.sync_asset(chain, &self.underlying())?;
        self.emit(ProtocolEvent::VaultRecovered {
            underlying_balance,
            deployed_count: self.state.assets.deployed_count() as u64,
            timestamp: chain.now(),
        });
        Ok(())
    }

    /// Matured tranches are redeemed outright. A live senior above dust
    /// triggers one pair redemption for its bond.
    fn recover_one(&mut self, chain: &mut Chain, tranche: &TokenId, redeemed_bonds: &mut BTreeSet<BondId>) -> TrancheResult<()> {
        let id = self.state.id;
        let balance = chain.balance_of(tranche, &id);
        if balance > 0 {
            let bond = chain.bond_of_tranche(tranche).ok_or(TrancheError::UnknownTranche { token: *tranche })?;
            if chain.is_bond_past_maturity(&bond)? {
                chain.ensure_mature(&bond)?;
                chain.redeem_mature(&bond, &id, tranche, balance)?;
            } else if balance > TRANCHE_DUST_AMT && !redeemed_bonds.contains(&bond) && bond_tranches(chain, &bond)?.0 == *tranche {
                redeemed_bonds.insert(bond);
                self.redeem_pairs(chain, &bond)?;
                let (_, junior) = bond_tranches(chain, &bond)?;
                self.sync_asset(chain, &junior)?;
            }
        }
        self.sync_asset(chain, tranche)?;
        Ok(())
    }

    /// Redeems the largest senior/junior pair of `bond` the vault holds
    fn redeem_pairs(&mut self, chain: &mut Chain, bond: &BondId) -> TrancheResult<u64> {
        let id = self.state.id;
        let amounts = chain.bond_view(bond)?.compute_redeemable_amounts_of(&id)?;
        if amounts.iter().all(|a| *a == 0) {
            return Ok(0);
        }
        chain.redeem_bond(bond, &id, &amounts)
    }

    /// Post-swap underlying must stay strictly above the absolute floor and
    /// above `min_underlying_perc` of the pre-swap vault TVL
    fn enforce_liquidity(&self, chain: &Chain, vault_tvl: u64) -> TrancheResult<()> {
        let balance = self.underlying_balance(chain);
        let config = &self.state.config;
        let perc_floor = (vault_tvl as u128) * (config.min_underlying_perc as u128);
        let above_perc = (balance as u128) * (ONE as u128) > perc_floor;
        if balance <= config.min_underlying_bal || !above_perc {
            let floor = config.min_underlying_bal.max(mul_div(vault_tvl, config.min_underlying_perc, ONE)?);
            return Err(TrancheError::InsufficientLiquidity { balance, floor });
        }
        Ok(())
    }

    /// Brings the asset set in line with the vault's balance of `token`
    fn sync_asset(&mut self, chain: &Chain, token: &TokenId) -> TrancheResult<u64> {
        let balance = chain.balance_of(token, &self.state.id);
        if *token != self.underlying() {
            if balance > 0 {
                self.state.assets.insert(*token)?;
            } else {
                self.state.assets.remove(token);
            }
        }
        self.emit(ProtocolEvent::AssetSynced { token: *token, balance, timestamp: chain.now() });
        Ok(balance)
    }

    fn emit(&mut self, event: ProtocolEvent) {
        self.events.emit(event);
    }

    fn emit_param(&mut self, chain: &Chain, param: ConfigParam, by: &Address) {
        self.events.emit(ProtocolEvent::ParameterUpdated { param, by: *by, timestamp: chain.now() });
    }
}

/// Senior and junior tranche tokens of a two-tranche bond
fn bond_tranches(chain: &Chain, bond: &BondId) -> TrancheResult<(TokenId, TokenId)> {
    let data = chain.bond_view(bond)?.two_tranche_data()?;
    Ok((data.tranches[SENIOR_INDEX].token, data.tranches[JUNIOR_INDEX].token))
}

#[cfg(test)]
mod tests;

//! Perpetual Tranche
//!
//! A note continuously backed by senior tranches of a rolling series of
//! bonds. The ledger owns the reserve: the mature collateral plus every
//! live tranche it still holds.
//!
//! ## Standardized accounting
//!
//! Tranches enter the reserve at a yield factor that is frozen on entry.
//! `std_total_tranche_balance` is the yield-adjusted size of the whole
//! reserve and `std_mature_tranche_balance` the part already redeemed into
//! collateral. The mature collateral may rebase, so its token amount per
//! standardized unit is `mature_balance / std_mature_tranche_balance`.
//!
//! ## Operation model
//!
//! Every mutating entry point runs through [`PerpLedger::atomic`]: the
//! reentrancy guard is entered, state is snapshotted, and on failure both
//! the ledger and the chain are restored. Each one begins by advancing the
//! lazy state (deposit bond, matured tranches).

pub mod reserve;
pub mod strategy;

pub use reserve::ReserveSet;
pub use strategy::{tranche_class, PricingStrategy, TrancheClass, YieldStrategy};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use tranche_common::{
    check,
    constants::{
        fixed_point::{ONE, ONE_I128},
        pricing::{UNIT_PRICE, UNIT_YIELD},
        tranches::{REQUIRED_TRANCHE_COUNT, SENIOR_INDEX},
    },
    errors::{TrancheError, TrancheResult},
    events::{ConfigParam, EventLog, ProtocolEvent},
    math::{mul_div, mul_div_u128, mul_div_up, safe_add, safe_sub, Rounding},
    types::{Address, BondId, RolloverData, SubscriptionState, TokenAmount, TokenId},
    validation::{require_owner, require_perc, require_valid_address},
    BTreeMap, BTreeSet, Chain, ReentrancyGuard, Vec,
};
use tranche_fee_policy::{FeePolicy, FeePolicyUpdate};

// ============ Configuration ============

/// Token perp fees are settled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum FeeToken {
    /// The perp itself; settlement is an internal transfer
    Perp,
    /// Any other token not held in the reserve
    External(TokenId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PerpConfig {
    /// A bond is acceptable while its time to maturity lies in `[min, max)`
    pub min_tranche_maturity_sec: u64,
    pub max_tranche_maturity_sec: u64,
    /// Perp supply cap, checked after every mint
    pub max_supply: u64,
    /// Cap on perps minted against a single deposit tranche
    pub max_mint_amt_per_tranche: u64,
    /// Share of the price spread kept on extractive rollovers
    pub skim_perc: u64,
    pub fee_token: FeeToken,
    pub pricing_strategy: PricingStrategy,
    pub yield_strategy: YieldStrategy,
}

impl Default for PerpConfig {
    fn default() -> Self {
        Self {
            min_tranche_maturity_sec: 1,
            max_tranche_maturity_sec: u64::MAX,
            max_supply: u64::MAX,
            max_mint_amt_per_tranche: u64::MAX,
            skim_perc: 0,
            fee_token: FeeToken::Perp,
            pricing_strategy: PricingStrategy::default(),
            yield_strategy: YieldStrategy::default(),
        }
    }
}

impl PerpConfig {
    pub fn validate(&self) -> TrancheResult<()> {
        if self.min_tranche_maturity_sec >= self.max_tranche_maturity_sec {
            return Err(TrancheError::InvalidInput {
                param: "tranche_maturity",
                reason: "min must be below max",
            });
        }
        require_perc(self.skim_perc, "skim_perc")?;
        self.pricing_strategy.validate()?;
        self.yield_strategy.validate()
    }
}

/// A roller's offer: up to `tranche_in_amt_available` of a deposit tranche
/// for at most `max_token_out_amt` of an older reserve token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RolloverRequest {
    pub tranche_in: TokenId,
    pub token_out: TokenId,
    pub tranche_in_amt_available: u64,
    pub max_token_out_amt: u64,
}

// ============ State ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PerpState {
    /// Perp token id, also the address the reserve is held at
    pub id: TokenId,
    pub owner: Address,
    pub config: PerpConfig,
    pub deposit_bond: Option<BondId>,
    pub reserve: ReserveSet,
    /// Yield factor frozen when a tranche entered the reserve
    pub applied_yields: BTreeMap<TokenId, u64>,
    pub std_total_tranche_balance: u64,
    pub std_mature_tranche_balance: u64,
    /// Perps minted per tranche of the current deposit bond
    pub minted_per_tranche: BTreeMap<TokenId, u64>,
    pub rollers: BTreeSet<Address>,
}

#[derive(Debug, Clone)]
pub struct PerpLedger {
    state: PerpState,
    fee_policy: FeePolicy,
    guard: ReentrancyGuard,
    events: EventLog,
}

impl PerpLedger {
    pub fn new(
        id: TokenId,
        owner: Address,
        collateral_token: TokenId,
        config: PerpConfig,
        fee_policy: FeePolicy,
    ) -> TrancheResult<Self> {
        require_valid_address(id, "perp id")?;
        require_valid_address(owner, "owner")?;
        config.validate()?;

        Ok(Self {
            state: PerpState {
                id,
                owner,
                config,
                deposit_bond: None,
                reserve: ReserveSet::new(collateral_token),
                applied_yields: BTreeMap::new(),
                std_total_tranche_balance: 0,
                std_mature_tranche_balance: 0,
                minted_per_tranche: BTreeMap::new(),
                rollers: BTreeSet::new(),
            },
            fee_policy,
            guard: ReentrancyGuard::new(),
            events: EventLog::new(),
        })
    }

    // ============ Accessors ============

    pub fn id(&self) -> TokenId {
        self.state.id
    }

    pub fn owner(&self) -> Address {
        self.state.owner
    }

    pub fn state(&self) -> &PerpState {
        &self.state
    }

    pub fn config(&self) -> &PerpConfig {
        &self.state.config
    }

    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fee_policy
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn reserve(&self) -> &ReserveSet {
        &self.state.reserve
    }

    pub fn collateral_token(&self) -> TokenId {
        self.state.reserve.mature()
    }

    pub fn deposit_bond(&self) -> Option<BondId> {
        self.state.deposit_bond
    }

    pub fn std_total_tranche_balance(&self) -> u64 {
        self.state.std_total_tranche_balance
    }

    pub fn std_mature_tranche_balance(&self) -> u64 {
        self.state.std_mature_tranche_balance
    }

    pub fn applied_yield(&self, token: &TokenId) -> Option<u64> {
        self.state.applied_yields.get(token).copied()
    }

    pub fn minted_for_tranche(&self, token: &TokenId) -> u64 {
        self.state.minted_per_tranche.get(token).copied().unwrap_or(0)
    }

    pub fn is_roller(&self, account: &Address) -> bool {
        self.state.rollers.contains(account)
    }

    pub fn total_supply(&self, chain: &Chain) -> u64 {
        chain.tokens().total_supply(&self.state.id)
    }

    /// Reserve balance of `token` held by the perp
    pub fn reserve_balance(&self, chain: &Chain, token: &TokenId) -> u64 {
        chain.balance_of(token, &self.state.id)
    }

    pub fn mature_balance(&self, chain: &Chain) -> u64 {
        self.reserve_balance(chain, &self.state.reserve.mature())
    }

    // ============ Admin ============

    pub fn transfer_ownership(&mut self, chain: &Chain, caller: &Address, new_owner: Address) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        require_valid_address(new_owner, "owner")?;
        self.state.owner = new_owner;
        self.emit_param(chain, ConfigParam::Owner, caller);
        Ok(())
    }

    pub fn add_roller(&mut self, chain: &Chain, caller: &Address, roller: Address) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        require_valid_address(roller, "roller")?;
        self.state.rollers.insert(roller);
        self.emit_param(chain, ConfigParam::Roller, caller);
        Ok(())
    }

    pub fn remove_roller(&mut self, chain: &Chain, caller: &Address, roller: &Address) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        self.state.rollers.remove(roller);
        self.emit_param(chain, ConfigParam::Roller, caller);
        Ok(())
    }

    pub fn update_fee_policy(&mut self, chain: &Chain, caller: &Address, update: &FeePolicyUpdate) -> TrancheResult<()> {
        let param = self.fee_policy.apply(caller, update)?;
        self.emit_param(chain, param, caller);
        Ok(())
    }

    /// Swaps the pricing strategy; rejected unless it reports `PRICE_DECIMALS`
    pub fn set_pricing_strategy(&mut self, chain: &Chain, caller: &Address, strategy: PricingStrategy) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        strategy.validate()?;
        self.state.config.pricing_strategy = strategy;
        self.emit_param(chain, ConfigParam::PricingStrategy, caller);
        Ok(())
    }

    /// Swaps the yield strategy. Tranches already in the reserve keep the
    /// yield they entered with.
    pub fn set_yield_strategy(&mut self, chain: &Chain, caller: &Address, strategy: YieldStrategy) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        strategy.validate()?;
        self.state.config.yield_strategy = strategy;
        self.emit_param(chain, ConfigParam::YieldStrategy, caller);
        Ok(())
    }

    pub fn set_tranche_discount(&mut self, chain: &Chain, caller: &Address, class: TrancheClass, value: u64) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        self.state.config.yield_strategy.set_discount(class, value)?;
        self.emit_param(chain, ConfigParam::YieldStrategy, caller);
        Ok(())
    }

    pub fn set_supply_caps(&mut self, chain: &Chain, caller: &Address, max_supply: u64, max_mint_amt_per_tranche: u64) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        self.state.config.max_supply = max_supply;
        self.state.config.max_mint_amt_per_tranche = max_mint_amt_per_tranche;
        self.emit_param(chain, ConfigParam::SupplyCaps, caller);
        Ok(())
    }

    pub fn set_tolerable_tranche_maturity(&mut self, chain: &Chain, caller: &Address, min_sec: u64, max_sec: u64) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        check!(
            min_sec < max_sec,
            TrancheError::InvalidInput { param: "tranche_maturity", reason: "min must be below max" }
        );
        self.state.config.min_tranche_maturity_sec = min_sec;
        self.state.config.max_tranche_maturity_sec = max_sec;
        self.emit_param(chain, ConfigParam::TolerableMaturity, caller);
        Ok(())
    }

    pub fn set_skim_perc(&mut self, chain: &Chain, caller: &Address, perc: u64) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        require_perc(perc, "skim_perc")?;
        self.state.config.skim_perc = perc;
        self.emit_param(chain, ConfigParam::SkimPerc, caller);
        Ok(())
    }

    pub fn set_fee_token(&mut self, chain: &Chain, caller: &Address, fee_token: FeeToken) -> TrancheResult<()> {
        require_owner(self.state.owner, *caller)?;
        if let FeeToken::External(token) = fee_token {
            check!(
                !self.state.reserve.is_mature(&token) && !chain.is_tranche(&token) && token != self.state.id,
                TrancheError::InvalidInput { param: "fee_token", reason: "must not be a reserve token" }
            );
        }
        self.state.config.fee_token = fee_token;
        self.emit_param(chain, ConfigParam::FeeToken, caller);
        Ok(())
    }

    // ============ Keeper ============

    /// Runs the lazy state update on its own
    pub fn update_state(&mut self, chain: &mut Chain) -> TrancheResult<()> {
        self.atomic(chain, |perp, chain| perp.advance_state(chain))
    }

    // ============ Mint / Burn ============

    /// Deposits `tranche_in_amt` of a deposit-bond tranche and mints perps.
    /// Returns the perps minted.
    pub fn deposit(&mut self, chain: &mut Chain, depositor: &Address, tranche_in: &TokenId, tranche_in_amt: u64) -> TrancheResult<u64> {
        self.atomic(chain, |perp, chain| {
            perp.advance_state(chain)?;
            check!(tranche_in_amt > 0, TrancheError::ZeroAmount);
            check!(
                perp.is_deposit_bond_tranche(chain, tranche_in),
                TrancheError::UnacceptableDepositTranche { token: *tranche_in }
            );

            // 1. Quote against the pre-deposit reserve
            let (perp_amt, std_in) = perp.compute_mint_amt(chain, tranche_in, tranche_in_amt)?;
            check!(perp_amt > 0, TrancheError::UnacceptableMintAmt);

            // 2. Move tranches in, mint perps
            let id = perp.state.id;
            chain.transfer(tranche_in, depositor, &id, tranche_in_amt)?;
            perp.state.std_total_tranche_balance = safe_add(perp.state.std_total_tranche_balance, std_in)?;
            chain.tokens_mut().mint(&id, depositor, perp_amt)?;
            perp.sync_reserve(chain, tranche_in)?;

            // 3. Fee
            if !perp.is_roller(depositor) {
                let fee = mul_div(perp_amt, perp.fee_policy.compute_perp_mint_fee_perc(), ONE)?;
                perp.settle_fee(chain, depositor, fee)?;
            }

            // 4. Caps, checked on the resulting state
            let minted = safe_add(perp.minted_for_tranche(tranche_in), perp_amt)?;
            perp.state.minted_per_tranche.insert(*tranche_in, minted);
            perp.enforce_caps(chain, tranche_in)?;

            perp.emit(ProtocolEvent::PerpMinted {
                depositor: *depositor,
                tranche: *tranche_in,
                tranche_amt: tranche_in_amt,
                perp_amt,
                timestamp: chain.now(),
            });
            Ok(perp_amt)
        })
    }

    /// Burns perps for a strict pro-rata share of every reserve token
    pub fn burn(&mut self, chain: &mut Chain, holder: &Address, amount: u64) -> TrancheResult<Vec<TokenAmount>> {
        self.atomic(chain, |perp, chain| {
            perp.advance_state(chain)?;
            let supply = perp.total_supply(chain);
            check!(amount > 0 && amount <= supply, TrancheError::UnacceptableBurnAmt { amount, supply });

            // 1. Pro-rata claim on each reserve token
            let mut redemptions = Vec::with_capacity(perp.state.reserve.len());
            for token in perp.state.reserve.tokens() {
                let balance = perp.reserve_balance(chain, &token);
                redemptions.push(TokenAmount::new(token, mul_div(balance, amount, supply)?));
            }

            // 2. Scale the standardized balances by the same factor
            let remaining = supply - amount;
            perp.state.std_total_tranche_balance = mul_div(perp.state.std_total_tranche_balance, remaining, supply)?;
            perp.state.std_mature_tranche_balance = mul_div(perp.state.std_mature_tranche_balance, remaining, supply)?;

            // 3. Fee, then burn and pay out
            if !perp.is_roller(holder) {
                let fee = mul_div(amount, perp.fee_policy.compute_perp_burn_fee_perc(), ONE)?;
                perp.settle_fee(chain, holder, fee)?;
            }
            let id = perp.state.id;
            chain.tokens_mut().burn(&id, holder, amount)?;
            for out in redemptions.iter() {
                chain.transfer(&out.token, &id, holder, out.amount)?;
                perp.sync_reserve(chain, &out.token)?;
            }

            perp.emit(ProtocolEvent::PerpBurned {
                holder: *holder,
                perp_amt: amount,
                supply_before: supply,
                timestamp: chain.now(),
            });
            Ok(redemptions)
        })
    }

    /// Burns perps without claiming anything from the reserve
    pub fn retire(&mut self, chain: &mut Chain, from: &Address, amount: u64) -> TrancheResult<()> {
        self.atomic(chain, |perp, chain| {
            check!(amount > 0, TrancheError::ZeroAmount);
            let id = perp.state.id;
            chain.tokens_mut().burn(&id, from, amount)?;
            perp.emit(ProtocolEvent::PerpRetired { from: *from, amount, timestamp: chain.now() });
            Ok(())
        })
    }

    // ============ Rollover ============

    /// Swaps a deposit-bond tranche for an older reserve token.
    ///
    /// Restricted to registered rollers. `vault_tvl` is the roller's TVL
    /// snapshot, used with the perp's own TVL to price the rollover fee.
    pub fn rollover(&mut self, chain: &mut Chain, roller: &Address, vault_tvl: u64, request: &RolloverRequest) -> TrancheResult<RolloverData> {
        self.atomic(chain, |perp, chain| {
            perp.advance_state(chain)?;
            check!(perp.is_roller(roller), TrancheError::UnauthorizedRoller { caller: *roller });
            check!(
                perp.is_acceptable_rollover(chain, &request.tranche_in, &request.token_out)?,
                TrancheError::UnacceptableRollover { tranche_in: request.tranche_in, token_out: request.token_out }
            );

            let subscription = perp.subscription_state(chain, vault_tvl)?;
            let dr = perp.fee_policy.compute_deviation_ratio(&subscription)?;
            let fee_perc = perp.fee_policy.compute_perp_rollover_fee_perc(dr)?;

            let r = perp.compute_rollover_amt(chain, request, fee_perc)?;
            check!(r.is_complete(), TrancheError::UnacceptableRolloverAmt);

            let id = perp.state.id;
            chain.transfer(&request.tranche_in, roller, &id, r.tranche_in_amt)?;
            chain.transfer(&request.token_out, &id, roller, r.token_out_amt)?;

            let mature_out = perp.state.reserve.is_mature(&request.token_out);
            if mature_out {
                perp.state.std_mature_tranche_balance -= r.std_tranche_out_amt;
            }
            perp.state.std_total_tranche_balance = safe_add(perp.state.std_total_tranche_balance, r.std_tranche_in_amt)?
                .saturating_sub(r.std_tranche_out_amt)
                .max(perp.state.std_mature_tranche_balance);

            perp.sync_reserve(chain, &request.tranche_in)?;
            perp.sync_reserve(chain, &request.token_out)?;

            perp.emit(ProtocolEvent::Rollover {
                roller: *roller,
                tranche_in: request.tranche_in,
                token_out: request.token_out,
                tranche_in_amt: r.tranche_in_amt,
                token_out_amt: r.token_out_amt,
                timestamp: chain.now(),
            });
            Ok(r)
        })
    }

    /// Resolves the amounts of a rollover.
    ///
    /// The standardized amount out is value-equivalent to the amount in,
    /// reduced by the rollover fee (increased when the fee is negative) and
    /// by the skim on extractive rollovers. It is then clamped to the
    /// caller's cap and the reserve balance, and the amount in is derived
    /// back from the clamped amount out.
    fn compute_rollover_amt(&self, chain: &Chain, request: &RolloverRequest, fee_perc: i128) -> TrancheResult<RolloverData> {
        let mature_out = self.state.reserve.is_mature(&request.token_out);

        let yield_in = self.yield_of(chain, &request.tranche_in)?;
        let mut std_in = to_std_tranche_amt(request.tranche_in_amt_available, yield_in)?;
        let price_in = self.price_of(chain, &request.tranche_in)?;
        let price_out = self.price_of(chain, &request.token_out)?;
        if std_in == 0 || price_in == 0 || price_out == 0 {
            return Ok(RolloverData::default());
        }

        // 1. Combined fee and skim factor, ONE-scaled
        let fee_factor = (ONE_I128 - fee_perc).clamp(0, 2 * ONE_I128) as u128;
        let skim_factor = if self.state.config.skim_perc > 0 && price_out > price_in {
            let skim = mul_div(self.state.config.skim_perc, price_out - price_in, price_out)?;
            (ONE - skim) as u128
        } else {
            ONE as u128
        };
        let factor = mul_div_u128(fee_factor, skim_factor, ONE as u128, Rounding::Down)?;
        if factor == 0 {
            return Ok(RolloverData::default());
        }

        // 2. Amount out
        let numerator = (price_in as u128).checked_mul(factor).ok_or(TrancheError::Overflow)?;
        let denominator = (price_out as u128) * (ONE as u128);
        let mut std_out = to_u64(mul_div_u128(std_in as u128, numerator, denominator, Rounding::Down)?)?;
        let mut clamped = mature_out && std_out > self.state.std_mature_tranche_balance;
        let yield_out = if mature_out { 0 } else { self.yield_of(chain, &request.token_out)? };
        let mut token_out_amt = if mature_out {
            std_out = std_out.min(self.state.std_mature_tranche_balance);
            self.from_std_mature_amt(chain, std_out)?
        } else {
            from_std_tranche_amt(std_out, yield_out)?
        };

        // 3. Clamp and derive the amount in back
        let mut tranche_in_amt = request.tranche_in_amt_available;
        let available = request.max_token_out_amt.min(self.reserve_balance(chain, &request.token_out));
        if token_out_amt > available {
            token_out_amt = available;
            std_out = if mature_out {
                self.to_std_mature_amt(chain, available)?.min(self.state.std_mature_tranche_balance)
            } else {
                to_std_tranche_amt(available, yield_out)?
            };
            clamped = true;
        }
        if clamped {
            let std_in_needed = to_u64(mul_div_u128(std_out as u128, denominator, numerator, Rounding::Up)?)?;
            tranche_in_amt = mul_div_up(std_in_needed, UNIT_YIELD, yield_in)?.min(request.tranche_in_amt_available);
            std_in = to_std_tranche_amt(tranche_in_amt, yield_in)?;
        }

        // 4. Perp-denominated size of the rollover
        let value_in = mul_div(std_in, price_in, UNIT_PRICE)?;
        let perp_rollover_amt = self.compute_perp_amt_for_value(chain, value_in)?;

        Ok(RolloverData {
            tranche_in_amt,
            token_out_amt,
            perp_rollover_amt,
            std_tranche_in_amt: std_in,
            std_tranche_out_amt: std_out,
        })
    }

    /// Returns true if `tranche_in` may be rolled in for `token_out`
    pub fn is_acceptable_rollover(&self, chain: &Chain, tranche_in: &TokenId, token_out: &TokenId) -> TrancheResult<bool> {
        if !self.is_deposit_bond_tranche(chain, tranche_in) || tranche_in == token_out {
            return Ok(false);
        }
        if self.state.reserve.is_mature(token_out) {
            return Ok(self.mature_balance(chain) > 0);
        }
        if !self.state.reserve.contains(token_out) || self.is_deposit_bond_tranche(chain, token_out) {
            return Ok(false);
        }
        let bond = chain.bond_of_tranche(token_out).ok_or(TrancheError::UnknownTranche { token: *token_out })?;
        Ok(!self.is_acceptable_bond(chain, &bond)?)
    }

    /// Reserve tokens a roller may take out, mature collateral first
    pub fn reserve_tokens_up_for_rollover(&self, chain: &Chain) -> TrancheResult<Vec<TokenId>> {
        let mut tokens = Vec::new();
        if self.mature_balance(chain) > 0 {
            tokens.push(self.state.reserve.mature());
        }
        for tranche in self.state.reserve.tranches() {
            if self.is_deposit_bond_tranche(chain, tranche) {
                continue;
            }
            let bond = chain.bond_of_tranche(tranche).ok_or(TrancheError::UnknownTranche { token: *tranche })?;
            if !self.is_acceptable_bond(chain, &bond)? {
                tokens.push(*tranche);
            }
        }
        Ok(tokens)
    }

    // ============ Rebalance Hooks ============

    /// Takes underlying from a roller into the mature balance, growing the
    /// standardized balances at the current mature rate
    pub fn receive_rebalance(&mut self, chain: &mut Chain, from: &Address, amount: u64) -> TrancheResult<u64> {
        self.atomic(chain, |perp, chain| {
            perp.advance_state(chain)?;
            check!(perp.is_roller(from), TrancheError::UnauthorizedRoller { caller: *from });
            check!(amount > 0, TrancheError::ZeroAmount);

            let std_amt = perp.to_std_mature_amt(chain, amount)?;
            let mature = perp.state.reserve.mature();
            let id = perp.state.id;
            chain.transfer(&mature, from, &id, amount)?;
            perp.state.std_mature_tranche_balance = safe_add(perp.state.std_mature_tranche_balance, std_amt)?;
            perp.state.std_total_tranche_balance = safe_add(perp.state.std_total_tranche_balance, std_amt)?;
            perp.sync_reserve(chain, &mature)?;
            Ok(std_amt)
        })
    }

    /// Sends mature collateral to a roller and the protocol fee to
    /// `collector`. When the mature balance cannot cover both, each is
    /// scaled down proportionally. Returns the amounts actually sent.
    pub fn rebalance_to_vault(
        &mut self,
        chain: &mut Chain,
        to: &Address,
        amount: u64,
        protocol_fee: u64,
        collector: &Address,
    ) -> TrancheResult<(u64, u64)> {
        self.atomic(chain, |perp, chain| {
            perp.advance_state(chain)?;
            check!(perp.is_roller(to), TrancheError::UnauthorizedRoller { caller: *to });

            let balance = perp.mature_balance(chain);
            let requested = safe_add(amount, protocol_fee)?;
            let (amount, protocol_fee) = if requested > balance {
                (mul_div(amount, balance, requested)?, mul_div(protocol_fee, balance, requested)?)
            } else {
                (amount, protocol_fee)
            };
            let total = amount + protocol_fee;
            if total == 0 {
                return Ok((0, 0));
            }

            let std_amt = mul_div_up(total, perp.state.std_mature_tranche_balance, balance)?
                .min(perp.state.std_mature_tranche_balance);
            let mature = perp.state.reserve.mature();
            let id = perp.state.id;
            chain.transfer(&mature, &id, to, amount)?;
            chain.transfer(&mature, &id, collector, protocol_fee)?;
            perp.state.std_mature_tranche_balance -= std_amt;
            perp.state.std_total_tranche_balance = safe_sub(perp.state.std_total_tranche_balance, std_amt)?;
            perp.sync_reserve(chain, &mature)?;
            Ok((amount, protocol_fee))
        })
    }

    // ============ Protocol ============

    /// Sends every fee token the perp holds to `to`
    pub fn collect_protocol_fees(&mut self, chain: &mut Chain, caller: &Address, to: &Address) -> TrancheResult<u64> {
        self.atomic(chain, |perp, chain| {
            require_owner(perp.state.owner, *caller)?;
            require_valid_address(*to, "collector")?;
            let token = perp.fee_token_id();
            let id = perp.state.id;
            let amount = chain.balance_of(&token, &id);
            chain.transfer(&token, &id, to, amount)?;
            perp.emit(ProtocolEvent::ProtocolFeesCollected { to: *to, amount, timestamp: chain.now() });
            Ok(amount)
        })
    }

    /// Resets the standardized basis. Only allowed while the reserve holds
    /// no tranches and some mature collateral.
    pub fn redenominate(&mut self, chain: &mut Chain, caller: &Address, std_balance: u64) -> TrancheResult<()> {
        self.atomic(chain, |perp, chain| {
            require_owner(perp.state.owner, *caller)?;
            perp.advance_state(chain)?;
            check!(
                perp.state.reserve.tranche_count() == 0 && perp.mature_balance(chain) > 0,
                TrancheError::UnacceptableRedenomination
            );
            check!(std_balance > 0, TrancheError::ZeroAmount);

            perp.state.std_total_tranche_balance = std_balance;
            perp.state.std_mature_tranche_balance = std_balance;
            perp.emit(ProtocolEvent::Redenominated {
                std_total: std_balance,
                std_mature: std_balance,
                timestamp: chain.now(),
            });
            Ok(())
        })
    }

    // ============ Valuation ============

    /// Underlying value of the reserve: the mature balance plus each
    /// tranche's claim on its bond's collateral
    pub fn tvl(&self, chain: &Chain) -> TrancheResult<u64> {
        let mut total = self.mature_balance(chain);
        for tranche in self.state.reserve.tranches() {
            let view = chain.bond_view_of_tranche(tranche)?;
            let value = view.tranche_value(tranche, self.reserve_balance(chain, tranche))?;
            total = safe_add(total, value)?;
        }
        Ok(total)
    }

    /// Price-weighted standardized size of the reserve
    pub fn reserve_value(&self, chain: &Chain) -> TrancheResult<u64> {
        let mature = self.state.reserve.mature();
        let mut total = mul_div(self.state.std_mature_tranche_balance, self.price_of(chain, &mature)?, UNIT_PRICE)?;
        for tranche in self.state.reserve.tranches() {
            let std = to_std_tranche_amt(self.reserve_balance(chain, tranche), self.yield_of(chain, tranche)?)?;
            let value = mul_div(std, self.price_of(chain, tranche)?, UNIT_PRICE)?;
            total = safe_add(total, value)?;
        }
        Ok(total)
    }

    /// Pool snapshot for fee decisions, given the vault's TVL
    pub fn subscription_state(&self, chain: &Chain, vault_tvl: u64) -> TrancheResult<SubscriptionState> {
        Ok(SubscriptionState {
            perp_tvl: self.tvl(chain)?,
            vault_tvl,
            senior_tr: self.deposit_bond_senior_ratio(chain)?,
        })
    }

    /// Senior tranche ratio of the current deposit bond
    pub fn deposit_bond_senior_ratio(&self, chain: &Chain) -> TrancheResult<u64> {
        let bond = self.state.deposit_bond.ok_or(TrancheError::NoDepositBond)?;
        Ok(chain.bond_view(&bond)?.two_tranche_data()?.tranches[SENIOR_INDEX].ratio)
    }

    /// Price of one standardized unit of a reserve token
    pub fn price_of(&self, chain: &Chain, token: &TokenId) -> TrancheResult<u64> {
        let pricing = &self.state.config.pricing_strategy;
        if self.state.reserve.is_mature(token) {
            return pricing.compute_mature_tranche_price(self.mature_balance(chain), self.state.std_mature_tranche_balance);
        }
        let view = chain.bond_view_of_tranche(token)?;
        pricing.compute_tranche_price(&view, token)
    }

    /// Applied yield of a reserve tranche, or the strategy's yield for a
    /// tranche not yet in the reserve
    pub fn yield_of(&self, chain: &Chain, tranche: &TokenId) -> TrancheResult<u64> {
        match self.state.applied_yields.get(tranche) {
            Some(applied) => Ok(*applied),
            None => {
                let view = chain.bond_view_of_tranche(tranche)?;
                self.state.config.yield_strategy.compute_yield(&view, tranche)
            }
        }
    }

    /// Perps minted for `tranche_in_amt` of `tranche_in` and the
    /// standardized amount it adds to the reserve
    pub fn compute_mint_amt(&self, chain: &Chain, tranche_in: &TokenId, tranche_in_amt: u64) -> TrancheResult<(u64, u64)> {
        let std_in = to_std_tranche_amt(tranche_in_amt, self.yield_of(chain, tranche_in)?)?;
        let value_in = mul_div(std_in, self.price_of(chain, tranche_in)?, UNIT_PRICE)?;
        Ok((self.compute_perp_amt_for_value(chain, value_in)?, std_in))
    }

    /// Perps issued for `value` at the reserve's mint price. The first
    /// mint, and any mint into a worthless reserve, is one-for-one.
    pub fn compute_perp_amt_for_value(&self, chain: &Chain, value: u64) -> TrancheResult<u64> {
        let supply = self.total_supply(chain);
        if supply == 0 {
            return Ok(value);
        }
        match self.reserve_value(chain)? {
            0 => Ok(value),
            reserve_value => mul_div(value, supply, reserve_value),
        }
    }

    /// Smallest amount of `tranche_in` that mints at least `perp_amt`
    pub fn compute_tranche_in_for_perp(&self, chain: &Chain, tranche_in: &TokenId, perp_amt: u64) -> TrancheResult<u64> {
        let supply = self.total_supply(chain);
        let reserve_value = if supply == 0 { 0 } else { self.reserve_value(chain)? };
        let value = if reserve_value == 0 {
            perp_amt
        } else {
            mul_div_up(perp_amt, reserve_value, supply)?
        };
        let std = mul_div_up(value, UNIT_PRICE, self.price_of(chain, tranche_in)?)?;
        mul_div_up(std, UNIT_YIELD, self.yield_of(chain, tranche_in)?)
    }

    // ============ Previews ============

    /// Perps a deposit would mint, without committing anything
    pub fn preview_deposit(&self, chain: &Chain, depositor: &Address, tranche_in: &TokenId, tranche_in_amt: u64) -> TrancheResult<u64> {
        let (mut perp, mut chain) = (self.clone(), chain.clone());
        perp.deposit(&mut chain, depositor, tranche_in, tranche_in_amt)
    }

    /// Reserve tokens a burn would return, without committing anything
    pub fn preview_burn(&self, chain: &Chain, holder: &Address, amount: u64) -> TrancheResult<Vec<TokenAmount>> {
        let (mut perp, mut chain) = (self.clone(), chain.clone());
        perp.burn(&mut chain, holder, amount)
    }

    /// Amounts a rollover would resolve to, without committing anything
    pub fn preview_rollover(&self, chain: &Chain, roller: &Address, vault_tvl: u64, request: &RolloverRequest) -> TrancheResult<RolloverData> {
        let (mut perp, mut chain) = (self.clone(), chain.clone());
        perp.rollover(&mut chain, roller, vault_tvl, request)
    }

    // ============ Internals ============

    /// Runs `op` as one all-or-nothing operation under the reentrancy guard
    fn atomic<T>(
        &mut self,
        chain: &mut Chain,
        op: impl FnOnce(&mut Self, &mut Chain) -> TrancheResult<T>,
    ) -> TrancheResult<T> {
        self.guard.enter()?;
        let ledger_snapshot = self.clone();
        let chain_snapshot = chain.clone();

        let result = op(self, chain);
        if result.is_err() {
            *self = ledger_snapshot;
            *chain = chain_snapshot;
        }
        self.guard.exit();
        result
    }

    /// Lazy state update: adopt a newer acceptable deposit bond, then roll
    /// every matured reserve tranche into the mature balance
    fn advance_state(&mut self, chain: &mut Chain) -> TrancheResult<()> {
        let now = chain.now();

        // 1. Deposit bond
        if let Some(latest) = chain.latest_bond() {
            if self.state.deposit_bond != Some(latest) && self.is_acceptable_bond(chain, &latest)? {
                self.state.deposit_bond = Some(latest);
                self.state.minted_per_tranche.clear();
                self.emit(ProtocolEvent::DepositBondUpdated {
                    bond: latest,
                    maturity_date: chain.bond(&latest)?.maturity_date,
                    timestamp: now,
                });
            }
        }

        // 2. Matured tranches
        let tranches: Vec<TokenId> = self.state.reserve.tranches().copied().collect();
        let mut rolled = false;
        for tranche in tranches {
            let bond = chain.bond_of_tranche(&tranche).ok_or(TrancheError::UnknownTranche { token: tranche })?;
            if !chain.is_bond_past_maturity(&bond)? {
                continue;
            }
            chain.ensure_mature(&bond)?;

            let balance = self.reserve_balance(chain, &tranche);
            let std_amt = to_std_tranche_amt(balance, self.yield_of(chain, &tranche)?)?;
            let id = self.state.id;
            let collateral_redeemed = chain.redeem_mature(&bond, &id, &tranche, balance)?;
            self.state.std_mature_tranche_balance = safe_add(self.state.std_mature_tranche_balance, std_amt)?
                .min(self.state.std_total_tranche_balance);
            self.sync_reserve(chain, &tranche)?;
            rolled = true;

            self.emit(ProtocolEvent::TrancheMatured {
                tranche,
                bond,
                collateral_redeemed,
                std_amount: std_amt,
                timestamp: now,
            });
        }

        // 3. Mature balance
        if rolled {
            let mature = self.state.reserve.mature();
            self.sync_reserve(chain, &mature)?;
        }
        Ok(())
    }

    /// Brings reserve membership and applied yields in line with the
    /// perp's balance of `token`
    fn sync_reserve(&mut self, chain: &Chain, token: &TokenId) -> TrancheResult<u64> {
        let balance = self.reserve_balance(chain, token);
        if !self.state.reserve.is_mature(token) {
            let member = self.state.reserve.contains(token);
            if balance > 0 && !member {
                let applied = self.yield_of(chain, token)?;
                self.state.applied_yields.insert(*token, applied);
                self.state.reserve.insert(*token);
            } else if balance == 0 && member {
                self.state.reserve.remove(token);
                self.state.applied_yields.remove(token);
            }
        }
        self.emit(ProtocolEvent::ReserveSynced { token: *token, balance, timestamp: chain.now() });
        Ok(balance)
    }

    /// Moves a fee from `account` into the perp's custody, in the fee token
    fn settle_fee(&mut self, chain: &mut Chain, account: &Address, fee: u64) -> TrancheResult<()> {
        if fee == 0 {
            return Ok(());
        }
        let id = self.state.id;
        chain.transfer(&self.fee_token_id(), account, &id, fee)?;

        self.emit(ProtocolEvent::FeeSettled { account: *account, fee, timestamp: chain.now() });
        Ok(())
    }

    fn enforce_caps(&self, chain: &Chain, tranche: &TokenId) -> TrancheResult<()> {
        let supply = self.total_supply(chain);
        let max_supply = self.state.config.max_supply;
        check!(supply <= max_supply, TrancheError::ExceededMaxSupply { supply, max_supply });

        let minted = self.minted_for_tranche(tranche);
        let max_mint = self.state.config.max_mint_amt_per_tranche;
        check!(
            minted <= max_mint,
            TrancheError::ExceededMaxMintPerTranche { token: *tranche, minted, max_mint }
        );
        Ok(())
    }

    /// Same collateral, two tranches, time to maturity within tolerance
    fn is_acceptable_bond(&self, chain: &Chain, bond: &BondId) -> TrancheResult<bool> {
        let view = chain.bond_view(bond)?;
        let ttm = view.time_to_maturity();
        Ok(view.collateral_token() == self.state.reserve.mature()
            && view.tranche_data().count() == REQUIRED_TRANCHE_COUNT
            && ttm >= self.state.config.min_tranche_maturity_sec
            && ttm < self.state.config.max_tranche_maturity_sec)
    }

    fn is_deposit_bond_tranche(&self, chain: &Chain, token: &TokenId) -> bool {
        match self.state.deposit_bond {
            Some(bond) => chain.bond_of_tranche(token) == Some(bond),
            None => false,
        }
    }

    fn to_std_mature_amt(&self, chain: &Chain, amount: u64) -> TrancheResult<u64> {
        let balance = self.mature_balance(chain);
        let std_mature = self.state.std_mature_tranche_balance;
        if balance == 0 || std_mature == 0 {
            return Ok(amount);
        }
        mul_div(amount, std_mature, balance)
    }

    fn from_std_mature_amt(&self, chain: &Chain, std_amt: u64) -> TrancheResult<u64> {
        let std_mature = self.state.std_mature_tranche_balance;
        if std_mature == 0 {
            return Ok(0);
        }
        mul_div(std_amt, self.mature_balance(chain), std_mature)
    }

    fn fee_token_id(&self) -> TokenId {
        match self.state.config.fee_token {
            FeeToken::Perp => self.state.id,
            FeeToken::External(token) => token,
        }
    }

    fn emit(&mut self, event: ProtocolEvent) {
        self.events.emit(event);
    }

    fn emit_param(&mut self, chain: &Chain, param: ConfigParam, by: &Address) {
        self.events.emit(ProtocolEvent::ParameterUpdated { param, by: *by, timestamp: chain.now() });
    }
}

fn to_std_tranche_amt(amount: u64, yield_factor: u64) -> TrancheResult<u64> {
    mul_div(amount, yield_factor, UNIT_YIELD)
}

fn from_std_tranche_amt(std_amt: u64, yield_factor: u64) -> TrancheResult<u64> {
    if yield_factor == 0 {
        return Ok(0);
    }
    mul_div(std_amt, UNIT_YIELD, yield_factor)
}

fn to_u64(value: u128) -> TrancheResult<u64> {
    u64::try_from(value).map_err(|_| TrancheError::Overflow)
}

//! Vault ledger tests against an in-memory chain.
//!
//! Same bond series as the perp tests: 25/75 bonds issued weekly from week
//! 10, maturing four weeks out. Amounts are in whole collateral units of
//! `U` so tranche holdings stay well above the dust amount.

use super::*;
use tranche_common::{
    constants::time::{DAY, WEEK},
    BondIssuer, EventType,
};
use tranche_fee_policy::{FeePolicy, FeePolicyUpdate};
use tranche_perp::PerpConfig;

const U: u64 = ONE;

const OWNER: Address = [9u8; 32];
const ALICE: Address = [1u8; 32];
const BOB: Address = [4u8; 32];
const COLLECTOR: Address = [3u8; 32];
const VAULT: TokenId = [2u8; 32];
const PERP: TokenId = [0xEE; 32];
const COLLATERAL: TokenId = [0xCC; 32];

fn setup() -> (VaultLedger, PerpLedger, Chain) {
    let issuer = BondIssuer::new(OWNER, COLLATERAL, vec![250, 750], WEEK, 0, 4 * WEEK).unwrap();
    let mut chain = Chain::new(issuer, 10 * WEEK + DAY);
    chain.issue_bond().unwrap().unwrap();
    for who in [ALICE, BOB] {
        chain.tokens_mut().mint(&COLLATERAL, &who, 100_000 * U).unwrap();
    }

    let config = PerpConfig {
        min_tranche_maturity_sec: 2 * WEEK,
        max_tranche_maturity_sec: 5 * WEEK,
        ..PerpConfig::default()
    };
    let mut perp = PerpLedger::new(PERP, OWNER, COLLATERAL, config, FeePolicy::new(OWNER)).unwrap();
    perp.add_roller(&chain, &OWNER, VAULT).unwrap();

    let mut vault = VaultLedger::new(VAULT, OWNER, COLLATERAL, VaultConfig::default()).unwrap();
    vault.set_fee_collector(&chain, &OWNER, COLLECTOR).unwrap();
    (vault, perp, chain)
}

/// Senior and junior tranches of the latest bond
fn latest_tranches(chain: &Chain) -> (TokenId, TokenId) {
    bond_tranches(chain, &chain.latest_bond().unwrap()).unwrap()
}

/// Alice tranches four times `amount` and deposits the seniors into the perp
fn seed_perp(perp: &mut PerpLedger, chain: &mut Chain, amount: u64) -> TokenId {
    perp.update_state(chain).unwrap();
    let bond = chain.latest_bond().unwrap();
    chain.deposit_into_bond(&bond, &ALICE, 4 * amount).unwrap();
    let (senior, _) = latest_tranches(chain);
    perp.deposit(chain, &ALICE, &senior, amount).unwrap();
    senior
}

fn roll_deposit_bond(perp: &mut PerpLedger, chain: &mut Chain) {
    chain.warp(2 * WEEK);
    let bond = chain.issue_bond().unwrap().unwrap();
    perp.update_state(chain).unwrap();
    assert_eq!(perp.deposit_bond(), Some(bond));
}

/// The perp holds 1000U senior A, the deposit bond has moved on to B and
/// Bob has 3990U in the vault. At that size the deviation ratio is exactly
/// ONE, so rollovers are free.
fn balanced_setup() -> (VaultLedger, PerpLedger, Chain, TokenId) {
    let (mut vault, mut perp, mut chain) = setup();
    let senior_a = seed_perp(&mut perp, &mut chain, 1_000 * U);
    roll_deposit_bond(&mut perp, &mut chain);
    vault.deposit(&mut perp, &mut chain, &BOB, 3_990 * U).unwrap();
    (vault, perp, chain, senior_a)
}

/// `balanced_setup` after a deploy: the vault holds 997.5U senior A and
/// 2992.5U junior B, the perp 2.5U senior A and 997.5U senior B
fn deployed_setup() -> (VaultLedger, PerpLedger, Chain, TokenId, TokenId, TokenId) {
    let (mut vault, mut perp, mut chain, senior_a) = balanced_setup();
    vault.deploy(&mut perp, &mut chain).unwrap();
    let (senior_b, junior_b) = latest_tranches(&chain);
    (vault, perp, chain, senior_a, senior_b, junior_b)
}

// ============ Construction / Admin ============

#[test]
fn test_new_validates_config() {
    let bad = VaultConfig { min_underlying_perc: ONE + 1, ..VaultConfig::default() };
    assert!(VaultLedger::new(VAULT, OWNER, COLLATERAL, bad).is_err());
    assert!(VaultLedger::new([0u8; 32], OWNER, COLLATERAL, VaultConfig::default()).is_err());

    let vault = VaultLedger::new(VAULT, OWNER, COLLATERAL, VaultConfig::default()).unwrap();
    assert_eq!(vault.state().keeper, OWNER);
    assert_eq!(vault.config().rebalance_freq_sec, DAY);
}

#[test]
fn test_admin_requires_owner() {
    let (mut vault, _, chain) = setup();
    assert_eq!(
        vault.set_keeper(&chain, &ALICE, ALICE),
        Err(TrancheError::Unauthorized { expected: OWNER, actual: ALICE })
    );
    assert!(vault.set_liquidity_floor(&chain, &OWNER, 0, ONE + 1).is_err());

    vault.set_liquidity_floor(&chain, &OWNER, 10 * U, ONE / 3).unwrap();
    vault.set_min_deployment_amt(&chain, &OWNER, 5 * U).unwrap();
    vault.set_rebalance_freq(&chain, &OWNER, WEEK).unwrap();
    assert_eq!(vault.config().min_underlying_bal, 10 * U);
    assert_eq!(vault.config().min_deployment_amt, 5 * U);
    assert_eq!(vault.config().rebalance_freq_sec, WEEK);
    // fee collector in setup plus three
    assert_eq!(vault.events().filter_by_type(EventType::ParameterUpdated).len(), 4);

    vault.transfer_ownership(&chain, &OWNER, ALICE).unwrap();
    assert!(vault.set_keeper(&chain, &OWNER, BOB).is_err());
    vault.set_keeper(&chain, &ALICE, BOB).unwrap();
}

// ============ Deposit / Redeem ============

#[test]
fn test_bootstrap_deposit_uses_initial_rate() {
    let (mut vault, mut perp, mut chain) = setup();
    let notes = vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();

    assert_eq!(notes, 1_000 * U * INITIAL_RATE);
    assert_eq!(vault.note_supply(&chain), notes);
    assert_eq!(vault.underlying_balance(&chain), 1_000 * U);
    assert_eq!(vault.events().filter_by_type(EventType::VaultDeposited).len(), 1);
    assert_eq!(vault.deposit(&mut perp, &mut chain, &BOB, 0), Err(TrancheError::ZeroAmount));
}

#[test]
fn test_deposit_mints_against_tvl() {
    let (mut vault, mut perp, mut chain) = setup();
    let bob = vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();

    // Vault TVL doubles, the next depositor gets half as many notes
    chain.tokens_mut().mint(&COLLATERAL, &VAULT, 1_000 * U).unwrap();
    let alice = vault.deposit(&mut perp, &mut chain, &ALICE, 1_000 * U).unwrap();
    assert_eq!(alice, bob / 2);
    assert_eq!(vault.tvl(&perp, &chain).unwrap(), 3_000 * U);
}

#[test]
fn test_deposit_charges_mint_fee() {
    let (mut vault, mut perp, mut chain) = setup();
    perp.update_fee_policy(&chain, &OWNER, &FeePolicyUpdate::VaultMintFee(ONE / 100)).unwrap();

    let notes = vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();
    assert_eq!(notes, 990 * U * INITIAL_RATE);
}

#[test]
fn test_redeem_bounds() {
    let (mut vault, mut perp, mut chain) = setup();
    let notes = vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();

    assert_eq!(
        vault.redeem(&mut perp, &mut chain, &BOB, 0),
        Err(TrancheError::UnacceptableBurnAmt { amount: 0, supply: notes })
    );
    assert!(vault.redeem(&mut perp, &mut chain, &BOB, notes + 1).is_err());
    assert!(vault.redeem(&mut perp, &mut chain, &ALICE, 1).is_err());
    assert_eq!(vault.note_supply(&chain), notes);
}

#[test]
fn test_redeem_pays_pro_rata() {
    let (mut vault, mut perp, mut chain) = setup();
    let notes = vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();
    vault.deposit(&mut perp, &mut chain, &ALICE, 1_000 * U).unwrap();

    let before = chain.balance_of(&COLLATERAL, &BOB);
    let out = vault.redeem(&mut perp, &mut chain, &BOB, notes / 2).unwrap();
    assert_eq!(out[0], TokenAmount::new(COLLATERAL, 500 * U));
    assert_eq!(chain.balance_of(&COLLATERAL, &BOB) - before, 500 * U);
    assert_eq!(vault.underlying_balance(&chain), 1_500 * U);
    assert_eq!(vault.events().filter_by_type(EventType::VaultRedeemed).len(), 1);
}

#[test]
fn test_redeem_burn_fee_stays_in_vault() {
    let (mut vault, mut perp, mut chain) = setup();
    perp.update_fee_policy(&chain, &OWNER, &FeePolicyUpdate::VaultBurnFee(ONE / 100)).unwrap();
    let notes = vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();
    vault.deposit(&mut perp, &mut chain, &ALICE, 1_000 * U).unwrap();

    let before = chain.balance_of(&COLLATERAL, &BOB);
    vault.redeem(&mut perp, &mut chain, &BOB, notes).unwrap();
    assert_eq!(chain.balance_of(&COLLATERAL, &BOB) - before, 990 * U);
    assert_eq!(vault.tvl(&perp, &chain).unwrap(), 1_010 * U);
}

#[test]
fn test_redeem_hands_out_deployed_tranches() {
    let (mut vault, mut perp, mut chain, senior_a, _, junior_b) = deployed_setup();
    let notes = vault.note_supply(&chain);
    let senior_before = chain.balance_of(&senior_a, &BOB);

    vault.redeem(&mut perp, &mut chain, &BOB, notes).unwrap();
    assert_eq!(chain.balance_of(&senior_a, &BOB) - senior_before, 997_50 * U / 100);
    assert_eq!(chain.balance_of(&junior_b, &BOB), 2_992_50 * U / 100);
    assert_eq!(vault.note_supply(&chain), 0);
    assert_eq!(vault.assets().deployed_count(), 0);
}

#[test]
fn test_redeem_leaves_tranche_dust() {
    let (mut vault, mut perp, mut chain, senior_a, _, junior_b) = deployed_setup();
    let notes = vault.note_supply(&chain);
    let senior_before = chain.balance_of(&senior_a, &BOB);

    // 997.5U / 100_000 is below the dust amount
    let out = vault.redeem(&mut perp, &mut chain, &BOB, notes / 100_000).unwrap();
    assert!(out.iter().all(|t| t.amount == 0));
    assert_eq!(chain.balance_of(&senior_a, &BOB), senior_before);
    assert_eq!(chain.balance_of(&junior_b, &BOB), 0);
    assert_eq!(vault.note_supply(&chain), notes - notes / 100_000);
}

// ============ Deploy ============

#[test]
fn test_deploy_rolls_seniors_into_perp() {
    let (vault, perp, chain, senior_a, senior_b, junior_b) = deployed_setup();

    let rolled = vault.events().filter_by_type(EventType::VaultDeployed);
    assert_eq!(rolled.len(), 1);
    assert_eq!(chain.balance_of(&senior_a, &VAULT), 997_50 * U / 100);
    assert_eq!(chain.balance_of(&junior_b, &VAULT), 2_992_50 * U / 100);
    assert_eq!(chain.balance_of(&senior_b, &VAULT), 0);
    assert_eq!(vault.underlying_balance(&chain), 0);

    assert_eq!(perp.reserve_balance(&chain, &senior_a), 250 * U / 100);
    assert_eq!(perp.reserve_balance(&chain, &senior_b), 997_50 * U / 100);
    assert!(vault.assets().is_deployed(&senior_a));
    assert!(vault.assets().is_deployed(&junior_b));
    assert!(!vault.assets().is_deployed(&senior_b));

    // Free rollover, nothing lost
    assert_eq!(vault.tvl(&perp, &chain).unwrap(), 3_990 * U);
    assert_eq!(perp.tvl(&chain).unwrap(), 1_000 * U);
}

#[test]
fn test_deploy_keeps_floor_back() {
    let (mut vault, mut perp, mut chain, senior_a) = balanced_setup();
    vault.set_liquidity_floor(&chain, &OWNER, 990 * U, 0).unwrap();

    let rollovers = vault.deploy(&mut perp, &mut chain).unwrap();
    assert_eq!(rollovers.len(), 1);
    assert_eq!(rollovers[0].tranche_in_amt, 750 * U);
    assert_eq!(rollovers[0].token_out_amt, 750 * U);
    assert_eq!(vault.underlying_balance(&chain), 990 * U);
    assert_eq!(chain.balance_of(&senior_a, &VAULT), 750 * U);
}

#[test]
fn test_deploy_requires_usable_underlying() {
    let (mut vault, mut perp, mut chain, _) = balanced_setup();

    vault.set_min_deployment_amt(&chain, &OWNER, 3_990 * U).unwrap();
    assert_eq!(vault.deploy(&mut perp, &mut chain), Err(TrancheError::InsufficientDeployment));

    vault.set_min_deployment_amt(&chain, &OWNER, 0).unwrap();
    vault.set_liquidity_floor(&chain, &OWNER, 3_990 * U, 0).unwrap();
    assert_eq!(vault.deploy(&mut perp, &mut chain), Err(TrancheError::InsufficientDeployment));
}

#[test]
fn test_deploy_without_candidates_rolls_back() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 3_990 * U).unwrap();

    // The only reserve tranche belongs to the deposit bond
    let perp_events = perp.events().len();
    assert_eq!(vault.deploy(&mut perp, &mut chain), Err(TrancheError::InsufficientDeployment));
    assert_eq!(vault.underlying_balance(&chain), 3_990 * U);
    assert_eq!(vault.assets().deployed_count(), 0);
    assert_eq!(perp.events().len(), perp_events);
}

#[test]
fn test_deploy_redeems_leftover_pairs() {
    let (mut vault, mut perp, mut chain) = setup();
    let senior_a = seed_perp(&mut perp, &mut chain, 1_000 * U);
    roll_deposit_bond(&mut perp, &mut chain);
    vault.deposit(&mut perp, &mut chain, &BOB, 8_000 * U).unwrap();

    // 2000U senior B against 1000U senior A: the rollover clamps
    let rollovers = vault.deploy(&mut perp, &mut chain).unwrap();
    let r = rollovers[0];
    assert_eq!(r.token_out_amt, 1_000 * U);
    assert!(r.tranche_in_amt > 1_000 * U && r.tranche_in_amt < 2_000 * U);
    assert!(!perp.reserve().contains(&senior_a));

    let (senior_b, junior_b) = latest_tranches(&chain);
    let remainder = chain.balance_of(&senior_b, &VAULT);
    assert!(remainder < 250);
    let leftover = 2_000 * U - r.tranche_in_amt - remainder;
    assert_eq!(vault.underlying_balance(&chain), 4 * leftover);
    assert_eq!(chain.balance_of(&junior_b, &VAULT), 6_000 * U - 3 * leftover);
}

#[test]
fn test_preview_deploy_commits_nothing() {
    let (vault, perp, chain, _) = balanced_setup();
    let preview = vault.preview_deploy(&perp, &chain).unwrap();
    assert_eq!(preview[0].token_out_amt, 997_50 * U / 100);
    assert_eq!(vault.underlying_balance(&chain), 3_990 * U);
    assert_eq!(vault.assets().deployed_count(), 0);
}

// ============ Recover ============

#[test]
fn test_recover_redeems_matured_tranches() {
    let (mut vault, mut perp, mut chain, senior_a, _, junior_b) = deployed_setup();
    chain.warp(2 * WEEK);

    assert_eq!(vault.preview_recover(&perp, &chain).unwrap(), 997_50 * U / 100);
    assert_eq!(vault.underlying_balance(&chain), 0);
    vault.recover(&mut perp, &mut chain).unwrap();
    assert_eq!(vault.underlying_balance(&chain), 997_50 * U / 100);
    assert!(!vault.assets().is_deployed(&senior_a));
    assert!(vault.assets().is_deployed(&junior_b));
    assert_eq!(vault.events().filter_by_type(EventType::VaultRecovered).len(), 1);
    assert_eq!(perp.reserve().tranche_count(), 1);
}

#[test]
fn test_recover_token_redeems_live_pair() {
    let (mut vault, mut perp, mut chain) = setup();
    vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();
    let bond = chain.latest_bond().unwrap();
    chain.deposit_into_bond(&bond, &VAULT, 400 * U).unwrap();
    let (senior, junior) = latest_tranches(&chain);
    vault.sync_asset(&chain, &senior).unwrap();
    vault.sync_asset(&chain, &junior).unwrap();

    // Juniors alone are left alone
    vault.recover_token(&mut perp, &mut chain, &junior).unwrap();
    assert_eq!(vault.assets().deployed_count(), 2);

    vault.recover_token(&mut perp, &mut chain, &senior).unwrap();
    assert_eq!(vault.underlying_balance(&chain), 1_000 * U);
    assert_eq!(vault.assets().deployed_count(), 0);

    assert_eq!(
        vault.recover_token(&mut perp, &mut chain, &senior),
        Err(TrancheError::InvalidInput { param: "token", reason: "not a deployed tranche" })
    );
}

#[test]
fn test_recover_melds_held_perps() {
    let (mut vault, mut perp, mut chain) = setup();
    let senior_a = seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();
    chain.transfer(&PERP, &ALICE, &VAULT, 100 * U).unwrap();
    assert_eq!(vault.tvl(&perp, &chain).unwrap(), 1_100 * U);

    vault.recover(&mut perp, &mut chain).unwrap();
    assert_eq!(chain.balance_of(&PERP, &VAULT), 0);
    assert_eq!(chain.balance_of(&senior_a, &VAULT), 100 * U);
    assert!(vault.assets().is_deployed(&senior_a));
    assert_eq!(vault.tvl(&perp, &chain).unwrap(), 1_100 * U);
}

// ============ Swaps ============

#[test]
fn test_swap_underlying_for_perps() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 3_990 * U).unwrap();

    // dr moves from 1.0 to 0.909, inside the soft bound: 0.1% fee
    assert_eq!(vault.preview_swap_underlying_for_perps(&perp, &chain, &BOB, 100 * U).unwrap(), 99_90 * U / 100);
    let perp_out = vault.swap_underlying_for_perps(&mut perp, &mut chain, &BOB, 100 * U).unwrap();
    assert_eq!(perp_out, 99_90 * U / 100);
    assert_eq!(chain.balance_of(&PERP, &BOB), perp_out);
    assert_eq!(perp.total_supply(&chain), 1_099_90 * U / 100);

    // 99.9U seniors cost 399.6U of collateral; the junior stays behind
    let (_, junior) = latest_tranches(&chain);
    assert_eq!(vault.underlying_balance(&chain), 3_690_40 * U / 100);
    assert_eq!(chain.balance_of(&junior, &VAULT), 299_70 * U / 100);
    assert!(vault.assets().is_deployed(&junior));
    assert_eq!(vault.events().filter_by_type(EventType::UnderlyingSwapped).len(), 1);
}

#[test]
fn test_swap_underlying_for_perps_after_collateral_rebase() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    chain.warp(4 * WEEK);
    chain.issue_bond().unwrap().unwrap();
    perp.update_state(&mut chain).unwrap();
    assert_eq!(perp.mature_balance(&chain), 1_000 * U);

    // Collateral halves; the perp's mint price does not follow
    chain.tokens_mut().rebase(&COLLATERAL, 1, 2).unwrap();
    assert_eq!(perp.tvl(&chain).unwrap(), 500 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 3_000 * U).unwrap();
    let tvl_before = vault.tvl(&perp, &chain).unwrap();

    let perp_out = vault.swap_underlying_for_perps(&mut perp, &mut chain, &BOB, 100 * U).unwrap();
    assert_eq!(perp_out, 99_90 * U / 100);

    // Seniors for the minted perps cost 399.6U; the junior stays behind
    let (_, junior) = latest_tranches(&chain);
    assert_eq!(vault.underlying_balance(&chain), 2_700_40 * U / 100);
    assert_eq!(chain.balance_of(&junior, &VAULT), 299_70 * U / 100);
    assert!(vault.tvl(&perp, &chain).unwrap() >= tvl_before);

    // The swapper never walks off with more value than they paid in
    let value_out = perp_out as u128 * perp.tvl(&chain).unwrap() as u128 / perp.total_supply(&chain) as u128;
    assert!(value_out < 100 * U as u128);
}

#[test]
fn test_swap_perps_for_underlying() {
    let (mut vault, mut perp, mut chain) = setup();
    let senior_a = seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 3_990 * U).unwrap();

    let before = chain.balance_of(&COLLATERAL, &ALICE);
    let out = vault.swap_perps_for_underlying(&mut perp, &mut chain, &ALICE, 100 * U).unwrap();
    assert_eq!(out, 99_90 * U / 100);
    assert_eq!(chain.balance_of(&COLLATERAL, &ALICE) - before, out);
    assert_eq!(perp.total_supply(&chain), 900 * U);

    // The melded perps came back as senior A with no junior to pair
    assert_eq!(chain.balance_of(&senior_a, &VAULT), 100 * U);
    assert_eq!(vault.underlying_balance(&chain), 3_890_10 * U / 100);
    assert_eq!(vault.tvl(&perp, &chain).unwrap(), 3_990_10 * U / 100);
    assert_eq!(vault.events().filter_by_type(EventType::PerpsSwapped).len(), 1);
}

#[test]
fn test_swap_rejected_below_floor() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 3_990 * U).unwrap();
    vault.set_liquidity_floor(&chain, &OWNER, 3_700 * U, 0).unwrap();

    let before = chain.balance_of(&COLLATERAL, &BOB);
    assert_eq!(
        vault.swap_underlying_for_perps(&mut perp, &mut chain, &BOB, 100 * U),
        Err(TrancheError::InsufficientLiquidity { balance: 3_690_40 * U / 100, floor: 3_700 * U })
    );
    assert_eq!(chain.balance_of(&COLLATERAL, &BOB), before);
    assert_eq!(perp.total_supply(&chain), 1_000 * U);
    assert_eq!(vault.underlying_balance(&chain), 3_990 * U);
}

#[test]
fn test_liquidity_floor_is_strict() {
    let (mut vault, _, mut chain) = setup();
    vault.set_liquidity_floor(&chain, &OWNER, 0, ONE * 33 / 100).unwrap();

    chain.tokens_mut().mint(&COLLATERAL, &VAULT, 33).unwrap();
    assert_eq!(
        vault.enforce_liquidity(&chain, 100),
        Err(TrancheError::InsufficientLiquidity { balance: 33, floor: 33 })
    );
    chain.tokens_mut().mint(&COLLATERAL, &VAULT, 1).unwrap();
    assert!(vault.enforce_liquidity(&chain, 100).is_ok());

    vault.set_liquidity_floor(&chain, &OWNER, 34, 0).unwrap();
    assert!(vault.enforce_liquidity(&chain, 100).is_err());
}

#[test]
fn test_swap_zero_amounts() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    assert_eq!(
        vault.swap_underlying_for_perps(&mut perp, &mut chain, &BOB, 0),
        Err(TrancheError::ZeroAmount)
    );
    assert_eq!(
        vault.swap_perps_for_underlying(&mut perp, &mut chain, &ALICE, 0),
        Err(TrancheError::ZeroAmount)
    );
}

// ============ Rebalance ============

#[test]
fn test_rebalance_enriches_perp() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 8_000 * U).unwrap();

    // dr ~2: capped at 0.1% of 9000U, 1% of it to the protocol
    let r = vault.rebalance(&mut perp, &mut chain, &OWNER).unwrap();
    assert_eq!(r, RebalanceData { underlying_amt_into_perp: 891_000_000, protocol_fee_amt: 9_000_000 });
    assert_eq!(perp.mature_balance(&chain), 891_000_000);
    assert_eq!(chain.balance_of(&COLLATERAL, &COLLECTOR), 9_000_000);
    assert_eq!(vault.underlying_balance(&chain), 8_000 * U - 900_000_000);
    assert_eq!(vault.state().last_rebalance_timestamp, chain.now());
    assert_eq!(vault.events().filter_by_type(EventType::Rebalanced).len(), 1);
}

#[test]
fn test_rebalance_debases_perp() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    chain.warp(4 * WEEK);
    chain.issue_bond().unwrap().unwrap();
    vault.deposit(&mut perp, &mut chain, &BOB, 1_000 * U).unwrap();
    assert_eq!(perp.mature_balance(&chain), 1_000 * U);

    let r = vault.rebalance(&mut perp, &mut chain, &OWNER).unwrap();
    assert_eq!(r, RebalanceData { underlying_amt_into_perp: -198_000_000, protocol_fee_amt: 2_000_000 });
    assert_eq!(vault.underlying_balance(&chain), 1_000 * U + 198_000_000);
    assert_eq!(chain.balance_of(&COLLATERAL, &COLLECTOR), 2_000_000);
    assert_eq!(perp.mature_balance(&chain), 1_000 * U - 200_000_000);
}

#[test]
fn test_rebalance_inside_band_moves_nothing() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 3_990 * U).unwrap();

    let r = vault.rebalance(&mut perp, &mut chain, &OWNER).unwrap();
    assert!(r.is_noop());
    assert_eq!(vault.underlying_balance(&chain), 3_990 * U);
    assert_eq!(vault.state().last_rebalance_timestamp, chain.now());
}

#[test]
fn test_rebalance_frequency_and_keeper() {
    let (mut vault, mut perp, mut chain) = setup();
    seed_perp(&mut perp, &mut chain, 1_000 * U);
    vault.deposit(&mut perp, &mut chain, &BOB, 8_000 * U).unwrap();

    assert_eq!(
        vault.rebalance(&mut perp, &mut chain, &ALICE),
        Err(TrancheError::Unauthorized { expected: OWNER, actual: ALICE })
    );
    vault.set_keeper(&chain, &OWNER, ALICE).unwrap();
    vault.rebalance(&mut perp, &mut chain, &ALICE).unwrap();

    let last = chain.now();
    chain.warp(DAY - 1);
    assert_eq!(
        vault.rebalance(&mut perp, &mut chain, &ALICE),
        Err(TrancheError::LastRebalanceTooRecent { last, now: last + DAY - 1 })
    );
    chain.warp(1);
    assert!(vault.preview_rebalance(&perp, &chain, &ALICE).is_ok());
    assert_eq!(vault.state().last_rebalance_timestamp, last);
    vault.rebalance(&mut perp, &mut chain, &ALICE).unwrap();
}

// ============ Previews / Guard ============

#[test]
fn test_previews_commit_nothing() {
    let (vault, perp, chain) = setup();
    let events = vault.events().len();
    let notes = vault.preview_deposit(&perp, &chain, &BOB, 1_000 * U).unwrap();
    assert_eq!(notes, 1_000 * U * INITIAL_RATE);
    assert_eq!(vault.note_supply(&chain), 0);
    assert_eq!(vault.events().len(), events);
    assert!(vault.preview_redeem(&perp, &chain, &BOB, 1).is_err());
}

#[test]
fn test_reentrancy_is_rejected() {
    let (mut vault, mut perp, mut chain) = setup();
    vault.guard.enter().unwrap();
    assert_eq!(vault.deposit(&mut perp, &mut chain, &BOB, U), Err(TrancheError::Reentrancy));
}

#[test]
fn test_guard_released_after_failure() {
    let (mut vault, mut perp, mut chain) = setup();
    assert!(vault.redeem(&mut perp, &mut chain, &BOB, 1).is_err());
    assert!(!vault.guard.is_entered());
    vault.deposit(&mut perp, &mut chain, &BOB, U).unwrap();
}

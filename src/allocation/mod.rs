//! Trade selection under budget constraints
//!
//! Takes the best candidate per underlying and decides how many contracts
//! of each to buy. The objective rewards score per premium dollar so cheap
//! high-scoring contracts spread the budget across more positions:
//!
//!   maximize  sum(score_i * q_i / max(0.12, premium_i))
//!
//! subject to a 10% cash reserve, a per-symbol cost cap, a distinct-trade
//! limit and a per-trade quantity ceiling. Each selected trade leaves with
//! take-profit and stop-loss levels derived from its implied volatility
//! and the prevailing market regime.

mod solver;

use tracing::debug;
use uuid::Uuid;

use crate::types::{CandidateTrade, MarketRegime, SelectedTrade};
use solver::Item;

/// Fraction of available cash the allocator may spend
pub const BUDGET_FRACTION: f64 = 0.9;
/// Premium floor for the objective weight, keeps near-zero premiums from
/// dominating the objective
pub const PREMIUM_WEIGHT_FLOOR: f64 = 0.12;
/// Default cap on one symbol's share of available cash
pub const DEFAULT_MAX_SYMBOL_FRACTION: f64 = 0.5;
/// Default cap on the number of distinct trades
pub const DEFAULT_MAX_DISTINCT_TRADES: usize = 5;
/// Default cap on contracts per trade
pub const DEFAULT_MAX_CONTRACTS_PER_TRADE: u32 = 10;

/// Allocation input: candidates plus the constraint knobs
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    /// One best-of-chain candidate per underlying
    pub candidates: Vec<CandidateTrade>,
    /// Cash available in the account
    pub available_cash: f64,
    /// Market regime used for exit parameter derivation
    pub regime: MarketRegime,
    /// Cap on one symbol's cost as a fraction of available cash
    pub max_symbol_fraction: f64,
    /// Cap on the number of distinct trades selected
    pub max_distinct_trades: usize,
    /// Cap on contracts per selected trade
    pub max_contracts_per_trade: u32,
}

impl AllocationRequest {
    pub fn new(candidates: Vec<CandidateTrade>, available_cash: f64, regime: MarketRegime) -> Self {
        Self {
            candidates,
            available_cash,
            regime,
            max_symbol_fraction: DEFAULT_MAX_SYMBOL_FRACTION,
            max_distinct_trades: DEFAULT_MAX_DISTINCT_TRADES,
            max_contracts_per_trade: DEFAULT_MAX_CONTRACTS_PER_TRADE,
        }
    }
}

/// Allocation output
#[derive(Debug, Clone)]
pub struct AllocationResult {
    /// Selected trades in allocation priority order
    pub selected: Vec<SelectedTrade>,
    /// Total entry cost in currency units, cents-exact
    pub total_premium_used: f64,
    /// Objective value achieved by the selection
    pub objective: f64,
    /// Spendable budget the selection was solved against
    pub budget: f64,
}

/// Take-profit and stop levels for one trade, per-share prices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitParams {
    pub exit_premium: f64,
    pub stop_loss: f64,
    pub stop_price: f64,
}

/// Solve the selection program. Infeasible input (no cash, no affordable
/// candidate) yields an empty selection, never an error.
pub fn allocate(request: &AllocationRequest) -> AllocationResult {
    let cash = request.available_cash;
    let budget = if cash.is_finite() && cash > 0.0 {
        cash * BUDGET_FRACTION
    } else {
        0.0
    };
    let budget_cents = (budget * 100.0).floor() as i64;
    let symbol_cap_cents = (cash.max(0.0) * request.max_symbol_fraction * 100.0).floor() as i64;

    let mut items = build_items(request);
    items.sort_by(|a, b| {
        b.value_per_cent()
            .total_cmp(&a.value_per_cent())
            .then_with(|| {
                request.candidates[a.source]
                    .symbol
                    .cmp(&request.candidates[b.source].symbol)
            })
            .then_with(|| {
                request.candidates[a.source]
                    .best
                    .contract
                    .contract_symbol
                    .cmp(&request.candidates[b.source].best.contract.contract_symbol)
            })
    });

    let solution = solver::solve(
        &items,
        budget_cents,
        symbol_cap_cents,
        request.max_distinct_trades,
    );

    let mut selected = Vec::new();
    for (item, &qty) in items.iter().zip(&solution.quantities) {
        if qty == 0 {
            continue;
        }
        selected.push(build_trade(
            &request.candidates[item.source],
            qty,
            request.regime,
        ));
    }

    let total_premium_used = solution.total_cost_cents as f64 / 100.0;
    debug!(
        candidates = request.candidates.len(),
        eligible = items.len(),
        selected = selected.len(),
        budget,
        total_premium_used,
        objective = solution.objective,
        "allocation solved"
    );

    AllocationResult {
        selected,
        total_premium_used,
        objective: solution.objective,
        budget,
    }
}

/// Derive exit levels from the entry premium, the contract's IV (in
/// percentage points) and the market regime. The stop trigger sits 5% of
/// the premium above the stop limit so a falling market hits the trigger
/// before the limit.
pub fn exit_parameters(premium: f64, iv: f64, regime: MarketRegime) -> ExitParams {
    let iv = if iv.is_finite() && iv > 0.0 { iv } else { 0.0 };
    let profit_factor = (1.0 + iv / 100.0) * regime.profit_multiplier();
    let stop_factor = (0.65 - iv / 200.0).max(0.4) * regime.stop_multiplier();

    let exit_premium = round2(premium * profit_factor);
    let stop_loss = round2(premium * stop_factor);
    let stop_price = round2(stop_loss + 0.05 * premium);

    ExitParams {
        exit_premium,
        stop_loss,
        stop_price,
    }
}

fn build_items(request: &AllocationRequest) -> Vec<Item> {
    let mut groups: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    let mut items = Vec::with_capacity(request.candidates.len());

    for (i, candidate) in request.candidates.iter().enumerate() {
        let premium = candidate.premium();
        if !premium.is_finite() || premium <= 0.0 {
            continue;
        }
        let unit_cost = (premium * 100.0 * 100.0).round() as i64;
        if unit_cost <= 0 {
            continue;
        }
        let next_group = groups.len();
        let group = *groups.entry(candidate.symbol.as_str()).or_insert(next_group);
        let weight = 1.0 / premium.max(PREMIUM_WEIGHT_FLOOR);

        items.push(Item {
            source: i,
            symbol_group: group,
            unit_value: candidate.score * weight,
            unit_cost,
            max_qty: request.max_contracts_per_trade,
        });
    }
    items
}

fn build_trade(candidate: &CandidateTrade, qty: u32, regime: MarketRegime) -> SelectedTrade {
    let contract = &candidate.best.contract;
    let premium = candidate.premium();
    let iv = contract
        .implied_volatility
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(candidate.best.iv_stats.mean);
    let exits = exit_parameters(premium, iv, regime);

    let unit_cents = (premium * 100.0 * 100.0).round() as i64;
    let profit_unit_cents = ((exits.exit_premium - premium) * 100.0 * 100.0).round() as i64;
    let loss_unit_cents = ((premium - exits.stop_loss) * 100.0 * 100.0).round() as i64;

    SelectedTrade {
        trade_id: Uuid::new_v4(),
        symbol: candidate.symbol.clone(),
        contract_symbol: contract.contract_symbol.clone(),
        right: contract.right,
        strike: contract.strike,
        expiration: contract.expiration,
        premium_per_contract: premium,
        score: candidate.score,
        contracts_to_buy: qty,
        exit_premium: exits.exit_premium,
        stop_loss: exits.stop_loss,
        stop_price: exits.stop_price,
        total_cost: (unit_cents * qty as i64) as f64 / 100.0,
        total_profit: (profit_unit_cents * qty as i64) as f64 / 100.0,
        total_loss: (loss_unit_cents * qty as i64) as f64 / 100.0,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//! Contract Scorer - converts one option contract into a 0-10 score
//!
//! Weighted composite of seven components:
//! - Probability of profit from delta (35%)
//! - Expected ROI against premium (20%)
//! - Risk/reward odds (10%)
//! - Theta decay drag, inverted (7%)
//! - Liquidity from spread and open interest (8%)
//! - IV cheapness versus the expiration's mean (8%)
//! - Days-to-expiration fit (12%)
//!
//! Pure functions only: identical contract + stats + oi_ref + date always
//! produce the identical score.

use chrono::NaiveDate;
use std::sync::Arc;

use crate::types::{ExpirationIvStats, OptionContract, OptionRight, ScoreBreakdown, ScoredContract};

// Component weights, in percent. Must total exactly 100.
const W_POP: u32 = 35;
const W_EXPECTED_ROI: u32 = 20;
const W_RISK_REWARD: u32 = 10;
const W_THETA: u32 = 7;
const W_LIQUIDITY: u32 = 8;
const W_IV_CHEAPNESS: u32 = 8;
const W_DTE_FIT: u32 = 12;

/// Fallback open-interest reference when a chain has no positive OI,
/// also the floor applied to the chain median.
pub const DEFAULT_OI_REF: f64 = 1000.0;

/// Sum of the component weights, as a fraction
pub fn weight_total() -> f64 {
    (W_POP + W_EXPECTED_ROI + W_RISK_REWARD + W_THETA + W_LIQUIDITY + W_IV_CHEAPNESS + W_DTE_FIT)
        as f64
        / 100.0
}

/// Reference open-interest scale for a chain: median of all positive open
/// interests, floored at [`DEFAULT_OI_REF`]
pub fn reference_open_interest(contracts: &[OptionContract]) -> f64 {
    let mut ois: Vec<f64> = contracts
        .iter()
        .filter_map(|c| c.open_interest)
        .filter(|oi| oi.is_finite() && *oi > 0.0)
        .collect();
    if ois.is_empty() {
        return DEFAULT_OI_REF;
    }
    ois.sort_by(|a, b| a.total_cmp(b));
    let mid = ois.len() / 2;
    let median = if ois.len() % 2 == 0 {
        (ois[mid - 1] + ois[mid]) / 2.0
    } else {
        ois[mid]
    };
    median.max(DEFAULT_OI_REF)
}

/// Score one contract against its expiration's IV stats.
///
/// Returns `None` when the contract has no usable premium (mid <= 0),
/// which excludes it from allocation entirely. Any numeric failure inside
/// a component collapses to score 0 for this contract only.
pub fn score_contract(
    contract: &OptionContract,
    iv_stats: &Arc<ExpirationIvStats>,
    oi_ref: f64,
    today: NaiveDate,
) -> Option<ScoredContract> {
    let premium = contract.mid_price();
    if !premium.is_finite() || premium <= 0.0 {
        return None;
    }

    let dte = contract.days_to_expiration(today);
    let pop = pop_from_delta(contract.right, contract.delta);
    let roi = expected_roi_raw(pop, contract.strike, premium);

    let breakdown = ScoreBreakdown {
        pop: pop * 10.0,
        expected_roi: (roi + 1.0) * 5.0,
        risk_reward: risk_reward(pop, roi),
        theta_decay: theta_decay(contract.theta, dte, premium),
        liquidity: liquidity(contract.bid, contract.ask, contract.open_interest, oi_ref),
        iv_cheapness: iv_cheapness(contract.implied_volatility, iv_stats),
        dte_fit: dte_fit(dte, contract.implied_volatility),
    };

    let weighted = (W_POP as f64 * breakdown.pop
        + W_EXPECTED_ROI as f64 * breakdown.expected_roi
        + W_RISK_REWARD as f64 * breakdown.risk_reward
        + W_THETA as f64 * breakdown.theta_decay
        + W_LIQUIDITY as f64 * breakdown.liquidity
        + W_IV_CHEAPNESS as f64 * breakdown.iv_cheapness
        + W_DTE_FIT as f64 * breakdown.dte_fit)
        / 100.0;

    let score = if weighted.is_finite() {
        weighted.clamp(0.0, 10.0)
    } else {
        0.0
    };

    Some(ScoredContract {
        contract: contract.clone(),
        score,
        breakdown,
        iv_stats: Arc::clone(iv_stats),
    })
}

/// Probability of profit approximated from delta.
/// PUT: 1 - |delta|; CALL: delta; 0.5 when delta is missing.
fn pop_from_delta(right: OptionRight, delta: Option<f64>) -> f64 {
    match delta {
        Some(d) if d.is_finite() => match right {
            OptionRight::Put => (1.0 - d.abs()).clamp(0.0, 1.0),
            OptionRight::Call => d.clamp(0.0, 1.0),
        },
        _ => 0.5,
    }
}

/// Expected ROI normalized by premium, clamped to [-1, 1].
/// Payoff proxy is strike - premium; loss is the premium paid.
fn expected_roi_raw(pop: f64, strike: f64, premium: f64) -> f64 {
    let payoff = (strike - premium).max(0.0);
    let roi = (pop * payoff - (1.0 - pop) * premium) / premium;
    if roi.is_finite() {
        roi.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Risk/reward odds score. Saturates at 10 when pop >= 0.99.
fn risk_reward(pop: f64, roi: f64) -> f64 {
    if pop >= 0.99 {
        return 10.0;
    }
    let odds = pop / (1.0 - pop);
    let raw = (1.0 + odds * roi.max(0.0)).ln() * 3.0;
    if raw.is_finite() {
        raw.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

/// Theta decay drag, inverted so lower decay scores higher.
/// Neutral 5 when theta is not quoted.
fn theta_decay(theta: Option<f64>, dte: i64, premium: f64) -> f64 {
    match theta {
        Some(t) if t.is_finite() => 10.0 / (1.0 + 2.0 * t.abs() * dte as f64 / premium),
        _ => 5.0,
    }
}

/// Liquidity from relative spread and open interest depth.
/// Score 1 when the quote is unusable for a spread.
fn liquidity(bid: Option<f64>, ask: Option<f64>, open_interest: Option<f64>, oi_ref: f64) -> f64 {
    let (bid, ask) = match (bid, ask) {
        (Some(b), Some(a)) if b > 0.0 && a.is_finite() && a >= b => (b, a),
        _ => return 1.0,
    };
    let spread_pct = ((ask - bid) / bid).max(0.01);
    let oi = open_interest.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0);
    let depth = (oi / oi_ref).sqrt();
    ((1.0 / spread_pct) * depth).min(10.0)
}

/// IV cheapness: z-score of mean-vs-current IV mapped from [-3, 3] to
/// [0, 10]. Neutral 5 when the expiration has no IV dispersion or the
/// contract has no quoted IV.
fn iv_cheapness(iv: Option<f64>, stats: &ExpirationIvStats) -> f64 {
    let iv = match iv {
        Some(v) if v.is_finite() => v,
        _ => return 5.0,
    };
    if stats.std <= 0.0 {
        return 5.0;
    }
    let z = ((stats.mean - iv) / stats.std).clamp(-3.0, 3.0);
    (z + 3.0) / 6.0 * 10.0
}

/// Days-to-expiration fit: triangular preference peaking at 8 days,
/// hard zero below 3 days. Above 60% IV, shorter expiries get a bonus
/// path so the better of the two shapes wins.
fn dte_fit(dte: i64, iv: Option<f64>) -> f64 {
    if dte < 3 {
        return 0.0;
    }
    let days = dte as f64;
    let triangular = (10.0 - 1.5 * (days - 8.0).abs()).max(0.0);
    let high_iv = iv.map(|v| v.is_finite() && v > 60.0).unwrap_or(false);
    if high_iv {
        triangular.max((10.0 - (days - 3.0)).max(0.0))
    } else {
        triangular
    }
}

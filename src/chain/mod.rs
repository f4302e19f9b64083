//! Option chain aggregation
//!
//! Turns one raw chain response into scored contracts:
//! - flattens the call and put expiration maps into `OptionContract`s
//! - groups contracts by expiration and computes IV statistics per group
//! - derives a chain-wide open interest reference for liquidity scoring
//! - scores every contract against its expiration group's stats

use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::broker::types::{ChainResponse, RawContract};
use crate::scoring;
use crate::types::{ExpirationIvStats, OptionContract, OptionRight, ScoredContract};

/// A fully scored option chain for one underlying
#[derive(Debug, Clone)]
pub struct AggregatedChain {
    /// Underlying ticker
    pub symbol: String,
    /// Every contract with a usable premium, scored
    pub scored: Vec<ScoredContract>,
    /// IV statistics keyed by expiration date
    pub stats: BTreeMap<NaiveDate, Arc<ExpirationIvStats>>,
    /// Open interest reference used for liquidity scoring
    pub reference_open_interest: f64,
}

impl AggregatedChain {
    /// Highest-scoring contract of the chain. Ties break toward the
    /// earlier expiration, then the smaller contract symbol, so repeated
    /// runs over the same chain pick the same winner.
    pub fn best(&self) -> Option<&ScoredContract> {
        self.scored.iter().reduce(|best, c| {
            match c.score.total_cmp(&best.score) {
                Ordering::Greater => c,
                Ordering::Less => best,
                Ordering::Equal => {
                    let lhs = (c.contract.expiration, &c.contract.contract_symbol);
                    let rhs = (best.contract.expiration, &best.contract.contract_symbol);
                    if lhs < rhs {
                        c
                    } else {
                        best
                    }
                }
            }
        })
    }
}

/// Aggregate and score a chain response in one pass.
pub fn aggregate(chain: &ChainResponse, today: NaiveDate) -> AggregatedChain {
    let contracts = extract_contracts(chain);
    let stats = iv_stats_by_expiration(&contracts);
    let oi_ref = scoring::reference_open_interest(&contracts);

    let mut scored = Vec::with_capacity(contracts.len());
    let mut unpriced = 0usize;
    for contract in contracts {
        // Every extracted contract has an entry in `stats` for its expiration.
        let Some(group) = stats.get(&contract.expiration) else {
            continue;
        };
        match scoring::score_contract(&contract, group, oi_ref, today) {
            Some(s) => scored.push(s),
            None => unpriced += 1,
        }
    }

    debug!(
        symbol = %chain.symbol,
        scored = scored.len(),
        unpriced,
        expirations = stats.len(),
        oi_ref,
        "aggregated option chain"
    );

    AggregatedChain {
        symbol: chain.symbol.clone(),
        scored,
        stats,
        reference_open_interest: oi_ref,
    }
}

/// Flatten the nested call and put maps into contract snapshots.
/// Entries that cannot be tied to a contract symbol and expiration are
/// dropped with a warning.
pub fn extract_contracts(chain: &ChainResponse) -> Vec<OptionContract> {
    let sides = [
        (OptionRight::Call, &chain.call_exp_date_map),
        (OptionRight::Put, &chain.put_exp_date_map),
    ];

    let mut out = Vec::new();
    for (side, exp_map) in sides {
        for (exp_key, strikes) in exp_map {
            for (strike_key, entries) in strikes {
                for raw in entries {
                    match convert(raw, exp_key, strike_key, side, &chain.symbol) {
                        Some(contract) => out.push(contract),
                        None => warn!(
                            symbol = %chain.symbol,
                            expiration = %exp_key,
                            strike = %strike_key,
                            "dropping chain entry with missing symbol or expiration"
                        ),
                    }
                }
            }
        }
    }
    out
}

/// Group contracts by expiration and compute IV stats per group.
/// Contracts without a quoted IV belong to the group but do not
/// contribute to the statistics.
pub fn iv_stats_by_expiration(
    contracts: &[OptionContract],
) -> BTreeMap<NaiveDate, Arc<ExpirationIvStats>> {
    let mut ivs: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for contract in contracts {
        let group = ivs.entry(contract.expiration).or_default();
        if let Some(iv) = contract.implied_volatility.filter(|v| v.is_finite()) {
            group.push(iv);
        }
    }

    ivs.into_iter()
        .map(|(expiration, values)| (expiration, Arc::new(group_stats(expiration, &values))))
        .collect()
}

fn group_stats(expiration: NaiveDate, ivs: &[f64]) -> ExpirationIvStats {
    if ivs.is_empty() {
        return ExpirationIvStats {
            expiration,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std: 0.0,
            count: 0,
        };
    }

    let count = ivs.len();
    let min = ivs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = ivs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = ivs.iter().sum::<f64>() / count as f64;
    // Population variance: the chain snapshot is the whole population.
    let variance = ivs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

    ExpirationIvStats {
        expiration,
        min,
        max,
        mean,
        std: variance.sqrt(),
        count,
    }
}

fn convert(
    raw: &RawContract,
    exp_key: &str,
    strike_key: &str,
    side: OptionRight,
    underlying: &str,
) -> Option<OptionContract> {
    let contract_symbol = raw.symbol.clone()?;
    let expiration = parse_expiration_key(exp_key)
        .or_else(|| raw.expiration_date.as_deref().and_then(parse_iso_date))?;
    let right = raw
        .put_call
        .as_deref()
        .and_then(OptionRight::from_str)
        .unwrap_or(side);
    let strike = raw
        .strike_price
        .or_else(|| strike_key.parse().ok())
        .unwrap_or_default();

    Some(OptionContract {
        contract_symbol,
        underlying: underlying.to_string(),
        right,
        strike,
        bid: raw.bid,
        ask: raw.ask,
        last: raw.last,
        open_interest: raw.open_interest,
        volume: raw.total_volume,
        implied_volatility: raw.volatility.filter(|v| v.is_finite()),
        delta: raw.delta,
        gamma: raw.gamma,
        theta: raw.theta,
        vega: raw.vega,
        expiration,
    })
}

/// Expiration map keys look like "2025-05-16:8" (date, colon, DTE).
fn parse_expiration_key(key: &str) -> Option<NaiveDate> {
    let date_part = key.split(':').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// ISO timestamps like "2025-05-16T20:00:00.000+00:00"; the date prefix
/// is all that matters here.
fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn make_raw(symbol: &str, put_call: &str, strike: f64, iv: Option<f64>) -> RawContract {
        RawContract {
            symbol: Some(symbol.to_string()),
            put_call: Some(put_call.to_string()),
            strike_price: Some(strike),
            bid: Some(1.4),
            ask: Some(1.6),
            last: Some(1.5),
            open_interest: Some(2000.0),
            total_volume: Some(500.0),
            volatility: iv,
            delta: Some(0.45),
            gamma: Some(0.02),
            theta: Some(-0.08),
            vega: Some(0.11),
            expiration_date: None,
        }
    }

    fn fixture_chain() -> ChainResponse {
        let mut calls: BTreeMap<String, BTreeMap<String, Vec<RawContract>>> = BTreeMap::new();
        let mut near: BTreeMap<String, Vec<RawContract>> = BTreeMap::new();
        near.insert(
            "190.0".to_string(),
            vec![make_raw("AAPL  250516C00190000", "CALL", 190.0, Some(30.0))],
        );
        near.insert(
            "195.0".to_string(),
            vec![make_raw("AAPL  250516C00195000", "CALL", 195.0, Some(50.0))],
        );
        calls.insert("2025-05-16:8".to_string(), near);

        let mut puts: BTreeMap<String, BTreeMap<String, Vec<RawContract>>> = BTreeMap::new();
        let mut near_puts: BTreeMap<String, Vec<RawContract>> = BTreeMap::new();
        near_puts.insert(
            "190.0".to_string(),
            vec![make_raw("AAPL  250516P00190000", "PUT", 190.0, Some(40.0))],
        );
        puts.insert("2025-05-16:8".to_string(), near_puts);

        let mut far: BTreeMap<String, Vec<RawContract>> = BTreeMap::new();
        far.insert(
            "190.0".to_string(),
            vec![make_raw("AAPL  250523C00190000", "CALL", 190.0, Some(35.0))],
        );
        calls.insert("2025-05-23:15".to_string(), far);

        ChainResponse {
            symbol: "AAPL".to_string(),
            status: Some("SUCCESS".to_string()),
            underlying_price: Some(192.3),
            call_exp_date_map: calls,
            put_exp_date_map: puts,
        }
    }

    #[test]
    fn extract_merges_call_and_put_maps() {
        let contracts = extract_contracts(&fixture_chain());
        assert_eq!(contracts.len(), 4);

        let calls = contracts
            .iter()
            .filter(|c| c.right == OptionRight::Call)
            .count();
        assert_eq!(calls, 3);
        assert!(contracts.iter().all(|c| c.underlying == "AAPL"));
        assert!(contracts
            .iter()
            .any(|c| c.expiration == d("2025-05-23") && c.right == OptionRight::Call));
    }

    #[test]
    fn expiration_falls_back_to_contract_field() {
        let mut raw = make_raw("TSLA  250509C00230000", "CALL", 230.0, Some(60.0));
        raw.expiration_date = Some("2025-05-09T20:00:00.000+00:00".to_string());

        let contract = convert(&raw, "garbage-key", "230.0", OptionRight::Call, "TSLA").unwrap();
        assert_eq!(contract.expiration, d("2025-05-09"));
    }

    #[test]
    fn entries_without_symbol_are_dropped() {
        let mut chain = fixture_chain();
        let strikes = chain
            .call_exp_date_map
            .get_mut("2025-05-16:8")
            .unwrap()
            .get_mut("190.0")
            .unwrap();
        strikes[0].symbol = None;

        let contracts = extract_contracts(&chain);
        assert_eq!(contracts.len(), 3);
    }

    #[test]
    fn population_stddev_matches_known_vector() {
        let contracts = extract_contracts(&fixture_chain());
        let stats = iv_stats_by_expiration(&contracts);

        // Near expiration IVs are 30, 50, 40: mean 40, pstdev sqrt(200/3)
        let near = stats.get(&d("2025-05-16")).unwrap();
        assert_eq!(near.count, 3);
        assert!((near.mean - 40.0).abs() < 1e-9);
        assert!((near.min - 30.0).abs() < 1e-9);
        assert!((near.max - 50.0).abs() < 1e-9);
        assert!((near.std - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);

        // Single-contract group has zero dispersion
        let far = stats.get(&d("2025-05-23")).unwrap();
        assert_eq!(far.count, 1);
        assert_eq!(far.std, 0.0);
    }

    #[test]
    fn missing_iv_excluded_from_stats_but_contract_still_scored() {
        let mut chain = fixture_chain();
        let strikes = chain
            .call_exp_date_map
            .get_mut("2025-05-16:8")
            .unwrap()
            .get_mut("190.0")
            .unwrap();
        strikes[0].volatility = None;

        let agg = aggregate(&chain, d("2025-05-08"));
        let near = agg.stats.get(&d("2025-05-16")).unwrap();
        assert_eq!(near.count, 2);
        assert!(agg
            .scored
            .iter()
            .any(|s| s.contract.contract_symbol == "AAPL  250516C00190000"));
    }

    #[test]
    fn aggregate_scores_share_group_stats() {
        let agg = aggregate(&fixture_chain(), d("2025-05-08"));
        assert_eq!(agg.scored.len(), 4);
        assert!(agg.scored.iter().all(|s| (0.0..=10.0).contains(&s.score)));

        let near: Vec<_> = agg
            .scored
            .iter()
            .filter(|s| s.contract.expiration == d("2025-05-16"))
            .collect();
        assert_eq!(near.len(), 3);
        assert!(Arc::ptr_eq(&near[0].iv_stats, &near[1].iv_stats));
        assert!(Arc::ptr_eq(&near[1].iv_stats, &near[2].iv_stats));
    }

    #[test]
    fn unpriced_contracts_are_excluded() {
        let mut chain = fixture_chain();
        let strikes = chain
            .call_exp_date_map
            .get_mut("2025-05-16:8")
            .unwrap()
            .get_mut("195.0")
            .unwrap();
        strikes[0].bid = None;

        let agg = aggregate(&chain, d("2025-05-08"));
        assert_eq!(agg.scored.len(), 3);
        assert!(!agg
            .scored
            .iter()
            .any(|s| s.contract.contract_symbol == "AAPL  250516C00195000"));
    }

    #[test]
    fn best_pick_is_stable_across_reruns() {
        let chain = fixture_chain();
        let first = aggregate(&chain, d("2025-05-08"));
        let second = aggregate(&chain, d("2025-05-08"));

        let a = first.best().unwrap();
        let b = second.best().unwrap();
        assert_eq!(a.contract.contract_symbol, b.contract.contract_symbol);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
    }
}

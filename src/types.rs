//! Core types used throughout OptBot
//!
//! Defines common data structures for option contracts, chain statistics,
//! scored candidates and selected trades.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Option right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionRight {
    Call,
    Put,
}

impl Default for OptionRight {
    fn default() -> Self {
        OptionRight::Call
    }
}

impl OptionRight {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CALL" | "C" => Some(OptionRight::Call),
            "PUT" | "P" => Some(OptionRight::Put),
            _ => None,
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionRight::Call => write!(f, "CALL"),
            OptionRight::Put => write!(f, "PUT"),
        }
    }
}

/// Market volatility regime, used to scale exit/stop targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    HighlyVolatile,
    Volatile,
    Normal,
    LowVolatility,
    Unknown,
}

impl Default for MarketRegime {
    fn default() -> Self {
        MarketRegime::Unknown
    }
}

impl MarketRegime {
    /// Classify from the mean implied volatility of the analyzed chains
    /// (IV in percentage points, e.g. 42.5)
    pub fn from_mean_iv(mean_iv: f64) -> Self {
        if !mean_iv.is_finite() || mean_iv <= 0.0 {
            MarketRegime::Unknown
        } else if mean_iv >= 80.0 {
            MarketRegime::HighlyVolatile
        } else if mean_iv >= 50.0 {
            MarketRegime::Volatile
        } else if mean_iv < 20.0 {
            MarketRegime::LowVolatility
        } else {
            MarketRegime::Normal
        }
    }

    /// Multiplier applied to the take-profit factor
    pub fn profit_multiplier(&self) -> f64 {
        match self {
            MarketRegime::HighlyVolatile => 1.2,
            MarketRegime::Volatile => 1.1,
            MarketRegime::LowVolatility => 0.9,
            MarketRegime::Normal | MarketRegime::Unknown => 1.0,
        }
    }

    /// Multiplier applied to the stop-loss factor
    pub fn stop_multiplier(&self) -> f64 {
        match self {
            MarketRegime::HighlyVolatile => 0.9,
            MarketRegime::Volatile => 0.95,
            MarketRegime::LowVolatility => 1.1,
            MarketRegime::Normal | MarketRegime::Unknown => 1.0,
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::HighlyVolatile => write!(f, "HIGHLY_VOLATILE"),
            MarketRegime::Volatile => write!(f, "VOLATILE"),
            MarketRegime::Normal => write!(f, "NORMAL"),
            MarketRegime::LowVolatility => write!(f, "LOW_VOLATILITY"),
            MarketRegime::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Immutable snapshot of one option contract from a chain fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    /// Broker contract symbol (e.g. "AAPL  250516C00190000")
    pub contract_symbol: String,
    /// Underlying ticker
    pub underlying: String,
    /// CALL or PUT
    pub right: OptionRight,
    /// Strike price
    pub strike: f64,
    /// Best bid
    pub bid: Option<f64>,
    /// Best ask
    pub ask: Option<f64>,
    /// Last trade price
    pub last: Option<f64>,
    /// Open interest
    pub open_interest: Option<f64>,
    /// Day volume
    pub volume: Option<f64>,
    /// Implied volatility in percentage points (e.g. 42.5)
    pub implied_volatility: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    /// Expiration date
    pub expiration: NaiveDate,
}

impl OptionContract {
    /// Mid price, the premium per share. Zero when either side of the
    /// quote is missing; a non-positive premium marks the contract
    /// untradeable.
    pub fn mid_price(&self) -> f64 {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => (bid + ask) / 2.0,
            _ => 0.0,
        }
    }

    /// Days to expiration from `today`, floored at 1
    pub fn days_to_expiration(&self, today: NaiveDate) -> i64 {
        (self.expiration - today).num_days().max(1)
    }
}

/// Per-expiration implied volatility statistics over one chain fetch.
/// Computed once, shared read-only by every contract of the expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirationIvStats {
    /// Expiration date the stats cover
    pub expiration: NaiveDate,
    /// Minimum IV among contracts with a quoted IV
    pub min: f64,
    /// Maximum IV
    pub max: f64,
    /// Mean IV
    pub mean: f64,
    /// Population standard deviation of IV
    pub std: f64,
    /// Number of contracts that contributed
    pub count: usize,
}

/// Per-component score breakdown, each component already scaled to [0,10]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub pop: f64,
    pub expected_roi: f64,
    pub risk_reward: f64,
    pub theta_decay: f64,
    pub liquidity: f64,
    pub iv_cheapness: f64,
    pub dte_fit: f64,
}

/// A contract with its composite score. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredContract {
    /// The underlying contract snapshot
    pub contract: OptionContract,
    /// Composite score in [0,10]
    pub score: f64,
    /// Component diagnostics
    pub breakdown: ScoreBreakdown,
    /// IV stats of the contract's expiration group
    pub iv_stats: Arc<ExpirationIvStats>,
}

/// Best-of-chain pick for one underlying, input to the allocator
#[derive(Debug, Clone)]
pub struct CandidateTrade {
    /// Underlying ticker
    pub symbol: String,
    /// Highest-scoring contract of the symbol's chain
    pub best: ScoredContract,
    /// Copy of the best contract's score
    pub score: f64,
}

impl CandidateTrade {
    pub fn new(symbol: impl Into<String>, best: ScoredContract) -> Self {
        let score = best.score;
        Self {
            symbol: symbol.into(),
            best,
            score,
        }
    }

    /// Premium per share of the candidate's contract
    pub fn premium(&self) -> f64 {
        self.best.contract.mid_price()
    }
}

/// A trade the allocator decided to enter, with exit parameters attached
#[derive(Debug, Clone)]
pub struct SelectedTrade {
    /// Engine-assigned id correlating selection and outcome records
    pub trade_id: Uuid,
    /// Underlying ticker
    pub symbol: String,
    /// Broker contract symbol
    pub contract_symbol: String,
    /// CALL or PUT
    pub right: OptionRight,
    /// Strike price
    pub strike: f64,
    /// Expiration date
    pub expiration: NaiveDate,
    /// Entry limit price per share
    pub premium_per_contract: f64,
    /// Composite score at selection time
    pub score: f64,
    /// Number of contracts to buy, always >= 1
    pub contracts_to_buy: u32,
    /// Take-profit limit price per share
    pub exit_premium: f64,
    /// Stop-loss limit price per share
    pub stop_loss: f64,
    /// Stop trigger price, slightly above the stop-loss limit
    pub stop_price: f64,
    /// Entry cost in currency units (premium x 100 x quantity)
    pub total_cost: f64,
    /// Profit if the take-profit fills
    pub total_profit: f64,
    /// Loss if the stop-loss fills
    pub total_loss: f64,
}

impl SelectedTrade {
    /// Entry cost in integer cents, used by budget accounting
    pub fn cost_cents(&self) -> i64 {
        (self.premium_per_contract * 100.0 * 100.0).round() as i64 * self.contracts_to_buy as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(bid: Option<f64>, ask: Option<f64>) -> OptionContract {
        OptionContract {
            contract_symbol: "AAPL  250516C00190000".to_string(),
            underlying: "AAPL".to_string(),
            right: OptionRight::Call,
            strike: 190.0,
            bid,
            ask,
            last: None,
            open_interest: None,
            volume: None,
            implied_volatility: None,
            delta: None,
            gamma: None,
            theta: None,
            vega: None,
            expiration: NaiveDate::from_ymd_opt(2025, 5, 16).unwrap(),
        }
    }

    #[test]
    fn mid_price_requires_both_sides() {
        assert_eq!(contract(Some(1.0), Some(1.5)).mid_price(), 1.25);
        assert_eq!(contract(None, Some(1.5)).mid_price(), 0.0);
        assert_eq!(contract(Some(1.0), None).mid_price(), 0.0);
        assert_eq!(contract(None, None).mid_price(), 0.0);
    }

    #[test]
    fn dte_floors_at_one_day() {
        let c = contract(Some(1.0), Some(1.2));
        let same_day = NaiveDate::from_ymd_opt(2025, 5, 16).unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap();
        let before = NaiveDate::from_ymd_opt(2025, 5, 9).unwrap();
        assert_eq!(c.days_to_expiration(same_day), 1);
        assert_eq!(c.days_to_expiration(after), 1);
        assert_eq!(c.days_to_expiration(before), 7);
    }

    #[test]
    fn regime_classification_thresholds() {
        assert_eq!(MarketRegime::from_mean_iv(95.0), MarketRegime::HighlyVolatile);
        assert_eq!(MarketRegime::from_mean_iv(80.0), MarketRegime::HighlyVolatile);
        assert_eq!(MarketRegime::from_mean_iv(60.0), MarketRegime::Volatile);
        assert_eq!(MarketRegime::from_mean_iv(35.0), MarketRegime::Normal);
        assert_eq!(MarketRegime::from_mean_iv(12.0), MarketRegime::LowVolatility);
        assert_eq!(MarketRegime::from_mean_iv(f64::NAN), MarketRegime::Unknown);
        assert_eq!(MarketRegime::from_mean_iv(0.0), MarketRegime::Unknown);
    }

    #[test]
    fn regime_multipliers_scale_opposite_directions() {
        let hv = MarketRegime::HighlyVolatile;
        assert!(hv.profit_multiplier() > 1.0);
        assert!(hv.stop_multiplier() < 1.0);

        let calm = MarketRegime::LowVolatility;
        assert!(calm.profit_multiplier() < 1.0);
        assert!(calm.stop_multiplier() > 1.0);

        assert_eq!(MarketRegime::Unknown.profit_multiplier(), 1.0);
        assert_eq!(MarketRegime::Unknown.stop_multiplier(), 1.0);
    }
}

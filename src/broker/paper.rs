//! Paper broker
//!
//! In-memory stand-in for the live brokerage, used for dry runs and
//! tests. Quotes and chains are generated deterministically from the
//! symbol so repeated runs see identical data, and order fills follow a
//! poll-count script:
//! - entry orders report FILLED after `entry_fill_after` status polls
//! - OCO exits report FILLED after `exit_fill_after` polls, or never
//!   when unset

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::{debug, info};

use super::types::{
    BrokerOrder, CashBalance, ChainResponse, OrderAck, OrderInstruction, OrderSpec, OrderStatus,
    OrderStrategyType, RawContract, UnderlyingQuote,
};
use super::{AccountSource, BrokerError, ChainSource, OrderBroker};
use crate::types::OptionRight;

const PAPER_ACCOUNT_HASH: &str = "PAPER";

struct PaperOrder {
    id: u64,
    spec: OrderSpec,
    /// Poll counter value at submission time
    submitted_at_poll: u32,
}

#[derive(Default)]
struct PaperState {
    orders: Vec<PaperOrder>,
    next_id: u64,
    poll_count: u32,
}

/// Simulated brokerage with scripted fills
pub struct PaperBroker {
    state: RwLock<PaperState>,
    cash: f64,
    quotes: HashMap<String, f64>,
    entry_fill_after: u32,
    exit_fill_after: Option<u32>,
    strike_count: u32,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PaperState::default()),
            cash: 10_000.0,
            quotes: HashMap::new(),
            entry_fill_after: 1,
            exit_fill_after: Some(2),
            strike_count: 9,
        }
    }

    /// Available cash reported by the account endpoint. The balance is
    /// static, fills do not debit it.
    pub fn with_cash(mut self, cash: f64) -> Self {
        self.cash = cash;
        self
    }

    /// Pin the underlying price for a symbol instead of deriving it
    pub fn with_quote(mut self, symbol: &str, last_price: f64) -> Self {
        self.quotes.insert(symbol.to_string(), last_price);
        self
    }

    /// Entry orders fill after this many status polls
    pub fn with_entry_fill_after(mut self, polls: u32) -> Self {
        self.entry_fill_after = polls;
        self
    }

    /// Exit brackets fill after this many status polls; `None` means the
    /// exit never fills
    pub fn with_exit_fill_after(mut self, polls: Option<u32>) -> Self {
        self.exit_fill_after = polls;
        self
    }

    pub fn with_strike_count(mut self, count: u32) -> Self {
        self.strike_count = count.max(1);
        self
    }

    /// Copies of every submitted order, in submission order
    pub fn submitted_orders(&self) -> Vec<OrderSpec> {
        self.state
            .read()
            .expect("paper state lock poisoned")
            .orders
            .iter()
            .map(|o| o.spec.clone())
            .collect()
    }

    /// Deterministic pseudo price for symbols without a pinned quote
    fn synthetic_price(&self, symbol: &str) -> f64 {
        if let Some(price) = self.quotes.get(symbol) {
            return *price;
        }
        let seed: u32 = symbol.bytes().map(u32::from).sum();
        40.0 + (seed % 360) as f64 + (seed % 7) as f64 / 10.0
    }

    fn render(&self, order: &PaperOrder, poll_count: u32) -> BrokerOrder {
        let polls_since = poll_count.saturating_sub(order.submitted_at_poll);
        match order.spec.order_strategy_type {
            OrderStrategyType::Oco => {
                let filled = self
                    .exit_fill_after
                    .map(|after| polls_since >= after)
                    .unwrap_or(false);
                let children = order
                    .spec
                    .child_order_strategies
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .map(|(i, child)| {
                        // Take-profit leg fills, the stop leg cancels
                        let status = match (filled, i) {
                            (true, 0) => OrderStatus::Filled,
                            (true, _) => OrderStatus::Canceled,
                            (false, _) => OrderStatus::Working,
                        };
                        BrokerOrder {
                            order_id: Some(order.id as i64),
                            status: Some(status),
                            order_type: child.order_type,
                            order_strategy_type: Some(OrderStrategyType::Single),
                            price: child.price,
                            stop_price: child.stop_price,
                            order_leg_collection: child.order_leg_collection.clone(),
                            ..Default::default()
                        }
                    })
                    .collect();

                BrokerOrder {
                    order_id: Some(order.id as i64),
                    status: Some(OrderStatus::Accepted),
                    order_strategy_type: Some(OrderStrategyType::Oco),
                    child_order_strategies: children,
                    ..Default::default()
                }
            }
            _ => {
                let is_entry = order
                    .spec
                    .order_leg_collection
                    .iter()
                    .any(|leg| leg.instruction == OrderInstruction::BuyToOpen);
                let fill_after = if is_entry {
                    Some(self.entry_fill_after)
                } else {
                    self.exit_fill_after
                };
                let status = match fill_after {
                    Some(after) if polls_since >= after => OrderStatus::Filled,
                    _ => OrderStatus::Working,
                };
                BrokerOrder {
                    order_id: Some(order.id as i64),
                    status: Some(status),
                    order_type: order.spec.order_type,
                    order_strategy_type: Some(order.spec.order_strategy_type),
                    price: order.spec.price,
                    stop_price: order.spec.stop_price,
                    quantity: Some(
                        order
                            .spec
                            .order_leg_collection
                            .iter()
                            .map(|l| l.quantity as f64)
                            .sum(),
                    ),
                    order_leg_collection: order.spec.order_leg_collection.clone(),
                    ..Default::default()
                }
            }
        }
    }
}

#[async_trait]
impl AccountSource for PaperBroker {
    async fn cash_balance(&self) -> Result<CashBalance, BrokerError> {
        Ok(CashBalance {
            available_cash: self.cash,
            account_hash: PAPER_ACCOUNT_HASH.to_string(),
            account_id: Some("paper-account".to_string()),
        })
    }
}

#[async_trait]
impl ChainSource for PaperBroker {
    async fn quote(&self, symbol: &str) -> Result<UnderlyingQuote, BrokerError> {
        let last_price = self.synthetic_price(symbol);
        Ok(UnderlyingQuote {
            symbol: symbol.to_string(),
            last_price,
            bid: Some(last_price - 0.02),
            ask: Some(last_price + 0.02),
            total_volume: Some(1_000_000.0),
            quote_time: Some(Utc::now().timestamp_millis()),
        })
    }

    async fn option_chain(
        &self,
        symbol: &str,
        target_strike: f64,
    ) -> Result<ChainResponse, BrokerError> {
        let today = Utc::now().date_naive();
        let atm = if target_strike.is_finite() && target_strike > 0.0 {
            target_strike.round()
        } else {
            self.synthetic_price(symbol).round()
        };
        let step = (atm / 40.0).round().max(1.0);
        let half = (self.strike_count / 2) as i64;

        let mut call_map = BTreeMap::new();
        let mut put_map = BTreeMap::new();
        for (dte, iv_base) in [(7i64, 45.0f64), (14, 38.0)] {
            let expiration = today + ChronoDuration::days(dte);
            let key = format!("{}:{}", expiration.format("%Y-%m-%d"), dte);

            let mut call_strikes = BTreeMap::new();
            let mut put_strikes = BTreeMap::new();
            for i in 0..self.strike_count as i64 {
                let strike = atm + (i - half) as f64 * step;
                if strike <= 0.0 {
                    continue;
                }
                let strike_key = format!("{strike:.1}");
                call_strikes.insert(
                    strike_key.clone(),
                    vec![synthetic_contract(
                        symbol,
                        OptionRight::Call,
                        strike,
                        atm,
                        expiration,
                        dte,
                        iv_base,
                        step,
                    )],
                );
                put_strikes.insert(
                    strike_key,
                    vec![synthetic_contract(
                        symbol,
                        OptionRight::Put,
                        strike,
                        atm,
                        expiration,
                        dte,
                        iv_base,
                        step,
                    )],
                );
            }
            call_map.insert(key.clone(), call_strikes);
            put_map.insert(key, put_strikes);
        }

        debug!(symbol, atm, "generated synthetic option chain");
        Ok(ChainResponse {
            symbol: symbol.to_string(),
            status: Some("SUCCESS".to_string()),
            underlying_price: Some(self.synthetic_price(symbol)),
            call_exp_date_map: call_map,
            put_exp_date_map: put_map,
        })
    }
}

#[async_trait]
impl OrderBroker for PaperBroker {
    async fn submit_order(
        &self,
        _account_hash: &str,
        spec: &OrderSpec,
    ) -> Result<OrderAck, BrokerError> {
        match spec.order_strategy_type {
            OrderStrategyType::Oco => {
                let children = spec.child_order_strategies.as_deref().unwrap_or_default();
                if children.len() != 2 {
                    return Err(BrokerError::Rejected {
                        status: 400,
                        body: "OCO order requires exactly two child strategies".to_string(),
                    });
                }
            }
            _ => {
                if spec.order_leg_collection.is_empty() {
                    return Err(BrokerError::Rejected {
                        status: 400,
                        body: "order has no legs".to_string(),
                    });
                }
            }
        }

        let mut state = self.state.write().expect("paper state lock poisoned");
        state.next_id += 1;
        let id = state.next_id;
        let poll = state.poll_count;
        state.orders.push(PaperOrder {
            id,
            spec: spec.clone(),
            submitted_at_poll: poll,
        });
        info!(order_id = id, strategy = ?spec.order_strategy_type, "paper order accepted");
        Ok(OrderAck {
            order_id: Some(format!("PAPER-{id}")),
        })
    }

    async fn query_orders(
        &self,
        _account_hash: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let mut state = self.state.write().expect("paper state lock poisoned");
        state.poll_count += 1;
        let poll_count = state.poll_count;
        Ok(state
            .orders
            .iter()
            .map(|order| self.render(order, poll_count))
            .collect())
    }
}

#[allow(clippy::too_many_arguments)]
fn synthetic_contract(
    underlying: &str,
    right: OptionRight,
    strike: f64,
    atm: f64,
    expiration: NaiveDate,
    dte: i64,
    iv_base: f64,
    step: f64,
) -> RawContract {
    let distance = (strike - atm).abs() / step;
    // Rough ATM time value with exponential decay away from the money
    let time_value = (atm * iv_base / 100.0 * (dte as f64 / 365.0).sqrt() * 0.8).max(0.05);
    let premium = ((time_value * (-distance * 0.45).exp()) * 100.0).round() / 100.0;
    let premium = premium.max(0.05);

    let lean = (atm - strike) / (step * 10.0);
    let delta = match right {
        OptionRight::Call => (0.5 + lean).clamp(0.05, 0.95),
        OptionRight::Put => (0.5 + lean).clamp(0.05, 0.95) - 1.0,
    };
    let iv = iv_base + distance * 1.5;

    RawContract {
        symbol: Some(osi_symbol(underlying, expiration, right, strike)),
        put_call: Some(right.to_string()),
        strike_price: Some(strike),
        bid: Some(((premium * 0.95) * 100.0).round() / 100.0),
        ask: Some(((premium * 1.05) * 100.0).round() / 100.0),
        last: Some(premium),
        open_interest: Some((2400.0 - distance * 320.0).max(150.0)),
        total_volume: Some((900.0 - distance * 120.0).max(40.0)),
        volatility: Some(iv),
        delta: Some(delta),
        gamma: Some(0.02),
        theta: Some(-(premium * 0.12 / dte as f64)),
        vega: Some(0.1),
        expiration_date: Some(format!("{}T20:00:00.000+00:00", expiration.format("%Y-%m-%d"))),
    }
}

/// OSI-style contract symbol: padded root, yymmdd, right, strike in
/// thousandths
fn osi_symbol(underlying: &str, expiration: NaiveDate, right: OptionRight, strike: f64) -> String {
    let right_code = match right {
        OptionRight::Call => 'C',
        OptionRight::Put => 'P',
    };
    format!(
        "{:<6}{}{}{:08}",
        underlying,
        expiration.format("%y%m%d"),
        right_code,
        (strike * 1000.0).round() as i64
    )
}

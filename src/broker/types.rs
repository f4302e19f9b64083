//! Brokerage wire types
//!
//! Serde models for the REST surface the engine consumes: option chains,
//! account balances, order submission payloads and order status queries.
//! Field names mirror the brokerage JSON (camelCase, SCREAMING enums).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Order leg instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderInstruction {
    BuyToOpen,
    SellToClose,
}

impl fmt::Display for OrderInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderInstruction::BuyToOpen => write!(f, "BUY_TO_OPEN"),
            OrderInstruction::SellToClose => write!(f, "SELL_TO_CLOSE"),
        }
    }
}

/// Broker-side order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingParentOrder,
    PendingActivation,
    Queued,
    Accepted,
    Working,
    Filled,
    PendingCancel,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Whether the order is still live on the book
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            OrderStatus::AwaitingParentOrder
                | OrderStatus::PendingActivation
                | OrderStatus::Queued
                | OrderStatus::Accepted
                | OrderStatus::Working
        )
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::AwaitingParentOrder => "AWAITING_PARENT_ORDER",
            OrderStatus::PendingActivation => "PENDING_ACTIVATION",
            OrderStatus::Queued => "QUEUED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Working => "WORKING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Order price type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    StopLimit,
}

/// Trading session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSession {
    Normal,
}

/// Order lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderDuration {
    Day,
    GoodTillCancel,
}

/// Order strategy kind: single leg or a bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStrategyType {
    Single,
    Oco,
    Trigger,
}

/// Traded instrument reference inside an order leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    pub asset_type: String,
}

impl Instrument {
    pub fn option(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            asset_type: "OPTION".to_string(),
        }
    }
}

/// One leg of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLeg {
    pub instruction: OrderInstruction,
    pub quantity: u32,
    pub instrument: Instrument,
}

/// Order submission payload. Shapes follow the brokerage order schema:
/// a SINGLE strategy carries its own legs, an OCO parent carries only
/// child strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<OrderSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<OrderDuration>,
    pub order_strategy_type: OrderStrategyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complex_order_strategy_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub order_leg_collection: Vec<OrderLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_order_strategies: Option<Vec<OrderSpec>>,
}

impl OrderSpec {
    /// Limit buy-to-open entry order, GTC
    pub fn limit_entry(contract_symbol: &str, quantity: u32, price: f64) -> Self {
        Self {
            order_type: Some(OrderType::Limit),
            session: Some(OrderSession::Normal),
            price: Some(price),
            stop_price: None,
            duration: Some(OrderDuration::GoodTillCancel),
            order_strategy_type: OrderStrategyType::Single,
            complex_order_strategy_type: Some("NONE".to_string()),
            order_leg_collection: vec![OrderLeg {
                instruction: OrderInstruction::BuyToOpen,
                quantity,
                instrument: Instrument::option(contract_symbol),
            }],
            child_order_strategies: None,
        }
    }

    /// One-cancels-other exit bracket: a take-profit limit sell and a
    /// stop-limit sell. The stop triggers at `stop_price` and limits at
    /// `stop_loss`, with the trigger above the limit so the stop executes.
    pub fn oco_bracket(
        contract_symbol: &str,
        quantity: u32,
        exit_premium: f64,
        stop_price: f64,
        stop_loss: f64,
    ) -> Self {
        let leg = |instruction| OrderLeg {
            instruction,
            quantity,
            instrument: Instrument::option(contract_symbol),
        };

        let take_profit = Self {
            order_type: Some(OrderType::Limit),
            session: Some(OrderSession::Normal),
            price: Some(exit_premium),
            stop_price: None,
            duration: Some(OrderDuration::GoodTillCancel),
            order_strategy_type: OrderStrategyType::Single,
            complex_order_strategy_type: None,
            order_leg_collection: vec![leg(OrderInstruction::SellToClose)],
            child_order_strategies: None,
        };

        let stop = Self {
            order_type: Some(OrderType::StopLimit),
            session: Some(OrderSession::Normal),
            price: Some(stop_loss),
            stop_price: Some(stop_price),
            duration: Some(OrderDuration::GoodTillCancel),
            order_strategy_type: OrderStrategyType::Single,
            complex_order_strategy_type: None,
            order_leg_collection: vec![leg(OrderInstruction::SellToClose)],
            child_order_strategies: None,
        };

        Self {
            order_type: None,
            session: None,
            price: None,
            stop_price: None,
            duration: None,
            order_strategy_type: OrderStrategyType::Oco,
            complex_order_strategy_type: None,
            order_leg_collection: Vec::new(),
            child_order_strategies: Some(vec![take_profit, stop]),
        }
    }
}

/// Submission acknowledgement
#[derive(Debug, Clone, Default)]
pub struct OrderAck {
    /// Broker-assigned order id when the response exposes one
    pub order_id: Option<String>,
}

/// An order as returned by the status query endpoint. OCO parents nest
/// their legs inside `child_order_strategies`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerOrder {
    pub order_id: Option<i64>,
    pub status: Option<OrderStatus>,
    pub order_type: Option<OrderType>,
    pub order_strategy_type: Option<OrderStrategyType>,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub quantity: Option<f64>,
    pub filled_quantity: Option<f64>,
    pub entered_time: Option<String>,
    pub close_time: Option<String>,
    pub order_leg_collection: Vec<OrderLeg>,
    pub child_order_strategies: Vec<BrokerOrder>,
}

impl BrokerOrder {
    /// This order plus all nested child strategies, depth-first
    pub fn flatten(&self) -> Vec<&BrokerOrder> {
        let mut out = vec![self];
        for child in &self.child_order_strategies {
            out.extend(child.flatten());
        }
        out
    }

    /// Whether any leg matches the given instruction and contract symbol
    pub fn has_leg(&self, instruction: OrderInstruction, contract_symbol: &str) -> bool {
        self.order_leg_collection
            .iter()
            .any(|leg| leg.instruction == instruction && leg.instrument.symbol == contract_symbol)
    }
}

/// Account cash snapshot
#[derive(Debug, Clone)]
pub struct CashBalance {
    /// Funds available for new positions
    pub available_cash: f64,
    /// Opaque account hash used for order routing
    pub account_hash: String,
    /// Human-readable account number, when exposed
    pub account_id: Option<String>,
}

/// Underlying quote snapshot, used to pick the at-the-money strike
#[derive(Debug, Clone)]
pub struct UnderlyingQuote {
    pub symbol: String,
    pub last_price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub total_volume: Option<f64>,
    /// Quote time in epoch milliseconds
    pub quote_time: Option<i64>,
}

/// One contract entry in the nested chain response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawContract {
    pub symbol: Option<String>,
    pub put_call: Option<String>,
    pub strike_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub open_interest: Option<f64>,
    pub total_volume: Option<f64>,
    /// Implied volatility in percentage points
    pub volatility: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub expiration_date: Option<String>,
}

/// Option chain response: expiration key -> strike key -> contracts.
/// BTreeMap keeps iteration order stable so scoring runs are reproducible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainResponse {
    pub symbol: String,
    pub status: Option<String>,
    pub underlying_price: Option<f64>,
    pub call_exp_date_map: BTreeMap<String, BTreeMap<String, Vec<RawContract>>>,
    pub put_exp_date_map: BTreeMap<String, BTreeMap<String, Vec<RawContract>>>,
}

//! Brokerage access layer
//!
//! Trait seams for the three concerns the engine needs from a broker:
//! - `AccountSource`: available cash and account routing hash
//! - `ChainSource`: underlying quotes and option chains
//! - `OrderBroker`: order submission and status queries
//!
//! `RestBroker` implements all three against the live REST API;
//! `PaperBroker` is an in-memory stand-in for dry runs and tests.

pub mod paper;
pub mod rest;
pub mod types;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

pub use paper::PaperBroker;
pub use rest::RestBroker;
pub use types::{
    BrokerOrder, CashBalance, ChainResponse, Instrument, OrderAck, OrderDuration, OrderInstruction,
    OrderLeg, OrderSession, OrderSpec, OrderStatus, OrderStrategyType, OrderType, RawContract,
    UnderlyingQuote,
};

/// Errors surfaced by broker implementations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broker rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

/// Source of account balance information
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Fetch the cash available for new positions along with the
    /// account hash used to route orders.
    async fn cash_balance(&self) -> Result<CashBalance, BrokerError>;
}

/// Source of quotes and option chains
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest quote for an underlying symbol.
    async fn quote(&self, symbol: &str) -> Result<UnderlyingQuote, BrokerError>;

    /// Option chain for `symbol` centered on `target_strike`, covering
    /// expirations from today through the configured window.
    async fn option_chain(
        &self,
        symbol: &str,
        target_strike: f64,
    ) -> Result<ChainResponse, BrokerError>;
}

/// Order entry and status polling
#[async_trait]
pub trait OrderBroker: Send + Sync {
    /// Submit an order for the given account.
    async fn submit_order(
        &self,
        account_hash: &str,
        spec: &OrderSpec,
    ) -> Result<OrderAck, BrokerError>;

    /// All orders entered for the account between the two dates, inclusive.
    async fn query_orders(
        &self,
        account_hash: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BrokerOrder>, BrokerError>;
}

/// Full brokerage surface
pub trait Broker: AccountSource + ChainSource + OrderBroker {}

impl<T: AccountSource + ChainSource + OrderBroker> Broker for T {}

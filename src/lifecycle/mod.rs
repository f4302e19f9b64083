//! Order lifecycle management
//!
//! One monitor per selected trade, run as its own async task:
//! - submit the limit buy-to-open entry
//! - poll the day's orders until the entry fills
//! - place one OCO exit bracket (take-profit limit + stop-limit)
//! - poll until an exit leg fills
//!
//! Every monitor enforces a poll deadline, a bounded consecutive
//! poll-error budget and a cooperative shutdown signal, so a stuck order
//! ends in `Failed` instead of an orphaned task.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::types::{BrokerOrder, OrderInstruction, OrderSpec};
use crate::broker::OrderBroker;
use crate::types::SelectedTrade;

/// Monitor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Entry order submitted, waiting for the fill
    PendingEntry,
    /// Entry filled, exit bracket not yet working
    EntryFilled,
    /// OCO exit bracket working on the book
    ExitPlaced,
    /// An exit leg filled, trade closed
    ExitFilled,
    /// Terminal failure: submission error, poll budget, deadline or shutdown
    Failed,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::PendingEntry => "PENDING_ENTRY",
            OrderState::EntryFilled => "ENTRY_FILLED",
            OrderState::ExitPlaced => "EXIT_PLACED",
            OrderState::ExitFilled => "EXIT_FILLED",
            OrderState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Monitor tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Delay between order status polls
    pub poll_interval: Duration,
    /// Hard deadline for the whole entry-to-exit round trip
    pub max_wait: Duration,
    /// Consecutive poll failures tolerated before giving up
    pub max_consecutive_poll_errors: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_wait: Duration::from_secs(2 * 60 * 60),
            max_consecutive_poll_errors: 10,
        }
    }
}

/// Outcome of one monitored trade
#[derive(Debug, Clone)]
pub struct MonitorResult {
    /// Engine-side id for log correlation
    pub trade_id: Uuid,
    pub symbol: String,
    pub contract_symbol: String,
    pub quantity: u32,
    pub final_state: OrderState,
    /// True only when the exit leg filled
    pub success: bool,
    pub premium: f64,
    pub exit_premium: f64,
    pub stop_loss: f64,
    pub total_cost: f64,
    pub total_profit: f64,
    pub total_loss: f64,
    /// Populated for failed monitors
    pub failure_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// What one poll of the day's orders says about a single contract
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct OrderBookView {
    entry_filled: bool,
    exit_working: bool,
    exit_filled: bool,
}

impl OrderBookView {
    /// Partition the order list for one contract symbol. OCO brackets
    /// nest their legs, so every order tree is walked fully.
    fn scan(orders: &[BrokerOrder], contract_symbol: &str) -> Self {
        let mut view = Self::default();
        for order in orders {
            for node in order.flatten() {
                let Some(status) = node.status else { continue };
                if status.is_filled() && node.has_leg(OrderInstruction::BuyToOpen, contract_symbol)
                {
                    view.entry_filled = true;
                }
                if node.has_leg(OrderInstruction::SellToClose, contract_symbol) {
                    if status.is_filled() {
                        view.exit_filled = true;
                    } else if status.is_working() {
                        view.exit_working = true;
                    }
                }
            }
        }
        view
    }
}

/// Drives one trade from entry submission to a terminal state
pub struct TradeMonitor {
    broker: Arc<dyn OrderBroker>,
    config: MonitorConfig,
    shutdown: watch::Receiver<bool>,
}

impl TradeMonitor {
    pub fn new(
        broker: Arc<dyn OrderBroker>,
        config: MonitorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            config,
            shutdown,
        }
    }

    /// Run the machine to completion. Never panics and never returns an
    /// error: every way out produces a `MonitorResult`, so a batch of
    /// concurrent monitors can partially succeed.
    pub async fn run(&self, account_hash: &str, trade: &SelectedTrade) -> MonitorResult {
        let trade_id = trade.trade_id;
        info!(
            %trade_id,
            symbol = %trade.symbol,
            contract = %trade.contract_symbol,
            quantity = trade.contracts_to_buy,
            premium = trade.premium_per_contract,
            "starting trade monitor"
        );

        let entry = OrderSpec::limit_entry(
            &trade.contract_symbol,
            trade.contracts_to_buy,
            trade.premium_per_contract,
        );
        if let Err(err) = self.broker.submit_order(account_hash, &entry).await {
            error!(%trade_id, symbol = %trade.symbol, error = %err, "entry submission failed");
            return self.failed(trade_id, trade, format!("entry submission failed: {err}"));
        }

        let mut state = OrderState::PendingEntry;
        let mut shutdown = self.shutdown.clone();
        let mut consecutive_errors = 0u32;
        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the entry has
        // one poll interval to reach the book.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        warn!(%trade_id, symbol = %trade.symbol, state = %state, "shutdown requested, abandoning monitor");
                        return self.failed(trade_id, trade, format!("cancelled by shutdown in state {state}"));
                    }
                    continue;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(%trade_id, symbol = %trade.symbol, state = %state, "monitor deadline exceeded");
                return self.failed(trade_id, trade, format!("deadline exceeded in state {state}"));
            }

            let today = Utc::now().date_naive();
            let orders = match self.broker.query_orders(account_hash, today, today).await {
                Ok(orders) => {
                    consecutive_errors = 0;
                    orders
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(
                        %trade_id,
                        error = %err,
                        consecutive = consecutive_errors,
                        "order status poll failed"
                    );
                    if consecutive_errors >= self.config.max_consecutive_poll_errors {
                        return self.failed(
                            trade_id,
                            trade,
                            format!("{consecutive_errors} consecutive poll errors, last: {err}"),
                        );
                    }
                    continue;
                }
            };

            let view = OrderBookView::scan(&orders, &trade.contract_symbol);
            debug!(%trade_id, state = %state, ?view, "poll complete");

            if state == OrderState::PendingEntry && view.entry_filled {
                info!(%trade_id, symbol = %trade.symbol, "entry filled");
                state = OrderState::EntryFilled;
            }

            if state == OrderState::EntryFilled {
                if view.exit_working || view.exit_filled {
                    debug!(%trade_id, "exit order already on the book");
                    state = OrderState::ExitPlaced;
                } else {
                    let bracket = OrderSpec::oco_bracket(
                        &trade.contract_symbol,
                        trade.contracts_to_buy,
                        trade.exit_premium,
                        trade.stop_price,
                        trade.stop_loss,
                    );
                    match self.broker.submit_order(account_hash, &bracket).await {
                        Ok(_) => {
                            info!(
                                %trade_id,
                                exit = trade.exit_premium,
                                stop = trade.stop_loss,
                                "exit bracket placed"
                            );
                            state = OrderState::ExitPlaced;
                        }
                        Err(err) => {
                            // Stay in EntryFilled; the next poll retries.
                            warn!(%trade_id, error = %err, "exit bracket submission failed");
                        }
                    }
                }
            }

            if state == OrderState::ExitPlaced && view.exit_filled {
                info!(%trade_id, symbol = %trade.symbol, "exit filled, trade closed");
                return MonitorResult {
                    trade_id,
                    symbol: trade.symbol.clone(),
                    contract_symbol: trade.contract_symbol.clone(),
                    quantity: trade.contracts_to_buy,
                    final_state: OrderState::ExitFilled,
                    success: true,
                    premium: trade.premium_per_contract,
                    exit_premium: trade.exit_premium,
                    stop_loss: trade.stop_loss,
                    total_cost: trade.total_cost,
                    total_profit: trade.total_profit,
                    total_loss: trade.total_loss,
                    failure_reason: None,
                    completed_at: Utc::now(),
                };
            }
        }
    }

    fn failed(&self, trade_id: Uuid, trade: &SelectedTrade, reason: String) -> MonitorResult {
        MonitorResult {
            trade_id,
            symbol: trade.symbol.clone(),
            contract_symbol: trade.contract_symbol.clone(),
            quantity: trade.contracts_to_buy,
            final_state: OrderState::Failed,
            success: false,
            premium: trade.premium_per_contract,
            exit_premium: trade.exit_premium,
            stop_loss: trade.stop_loss,
            total_cost: trade.total_cost,
            total_profit: 0.0,
            total_loss: 0.0,
            failure_reason: Some(reason),
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::{Instrument, OrderLeg, OrderStatus, OrderStrategyType};

    fn leg(instruction: OrderInstruction, symbol: &str) -> OrderLeg {
        OrderLeg {
            instruction,
            quantity: 1,
            instrument: Instrument::option(symbol),
        }
    }

    fn single(status: OrderStatus, instruction: OrderInstruction, symbol: &str) -> BrokerOrder {
        BrokerOrder {
            status: Some(status),
            order_strategy_type: Some(OrderStrategyType::Single),
            order_leg_collection: vec![leg(instruction, symbol)],
            ..Default::default()
        }
    }

    const CONTRACT: &str = "AAPL  250516C00190000";

    #[test]
    fn scan_sees_filled_entry() {
        let orders = vec![single(OrderStatus::Filled, OrderInstruction::BuyToOpen, CONTRACT)];
        let view = OrderBookView::scan(&orders, CONTRACT);
        assert!(view.entry_filled);
        assert!(!view.exit_working);
        assert!(!view.exit_filled);
    }

    #[test]
    fn scan_ignores_other_contracts() {
        let orders = vec![single(
            OrderStatus::Filled,
            OrderInstruction::BuyToOpen,
            "TSLA  250516C00250000",
        )];
        let view = OrderBookView::scan(&orders, CONTRACT);
        assert_eq!(view, OrderBookView::default());
    }

    #[test]
    fn scan_finds_working_exit_inside_oco() {
        let parent = BrokerOrder {
            status: Some(OrderStatus::Accepted),
            order_strategy_type: Some(OrderStrategyType::Oco),
            child_order_strategies: vec![
                single(OrderStatus::Working, OrderInstruction::SellToClose, CONTRACT),
                single(OrderStatus::Working, OrderInstruction::SellToClose, CONTRACT),
            ],
            ..Default::default()
        };
        let view = OrderBookView::scan(&[parent], CONTRACT);
        assert!(view.exit_working);
        assert!(!view.exit_filled);
    }

    #[test]
    fn scan_distinguishes_filled_exit_from_working() {
        let parent = BrokerOrder {
            status: Some(OrderStatus::Accepted),
            order_strategy_type: Some(OrderStrategyType::Oco),
            child_order_strategies: vec![
                single(OrderStatus::Filled, OrderInstruction::SellToClose, CONTRACT),
                single(OrderStatus::Canceled, OrderInstruction::SellToClose, CONTRACT),
            ],
            ..Default::default()
        };
        let view = OrderBookView::scan(&[parent], CONTRACT);
        assert!(view.exit_filled);
        assert!(!view.exit_working);
    }

    #[test]
    fn canceled_orders_count_as_neither_working_nor_filled() {
        let orders = vec![
            single(OrderStatus::Canceled, OrderInstruction::BuyToOpen, CONTRACT),
            single(OrderStatus::Expired, OrderInstruction::SellToClose, CONTRACT),
        ];
        let view = OrderBookView::scan(&orders, CONTRACT);
        assert_eq!(view, OrderBookView::default());
    }

    #[test]
    fn state_display_matches_wire_convention() {
        assert_eq!(OrderState::PendingEntry.to_string(), "PENDING_ENTRY");
        assert_eq!(OrderState::ExitFilled.to_string(), "EXIT_FILLED");
        assert_eq!(OrderState::Failed.to_string(), "FAILED");
    }
}

//! CSV Persistence Module
//!
//! Stores selected trades and their monitored outcomes as daily CSV
//! files for later analysis.

use anyhow::{Context, Result};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;

use crate::lifecycle::MonitorResult;
use crate::types::SelectedTrade;

/// Selected trade record for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub timestamp: i64,
    pub trade_id: String,
    pub symbol: String,
    pub contract_symbol: String,
    pub right: String,
    pub strike: f64,
    pub expiration: String,
    pub premium_per_contract: f64,
    pub score: f64,
    pub contracts_to_buy: u32,
    pub exit_premium: f64,
    pub stop_loss: f64,
    pub stop_price: f64,
    pub total_cost: f64,
    pub total_profit: f64,
    pub total_loss: f64,
}

/// Monitored outcome record for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub timestamp: i64,
    pub trade_id: String,
    pub symbol: String,
    pub contract_symbol: String,
    pub quantity: u32,
    pub final_state: String,
    pub success: bool,
    pub premium: f64,
    pub exit_premium: f64,
    pub stop_loss: f64,
    pub total_cost: f64,
    pub total_profit: f64,
    pub total_loss: f64,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Aggregate view over recent outcomes
#[derive(Debug, Clone)]
pub struct OutcomeSummary {
    pub total_trades: u64,
    pub bracketed_trades: u64,
    pub failed_trades: u64,
    pub success_rate: f64,
    pub total_committed: f64,
    pub projected_profit: f64,
}

/// CSV persistence manager
pub struct CsvPersistence {
    data_dir: PathBuf,
    selection_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    outcome_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
}

impl CsvPersistence {
    /// Create a new CSV persistence manager
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);

        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        fs::create_dir_all(data_dir.join("selections"))?;
        fs::create_dir_all(data_dir.join("outcomes"))?;

        let today = Utc::now().format("%Y-%m-%d");
        let selection_writer = Self::create_writer(
            &data_dir.join("selections"),
            &format!("selections_{}.csv", today),
        )?;
        let outcome_writer = Self::create_writer(
            &data_dir.join("outcomes"),
            &format!("outcomes_{}.csv", today),
        )?;

        Ok(Self {
            data_dir,
            selection_writer: Arc::new(AsyncRwLock::new(selection_writer)),
            outcome_writer: Arc::new(AsyncRwLock::new(outcome_writer)),
        })
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Save a selected trade
    pub async fn save_selection(&self, record: SelectionRecord) -> Result<()> {
        let mut writer = self.selection_writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write selection record")?;
        writer.flush().context("Failed to flush selection writer")?;
        Ok(())
    }

    /// Save a monitored outcome
    pub async fn save_outcome(&self, record: OutcomeRecord) -> Result<()> {
        let mut writer = self.outcome_writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write outcome record")?;
        writer.flush().context("Failed to flush outcome writer")?;
        Ok(())
    }

    /// Load selection history from CSV
    pub fn load_selection_history(&self, days: u32) -> Result<Vec<SelectionRecord>> {
        let mut records = Vec::new();

        for i in 0..days {
            let date = Utc::now() - chrono::Duration::days(i as i64);
            let filename = format!("selections_{}.csv", date.format("%Y-%m-%d"));
            let path = self.data_dir.join("selections").join(&filename);

            if path.exists() {
                let file = std::fs::File::open(&path).context("Failed to open selection file")?;
                let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

                for result in reader.deserialize() {
                    let record: SelectionRecord =
                        result.context("Failed to deserialize selection record")?;
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    /// Load outcome history from CSV
    pub fn load_outcome_history(&self, days: u32) -> Result<Vec<OutcomeRecord>> {
        let mut records = Vec::new();

        for i in 0..days {
            let date = Utc::now() - chrono::Duration::days(i as i64);
            let filename = format!("outcomes_{}.csv", date.format("%Y-%m-%d"));
            let path = self.data_dir.join("outcomes").join(&filename);

            if path.exists() {
                let file = std::fs::File::open(&path).context("Failed to open outcome file")?;
                let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

                for result in reader.deserialize() {
                    let record: OutcomeRecord =
                        result.context("Failed to deserialize outcome record")?;
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    /// Summarize recent outcomes
    pub fn summarize_outcomes(&self, days: u32) -> Result<OutcomeSummary> {
        let outcomes = self.load_outcome_history(days)?;

        let total_trades = outcomes.len() as u64;
        let bracketed_trades = outcomes.iter().filter(|o| o.success).count() as u64;
        let failed_trades = total_trades - bracketed_trades;

        let success_rate = if total_trades > 0 {
            bracketed_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let total_committed: f64 = outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.total_cost)
            .sum();
        let projected_profit: f64 = outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.total_profit)
            .sum();

        Ok(OutcomeSummary {
            total_trades,
            bracketed_trades,
            failed_trades,
            success_rate,
            total_committed,
            projected_profit,
        })
    }
}

/// Convert crate types to CSV record types
impl From<&SelectedTrade> for SelectionRecord {
    fn from(trade: &SelectedTrade) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            trade_id: trade.trade_id.to_string(),
            symbol: trade.symbol.clone(),
            contract_symbol: trade.contract_symbol.clone(),
            right: trade.right.to_string(),
            strike: trade.strike,
            expiration: trade.expiration.format("%Y-%m-%d").to_string(),
            premium_per_contract: trade.premium_per_contract,
            score: trade.score,
            contracts_to_buy: trade.contracts_to_buy,
            exit_premium: trade.exit_premium,
            stop_loss: trade.stop_loss,
            stop_price: trade.stop_price,
            total_cost: trade.total_cost,
            total_profit: trade.total_profit,
            total_loss: trade.total_loss,
        }
    }
}

impl From<&MonitorResult> for OutcomeRecord {
    fn from(result: &MonitorResult) -> Self {
        Self {
            timestamp: result.completed_at.timestamp(),
            trade_id: result.trade_id.to_string(),
            symbol: result.symbol.clone(),
            contract_symbol: result.contract_symbol.clone(),
            quantity: result.quantity,
            final_state: result.final_state.to_string(),
            success: result.success,
            premium: result.premium,
            exit_premium: result.exit_premium,
            stop_loss: result.stop_loss,
            total_cost: result.total_cost,
            total_profit: result.total_profit,
            total_loss: result.total_loss,
            failure_reason: result.failure_reason.clone(),
        }
    }
}

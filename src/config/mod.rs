//! Configuration management for OptBot
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub broker: BrokerConfig,
    pub monitor: MonitorCfg,
    pub schedule: ScheduleConfig,
    pub candidates: CandidatesConfig,
    pub notify: NotifyConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Version tag for logging and CSV
    pub tag: String,
    /// Minimum available cash required to run a cycle
    pub min_cash: f64,
    /// Fraction of available cash handed to the allocator each cycle
    pub budget_fraction: f64,
    /// Maximum candidate tickers analyzed per cycle
    pub max_candidates: usize,
    /// Maximum distinct trades per cycle
    pub max_distinct_trades: usize,
    /// Per-symbol spend ceiling as a fraction of available cash
    pub max_symbol_fraction: f64,
    /// Maximum contracts bought per trade
    pub max_contracts_per_trade: u32,
    /// Strikes requested around the money per chain
    pub strike_count: u32,
    /// Expiration window requested per chain, in days out
    pub dte_window_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker API endpoint
    pub base_url: String,
    /// Use the simulated broker instead of the live API
    pub paper: bool,
    /// Starting cash for the simulated broker
    pub paper_cash: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorCfg {
    /// Order poll interval in seconds
    pub poll_interval_secs: u64,
    /// Maximum wait for a bracket to complete, in seconds
    pub max_wait_secs: u64,
    /// Consecutive poll failures tolerated before giving up
    pub max_consecutive_poll_errors: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Gate cycles on the trading window (disable for dry runs)
    pub enabled: bool,
    /// Weekday names entries are allowed on, e.g. ["Tue", "Wed", "Thu"]
    pub trading_weekdays: Vec<String>,
    /// Entry window start hour (inclusive)
    pub entry_hour_start: u32,
    /// Entry window end hour (exclusive)
    pub entry_hour_end: u32,
    /// Calendar days of month to sit out
    pub skip_month_days: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidatesConfig {
    /// Candidate source: most_active, llm or static
    pub source: String,
    /// Most-active page URL
    pub most_active_url: String,
    /// Chat-completion endpoint for the llm source
    pub llm_endpoint: String,
    /// Model name for the llm source
    pub llm_model: String,
    /// Ticker list for the static source
    pub static_tickers: Vec<String>,
    /// Candidates taken per cycle
    pub top_n: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Webhook endpoint; log-only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Shared key for HMAC-signing webhook payloads
    #[serde(default)]
    pub sign_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Enable CSV logging
    pub csv_enabled: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Engine defaults
            .set_default("engine.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("engine.min_cash", 200.0)?
            .set_default("engine.budget_fraction", 0.8)?
            .set_default("engine.max_candidates", 20)?
            .set_default("engine.max_distinct_trades", 5)?
            .set_default("engine.max_symbol_fraction", 0.5)?
            .set_default("engine.max_contracts_per_trade", 10)?
            .set_default("engine.strike_count", 9)?
            .set_default("engine.dte_window_days", 14)?
            // Broker defaults
            .set_default("broker.base_url", "https://api.schwabapi.com")?
            .set_default("broker.paper", true)?
            .set_default("broker.paper_cash", 10000.0)?
            // Monitor defaults
            .set_default("monitor.poll_interval_secs", 15)?
            .set_default("monitor.max_wait_secs", 7200)?
            .set_default("monitor.max_consecutive_poll_errors", 10)?
            // Schedule defaults
            .set_default("schedule.enabled", true)?
            .set_default("schedule.trading_weekdays", vec!["Tue", "Wed", "Thu"])?
            .set_default("schedule.entry_hour_start", 9)?
            .set_default("schedule.entry_hour_end", 10)?
            .set_default(
                "schedule.skip_month_days",
                vec![1, 2, 3, 4, 5, 25, 26, 27, 28, 29, 30, 31],
            )?
            // Candidates defaults
            .set_default("candidates.source", "most_active")?
            .set_default(
                "candidates.most_active_url",
                "https://finance.yahoo.com/markets/stocks/most-active/",
            )?
            .set_default(
                "candidates.llm_endpoint",
                "https://api.openai.com/v1/chat/completions",
            )?
            .set_default("candidates.llm_model", "gpt-4o-mini")?
            .set_default("candidates.static_tickers", Vec::<String>::new())?
            .set_default("candidates.top_n", 20)?
            // Notify defaults
            .set_default("notify.webhook_url", None::<String>)?
            .set_default("notify.sign_key", None::<String>)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (OPTBOT_*)
            .add_source(Environment::with_prefix("OPTBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} paper={} source={} top_n={} min_cash={:.2} max_trades={}",
            self.engine.tag,
            self.broker.paper,
            self.candidates.source,
            self.candidates.top_n,
            self.engine.min_cash,
            self.engine.max_distinct_trades
        )
    }

    /// Validate required environment variables for live trading
    pub fn validate_env(&self) -> Result<()> {
        if self.broker.paper {
            return Ok(());
        }

        let required: [(&str, &[&str]); 3] = [
            ("app key", &["SCHWAB_APP_KEY", "BROKER_APP_KEY"]),
            ("app secret", &["SCHWAB_APP_SECRET", "BROKER_APP_SECRET"]),
            (
                "refresh token",
                &["SCHWAB_REFRESH_TOKEN", "BROKER_REFRESH_TOKEN"],
            ),
        ];

        for (label, vars) in required {
            let present = vars.iter().any(|var| {
                std::env::var(var)
                    .map(|v| !v.trim().is_empty())
                    .unwrap_or(false)
            });
            if !present {
                bail!(
                    "Live trading requires a broker {} (set one of {})",
                    label,
                    vars.join(", ")
                );
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

impl From<&MonitorCfg> for crate::lifecycle::MonitorConfig {
    fn from(cfg: &MonitorCfg) -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(cfg.poll_interval_secs.max(1)),
            max_wait: std::time::Duration::from_secs(cfg.max_wait_secs.max(1)),
            max_consecutive_poll_errors: cfg.max_consecutive_poll_errors.max(1),
        }
    }
}

impl From<&ScheduleConfig> for crate::schedule::TradingSchedule {
    fn from(cfg: &ScheduleConfig) -> Self {
        let mut weekdays: Vec<chrono::Weekday> = cfg
            .trading_weekdays
            .iter()
            .filter_map(|name| match name.trim().parse::<chrono::Weekday>() {
                Ok(day) => Some(day),
                Err(_) => {
                    tracing::warn!(weekday = %name, "Ignoring unrecognized trading weekday");
                    None
                }
            })
            .collect();
        if weekdays.is_empty() {
            weekdays = Self::default().trading_weekdays;
        }
        Self {
            trading_weekdays: weekdays,
            entry_hour_start: cfg.entry_hour_start,
            entry_hour_end: cfg.entry_hour_end,
            skip_month_days: cfg.skip_month_days.clone(),
        }
    }
}

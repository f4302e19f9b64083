//! Trading cycle orchestration
//!
//! One cycle: check cash, fetch candidate tickers, pull and score each
//! option chain concurrently, allocate the budget, then monitor every
//! selected trade to a terminal state. The long-running `run` loop gates
//! cycles on the trading schedule and sleeps between windows.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::allocation::{allocate, AllocationRequest};
use crate::broker::Broker;
use crate::candidates::CandidateSource;
use crate::chain;
use crate::config::AppConfig;
use crate::lifecycle::TradeMonitor;
use crate::notify::Notifier;
use crate::persistence::{CsvPersistence, OutcomeRecord, SelectionRecord};
use crate::schedule::TradingSchedule;
use crate::types::{CandidateTrade, MarketRegime};

/// What one trading cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub tickers_analyzed: usize,
    pub candidates_found: usize,
    pub trades_selected: usize,
    pub trades_completed: usize,
    pub skipped: Option<String>,
}

impl CycleReport {
    fn skipped(reason: &str) -> Self {
        Self {
            tickers_analyzed: 0,
            candidates_found: 0,
            trades_selected: 0,
            trades_completed: 0,
            skipped: Some(reason.to_string()),
        }
    }
}

/// Long-running trading agent
pub struct TradeAgent<B> {
    config: AppConfig,
    broker: Arc<B>,
    source: Arc<dyn CandidateSource>,
    notifier: Notifier,
    persistence: Option<Arc<CsvPersistence>>,
    schedule: TradingSchedule,
    shutdown: watch::Receiver<bool>,
}

impl<B: Broker + 'static> TradeAgent<B> {
    pub fn new(
        config: AppConfig,
        broker: Arc<B>,
        source: Arc<dyn CandidateSource>,
        notifier: Notifier,
        persistence: Option<Arc<CsvPersistence>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let schedule = TradingSchedule::from(&config.schedule);
        Self {
            config,
            broker,
            source,
            notifier,
            persistence,
            schedule,
            shutdown,
        }
    }

    /// Run cycles forever, gated on the trading window. With gating
    /// disabled, runs exactly one cycle and returns.
    pub async fn run(&self) -> Result<()> {
        info!(config = %self.config.digest(), "trade agent started");

        if !self.config.schedule.enabled {
            let report = self.run_cycle().await?;
            info!(
                selected = report.trades_selected,
                completed = report.trades_completed,
                "single cycle complete, schedule gating disabled"
            );
            return Ok(());
        }

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping agent");
                return Ok(());
            }

            let now = Local::now().naive_local();
            let check = self.schedule.check(now);
            if check.is_open() {
                match self.run_cycle().await {
                    Ok(report) => info!(
                        analyzed = report.tickers_analyzed,
                        selected = report.trades_selected,
                        completed = report.trades_completed,
                        skipped = report.skipped.as_deref().unwrap_or("no"),
                        "trading cycle complete"
                    ),
                    Err(err) => {
                        error!(error = %err, "trading cycle failed");
                        self.notifier
                            .error_alert("trading cycle", &format!("{err:#}"))
                            .await;
                    }
                }
            } else {
                info!(reason = check.reason(), "outside trading window");
            }

            let now = Local::now().naive_local();
            let next = self.schedule.next_window_start(now);
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));
            info!(next = %next, "sleeping until next trading window");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested during sleep, stopping agent");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Execute one full trading cycle
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let balance = self
            .broker
            .cash_balance()
            .await
            .context("Failed to fetch account balance")?;
        info!(
            available_cash = balance.available_cash,
            account = balance.account_id.as_deref().unwrap_or("unknown"),
            "cycle started"
        );

        if balance.available_cash < self.config.engine.min_cash {
            warn!(
                available = balance.available_cash,
                minimum = self.config.engine.min_cash,
                "available cash below minimum, skipping cycle"
            );
            self.notifier
                .low_cash_alert(balance.available_cash, self.config.engine.min_cash)
                .await;
            return Ok(CycleReport::skipped("available cash below minimum"));
        }

        let tickers = self
            .source
            .fetch_candidates()
            .await
            .context("Failed to fetch candidate tickers")?;
        let tickers: Vec<String> = tickers
            .into_iter()
            .take(self.config.engine.max_candidates)
            .collect();
        if tickers.is_empty() {
            warn!("no candidate tickers this cycle");
            return Ok(CycleReport::skipped("no candidate tickers"));
        }
        info!(count = tickers.len(), "analyzing candidate tickers");

        let today = Utc::now().date_naive();
        let analyses = join_all(
            tickers
                .iter()
                .map(|ticker| self.analyze_ticker(ticker, today)),
        )
        .await;

        let mut candidates = Vec::new();
        for (ticker, outcome) in tickers.iter().zip(analyses) {
            match outcome {
                Ok(Some(candidate)) => {
                    debug!(
                        ticker = %ticker,
                        score = candidate.score,
                        premium = candidate.premium(),
                        "candidate scored"
                    );
                    candidates.push(candidate);
                }
                Ok(None) => debug!(ticker = %ticker, "no scorable contracts"),
                Err(err) => warn!(ticker = %ticker, error = %err, "ticker analysis failed"),
            }
        }

        let tickers_analyzed = tickers.len();
        if candidates.is_empty() {
            info!("no tradable candidates after analysis");
            return Ok(CycleReport {
                tickers_analyzed,
                ..CycleReport::skipped("no tradable candidates")
            });
        }

        let regime = regime_from_candidates(&candidates);
        let candidates_found = candidates.len();
        let allocation_cash = balance.available_cash * self.config.engine.budget_fraction;
        info!(
            %regime,
            candidates = candidates_found,
            allocation_cash,
            "allocating budget"
        );

        let mut request = AllocationRequest::new(candidates, allocation_cash, regime);
        request.max_distinct_trades = self.config.engine.max_distinct_trades;
        request.max_symbol_fraction = self.config.engine.max_symbol_fraction;
        request.max_contracts_per_trade = self.config.engine.max_contracts_per_trade;
        let allocation = allocate(&request);

        if allocation.selected.is_empty() {
            info!("allocator selected no trades");
            return Ok(CycleReport {
                tickers_analyzed,
                candidates_found,
                ..CycleReport::skipped("allocator selected no trades")
            });
        }
        info!(
            selected = allocation.selected.len(),
            total_premium = allocation.total_premium_used,
            budget = allocation.budget,
            "trades selected"
        );

        for trade in &allocation.selected {
            if let Some(persistence) = &self.persistence {
                if let Err(err) = persistence.save_selection(SelectionRecord::from(trade)).await {
                    warn!(error = %err, "failed to persist selection");
                }
            }
            let fundamentals = match self.source.fetch_fundamentals(&trade.symbol).await {
                Ok(context) => context,
                Err(err) => {
                    warn!(symbol = %trade.symbol, error = %err, "failed to fetch fundamentals");
                    None
                }
            };
            self.notifier.trade_alert(trade, fundamentals.as_ref()).await;
        }

        let monitor = TradeMonitor::new(
            self.broker.clone(),
            (&self.config.monitor).into(),
            self.shutdown.clone(),
        );
        let results = join_all(
            allocation
                .selected
                .iter()
                .map(|trade| monitor.run(&balance.account_hash, trade)),
        )
        .await;

        let mut trades_completed = 0usize;
        for result in &results {
            if result.success {
                trades_completed += 1;
            } else if let Some(reason) = &result.failure_reason {
                self.notifier
                    .error_alert(
                        &format!("trade {} ({})", result.trade_id, result.symbol),
                        reason,
                    )
                    .await;
            }
            if let Some(persistence) = &self.persistence {
                if let Err(err) = persistence.save_outcome(OutcomeRecord::from(result)).await {
                    warn!(error = %err, "failed to persist outcome");
                }
            }
        }

        Ok(CycleReport {
            tickers_analyzed,
            candidates_found,
            trades_selected: allocation.selected.len(),
            trades_completed,
            skipped: None,
        })
    }

    /// Quote the underlying, pull its chain around the money and return
    /// the best-scoring contract, if any
    async fn analyze_ticker(&self, ticker: &str, today: NaiveDate) -> Result<Option<CandidateTrade>> {
        let quote = self
            .broker
            .quote(ticker)
            .await
            .with_context(|| format!("quote fetch failed for {ticker}"))?;
        if !quote.last_price.is_finite() || quote.last_price <= 0.0 {
            return Ok(None);
        }

        let target_strike = quote.last_price.round();
        let response = self
            .broker
            .option_chain(ticker, target_strike)
            .await
            .with_context(|| format!("chain fetch failed for {ticker}"))?;

        let aggregated = chain::aggregate(&response, today);
        Ok(aggregated
            .best()
            .map(|best| CandidateTrade::new(ticker, best.clone())))
    }
}

/// Regime from the mean IV across every candidate's expiration stats
fn regime_from_candidates(candidates: &[CandidateTrade]) -> MarketRegime {
    let means: Vec<f64> = candidates
        .iter()
        .map(|c| c.best.iv_stats.mean)
        .filter(|m| m.is_finite() && *m > 0.0)
        .collect();
    if means.is_empty() {
        return MarketRegime::Unknown;
    }
    let mean = means.iter().sum::<f64>() / means.len() as f64;
    MarketRegime::from_mean_iv(mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::candidates::StaticSource;
    use crate::types::{ExpirationIvStats, OptionContract, OptionRight, ScoreBreakdown, ScoredContract};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        inner: StaticSource,
        fundamentals_calls: AtomicUsize,
    }

    #[async_trait]
    impl CandidateSource for CountingSource {
        async fn fetch_candidates(&self) -> Result<Vec<String>> {
            self.inner.fetch_candidates().await
        }

        async fn fetch_fundamentals(&self, ticker: &str) -> Result<Option<serde_json::Value>> {
            self.fundamentals_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_fundamentals(ticker).await
        }
    }

    fn candidate_with_mean_iv(symbol: &str, mean: f64) -> CandidateTrade {
        let expiration = NaiveDate::from_ymd_opt(2025, 9, 19).unwrap();
        let contract = OptionContract {
            contract_symbol: format!("{symbol}  250919C00100000"),
            underlying: symbol.to_string(),
            right: OptionRight::Call,
            strike: 100.0,
            bid: Some(1.00),
            ask: Some(1.10),
            last: Some(1.05),
            open_interest: Some(500.0),
            volume: Some(100.0),
            implied_volatility: Some(mean),
            delta: Some(0.5),
            gamma: None,
            theta: Some(-0.05),
            vega: None,
            expiration,
        };
        CandidateTrade::new(
            symbol,
            ScoredContract {
                contract,
                score: 5.0,
                breakdown: ScoreBreakdown::default(),
                iv_stats: std::sync::Arc::new(ExpirationIvStats {
                    expiration,
                    min: mean,
                    max: mean,
                    mean,
                    std: 0.0,
                    count: 1,
                }),
            },
        )
    }

    fn test_agent(
        broker: PaperBroker,
        tickers: Vec<&str>,
    ) -> (TradeAgent<PaperBroker>, watch::Sender<bool>) {
        let mut config = AppConfig::load().unwrap();
        config.schedule.enabled = false;
        config.persistence.csv_enabled = false;
        let (tx, rx) = watch::channel(false);
        let agent = TradeAgent::new(
            config,
            Arc::new(broker),
            Arc::new(StaticSource::new(
                tickers.into_iter().map(String::from).collect(),
            )),
            Notifier::new(None, None),
            None,
            rx,
        );
        (agent, tx)
    }

    #[test]
    fn agent_schedule_comes_from_config() {
        let mut config = AppConfig::load().unwrap();
        config.schedule.trading_weekdays = vec!["Mon".into(), "Fri".into()];
        config.schedule.skip_month_days = vec![13];
        config.schedule.entry_hour_start = 7;
        let (_tx, rx) = watch::channel(false);
        let agent = TradeAgent::new(
            config,
            Arc::new(PaperBroker::new()),
            Arc::new(StaticSource::new(vec![])),
            Notifier::new(None, None),
            None,
            rx,
        );
        assert_eq!(
            agent.schedule.trading_weekdays,
            vec![chrono::Weekday::Mon, chrono::Weekday::Fri]
        );
        assert_eq!(agent.schedule.skip_month_days, vec![13]);
        assert_eq!(agent.schedule.entry_hour_start, 7);
    }

    #[test]
    fn regime_follows_mean_candidate_iv() {
        let calm = vec![
            candidate_with_mean_iv("AAPL", 15.0),
            candidate_with_mean_iv("MSFT", 18.0),
        ];
        assert_eq!(regime_from_candidates(&calm), MarketRegime::LowVolatility);

        let wild = vec![
            candidate_with_mean_iv("GME", 120.0),
            candidate_with_mean_iv("AMC", 90.0),
        ];
        assert_eq!(regime_from_candidates(&wild), MarketRegime::HighlyVolatile);

        assert_eq!(regime_from_candidates(&[]), MarketRegime::Unknown);
    }

    #[tokio::test]
    async fn low_cash_skips_the_cycle() {
        let (agent, _shutdown_tx) = test_agent(PaperBroker::new().with_cash(50.0), vec!["AAPL"]);
        let report = agent.run_cycle().await.unwrap();
        assert_eq!(report.trades_selected, 0);
        assert_eq!(
            report.skipped.as_deref(),
            Some("available cash below minimum")
        );
    }

    #[tokio::test]
    async fn empty_candidate_list_skips_the_cycle() {
        let (agent, _shutdown_tx) = test_agent(PaperBroker::new(), vec![]);
        let report = agent.run_cycle().await.unwrap();
        assert_eq!(report.skipped.as_deref(), Some("no candidate tickers"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_selects_and_completes_trades() {
        let broker = PaperBroker::new()
            .with_cash(10_000.0)
            .with_quote("AAPL", 230.0)
            .with_entry_fill_after(1)
            .with_exit_fill_after(Some(2));
        let (agent, _shutdown_tx) = test_agent(broker, vec!["AAPL"]);

        let report = agent.run_cycle().await.unwrap();
        assert!(report.skipped.is_none());
        assert_eq!(report.tickers_analyzed, 1);
        assert_eq!(report.candidates_found, 1);
        assert!(report.trades_selected >= 1);
        assert_eq!(report.trades_completed, report.trades_selected);
    }

    #[tokio::test(start_paused = true)]
    async fn fundamentals_are_fetched_for_each_selected_trade() {
        let broker = PaperBroker::new()
            .with_cash(10_000.0)
            .with_quote("AAPL", 230.0)
            .with_entry_fill_after(1)
            .with_exit_fill_after(Some(2));
        let source = Arc::new(CountingSource {
            inner: StaticSource::new(vec!["AAPL".to_string()]),
            fundamentals_calls: AtomicUsize::new(0),
        });

        let mut config = AppConfig::load().unwrap();
        config.schedule.enabled = false;
        config.persistence.csv_enabled = false;
        let (_tx, rx) = watch::channel(false);
        let agent = TradeAgent::new(
            config,
            Arc::new(broker),
            source.clone(),
            Notifier::new(None, None),
            None,
            rx,
        );

        let report = agent.run_cycle().await.unwrap();
        assert!(report.trades_selected >= 1);
        assert_eq!(
            source.fundamentals_calls.load(Ordering::SeqCst),
            report.trades_selected
        );
    }
}

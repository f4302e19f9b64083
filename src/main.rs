//! OptBot entrypoint
//!
//! Wires the configured broker, candidate source, notifier and
//! persistence into the trading agent and runs it until shutdown.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use optbot::agent::TradeAgent;
use optbot::broker::{Broker, PaperBroker, RestBroker};
use optbot::candidates::{self, CandidateSource};
use optbot::config::AppConfig;
use optbot::notify::Notifier;
use optbot::persistence::CsvPersistence;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "optbot=info".into()),
        )
        .init();

    let config = AppConfig::load()?;
    info!(config = %config.digest(), "configuration loaded");
    config.validate_env()?;

    let source = candidates::build_source(&config.candidates)?;
    let notifier = Notifier::from_config(&config.notify);
    let persistence = if config.persistence.csv_enabled {
        Some(Arc::new(CsvPersistence::new(&config.persistence.data_dir)?))
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if config.broker.paper {
        info!(
            cash = config.broker.paper_cash,
            "running with the paper broker"
        );
        let broker = Arc::new(
            PaperBroker::new()
                .with_cash(config.broker.paper_cash)
                .with_strike_count(config.engine.strike_count),
        );
        run(config, broker, source, notifier, persistence, shutdown_rx).await
    } else {
        let broker = Arc::new(
            RestBroker::new(&config.broker.base_url, None, None, None).with_chain_window(
                config.engine.strike_count,
                config.engine.dte_window_days as i64,
            ),
        );
        run(config, broker, source, notifier, persistence, shutdown_rx).await
    }
}

async fn run<B: Broker + 'static>(
    config: AppConfig,
    broker: Arc<B>,
    source: Arc<dyn CandidateSource>,
    notifier: Notifier,
    persistence: Option<Arc<CsvPersistence>>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let agent = TradeAgent::new(config, broker, source, notifier, persistence, shutdown);
    agent.run().await
}

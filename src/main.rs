// src/main.rs
use crate::config::AppConfig;
use crate::connectors::bithumb::BithumbClient;
use crate::connectors::bithumb_ws::BithumbWsCollector;
use crate::core::engine::TradingEngine;
use crate::core::portfolio::PortfolioState;
use crate::core::risk::RiskController;
use crate::runtime::orchestrator::TradingOrchestrator;
use crate::services::journal::CycleJournal;
use crate::services::notifier::SlackNotifier;
use crate::strategies::momentum_breakout::MomentumBreakoutStrategy;
use anyhow::Context;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod config;
mod connectors;
mod core;
mod runtime;
mod services;
mod strategies;
mod types;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let file_appender = tracing_appender::rolling::daily("logs", "beombong.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    // Fail fast on a bad configuration before anything touches the exchange.
    let app_config = AppConfig::load().context("configuration is invalid")?;
    let timezone = app_config.parse_timezone()?;
    let report_time = app_config.parse_daily_report_time()?;
    let exchange_config = app_config.exchange();
    let live = exchange_config.api_key.is_some() && exchange_config.api_secret.is_some();

    println!("========================================");
    println!("        BEOMBONG TRADING BOT");
    println!("========================================");
    println!("Market:   {}", app_config.market);
    println!("Interval: {}s", app_config.trading_interval_secs);
    println!(
        "Mode:     {}",
        if live { "LIVE TRADING" } else { "NO API KEYS (cycles will fail on private calls)" }
    );
    println!("========================================");

    let client = Arc::new(BithumbClient::new(&exchange_config)?);
    let strategy = MomentumBreakoutStrategy::new(app_config.strategy.clone())?;
    let risk = RiskController::new(app_config.risk.clone(), timezone);
    let engine = TradingEngine::new(
        client,
        Box::new(strategy),
        PortfolioState::new(),
        risk,
        &app_config.market,
        &app_config.candle_interval,
        app_config.candle_count,
        app_config.risk.clone(),
    )?;

    let journal = CycleJournal::new(app_config.journal_path.as_ref().map(PathBuf::from));
    let notifier = SlackNotifier::new(app_config.slack_webhook_url.clone())?;
    let orchestrator = Arc::new(TradingOrchestrator::new(
        engine,
        journal,
        notifier,
        timezone,
        Duration::from_secs(app_config.trading_interval_secs),
        report_time,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if app_config.websocket_enabled {
        let (ticker_tx, mut ticker_rx) = mpsc::channel(100);
        let collector =
            BithumbWsCollector::new(&exchange_config.ws_url, vec![app_config.market.clone()])?;
        let _collector = collector.spawn(ticker_tx, shutdown_rx.clone());
        tokio::spawn(async move {
            while let Some(snapshot) = ticker_rx.recv().await {
                debug!(
                    market = %snapshot.market,
                    price = %snapshot.price,
                    change_24h = %snapshot.change_rate_24h,
                    "ticker"
                );
            }
        });
    }

    let runner = tokio::spawn(Arc::clone(&orchestrator).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    runner.await?;

    let status = orchestrator.status().await;
    info!(
        halted = status.risk.halted,
        realized_pnl = %status.risk.realized_pnl,
        "final risk state"
    );
    Ok(())
}

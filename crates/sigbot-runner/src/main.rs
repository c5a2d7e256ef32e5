//! # sigbot-runner
//!
//! Entry point of the signal trading bot.
//!
//! Loads a JSON configuration file, builds the exchange backend (simulated in
//! dry-run, Binance futures otherwise), starts the notification router, the
//! order monitor and the signal pipeline, and feeds the pipeline with
//! JSON-lines messages from a file or stdin.
//!
//! # Usage
//!
//! ```bash
//! sigbot-runner config.json --log-level info --input messages.jsonl
//! ```

mod config;
mod feed;
mod source;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use sigbot_exec::book::PositionBook;
use sigbot_exec::monitor::OrderMonitor;
use sigbot_exec::notify::{
    LogNotifier, NotificationRouter, Notifier, TelegramNotifier, notification_channel,
};
use sigbot_exec::pipeline::SignalPipeline;
use sigbot_exec::status::StatusBoard;
use sigbot_td::Exchange;
use sigbot_td::binance::BinanceFutures;
use sigbot_td::sim::SimulatedExchange;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::RunnerConfig;

/// Signal trading bot runner.
#[derive(Parser)]
#[command(name = "sigbot-runner", about = "Channel signal trading bot")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Force the simulated exchange regardless of the config.
    #[arg(long)]
    dry_run: bool,

    /// JSON-lines message file (default: stdin).
    #[arg(long)]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let mut config = RunnerConfig::load(&cli.config)?;
    if cli.dry_run {
        config.app.trading.dry_run = true;
    }

    // 2. Initialize logging
    let module_name = config.app.log.module_name.clone().unwrap_or_else(|| "sigbot-runner".into());
    let log_dir = cli.log_dir.clone().or_else(|| config.app.log.log_path.clone());
    sigbot_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name);

    let trading = config.app.trading.clone();
    info!(
        "sigbot-runner starting: config={}, mode={}, leverage={}x default, fraction={}",
        cli.config.display(),
        if trading.dry_run { "dry-run" } else { "live" },
        trading.default_leverage,
        trading.position_fraction,
    );

    // 3. Exchange backend
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let book = Arc::new(PositionBook::new());
    let mut background = Vec::new();

    let exchange: Arc<dyn Exchange> = if trading.dry_run {
        // Public mark prices: market entries are sized from them on first use.
        let prices: Arc<dyn Exchange> = Arc::new(BinanceFutures::new(config.binance.clone()));
        let sim = Arc::new(
            SimulatedExchange::new(config.simulator.clone()).with_price_source(Arc::clone(&prices)),
        );
        if config.dry_run_mark_feed {
            background.push(tokio::spawn(feed::run_mark_feed(
                Arc::clone(&sim),
                prices,
                Arc::clone(&book),
                trading.scan_interval(),
                shutdown_rx.clone(),
            )));
        }
        info!("simulated exchange with balance {}", config.simulator.balance);
        sim
    } else {
        if !config.binance.has_credentials() {
            bail!("live mode needs BINANCE_API_KEY and BINANCE_API_SECRET");
        }
        Arc::new(BinanceFutures::new(config.binance.clone()))
    };

    // 4. Notifications and status
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let Some(telegram) = &config.app.telegram {
        notifiers.push(Arc::new(TelegramNotifier::new(
            telegram.bot_token.clone(),
            telegram.chat_id.clone(),
        )));
        info!("telegram notifications enabled for chat {}", telegram.chat_id);
    }
    let (events_tx, events_rx) = notification_channel();
    let router = tokio::spawn(NotificationRouter::new(notifiers).run(events_rx));

    let status_path = config.app.status_path.as_ref().map(PathBuf::from);
    let status = Arc::new(StatusBoard::new(trading.dry_run, status_path));

    // 5. Monitor and pipeline
    let monitor = OrderMonitor::new(
        Arc::clone(&exchange),
        Arc::clone(&book),
        trading.clone(),
        events_tx.clone(),
    )
    .with_status(Arc::clone(&status));
    let monitor_task = tokio::spawn(monitor.run(shutdown_rx.clone()));

    let pipeline = SignalPipeline::new(
        trading.clone(),
        exchange,
        Arc::clone(&book),
        events_tx,
        shutdown_rx.clone(),
    )?
    .with_status(Arc::clone(&status));
    let (messages_tx, messages_rx) = mpsc::channel(256);
    let pipeline_task = tokio::spawn(pipeline.run(messages_rx, shutdown_rx));

    // 6. Message source
    let source_task = match cli.input.clone() {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            info!("reading messages from {}", path.display());
            tokio::spawn(source::pump(BufReader::new(file), messages_tx))
        }
        None => {
            info!("reading messages from stdin");
            tokio::spawn(source::pump(BufReader::new(tokio::io::stdin()), messages_tx))
        }
    };

    info!("running, press Ctrl+C to stop");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    if shutdown_tx.send(true).is_err() {
        warn!("no task listening for shutdown");
    }
    source_task.abort();

    // 8. Let in-flight work finish
    if let Err(e) = pipeline_task.await {
        error!("pipeline task failed: {e}");
    }
    if let Err(e) = monitor_task.await {
        error!("monitor task failed: {e}");
    }
    for task in background {
        if let Err(e) = task.await {
            error!("background task failed: {e}");
        }
    }
    if let Err(e) = router.await {
        error!("notification router failed: {e}");
    }

    let open = book.len().await;
    if open > 0 {
        warn!("{open} position(s) still open on exit; take-profit orders stay on the exchange");
    }
    info!("sigbot-runner stopped");
    Ok(())
}

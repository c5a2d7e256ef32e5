//! Dry-run mark price feed.
//!
//! Reads mark prices of tracked symbols from the public futures API and
//! pushes them into the simulator, which fills resting take-profits they
//! cross.

use std::sync::Arc;
use std::time::Duration;

use sigbot_exec::book::PositionBook;
use sigbot_td::Exchange;
use sigbot_td::sim::SimulatedExchange;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub async fn run_mark_feed(
    sim: Arc<SimulatedExchange>,
    prices: Arc<dyn Exchange>,
    book: Arc<PositionBook>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("[feed] mark prices from {} every {interval:?}", prices.name());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let mut symbols: Vec<String> =
            book.entries().await.into_iter().map(|(key, _)| key.symbol).collect();
        symbols.dedup();
        for symbol in symbols {
            match prices.mark_price(&symbol).await {
                Ok(mark) => {
                    let filled = sim.set_mark_price(&symbol, mark).await;
                    if filled > 0 {
                        info!("[feed] {symbol} mark {mark} filled {filled} simulated order(s)");
                    } else {
                        debug!("[feed] {symbol} mark {mark}");
                    }
                }
                Err(e) => warn!("[feed] {symbol} mark price unavailable: {e}"),
            }
        }
    }
    info!("[feed] stopped");
}

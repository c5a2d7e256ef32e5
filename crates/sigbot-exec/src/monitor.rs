//! Periodic take-profit scan.
//!
//! Every `scan_interval` the monitor walks the [`PositionBook`] and polls each
//! live take-profit order. A fill reduces the position's remaining quantity
//! and, the first time a target is seen filled, emits one
//! [`Notification::Achievement`]. Positions with nothing left are removed.
//!
//! Positions are scanned concurrently; each one is processed under its own
//! lock. A position that is busy (locked by another task) is skipped and
//! picked up on the next pass. A failed order query is logged and retried on
//! the next pass; it never marks a target filled.
//!
//! With `mark_price_fallback` enabled, pending targets whose price the mark
//! price has crossed are announced even while their order rests. When the
//! account snapshot no longer shows a tracked symbol, the position is treated
//! as closed outside the bot.
//!
//! An entry the engine could not confirm canceled is retried here: each pass
//! cancels it again until the order is final. A filled part gets its
//! take-profit ladder and becomes a normal position; an order that ended
//! empty is dropped.

use std::sync::Arc;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use sigbot_core::config::TradingConfig;
use sigbot_core::error::ExecutionFailure;
use sigbot_core::{
    AccountSnapshot, Achievement, CloseReason, Notification, OrderHandle, OrderState, OrderStatus,
    PendingEntry, Position, PositionKey, TargetUpdate,
};
use sigbot_td::Exchange;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::book::{PositionBook, SharedPosition};
use crate::bounded;
use crate::engine::{filled_terms, place_take_profits};
use crate::notify::NotificationSender;
use crate::status::StatusBoard;

/// Counters of one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Positions processed (busy ones excluded).
    pub scanned: usize,
    pub achievements: usize,
    /// Positions removed from the book.
    pub closed: usize,
    pub query_failures: usize,
}

impl ScanReport {
    fn absorb(&mut self, other: PositionScan) {
        if other.skipped {
            return;
        }
        self.scanned += 1;
        self.achievements += other.achievements;
        self.query_failures += other.query_failures;
        if other.closed {
            self.closed += 1;
        }
    }
}

#[derive(Default)]
struct PositionScan {
    skipped: bool,
    achievements: usize,
    query_failures: usize,
    closed: bool,
}

enum PendingScan {
    Kept,
    Dropped,
    Unreadable,
}

enum EntrySettlement {
    Live,
    Unknown,
    Filled(OrderState),
    Empty(OrderStatus),
}

impl EntrySettlement {
    fn of(state: OrderState) -> Self {
        if !state.status.is_final() {
            Self::Live
        } else if state.filled_quantity > Decimal::ZERO {
            Self::Filled(state)
        } else {
            Self::Empty(state.status)
        }
    }
}

pub struct OrderMonitor {
    exchange: Arc<dyn Exchange>,
    book: Arc<PositionBook>,
    config: TradingConfig,
    events: NotificationSender,
    status: Option<Arc<StatusBoard>>,
}

impl OrderMonitor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        book: Arc<PositionBook>,
        config: TradingConfig,
        events: NotificationSender,
    ) -> Self {
        Self {
            exchange,
            book,
            config,
            events,
            status: None,
        }
    }

    pub fn with_status(mut self, status: Arc<StatusBoard>) -> Self {
        self.status = Some(status);
        self
    }

    /// Scan every tracked position once.
    pub async fn scan_once(&self) -> ScanReport {
        let entries = self.book.entries().await;
        if entries.is_empty() {
            return ScanReport::default();
        }

        let timeout = self.config.query_timeout();
        let snapshot = match bounded(timeout, self.exchange.account_snapshot()).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("[monitor] account snapshot failed, external-close check skipped: {e}");
                None
            }
        };

        let scans = join_all(
            entries
                .iter()
                .map(|(key, position)| self.scan_position(key, position, snapshot.as_ref())),
        )
        .await;

        let mut report = ScanReport::default();
        for scan in scans {
            report.absorb(scan);
        }
        if report.closed > 0 {
            if let Some(status) = &self.status {
                status.set_open_positions(self.book.len().await).await;
            }
        }
        debug!("[monitor] scan done: {report:?}");
        report
    }

    async fn scan_position(
        &self,
        key: &PositionKey,
        shared: &SharedPosition,
        snapshot: Option<&AccountSnapshot>,
    ) -> PositionScan {
        let Ok(mut position) = shared.try_lock() else {
            debug!("[monitor] {key} busy, skipped this pass");
            return PositionScan {
                skipped: true,
                ..PositionScan::default()
            };
        };

        if let Some(pending) = position.pending_entry().cloned() {
            let outcome = self.settle_pending(key, &mut position, pending).await;
            let mut scan = PositionScan::default();
            match outcome {
                PendingScan::Kept => {}
                PendingScan::Unreadable => scan.query_failures += 1,
                PendingScan::Dropped => {
                    drop(position);
                    self.book.remove(key).await;
                    scan.closed = true;
                }
            }
            return scan;
        }

        let mut scan = PositionScan::default();
        let mut achieved: Vec<Achievement> = Vec::new();
        let timeout = self.config.query_timeout();

        for (index, handle) in position.open_orders() {
            let state = match bounded(timeout, self.exchange.order_status(&handle)).await {
                Ok(state) => state,
                Err(e) => {
                    warn!("[monitor] {key} TP{index} {handle} query failed, retry next scan: {e}");
                    scan.query_failures += 1;
                    continue;
                }
            };
            match position.apply_order_state(index, &state) {
                TargetUpdate::Filled(Some(achievement)) => achieved.push(achievement),
                TargetUpdate::Filled(None) => {
                    debug!("[monitor] {key} TP{index} filled, already announced")
                }
                TargetUpdate::PartiallyFilled { filled } => {
                    debug!("[monitor] {key} TP{index} partially filled: {filled}")
                }
                TargetUpdate::Detached(status) => {
                    warn!("[monitor] {key} TP{index} {handle} ended {status:?}, no longer polled")
                }
                TargetUpdate::Pending => {}
            }
        }

        let unannounced = !position.is_closed() && !position.pending_targets().is_empty();
        if self.config.mark_price_fallback && unannounced {
            match bounded(timeout, self.exchange.mark_price(&key.symbol)).await {
                Ok(mark) => achieved.extend(position.apply_mark_price(mark)),
                Err(e) => {
                    warn!("[monitor] {key} mark price query failed: {e}");
                    scan.query_failures += 1;
                }
            }
        }

        for achievement in achieved {
            info!(
                "[monitor] {key} target {} reached @ {} ({:?}): {}%",
                achievement.target_index,
                achievement.target_price,
                achievement.source,
                achievement.profit_percent
            );
            if let Some(status) = &self.status {
                status
                    .record_take_profit(format!(
                        "{} TP{} @ {} ({}%)",
                        achievement.symbol,
                        achievement.target_index,
                        achievement.target_price.normalize(),
                        achievement.profit_percent.normalize()
                    ))
                    .await;
            }
            self.emit(Notification::Achievement(achievement));
            scan.achievements += 1;
        }

        if position.is_closed() {
            info!("[monitor] {key} fully exited, no longer tracked");
            let symbol = position.symbol().clone();
            drop(position);
            self.book.remove(key).await;
            self.emit(Notification::PositionClosed {
                symbol,
                reason: CloseReason::TargetsFilled,
            });
            scan.closed = true;
            return scan;
        }

        // Only trust the snapshot when every order query of this pass worked.
        let externally_closed =
            scan.query_failures == 0 && snapshot.is_some_and(|s| s.position(&key.symbol).is_none());
        if externally_closed {
            let leftovers = position.close_externally();
            warn!(
                "[monitor] {key} no longer held on the exchange; canceling {} leftover order(s)",
                leftovers.len()
            );
            for (index, handle) in leftovers {
                if let Err(e) = bounded(timeout, self.exchange.cancel_order(&handle)).await {
                    debug!("[monitor] {key} cancel of TP{index} {handle} failed: {e}");
                }
            }
            let symbol = position.symbol().clone();
            drop(position);
            self.book.remove(key).await;
            self.emit(Notification::PositionClosed {
                symbol,
                reason: CloseReason::External,
            });
            scan.closed = true;
        }
        scan
    }

    /// Drive an unsettled entry toward a final state.
    async fn settle_pending(
        &self,
        key: &PositionKey,
        position: &mut Position,
        pending: PendingEntry,
    ) -> PendingScan {
        let settlement = match self.poll_entry(&pending.order).await {
            EntrySettlement::Live => {
                self.cancel_entry(key, &pending.order).await;
                self.poll_entry(&pending.order).await
            }
            settled => settled,
        };

        match settlement {
            EntrySettlement::Live => {
                warn!(
                    "[monitor] {key} entry {} still live, cancel retried next scan",
                    pending.order
                );
                PendingScan::Kept
            }
            EntrySettlement::Unknown => PendingScan::Unreadable,
            EntrySettlement::Empty(ended) => {
                position.abandon_entry();
                warn!(
                    "[monitor] {key} entry {} ended {ended:?} without fill, dropped",
                    pending.order
                );
                let failure = ExecutionFailure::EntryTimeout;
                if let Some(status) = &self.status {
                    status.record_error(format!("{}: {failure}", pending.plan.symbol)).await;
                }
                if self.config.notify_failures {
                    self.emit(Notification::ExecutionFailed {
                        symbol: pending.plan.symbol.clone(),
                        reason: failure.to_string(),
                    });
                }
                PendingScan::Dropped
            }
            EntrySettlement::Filled(state) => {
                self.open_settled(key, position, &pending, &state).await;
                PendingScan::Kept
            }
        }
    }

    async fn poll_entry(&self, order: &OrderHandle) -> EntrySettlement {
        match bounded(self.config.query_timeout(), self.exchange.order_status(order)).await {
            Ok(state) => EntrySettlement::of(state),
            Err(e) => {
                warn!("[monitor] entry {order} query failed, retry next scan: {e}");
                EntrySettlement::Unknown
            }
        }
    }

    async fn cancel_entry(&self, key: &PositionKey, order: &OrderHandle) {
        let timeout = self.config.query_timeout();
        if let Err(e) = bounded(timeout, self.exchange.cancel_order(order)).await {
            warn!("[monitor] {key} cancel of entry {order} failed: {e}");
        }
    }

    async fn open_settled(
        &self,
        key: &PositionKey,
        position: &mut Position,
        pending: &PendingEntry,
        state: &OrderState,
    ) {
        let plan = &pending.plan;
        let (quantity, fill_price, ladder) = filled_terms(plan, &pending.rules, state);
        let (orders, failed_targets) = place_take_profits(
            self.exchange.as_ref(),
            &key.symbol,
            plan.direction,
            &ladder,
            self.config.query_timeout(),
        )
        .await;
        position.settle_entry(fill_price, quantity, ladder, orders);
        info!("[monitor] {key} late entry settled: qty={quantity} @ {fill_price}");

        self.emit(Notification::PositionOpened {
            symbol: plan.symbol.clone(),
            direction: plan.direction,
            entry_price: fill_price,
            quantity,
            leverage: plan.leverage,
        });
        if !failed_targets.is_empty() {
            warn!("[monitor] {key} opened without exits for targets {failed_targets:?}");
            self.emit(Notification::PartialExecution {
                symbol: plan.symbol.clone(),
                failed_targets,
            });
        }
        if let Some(status) = &self.status {
            status
                .record_trade(format!(
                    "{} {} qty {} @ {} ({}x)",
                    plan.direction,
                    plan.symbol,
                    quantity.normalize(),
                    fill_price.normalize(),
                    plan.leverage
                ))
                .await;
        }
    }

    fn emit(&self, notification: Notification) {
        if self.events.send(notification).is_err() {
            debug!("[monitor] notification channel closed");
        }
    }

    /// Scan on a fixed interval until shutdown. A pass in progress completes
    /// before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[monitor] started, interval {:?}", self.config.scan_interval());

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("[monitor] stopped");
    }
}

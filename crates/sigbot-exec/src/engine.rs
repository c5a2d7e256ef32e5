//! Order plan execution.
//!
//! [`ExecutionEngine::execute`] drives one [`OrderPlan`] through the exchange:
//!
//! ```text
//! set_leverage ──✗──► Failed(leverage-rejected)          nothing placed
//!      │
//! place entry ──✗──► Failed(entry-rejected)              nothing placed
//!      │
//! poll fill ──timeout/shutdown──► cancel (retried)
//!      │                              ├─ final, no fill ──► Failed(entry-timeout | entry-aborted)
//!      │                              ├─ live or unknown ──► EntryUnsettled (monitor settles it)
//!      │                              └─ final, part filled
//!      ▼                                     │
//! place reduce-only take-profits ◄───────────┘ (ladder rebuilt for a partial fill)
//!      │
//! register Position in the book ──► Success | PartialSuccess(failed targets)
//! ```
//!
//! Every entry order that may still fill is registered in the [`PositionBook`]
//! before the result is returned, so no entry goes untracked. The engine is
//! the only component that creates positions.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use sigbot_core::config::TradingConfig;
use sigbot_core::error::ExecutionFailure;
use sigbot_core::time_util::now_ms;
use sigbot_core::{
    Direction, EntryOrder, InstrumentRules, LadderRung, OrderHandle, OrderPlan, OrderRequest,
    OrderState, OrderStatus, OrderType, PendingEntry, Position, PositionKey,
};
use sigbot_td::Exchange;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::book::PositionBook;
use crate::bounded;
use crate::sizer::rescale_ladder;

/// Cancel attempts before an entry is handed to the monitor.
const CANCEL_ATTEMPTS: u32 = 3;

/// A position the engine opened and registered.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedPosition {
    pub key: PositionKey,
    pub entry: OrderHandle,
    pub fill_price: Decimal,
    /// Filled entry quantity (may be below the planned quantity).
    pub quantity: Decimal,
    pub take_profit_orders: BTreeMap<usize, OrderHandle>,
}

/// Outcome of executing one order plan.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Entry filled and every take-profit order was placed.
    Success(OpenedPosition),
    /// Entry filled but some take-profit orders could not be placed. The
    /// position is tracked regardless.
    PartialSuccess {
        opened: OpenedPosition,
        failed_targets: Vec<usize>,
    },
    /// The entry could not be confirmed canceled. It is tracked as a
    /// position awaiting entry until the monitor sees a final state.
    EntryUnsettled { key: PositionKey, entry: OrderHandle },
    /// No position was opened.
    Failed(ExecutionFailure),
}

impl ExecutionResult {
    pub fn opened(&self) -> Option<&OpenedPosition> {
        match self {
            Self::Success(opened) | Self::PartialSuccess { opened, .. } => Some(opened),
            Self::EntryUnsettled { .. } | Self::Failed(_) => None,
        }
    }
}

enum EntryOutcome {
    Filled(OrderState),
    /// The exchange ended the order before it fully filled.
    Ended(OrderState),
    TimedOut,
    Aborted,
}

pub struct ExecutionEngine {
    exchange: Arc<dyn Exchange>,
    book: Arc<PositionBook>,
    config: TradingConfig,
    shutdown: watch::Receiver<bool>,
}

impl ExecutionEngine {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        book: Arc<PositionBook>,
        config: TradingConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            exchange,
            book,
            config,
            shutdown,
        }
    }

    /// Execute a plan. Never panics and never returns with a filled entry
    /// left untracked.
    pub async fn execute(&self, plan: &OrderPlan, rules: &InstrumentRules) -> ExecutionResult {
        let symbol = plan.symbol.exchange();
        let timeout = self.config.query_timeout();

        let leverage = self.exchange.set_leverage(&symbol, plan.leverage, plan.margin_mode);
        if let Err(e) = bounded(timeout, leverage).await {
            warn!(
                "[engine] {symbol} leverage {}x {} rejected: {e}",
                plan.leverage, plan.margin_mode
            );
            return ExecutionResult::Failed(ExecutionFailure::Leverage(e));
        }

        let request = entry_request(plan);
        let entry = match bounded(timeout, self.exchange.place_order(&request)).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[engine] {symbol} entry rejected: {e}");
                return ExecutionResult::Failed(ExecutionFailure::EntryRejected(e));
            }
        };
        info!(
            "[engine] {symbol} {} entry {entry} placed: {:?} qty={}",
            plan.direction, plan.entry, plan.quantity
        );

        let filled = match self.await_fill(&entry).await {
            EntryOutcome::Filled(state) => state,
            EntryOutcome::Ended(state) if state.filled_quantity > Decimal::ZERO => state,
            EntryOutcome::Ended(state) => {
                warn!("[engine] {symbol} entry {entry} ended {:?} without fill", state.status);
                return ExecutionResult::Failed(ExecutionFailure::EntryNotFilled(state.status));
            }
            EntryOutcome::TimedOut => {
                let failure = ExecutionFailure::EntryTimeout;
                match self.settle_unfilled(plan, rules, entry.clone(), failure).await {
                    Ok(state) => state,
                    Err(result) => return result,
                }
            }
            EntryOutcome::Aborted => {
                let failure = ExecutionFailure::EntryAborted;
                match self.settle_unfilled(plan, rules, entry.clone(), failure).await {
                    Ok(state) => state,
                    Err(result) => return result,
                }
            }
        };

        self.open_position(plan, rules, &entry, &filled).await
    }

    /// Poll the entry until it fills, ends, times out or shutdown is signaled.
    async fn await_fill(&self, entry: &OrderHandle) -> EntryOutcome {
        let deadline = Instant::now() + self.config.entry_fill_timeout();
        let mut shutdown = self.shutdown.clone();

        loop {
            match bounded(self.config.query_timeout(), self.exchange.order_status(entry)).await {
                Ok(state) if state.status == OrderStatus::Filled => {
                    return EntryOutcome::Filled(state);
                }
                Ok(state) if state.status.is_final() => return EntryOutcome::Ended(state),
                Ok(state) => debug!(
                    "[engine] entry {entry} {:?} filled={}",
                    state.status, state.filled_quantity
                ),
                Err(e) => warn!("[engine] status query for entry {entry} failed: {e}"),
            }

            if *shutdown.borrow() {
                return EntryOutcome::Aborted;
            }
            let now = Instant::now();
            if now >= deadline {
                return EntryOutcome::TimedOut;
            }

            let pause = self.config.entry_poll_interval().min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return EntryOutcome::Aborted;
                    }
                }
            }
        }
    }

    /// Cancel an entry that stopped waiting for its fill.
    ///
    /// A fill that raced the cancel is kept. An order that cannot be confirmed
    /// final is registered as a position awaiting entry.
    async fn settle_unfilled(
        &self,
        plan: &OrderPlan,
        rules: &InstrumentRules,
        entry: OrderHandle,
        failure: ExecutionFailure,
    ) -> Result<OrderState, ExecutionResult> {
        let symbol = plan.symbol.exchange();
        match self.cancel_and_settle(&entry).await {
            Some(state) if state.filled_quantity > Decimal::ZERO => Ok(state),
            Some(state) => {
                warn!(
                    "[engine] {symbol} entry {entry} ended {:?} without fill: {failure}",
                    state.status
                );
                Err(ExecutionResult::Failed(failure))
            }
            None => {
                let key = PositionKey {
                    symbol: symbol.clone(),
                    entry_order_id: entry.order_id,
                };
                error!(
                    "[engine] {symbol} entry {entry} still live after {CANCEL_ATTEMPTS} cancels \
                     ({failure}); tracking it until it settles"
                );
                let pending = PendingEntry {
                    order: entry.clone(),
                    plan: plan.clone(),
                    rules: rules.clone(),
                };
                self.book.insert(Position::awaiting_entry(key.clone(), pending, now_ms())).await;
                Err(ExecutionResult::EntryUnsettled { key, entry })
            }
        }
    }

    /// Cancel the entry until the exchange reports a final state.
    ///
    /// Each attempt is one bounded cancel and one bounded status query. `None`
    /// means the order may still be live.
    async fn cancel_and_settle(&self, entry: &OrderHandle) -> Option<OrderState> {
        let timeout = self.config.query_timeout();
        for attempt in 1..=CANCEL_ATTEMPTS {
            if let Err(e) = bounded(timeout, self.exchange.cancel_order(entry)).await {
                warn!("[engine] cancel of entry {entry} failed ({attempt}/{CANCEL_ATTEMPTS}): {e}");
            }
            match bounded(timeout, self.exchange.order_status(entry)).await {
                Ok(state) if state.status.is_final() => return Some(state),
                Ok(state) => debug!("[engine] entry {entry} still {:?} after cancel", state.status),
                Err(e) => warn!("[engine] status query for entry {entry} failed: {e}"),
            }
            if attempt < CANCEL_ATTEMPTS {
                tokio::time::sleep(self.config.entry_poll_interval()).await;
            }
        }
        None
    }

    async fn open_position(
        &self,
        plan: &OrderPlan,
        rules: &InstrumentRules,
        entry: &OrderHandle,
        filled: &OrderState,
    ) -> ExecutionResult {
        let symbol = plan.symbol.exchange();
        let (quantity, fill_price, ladder) = filled_terms(plan, rules, filled);
        let (orders, failed_targets) = place_take_profits(
            self.exchange.as_ref(),
            &symbol,
            plan.direction,
            &ladder,
            self.config.query_timeout(),
        )
        .await;

        let key = PositionKey {
            symbol: symbol.clone(),
            entry_order_id: entry.order_id,
        };
        let position = Position::open(
            key.clone(),
            plan.symbol.clone(),
            plan.direction,
            plan.leverage,
            fill_price,
            quantity,
            ladder,
            orders.clone(),
            now_ms(),
        );
        self.book.insert(position).await;
        info!("[engine] {symbol} position {key} tracked: qty={quantity} @ {fill_price}");

        let opened = OpenedPosition {
            key,
            entry: entry.clone(),
            fill_price,
            quantity,
            take_profit_orders: orders,
        };
        if failed_targets.is_empty() {
            ExecutionResult::Success(opened)
        } else {
            ExecutionResult::PartialSuccess { opened, failed_targets }
        }
    }
}

/// Quantity, fill price and take-profit ladder of a filled entry. A partial
/// fill rescales the ladder to the quantity actually held.
pub(crate) fn filled_terms(
    plan: &OrderPlan,
    rules: &InstrumentRules,
    filled: &OrderState,
) -> (Decimal, Decimal, Vec<LadderRung>) {
    let quantity = if filled.filled_quantity > Decimal::ZERO {
        filled.filled_quantity
    } else {
        plan.quantity
    };
    let fill_price = filled.avg_price.unwrap_or(match plan.entry {
        EntryOrder::Limit { price } => price,
        EntryOrder::Market => plan.reference_price,
    });

    let ladder = if quantity == plan.quantity {
        plan.take_profit_ladder.clone()
    } else {
        let (ladder, merged) = rescale_ladder(&plan.take_profit_ladder, quantity, rules);
        info!(
            "[engine] {} entry filled {quantity} of {}; ladder rebuilt \
             ({} rungs, merged {merged:?})",
            plan.symbol,
            plan.quantity,
            ladder.len()
        );
        ladder
    };
    (quantity, fill_price, ladder)
}

/// Place one reduce-only limit exit per rung. Returns the placed orders by
/// target index and the targets whose placement failed.
pub(crate) async fn place_take_profits(
    exchange: &dyn Exchange,
    symbol: &str,
    direction: Direction,
    ladder: &[LadderRung],
    timeout: Duration,
) -> (BTreeMap<usize, OrderHandle>, Vec<usize>) {
    let mut orders = BTreeMap::new();
    let mut failed_targets = Vec::new();
    for rung in ladder {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side: direction.exit_side(),
            order_type: OrderType::Limit,
            quantity: rung.quantity,
            price: Some(rung.price),
            reduce_only: true,
            reference_price: None,
        };
        match bounded(timeout, exchange.place_order(&request)).await {
            Ok(handle) => {
                info!(
                    "[engine] {symbol} TP{} {} @ {} placed as {handle}",
                    rung.target_index, rung.quantity, rung.price
                );
                orders.insert(rung.target_index, handle);
            }
            Err(e) => {
                warn!("[engine] {symbol} TP{} placement failed: {e}", rung.target_index);
                failed_targets.push(rung.target_index);
            }
        }
    }
    (orders, failed_targets)
}

fn entry_request(plan: &OrderPlan) -> OrderRequest {
    let (order_type, price) = match plan.entry {
        EntryOrder::Market => (OrderType::Market, None),
        EntryOrder::Limit { price } => (OrderType::Limit, Some(price)),
    };
    OrderRequest {
        symbol: plan.symbol.exchange(),
        side: plan.direction.entry_side(),
        order_type,
        quantity: plan.quantity,
        price,
        reduce_only: false,
        reference_price: Some(plan.reference_price),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use sigbot_core::error::ExchangeError;
    use sigbot_core::{AccountSnapshot, Direction, LadderRung, MarginMode, Symbol};
    use sigbot_td::ExchangeResult;
    use sigbot_td::sim::{SimulatedExchange, SimulatorConfig};

    use super::*;

    /// Simulator wrapper that rejects chosen take-profit placements, can
    /// partially fill resting entries and can refuse every cancel.
    struct ScriptedExchange {
        inner: SimulatedExchange,
        reject_take_profits: Vec<usize>,
        partial_entry: Option<Decimal>,
        fail_cancels: bool,
        take_profits_seen: AtomicUsize,
        cancels_seen: AtomicUsize,
    }

    impl ScriptedExchange {
        fn new(inner: SimulatedExchange) -> Self {
            Self {
                inner,
                reject_take_profits: Vec::new(),
                partial_entry: None,
                fail_cancels: false,
                take_profits_seen: AtomicUsize::new(0),
                cancels_seen: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn set_leverage(
            &self,
            symbol: &str,
            leverage: u32,
            mode: MarginMode,
        ) -> ExchangeResult<()> {
            self.inner.set_leverage(symbol, leverage, mode).await
        }
        async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderHandle> {
            if request.reduce_only {
                let n = self.take_profits_seen.fetch_add(1, Ordering::SeqCst) + 1;
                if self.reject_take_profits.contains(&n) {
                    return Err(ExchangeError::rejected("price out of range"));
                }
            }
            let handle = self.inner.place_order(request).await?;
            if let (false, Some(qty)) = (request.reduce_only, self.partial_entry) {
                self.inner.fill_partially(&handle, qty).await;
            }
            Ok(handle)
        }
        async fn cancel_order(&self, handle: &OrderHandle) -> ExchangeResult<()> {
            self.cancels_seen.fetch_add(1, Ordering::SeqCst);
            if self.fail_cancels {
                return Err(ExchangeError::network("connection reset"));
            }
            self.inner.cancel_order(handle).await
        }
        async fn order_status(&self, handle: &OrderHandle) -> ExchangeResult<OrderState> {
            self.inner.order_status(handle).await
        }
        async fn account_snapshot(&self) -> ExchangeResult<AccountSnapshot> {
            self.inner.account_snapshot().await
        }
        async fn instrument_rules(&self, symbol: &str) -> ExchangeResult<InstrumentRules> {
            self.inner.instrument_rules(symbol).await
        }
        async fn mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
            self.inner.mark_price(symbol).await
        }
    }

    fn rules() -> InstrumentRules {
        InstrumentRules {
            symbol: "ETHUSDT".into(),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
            tick_size: dec!(0.01),
            max_leverage: 125,
        }
    }

    fn rung(target_index: usize, price: Decimal, quantity: Decimal) -> LadderRung {
        LadderRung {
            target_index,
            price,
            fraction: quantity / dec!(3),
            quantity,
        }
    }

    fn plan(entry: EntryOrder, leverage: u32) -> OrderPlan {
        OrderPlan {
            symbol: Symbol::new("ETH", "USDT"),
            direction: Direction::Long,
            leverage,
            margin_mode: MarginMode::Cross,
            quantity: dec!(3),
            entry,
            reference_price: dec!(3127.20),
            take_profit_ladder: vec![
                rung(1, dec!(3158.47), dec!(1)),
                rung(2, dec!(3189.74), dec!(1)),
                rung(3, dec!(3220.01), dec!(1)),
            ],
            adjustments: Vec::new(),
            source_message_id: "42".into(),
        }
    }

    fn engine(
        exchange: Arc<dyn Exchange>,
        config: TradingConfig,
    ) -> (ExecutionEngine, Arc<PositionBook>, watch::Sender<bool>) {
        let book = Arc::new(PositionBook::new());
        let (tx, rx) = watch::channel(false);
        (ExecutionEngine::new(exchange, Arc::clone(&book), config, rx), book, tx)
    }

    fn held_entries() -> SimulatedExchange {
        SimulatedExchange::new(SimulatorConfig {
            balance: dec!(100000),
            fill_entries: false,
            ..SimulatorConfig::default()
        })
    }

    #[tokio::test]
    async fn opens_and_registers_position() {
        let sim = Arc::new(SimulatedExchange::new(SimulatorConfig {
            balance: dec!(100000),
            ..SimulatorConfig::default()
        }));
        let (engine, book, _tx) = engine(sim.clone(), TradingConfig::default());

        let result = engine.execute(&plan(EntryOrder::Market, 100), &rules()).await;
        let ExecutionResult::Success(opened) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(opened.fill_price, dec!(3127.20));
        assert_eq!(opened.quantity, dec!(3));
        assert_eq!(opened.take_profit_orders.len(), 3);

        assert_eq!(sim.leverage_setting("ETHUSDT").await, Some((100, MarginMode::Cross)));
        assert_eq!(sim.open_orders("ETHUSDT").await.len(), 3);
        let tracked = book.get(&opened.key).await.unwrap();
        assert_eq!(tracked.lock().await.open_orders().len(), 3);
    }

    #[tokio::test]
    async fn leverage_rejection_places_nothing() {
        let sim = Arc::new(SimulatedExchange::default());
        let (engine, book, _tx) = engine(sim.clone(), TradingConfig::default());

        let result = engine.execute(&plan(EntryOrder::Market, 200), &rules()).await;
        assert!(matches!(result, ExecutionResult::Failed(ExecutionFailure::Leverage(_))));
        assert!(sim.open_orders("ETHUSDT").await.is_empty());
        assert!(sim.account_snapshot().await.unwrap().open_positions.is_empty());
        assert!(book.is_empty().await);
    }

    #[tokio::test]
    async fn unfilled_entry_times_out_and_cancels() {
        let sim = Arc::new(held_entries());
        let config = TradingConfig {
            entry_fill_timeout_secs: 0,
            ..TradingConfig::default()
        };
        let (engine, book, _tx) = engine(sim.clone(), config);

        let result = engine
            .execute(&plan(EntryOrder::Limit { price: dec!(3127.20) }, 20), &rules())
            .await;
        assert_eq!(result, ExecutionResult::Failed(ExecutionFailure::EntryTimeout));
        assert!(sim.open_orders("ETHUSDT").await.is_empty());
        assert!(book.is_empty().await);
    }

    #[tokio::test]
    async fn partial_entry_fill_rebuilds_ladder() {
        let mut scripted = ScriptedExchange::new(held_entries());
        scripted.partial_entry = Some(dec!(1.5));
        let config = TradingConfig {
            entry_fill_timeout_secs: 0,
            ..TradingConfig::default()
        };
        let (engine, book, _tx) = engine(Arc::new(scripted), config);

        let result = engine
            .execute(&plan(EntryOrder::Limit { price: dec!(3127.20) }, 20), &rules())
            .await;
        let ExecutionResult::Success(opened) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(opened.quantity, dec!(1.5));

        let tracked = book.get(&opened.key).await.unwrap();
        let position = tracked.lock().await;
        assert_eq!(position.total_quantity(), dec!(1.5));
        assert_eq!(position.open_orders().len(), 3);
    }

    #[tokio::test]
    async fn failed_take_profit_is_partial_success() {
        let mut scripted = ScriptedExchange::new(SimulatedExchange::new(SimulatorConfig {
            balance: dec!(100000),
            ..SimulatorConfig::default()
        }));
        scripted.reject_take_profits = vec![2];
        let (engine, book, _tx) = engine(Arc::new(scripted), TradingConfig::default());

        let result = engine.execute(&plan(EntryOrder::Market, 50), &rules()).await;
        let ExecutionResult::PartialSuccess { opened, failed_targets } = result else {
            panic!("expected partial success, got {result:?}");
        };
        assert_eq!(failed_targets, vec![2]);
        assert_eq!(opened.take_profit_orders.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(book.len().await, 1);
    }

    #[tokio::test]
    async fn shutdown_aborts_pending_entry() {
        let sim = Arc::new(held_entries());
        let (engine, book, tx) = engine(sim.clone(), TradingConfig::default());
        tx.send(true).unwrap();

        let result = engine
            .execute(&plan(EntryOrder::Limit { price: dec!(3127.20) }, 20), &rules())
            .await;
        assert_eq!(result, ExecutionResult::Failed(ExecutionFailure::EntryAborted));
        assert!(sim.open_orders("ETHUSDT").await.is_empty());
        assert!(book.is_empty().await);
    }

    #[tokio::test]
    async fn entry_that_cannot_be_canceled_stays_tracked() {
        let mut scripted = ScriptedExchange::new(held_entries());
        scripted.fail_cancels = true;
        let scripted = Arc::new(scripted);
        let config = TradingConfig {
            entry_fill_timeout_secs: 0,
            entry_poll_interval_ms: 10,
            ..TradingConfig::default()
        };
        let (engine, book, _tx) = engine(scripted.clone(), config);

        let result = engine
            .execute(&plan(EntryOrder::Limit { price: dec!(3127.20) }, 20), &rules())
            .await;
        let ExecutionResult::EntryUnsettled { key, entry } = result else {
            panic!("expected unsettled entry, got {result:?}");
        };
        assert_eq!(scripted.cancels_seen.load(Ordering::SeqCst), CANCEL_ATTEMPTS as usize);
        assert_eq!(scripted.inner.open_orders("ETHUSDT").await.len(), 1);
        assert!(book.contains_symbol("ETHUSDT").await);

        let tracked = book.get(&key).await.unwrap();
        let position = tracked.lock().await;
        assert_eq!(position.pending_entry().map(|p| p.order.clone()), Some(entry));
        assert!(!position.is_closed());
    }
}

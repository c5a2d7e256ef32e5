//! Simulated futures exchange for dry runs and tests.
//!
//! Keeps an in-memory account: a quote balance, net positions per symbol and
//! an order table. Fill rules:
//!
//! | Order                     | Behavior                                          |
//! |---------------------------|---------------------------------------------------|
//! | Market                    | fills at `reference_price`, else the mark price   |
//! | Limit, opening            | fills at the limit price (unless entries held)    |
//! | Limit, reduce-only        | rests until [`SimulatedExchange::set_mark_price`] crosses it |
//!
//! A reduce-only fill never exceeds the open position. What it can no longer
//! close is expired, so a flat symbol never flips into the opposite side.
//!
//! A symbol without a mark price is looked up once in the optional price
//! source (see [`SimulatedExchange::with_price_source`]) and cached.
//!
//! Margin is reserved from the balance on entry (`qty × price / leverage`) and
//! released together with realized PnL when the position is reduced.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use sigbot_core::error::ExchangeError;
use sigbot_core::{
    AccountSnapshot, InstrumentRules, MarginMode, OpenPosition, OrderHandle, OrderRequest,
    OrderState, OrderStatus, OrderType, Side,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Exchange, ExchangeResult, new_client_order_id};

/// Binance code for "Unknown order sent."
const UNKNOWN_ORDER: i64 = -2011;
/// Binance code for "ReduceOnly Order is rejected."
const REDUCE_ONLY_REJECTED: i64 = -2022;

/// Simulator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Starting available balance.
    pub balance: Decimal,
    pub max_leverage: u32,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
    pub tick_size: Decimal,
    /// Fill opening orders on placement. When `false` they rest as `New`.
    pub fill_entries: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            balance: Decimal::from(1000),
            max_leverage: 125,
            step_size: Decimal::new(1, 3),
            min_qty: Decimal::new(1, 3),
            min_notional: Decimal::from(5),
            tick_size: Decimal::new(1, 2),
            fill_entries: true,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SimOrder {
    request: OrderRequest,
    state: OrderState,
}

#[derive(Debug, Clone, Copy)]
struct SimPosition {
    /// Signed net amount.
    amount: Decimal,
    entry_price: Decimal,
    /// Margin reserved for the open amount.
    margin: Decimal,
}

#[derive(Debug)]
struct SimState {
    balance: Decimal,
    next_order_id: u64,
    orders: HashMap<u64, SimOrder>,
    positions: HashMap<String, SimPosition>,
    marks: HashMap<String, Decimal>,
    leverage: HashMap<String, (u32, MarginMode)>,
    rules: HashMap<String, InstrumentRules>,
}

impl SimState {
    fn leverage_for(&self, symbol: &str) -> Decimal {
        Decimal::from(self.leverage.get(symbol).map(|(l, _)| *l).unwrap_or(1).max(1))
    }

    /// Apply a fill of `qty` at `price` to the net position.
    fn apply_fill(&mut self, symbol: &str, side: Side, qty: Decimal, price: Decimal) {
        let delta = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let leverage = self.leverage_for(symbol);
        let pos = self.positions.entry(symbol.to_string()).or_insert(SimPosition {
            amount: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            margin: Decimal::ZERO,
        });

        let increasing =
            pos.amount.is_zero() || pos.amount.is_sign_positive() == delta.is_sign_positive();
        if increasing {
            let new_amount = pos.amount + delta;
            pos.entry_price = (pos.entry_price * pos.amount.abs() + price * qty) / new_amount.abs();
            pos.amount = new_amount;
            let margin = qty * price / leverage;
            pos.margin += margin;
            self.balance -= margin;
        } else {
            let closed = qty.min(pos.amount.abs());
            let direction = if pos.amount.is_sign_positive() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            let pnl = (price - pos.entry_price) * closed * direction;
            let released = pos.margin * closed / pos.amount.abs();
            pos.margin -= released;
            pos.amount += delta;
            self.balance += released + pnl;
            if pos.amount.is_zero() {
                self.positions.remove(symbol);
            }
        }
    }

    /// Amount an order on `side` can close on `symbol`.
    fn reducible(&self, symbol: &str, side: Side) -> Decimal {
        self.positions
            .get(symbol)
            .filter(|p| match side {
                Side::Sell => p.amount > Decimal::ZERO,
                Side::Buy => p.amount < Decimal::ZERO,
            })
            .map(|p| p.amount.abs())
            .unwrap_or_default()
    }

    /// Fill up to `qty` of an order. Returns `false` when nothing filled.
    fn fill_order(&mut self, order_id: u64, qty: Decimal, price: Decimal) -> bool {
        let Some(order) = self.orders.get(&order_id) else {
            return false;
        };
        let symbol = order.request.symbol.clone();
        let side = order.request.side;
        let reduce_only = order.request.reduce_only;
        let total = order.request.quantity;
        let previous = order.state.filled_quantity;
        let mut delta = (previous + qty).min(total) - previous;
        if delta <= Decimal::ZERO {
            return false;
        }

        let mut expired = false;
        if reduce_only {
            let reducible = self.reducible(&symbol, side);
            if reducible < delta {
                debug!(
                    "[sim-td] {symbol}#{order_id} reduce-only capped to {reducible}, rest expired"
                );
                delta = reducible;
                expired = true;
            }
        }

        if delta > Decimal::ZERO {
            self.apply_fill(&symbol, side, delta, price);
        }
        if let Some(order) = self.orders.get_mut(&order_id) {
            let filled = previous + delta;
            order.state.filled_quantity = filled;
            if delta > Decimal::ZERO {
                order.state.avg_price = Some(price);
            }
            order.state.status = if expired {
                OrderStatus::Expired
            } else if filled >= total {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
        }
        delta > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// SimulatedExchange
// ---------------------------------------------------------------------------

/// In-memory exchange implementing [`Exchange`].
pub struct SimulatedExchange {
    config: SimulatorConfig,
    state: Mutex<SimState>,
    price_source: Option<Arc<dyn Exchange>>,
}

impl SimulatedExchange {
    pub fn new(config: SimulatorConfig) -> Self {
        info!("[sim-td] simulated exchange with balance {}", config.balance);
        let state = SimState {
            balance: config.balance,
            next_order_id: 1,
            orders: HashMap::new(),
            positions: HashMap::new(),
            marks: HashMap::new(),
            leverage: HashMap::new(),
            rules: HashMap::new(),
        };
        Self {
            config,
            state: Mutex::new(state),
            price_source: None,
        }
    }

    /// Read mark prices of symbols the simulator has not seen from `source`.
    pub fn with_price_source(mut self, source: Arc<dyn Exchange>) -> Self {
        info!("[sim-td] unknown mark prices read from {}", source.name());
        self.price_source = Some(source);
        self
    }

    /// Update the mark price and fill every resting reduce-only order it
    /// crosses. Returns the number of orders that filled any quantity.
    pub async fn set_mark_price(&self, symbol: &str, price: Decimal) -> usize {
        let mut state = self.state.lock().await;
        state.marks.insert(symbol.to_string(), price);

        let mut crossed: Vec<(u64, Decimal, Decimal)> = state
            .orders
            .iter()
            .filter(|(_, o)| {
                o.request.symbol == symbol && o.request.reduce_only && o.state.status.is_open()
            })
            .filter_map(|(id, o)| {
                let limit = o.request.price?;
                let hit = match o.request.side {
                    Side::Sell => price >= limit,
                    Side::Buy => price <= limit,
                };
                hit.then(|| (*id, o.request.quantity - o.state.filled_quantity, limit))
            })
            .collect();
        crossed.sort_by_key(|(id, _, _)| *id);

        let mut filled = 0;
        for (id, qty, limit) in crossed {
            if state.fill_order(id, qty, limit) {
                debug!("[sim-td] {symbol}#{id} filled at {limit}");
                filled += 1;
            }
        }
        filled
    }

    /// Override the default trading rules for one symbol.
    pub async fn set_rules(&self, rules: InstrumentRules) {
        self.state.lock().await.rules.insert(rules.symbol.clone(), rules);
    }

    /// Fill part of an open order at its limit (or reference) price.
    pub async fn fill_partially(&self, handle: &OrderHandle, qty: Decimal) {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get(&handle.order_id) else {
            return;
        };
        let price = order
            .request
            .price
            .or(order.request.reference_price)
            .unwrap_or_default();
        state.fill_order(handle.order_id, qty, price);
    }

    /// Cancel an order as if from outside the bot.
    pub async fn cancel_externally(&self, handle: &OrderHandle) {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&handle.order_id) {
            if order.state.status.is_open() {
                order.state.status = OrderStatus::Canceled;
            }
        }
    }

    /// Flatten a position as if closed manually. Orders are left untouched.
    pub async fn close_position(&self, symbol: &str) {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.positions.remove(symbol) {
            state.balance += pos.margin;
        }
    }

    /// Open orders for a symbol.
    pub async fn open_orders(&self, symbol: &str) -> Vec<(OrderHandle, OrderRequest)> {
        let state = self.state.lock().await;
        let mut open: Vec<_> = state
            .orders
            .iter()
            .filter(|(_, o)| o.request.symbol == symbol && o.state.status.is_open())
            .map(|(id, o)| {
                let handle = OrderHandle {
                    symbol: o.request.symbol.clone(),
                    order_id: *id,
                    client_order_id: String::new(),
                };
                (handle, o.request.clone())
            })
            .collect();
        open.sort_by_key(|(h, _)| h.order_id);
        open
    }

    /// Leverage and margin mode last set for a symbol.
    pub async fn leverage_setting(&self, symbol: &str) -> Option<(u32, MarginMode)> {
        self.state.lock().await.leverage.get(symbol).copied()
    }

    fn default_rules(&self, symbol: &str) -> InstrumentRules {
        InstrumentRules {
            symbol: symbol.to_string(),
            step_size: self.config.step_size,
            min_qty: self.config.min_qty,
            min_notional: self.config.min_notional,
            tick_size: self.config.tick_size,
            max_leverage: self.config.max_leverage,
        }
    }
}

impl Default for SimulatedExchange {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[async_trait]
impl Exchange for SimulatedExchange {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> ExchangeResult<()> {
        let mut state = self.state.lock().await;
        let max = state
            .rules
            .get(symbol)
            .map(|r| r.max_leverage)
            .unwrap_or(self.config.max_leverage);
        if leverage == 0 || leverage > max {
            return Err(ExchangeError::rejected(format!("leverage {leverage} is not valid"))
                .with_code(-4028));
        }
        state.leverage.insert(symbol.to_string(), (leverage, margin_mode));
        debug!("[sim-td] {symbol} leverage {leverage}x {margin_mode}");
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderHandle> {
        if request.quantity <= Decimal::ZERO {
            return Err(ExchangeError::rejected("quantity must be positive").with_code(-4003));
        }
        let mut state = self.state.lock().await;

        let fill_price = match request.order_type {
            OrderType::Limit => Some(
                request
                    .price
                    .ok_or_else(|| {
                        ExchangeError::rejected("limit order without price").with_code(-1102)
                    })?,
            ),
            OrderType::Market => request
                .reference_price
                .or_else(|| state.marks.get(&request.symbol).copied()),
        };
        let Some(fill_price) = fill_price else {
            return Err(ExchangeError::rejected(format!("no price for {}", request.symbol)));
        };

        if request.reduce_only && state.reducible(&request.symbol, request.side).is_zero() {
            return Err(ExchangeError::rejected("ReduceOnly Order is rejected.")
                .with_code(REDUCE_ONLY_REJECTED));
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;
        state.orders.insert(
            order_id,
            SimOrder {
                request: request.clone(),
                state: OrderState {
                    status: OrderStatus::New,
                    filled_quantity: Decimal::ZERO,
                    avg_price: None,
                },
            },
        );

        let fills_now = match request.order_type {
            OrderType::Market => true,
            OrderType::Limit => !request.reduce_only && self.config.fill_entries,
        };
        if fills_now {
            state.fill_order(order_id, request.quantity, fill_price);
        }

        debug!(
            "[sim-td] order {order_id} {} {} {} qty={} filled={fills_now}",
            request.symbol,
            request.side.as_str(),
            request.order_type.as_str(),
            request.quantity
        );
        Ok(OrderHandle {
            symbol: request.symbol.clone(),
            order_id,
            client_order_id: new_client_order_id(),
        })
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> ExchangeResult<()> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(&handle.order_id) {
            Some(order) if order.state.status.is_open() => {
                order.state.status = OrderStatus::Canceled;
                Ok(())
            }
            _ => Err(ExchangeError::rejected("Unknown order sent.").with_code(UNKNOWN_ORDER)),
        }
    }

    async fn order_status(&self, handle: &OrderHandle) -> ExchangeResult<OrderState> {
        let state = self.state.lock().await;
        state
            .orders
            .get(&handle.order_id)
            .map(|o| o.state.clone())
            .ok_or_else(|| ExchangeError::rejected("Order does not exist.").with_code(-2013))
    }

    async fn account_snapshot(&self) -> ExchangeResult<AccountSnapshot> {
        let state = self.state.lock().await;
        let mut open_positions: Vec<OpenPosition> = state
            .positions
            .iter()
            .map(|(symbol, p)| OpenPosition {
                symbol: symbol.clone(),
                amount: p.amount,
                entry_price: p.entry_price,
            })
            .collect();
        open_positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(AccountSnapshot {
            balance: state.balance,
            open_positions,
        })
    }

    async fn instrument_rules(&self, symbol: &str) -> ExchangeResult<InstrumentRules> {
        let state = self.state.lock().await;
        Ok(state.rules.get(symbol).cloned().unwrap_or_else(|| self.default_rules(symbol)))
    }

    async fn mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        if let Some(mark) = self.state.lock().await.marks.get(symbol).copied() {
            return Ok(mark);
        }
        let Some(source) = &self.price_source else {
            return Err(ExchangeError::rejected(format!("no mark price for {symbol}")));
        };
        let mark = source.mark_price(symbol).await?;
        debug!("[sim-td] {symbol} mark {mark} from {}", source.name());
        self.state.lock().await.marks.entry(symbol.to_string()).or_insert(mark);
        Ok(mark)
    }
}

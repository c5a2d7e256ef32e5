//! Shared fixtures for pipeline integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sigbot_core::error::ExchangeError;
use sigbot_core::{
    AccountSnapshot, InstrumentRules, MarginMode, MessageEvent, OrderHandle, OrderRequest,
    OrderState,
};
use sigbot_td::sim::{SimulatedExchange, SimulatorConfig};
use sigbot_td::{Exchange, ExchangeResult};

pub const ETH_SIGNAL: &str = "🟢 Long\nName: ETH/USDT\nMargin mode: Cross (100.0X)\n\
                              Entry price: 3127.20\n\
                              Targets: 1) 3158.47 2) 3189.74 3) 3220.01";

/// Simulator wrapper that counts mutating calls and can fail order queries
/// and cancels.
pub struct ScriptedExchange {
    pub sim: Arc<SimulatedExchange>,
    pub order_calls: AtomicUsize,
    pub fail_queries: AtomicBool,
    pub fail_cancels: AtomicBool,
}

impl ScriptedExchange {
    pub fn new(balance: Decimal) -> Self {
        Self::with_simulator(SimulatorConfig {
            balance,
            ..SimulatorConfig::default()
        })
    }

    pub fn with_simulator(config: SimulatorConfig) -> Self {
        Self {
            sim: Arc::new(SimulatedExchange::new(config)),
            order_calls: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
            fail_cancels: AtomicBool::new(false),
        }
    }

    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
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
        margin_mode: MarginMode,
    ) -> ExchangeResult<()> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        self.sim.set_leverage(symbol, leverage, margin_mode).await
    }

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderHandle> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        self.sim.place_order(request).await
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> ExchangeResult<()> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancels.load(Ordering::SeqCst) {
            return Err(ExchangeError::network("connection reset"));
        }
        self.sim.cancel_order(handle).await
    }

    async fn order_status(&self, handle: &OrderHandle) -> ExchangeResult<OrderState> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ExchangeError::network("connection reset"));
        }
        self.sim.order_status(handle).await
    }

    async fn account_snapshot(&self) -> ExchangeResult<AccountSnapshot> {
        self.sim.account_snapshot().await
    }

    async fn instrument_rules(&self, symbol: &str) -> ExchangeResult<InstrumentRules> {
        self.sim.instrument_rules(symbol).await
    }

    async fn mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.sim.mark_price(symbol).await
    }
}

pub fn message(id: &str, text: &str) -> MessageEvent {
    MessageEvent {
        message_id: id.into(),
        text: text.into(),
        timestamp_ms: 0,
    }
}

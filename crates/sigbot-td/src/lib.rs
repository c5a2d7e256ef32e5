//! # sigbot-td
//!
//! Exchange connectivity for the signal bot.
//!
//! Every exchange backend implements the [`Exchange`] trait, which exposes the
//! handful of futures-account operations the execution pipeline needs. Two
//! implementations are provided:
//!
//! | Backend                | Module     | Use                                  |
//! |------------------------|------------|--------------------------------------|
//! | Binance USDT-M futures | `binance`  | live trading over the REST API       |
//! | Simulated exchange     | `sim`      | dry-run mode and tests, no real funds |
//!
//! The pipeline logic is identical for both; only the implementation behind
//! `Arc<dyn Exchange>` differs.

pub mod binance;
pub mod sim;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sigbot_core::error::ExchangeError;
use sigbot_core::{
    AccountSnapshot, InstrumentRules, MarginMode, OrderHandle, OrderRequest, OrderState,
};

/// Result type of every exchange call.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Trait implemented by all exchange backends.
///
/// All operations take `&self` so they can be called concurrently from the
/// message path and the order monitor. Every call is fallible and reports an
/// [`ExchangeError`] whose kind distinguishes network trouble, rate limiting
/// and outright rejection.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Set leverage and margin mode for a symbol.
    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> ExchangeResult<()>;

    /// Submit a new order and return its handle.
    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderHandle>;

    /// Cancel a resting order.
    async fn cancel_order(&self, handle: &OrderHandle) -> ExchangeResult<()>;

    /// Query the current state of an order.
    async fn order_status(&self, handle: &OrderHandle) -> ExchangeResult<OrderState>;

    /// Query balance and open positions.
    async fn account_snapshot(&self) -> ExchangeResult<AccountSnapshot>;

    /// Trading filters and leverage limit of a symbol.
    async fn instrument_rules(&self, symbol: &str) -> ExchangeResult<InstrumentRules>;

    /// Current mark price of a symbol.
    async fn mark_price(&self, symbol: &str) -> ExchangeResult<Decimal>;
}

/// Fresh client order id (`sb-` + 32 hex chars, within Binance's 36-char limit).
pub fn new_client_order_id() -> String {
    format!("sb-{}", uuid::Uuid::new_v4().simple())
}

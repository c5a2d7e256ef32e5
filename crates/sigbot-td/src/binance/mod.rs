//! Binance USDT-margined futures backend.
//!
//! Implements the [`Exchange`](crate::Exchange) trait over the futures REST
//! API.
//!
//! # Architecture
//!
//! ```text
//! BinanceFutures
//! ├── FuturesClient     (signed REST calls, error classification)
//! └── InstrumentCache   (exchangeInfo filters + leverage brackets)
//! ```
//!
//! All methods take `&self` and are safe to call from multiple tasks
//! concurrently. The instrument cache is filled lazily on the first
//! `instrument_rules` call for a symbol and guarded by a
//! [`tokio::sync::Mutex`].

pub mod auth;
pub mod config;
pub mod futures;
pub mod instruments;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sigbot_core::error::{ExchangeError, ExchangeErrorKind};
use sigbot_core::{
    AccountSnapshot, InstrumentRules, MarginMode, OpenPosition, OrderHandle, OrderRequest,
    OrderState, OrderStatus, OrderType,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use self::config::BinanceFuturesConfig;
use self::futures::{FuturesClient, MARGIN_TYPE_UNCHANGED};
use self::instruments::{InstrumentCache, decimal_field};
use crate::{Exchange, ExchangeResult, new_client_order_id};

/// Binance futures exchange backend.
pub struct BinanceFutures {
    config: BinanceFuturesConfig,
    client: FuturesClient,
    instruments: Mutex<InstrumentCache>,
}

impl BinanceFutures {
    pub fn new(config: BinanceFuturesConfig) -> Self {
        let client = FuturesClient::new(&config);
        info!("[binance-td] futures backend using {}", config.rest_url);
        Self {
            config,
            client,
            instruments: Mutex::new(InstrumentCache::new()),
        }
    }
}

#[async_trait]
impl Exchange for BinanceFutures {
    fn name(&self) -> &str {
        "binance-futures"
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> ExchangeResult<()> {
        let margin_type = match margin_mode {
            MarginMode::Cross => "CROSSED",
            MarginMode::Isolated => "ISOLATED",
        };
        match self.client.change_margin_type(symbol, margin_type).await {
            Ok(_) => info!("[binance-td] {symbol} margin type set to {margin_type}"),
            Err(e) if e.code == Some(MARGIN_TYPE_UNCHANGED) => {
                debug!("[binance-td] {symbol} margin type already {margin_type}")
            }
            Err(e) => return Err(e),
        }

        self.client.change_leverage(symbol, leverage).await?;
        info!("[binance-td] {symbol} leverage set to {leverage}x");
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderHandle> {
        let client_order_id = new_client_order_id();
        let quantity = request.quantity.normalize().to_string();
        let price = match request.order_type {
            OrderType::Limit => {
                let p = request
                    .price
                    .ok_or_else(|| ExchangeError::rejected("limit order without price"))?;
                Some(p.normalize().to_string())
            }
            OrderType::Market => None,
        };

        let resp = self
            .client
            .place_order(
                &request.symbol,
                request.side.as_str(),
                request.order_type.as_str(),
                &quantity,
                price.as_deref(),
                request.reduce_only,
                &client_order_id,
            )
            .await?;

        let order_id = resp
            .get("orderId")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| decode_error("orderId missing in order response"))?;

        info!(
            "[binance-td] placed {} {} {} qty={quantity} price={} reduce_only={} → {order_id}",
            request.symbol,
            request.side.as_str(),
            request.order_type.as_str(),
            price.as_deref().unwrap_or("-"),
            request.reduce_only
        );

        Ok(OrderHandle {
            symbol: request.symbol.clone(),
            order_id,
            client_order_id,
        })
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> ExchangeResult<()> {
        self.client.cancel_order(&handle.symbol, handle.order_id).await?;
        info!("[binance-td] canceled {handle}");
        Ok(())
    }

    async fn order_status(&self, handle: &OrderHandle) -> ExchangeResult<OrderState> {
        let resp = self.client.query_order(&handle.symbol, handle.order_id).await?;
        parse_order_state(&resp).ok_or_else(|| decode_error("malformed order status response"))
    }

    async fn account_snapshot(&self) -> ExchangeResult<AccountSnapshot> {
        let account = self.client.get_account_info().await?;
        let asset = &self.config.balance_asset;
        let balance = parse_available_balance(&account, asset)
            .ok_or_else(|| decode_error(format!("no {asset} asset in account response")))?;

        let positions = self.client.get_positions(None).await?;
        let open_positions = positions
            .as_array()
            .map(|arr| arr.iter().filter_map(parse_position).collect())
            .unwrap_or_default();

        Ok(AccountSnapshot {
            balance,
            open_positions,
        })
    }

    async fn instrument_rules(&self, symbol: &str) -> ExchangeResult<InstrumentRules> {
        let mut cache = self.instruments.lock().await;

        if !cache.has_filters(symbol) {
            let info = self.client.get_exchange_info().await?;
            let loaded = cache.load_from_exchange_info(&info);
            info!("[binance-td] loaded filters for {loaded} symbols");
        }
        if !cache.has_filters(symbol) {
            return Err(ExchangeError::rejected(format!("unknown symbol {symbol}")));
        }

        if !cache.has_leverage(symbol) {
            let brackets = self.client.get_leverage_brackets(symbol).await?;
            cache.load_leverage_brackets(&brackets);
        }

        cache.rules(symbol).ok_or_else(|| {
            warn!("[binance-td] no leverage bracket for {symbol}");
            decode_error(format!("no leverage bracket for {symbol}"))
        })
    }

    async fn mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let resp = self.client.get_mark_price(symbol).await?;
        decimal_field(&resp, "markPrice").ok_or_else(|| decode_error("markPrice missing"))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn decode_error(message: impl Into<String>) -> ExchangeError {
    ExchangeError::new(ExchangeErrorKind::Decode, message)
}

/// Parse an order query response.
fn parse_order_state(v: &serde_json::Value) -> Option<OrderState> {
    let status = parse_order_status(v.get("status")?.as_str()?);
    let filled_quantity = decimal_field(v, "executedQty").unwrap_or(Decimal::ZERO);
    let avg_price = decimal_field(v, "avgPrice").filter(|p| !p.is_zero());
    Some(OrderState {
        status,
        filled_quantity,
        avg_price,
    })
}

/// Map a Binance order status string to an [`OrderStatus`].
fn parse_order_status(status: &str) -> OrderStatus {
    match status {
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

/// `availableBalance` of the given asset from `/fapi/v3/account`.
fn parse_available_balance(account: &serde_json::Value, asset: &str) -> Option<Decimal> {
    account
        .get("assets")?
        .as_array()?
        .iter()
        .find(|a| a.get("asset").and_then(|s| s.as_str()) == Some(asset))
        .and_then(|a| decimal_field(a, "availableBalance"))
}

/// Parse a position entry, skipping flat ones.
fn parse_position(v: &serde_json::Value) -> Option<OpenPosition> {
    let amount = decimal_field(v, "positionAmt")?;
    if amount.is_zero() {
        return None;
    }
    Some(OpenPosition {
        symbol: v.get("symbol")?.as_str()?.to_string(),
        amount,
        entry_price: decimal_field(v, "entryPrice").unwrap_or(Decimal::ZERO),
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn order_state_from_query() {
        let v = serde_json::json!({
            "orderId": 8389765, "symbol": "ETHUSDT", "status": "PARTIALLY_FILLED",
            "executedQty": "0.150", "avgPrice": "3127.20", "origQty": "0.300"
        });
        let state = parse_order_state(&v).unwrap();
        assert_eq!(state.status, OrderStatus::PartiallyFilled);
        assert_eq!(state.filled_quantity, dec!(0.15));
        assert_eq!(state.avg_price, Some(dec!(3127.20)));
    }

    #[test]
    fn zero_avg_price_is_none() {
        let v = serde_json::json!({"status": "NEW", "executedQty": "0", "avgPrice": "0.00"});
        assert_eq!(parse_order_state(&v).unwrap().avg_price, None);
    }

    #[test]
    fn expired_in_match_maps_to_expired() {
        assert_eq!(parse_order_status("EXPIRED_IN_MATCH"), OrderStatus::Expired);
        assert_eq!(parse_order_status("CANCELED"), OrderStatus::Canceled);
    }

    #[test]
    fn balance_and_positions() {
        let account = serde_json::json!({
            "assets": [
                {"asset": "BNB", "availableBalance": "1.2"},
                {"asset": "USDT", "availableBalance": "1052.48", "walletBalance": "1100"}
            ]
        });
        assert_eq!(parse_available_balance(&account, "USDT"), Some(dec!(1052.48)));
        assert_eq!(parse_available_balance(&account, "USDC"), None);

        let flat =
            serde_json::json!({"symbol": "BTCUSDT", "positionAmt": "0.000", "entryPrice": "0.0"});
        assert!(parse_position(&flat).is_none());
        let short = serde_json::json!({
            "symbol": "ETHUSDT",
            "positionAmt": "-0.300",
            "entryPrice": "3127.2"
        });
        let pos = parse_position(&short).unwrap();
        assert_eq!(pos.amount, dec!(-0.3));
        assert_eq!(pos.entry_price, dec!(3127.2));
    }
}

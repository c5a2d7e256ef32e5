//! Binance USDT-margined futures REST client.
//!
//! Thin wrapper over the signed REST endpoints the bot needs. Every method
//! returns the decoded JSON body or an [`ExchangeError`] classified from the
//! HTTP status and the Binance `{code, msg}` error payload.
//!
//! # REST endpoints
//!
//! | Operation          | Method | Path                        | Signed |
//! |--------------------|--------|-----------------------------|--------|
//! | Change leverage    | POST   | `/fapi/v1/leverage`         | yes    |
//! | Change margin type | POST   | `/fapi/v1/marginType`       | yes    |
//! | New order          | POST   | `/fapi/v1/order`            | yes    |
//! | Query order        | GET    | `/fapi/v1/order`            | yes    |
//! | Cancel order       | DELETE | `/fapi/v1/order`            | yes    |
//! | Account info       | GET    | `/fapi/v3/account`          | yes    |
//! | Positions          | GET    | `/fapi/v3/positionRisk`     | yes    |
//! | Leverage brackets  | GET    | `/fapi/v1/leverageBracket`  | yes    |
//! | Exchange info      | GET    | `/fapi/v1/exchangeInfo`     | no     |
//! | Mark price         | GET    | `/fapi/v1/premiumIndex`     | no     |

use reqwest::Method;
use sigbot_core::error::{ExchangeError, ExchangeErrorKind};
use sigbot_core::time_util::now_ms;
use tracing::debug;

use super::auth;
use super::config::BinanceFuturesConfig;
use crate::ExchangeResult;

/// Binance code for "No need to change margin type."
pub const MARGIN_TYPE_UNCHANGED: i64 = -4046;

/// Binance code for "Too many requests."
const TOO_MANY_REQUESTS: i64 = -1003;

// ---------------------------------------------------------------------------
// FuturesClient
// ---------------------------------------------------------------------------

/// Binance USDT-M futures REST client.
pub struct FuturesClient {
    /// Shared HTTP client.
    http: reqwest::Client,
    /// API key.
    api_key: String,
    /// Secret key for HMAC-SHA256 signing.
    secret_key: String,
    /// REST base URL (e.g. `https://fapi.binance.com`).
    base_url: String,
    /// `recvWindow` for signed requests.
    recv_window: u64,
}

impl FuturesClient {
    /// Create a new futures client (no connections opened yet).
    pub fn new(config: &BinanceFuturesConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            recv_window: config.recv_window,
        }
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Send a signed request. `timestamp` and `recvWindow` are appended here.
    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> ExchangeResult<serde_json::Value> {
        let timestamp = now_ms().to_string();
        let recv_window = self.recv_window.to_string();
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("recvWindow", &recv_window));
        all.push(("timestamp", &timestamp));

        let query = auth::build_signed_query(&all, &self.secret_key);
        let url = format!("{}{path}?{query}", self.base_url);
        debug!("[binance-td] {method} {path}");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(resp).await
    }

    /// Send an unsigned GET request.
    async fn public(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> ExchangeResult<serde_json::Value> {
        let url = if params.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{}", self.base_url, auth::build_query(params))
        };
        debug!("[binance-td] GET {path}");

        let resp = self.http.get(&url).send().await.map_err(transport_error)?;
        decode_response(resp).await
    }

    // -----------------------------------------------------------------------
    // Account settings
    // -----------------------------------------------------------------------

    /// `POST /fapi/v1/leverage`
    pub async fn change_leverage(
        &self,
        symbol: &str,
        leverage: u32,
    ) -> ExchangeResult<serde_json::Value> {
        let leverage = leverage.to_string();
        let params = [("symbol", symbol), ("leverage", leverage.as_str())];
        self.signed(Method::POST, "/fapi/v1/leverage", &params).await
    }

    /// `POST /fapi/v1/marginType` with `ISOLATED` or `CROSSED`.
    pub async fn change_margin_type(
        &self,
        symbol: &str,
        margin_type: &str,
    ) -> ExchangeResult<serde_json::Value> {
        let params = [("symbol", symbol), ("marginType", margin_type)];
        self.signed(Method::POST, "/fapi/v1/marginType", &params).await
    }

    // -----------------------------------------------------------------------
    // Order operations
    // -----------------------------------------------------------------------

    /// Place a new order. A `price` turns the order into a GTC limit.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: &str,
        price: Option<&str>,
        reduce_only: bool,
        client_order_id: &str,
    ) -> ExchangeResult<serde_json::Value> {
        let mut params: Vec<(&str, &str)> = vec![
            ("symbol", symbol),
            ("side", side),
            ("type", order_type),
            ("quantity", quantity),
            ("newClientOrderId", client_order_id),
        ];
        if let Some(p) = price {
            params.push(("price", p));
            params.push(("timeInForce", "GTC"));
        }
        if reduce_only {
            params.push(("reduceOnly", "true"));
        }
        self.signed(Method::POST, "/fapi/v1/order", &params).await
    }

    /// Query an order by exchange id.
    pub async fn query_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> ExchangeResult<serde_json::Value> {
        let oid = order_id.to_string();
        self.signed(Method::GET, "/fapi/v1/order", &[("symbol", symbol), ("orderId", &oid)])
            .await
    }

    /// Cancel an order by exchange id.
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> ExchangeResult<serde_json::Value> {
        let oid = order_id.to_string();
        self.signed(Method::DELETE, "/fapi/v1/order", &[("symbol", symbol), ("orderId", &oid)])
            .await
    }

    // -----------------------------------------------------------------------
    // REST queries
    // -----------------------------------------------------------------------

    /// Account information (balances, assets).
    pub async fn get_account_info(&self) -> ExchangeResult<serde_json::Value> {
        self.signed(Method::GET, "/fapi/v3/account", &[]).await
    }

    /// Current positions (optionally filtered by symbol).
    pub async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<serde_json::Value> {
        match symbol {
            Some(sym) => {
                self.signed(Method::GET, "/fapi/v3/positionRisk", &[("symbol", sym)])
                    .await
            }
            None => self.signed(Method::GET, "/fapi/v3/positionRisk", &[]).await,
        }
    }

    /// Notional and leverage brackets for a symbol.
    pub async fn get_leverage_brackets(&self, symbol: &str) -> ExchangeResult<serde_json::Value> {
        self.signed(Method::GET, "/fapi/v1/leverageBracket", &[("symbol", symbol)])
            .await
    }

    /// Exchange info (symbol list, filters).
    pub async fn get_exchange_info(&self) -> ExchangeResult<serde_json::Value> {
        self.public("/fapi/v1/exchangeInfo", &[]).await
    }

    /// Mark price and funding data for a symbol.
    pub async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<serde_json::Value> {
        self.public("/fapi/v1/premiumIndex", &[("symbol", symbol)]).await
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a reqwest send failure onto an exchange error.
fn transport_error(err: reqwest::Error) -> ExchangeError {
    if err.is_timeout() {
        ExchangeError::timeout(err.to_string())
    } else {
        ExchangeError::network(err.to_string())
    }
}

async fn decode_response(resp: reqwest::Response) -> ExchangeResult<serde_json::Value> {
    let status = resp.status().as_u16();
    let body = resp.text().await.map_err(transport_error)?;
    if (200..300).contains(&status) {
        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::new(ExchangeErrorKind::Decode, e.to_string()))
    } else {
        Err(classify_http_error(status, &body))
    }
}

/// Classify a non-2xx response.
///
/// | Status     | Kind          |
/// |------------|---------------|
/// | 429, 418   | `RateLimited` |
/// | other 4xx  | `Rejected`    |
/// | 5xx        | `Network`     |
pub(crate) fn classify_http_error(status: u16, body: &str) -> ExchangeError {
    let payload: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let code = payload.as_ref().and_then(|v| v.get("code")).and_then(|c| c.as_i64());
    let message = payload
        .as_ref()
        .and_then(|v| v.get("msg"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}: {}", body.trim()));

    let kind = match status {
        429 | 418 => ExchangeErrorKind::RateLimited,
        400..=499 if code == Some(TOO_MANY_REQUESTS) => ExchangeErrorKind::RateLimited,
        400..=499 => ExchangeErrorKind::Rejected,
        _ => ExchangeErrorKind::Network,
    };

    let err = ExchangeError::new(kind, message);
    match code {
        Some(c) => err.with_code(c),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_carries_binance_code() {
        let err = classify_http_error(400, r#"{"code":-2019,"msg":"Margin is insufficient."}"#);
        assert_eq!(err.kind, ExchangeErrorKind::Rejected);
        assert_eq!(err.code, Some(-2019));
        assert_eq!(err.message, "Margin is insufficient.");
    }

    #[test]
    fn rate_limit_statuses() {
        assert_eq!(classify_http_error(429, "").kind, ExchangeErrorKind::RateLimited);
        assert_eq!(classify_http_error(418, "").kind, ExchangeErrorKind::RateLimited);
        let err = classify_http_error(400, r#"{"code":-1003,"msg":"Too many requests."}"#);
        assert_eq!(err.kind, ExchangeErrorKind::RateLimited);
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_http_error(503, "Service Unavailable");
        assert_eq!(err.kind, ExchangeErrorKind::Network);
        assert!(err.is_transient());
        assert_eq!(err.code, None);
        assert!(err.message.contains("503"));
    }

    #[test]
    fn client_uses_trimmed_base_url() {
        let cfg = BinanceFuturesConfig {
            rest_url: "https://testnet.binancefuture.com/".into(),
            ..BinanceFuturesConfig::default()
        };
        let client = FuturesClient::new(&cfg);
        assert_eq!(client.base_url, "https://testnet.binancefuture.com");
    }
}

//! Binance futures module configuration.
//!
//! Holds API credentials, the REST endpoint and request timing. The URL has a
//! production default so only the credentials need to be specified.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the Binance USDT-margined futures backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinanceFuturesConfig {
    /// Binance API key.
    pub api_key: String,

    /// Binance API secret (HMAC-SHA256 signing).
    pub secret_key: String,

    /// USDT-margined futures REST API base URL.
    pub rest_url: String,

    /// Asset the account balance is read in.
    pub balance_asset: String,

    /// `recvWindow` for signed requests (milliseconds).
    pub recv_window: u64,

    /// Per-request HTTP timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for BinanceFuturesConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            rest_url: default_rest_url(),
            balance_asset: "USDT".into(),
            recv_window: 5000,
            request_timeout_ms: 10_000,
        }
    }
}

impl BinanceFuturesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `true` when both credentials are present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".into()
}

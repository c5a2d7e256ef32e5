//! Configuration types for the signal bot.
//!
//! Settings are read from a single JSON file. Every field has a default so a
//! minimal config only names what differs from the defaults.
//!
//! # Example
//!
//! ```json
//! {
//!   "log": { "module_name": "sigbot", "log_path": "/tmp/log" },
//!   "trading": {
//!     "dry_run": true,
//!     "default_leverage": 20,
//!     "position_fraction": "0.95",
//!     "split_policy": { "kind": "weighted", "weights": ["0.5", "0.3", "0.2"] },
//!     "scan_interval_secs": 30,
//!     "entry_fill_timeout_secs": 30
//!   },
//!   "telegram": { "bot_token": "123:abc", "chat_id": "-10042" },
//!   "status_path": "dashboard_state.json"
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::types::MarginMode;

/// Top-level application config shared by every component.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Logging metadata.
    #[serde(default)]
    pub log: LogMeta,

    /// Trading behavior.
    #[serde(default)]
    pub trading: TradingConfig,

    /// Optional Telegram forwarding of notifications.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Optional path of the JSON status snapshot.
    #[serde(default)]
    pub status_path: Option<String>,
}

/// Logging metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// How the position is split across take-profit targets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SplitPolicy {
    /// Equal share per target, rounding remainder on the last target.
    #[default]
    Even,
    /// Explicit weights per target (normalized over the targets in use).
    /// Targets beyond the list get no share.
    Weighted { weights: Vec<Decimal> },
}

/// Entry order style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    /// Market entry; the signal's entry price only serves as sizing reference.
    #[default]
    Market,
    /// Limit entry at the signal's entry price (market when it has none).
    Limit,
}

/// Trading behavior settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Use the simulated exchange instead of the live one.
    pub dry_run: bool,
    /// Leverage used when a signal carries none.
    pub default_leverage: u32,
    /// Margin mode used when a signal carries none.
    pub margin_mode: MarginMode,
    /// Fraction of available balance committed as margin per signal.
    pub position_fraction: Decimal,
    pub split_policy: SplitPolicy,
    /// Only the first `max_targets` targets enter the ladder (`None` = all).
    pub max_targets: Option<usize>,
    pub entry_mode: EntryMode,
    /// Clamp leverage above the exchange maximum instead of refusing the signal.
    pub clamp_leverage: bool,
    /// Recognized quote assets for symbol normalization.
    pub quote_assets: Vec<String>,
    /// Order monitor scan interval.
    pub scan_interval_secs: u64,
    /// Maximum wait for the entry order to fill.
    pub entry_fill_timeout_secs: u64,
    /// Poll interval while waiting for the entry fill.
    pub entry_poll_interval_ms: u64,
    /// Per-call deadline for exchange queries.
    pub query_timeout_secs: u64,
    /// Announce targets crossed by the mark price even if the order has not
    /// filled yet.
    pub mark_price_fallback: bool,
    /// Number of message IDs remembered for redelivery detection.
    pub dedup_capacity: usize,
    /// Forward execution failures as notifications.
    pub notify_failures: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            default_leverage: 20,
            margin_mode: MarginMode::Cross,
            position_fraction: Decimal::new(95, 2),
            split_policy: SplitPolicy::Even,
            max_targets: Some(3),
            entry_mode: EntryMode::Market,
            clamp_leverage: true,
            quote_assets: crate::types::DEFAULT_QUOTES.iter().map(|q| q.to_string()).collect(),
            scan_interval_secs: 30,
            entry_fill_timeout_secs: 30,
            entry_poll_interval_ms: 500,
            query_timeout_secs: 10,
            mark_price_fallback: false,
            dedup_capacity: 4096,
            notify_failures: true,
        }
    }
}

impl TradingConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn entry_fill_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_fill_timeout_secs)
    }

    pub fn entry_poll_interval(&self) -> Duration {
        Duration::from_millis(self.entry_poll_interval_ms.max(10))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        if self.position_fraction <= Decimal::ZERO || self.position_fraction > Decimal::ONE {
            return Err(ConfigError::Invalid(format!(
                "position_fraction must be in (0, 1], got {}",
                self.position_fraction
            )));
        }
        if self.default_leverage == 0 {
            return Err(ConfigError::Invalid("default_leverage must be at least 1".into()));
        }
        if self.max_targets == Some(0) {
            return Err(ConfigError::Invalid("max_targets must be at least 1".into()));
        }
        if let SplitPolicy::Weighted { weights } = &self.split_policy {
            if weights.is_empty() || weights.iter().any(|w| *w < Decimal::ZERO) {
                return Err(ConfigError::Invalid(
                    "weights must be non-empty and non-negative".into(),
                ));
            }
            if weights.iter().all(|w| w.is_zero()) {
                return Err(ConfigError::Invalid("at least one weight must be positive".into()));
            }
        }
        if self.quote_assets.is_empty() {
            return Err(ConfigError::Invalid("quote_assets must not be empty".into()));
        }
        Ok(())
    }
}

/// Telegram Bot API credentials for notification forwarding.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Load and parse a JSON config file into any deserializable config type.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)?;
    let config: T = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{ "trading": { "default_leverage": 50 } }"#).unwrap();
        assert_eq!(cfg.trading.default_leverage, 50);
        assert_eq!(cfg.trading.position_fraction, dec!(0.95));
        assert_eq!(cfg.trading.split_policy, SplitPolicy::Even);
        assert_eq!(cfg.trading.max_targets, Some(3));
        assert!(cfg.trading.validate().is_ok());
    }

    #[test]
    fn weighted_policy_parses() {
        let cfg: TradingConfig = serde_json::from_str(
            r#"{
                "split_policy": { "kind": "weighted", "weights": ["0.5", "0.3", "0.2"] },
                "entry_mode": "limit"
            }"#,
        )
        .unwrap();
        assert_eq!(
            cfg.split_policy,
            SplitPolicy::Weighted {
                weights: vec![dec!(0.5), dec!(0.3), dec!(0.2)]
            }
        );
        assert_eq!(cfg.entry_mode, EntryMode::Limit);
    }

    #[test]
    fn invalid_fraction_rejected() {
        let cfg = TradingConfig {
            position_fraction: dec!(1.5),
            ..TradingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}

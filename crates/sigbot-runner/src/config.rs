//! Runner configuration: the shared [`AppConfig`] plus exchange sections,
//! with credential and mode overrides from the environment.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sigbot_core::config::{AppConfig, TelegramConfig, load_config};
use sigbot_td::binance::config::BinanceFuturesConfig;
use sigbot_td::sim::SimulatorConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(flatten)]
    pub app: AppConfig,

    #[serde(default)]
    pub binance: BinanceFuturesConfig,

    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// In dry-run, feed live mark prices from the public futures API into
    /// the simulator so resting take-profits can fill.
    #[serde(default = "default_true")]
    pub dry_run_mark_feed: bool,
}

fn default_true() -> bool {
    true
}

impl RunnerConfig {
    /// Load the file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: RunnerConfig =
            load_config(path).with_context(|| format!("loading config {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.app.trading.validate()?;
        Ok(config)
    }

    /// Apply `DRY_RUN`, `BINANCE_API_KEY`, `BINANCE_API_SECRET`,
    /// `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(flag) = var("DRY_RUN") {
            let flag = flag.trim().to_ascii_lowercase();
            self.app.trading.dry_run = matches!(flag.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(key) = var("BINANCE_API_KEY") {
            self.binance.api_key = key;
        }
        if let Some(secret) = var("BINANCE_API_SECRET") {
            self.binance.secret_key = secret;
        }

        let token = var("TELEGRAM_BOT_TOKEN");
        let chat = var("TELEGRAM_CHAT_ID");
        if token.is_some() || chat.is_some() {
            let current = self.app.telegram.take();
            let (cur_token, cur_chat) =
                current.map(|t| (t.bot_token, t.chat_id)).unwrap_or_default();
            self.app.telegram = Some(TelegramConfig {
                bot_token: token.unwrap_or(cur_token),
                chat_id: chat.unwrap_or(cur_chat),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn sections_default_when_missing() {
        let cfg: RunnerConfig =
            serde_json::from_str(r#"{ "trading": { "dry_run": false } }"#).unwrap();
        assert!(!cfg.app.trading.dry_run);
        assert_eq!(cfg.binance.rest_url, "https://fapi.binance.com");
        assert_eq!(cfg.simulator.balance, dec!(1000));
        assert!(cfg.dry_run_mark_feed);
        assert!(cfg.app.telegram.is_none());
    }

    #[test]
    fn environment_overrides_file() {
        let mut cfg: RunnerConfig = serde_json::from_str(
            r#"{
                "trading": { "dry_run": false },
                "telegram": { "bot_token": "file", "chat_id": "-1" }
            }"#,
        )
        .unwrap();
        let env = HashMap::from([
            ("DRY_RUN", "true"),
            ("BINANCE_API_KEY", "key"),
            ("BINANCE_API_SECRET", "secret"),
            ("TELEGRAM_CHAT_ID", "-100"),
        ]);
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert!(cfg.app.trading.dry_run);
        assert_eq!(cfg.binance.api_key, "key");
        assert_eq!(cfg.binance.secret_key, "secret");
        let telegram = cfg.app.telegram.unwrap();
        assert_eq!(telegram.bot_token, "file");
        assert_eq!(telegram.chat_id, "-100");
    }
}

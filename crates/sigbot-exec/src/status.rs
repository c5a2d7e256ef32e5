//! Status board for external dashboards.
//!
//! Keeps the most recent signal, trade, take-profit and error, plus the run
//! mode and start time. When a path is configured every update is written as
//! a JSON snapshot: first to `<path>.tmp`, then renamed over `<path>`, so a
//! reader never sees a half-written file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sigbot_core::time_util::now_ms;
use tokio::sync::Mutex;
use tracing::warn;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub at_ms: u64,
    pub text: String,
}

/// Serialized board contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// `"DRY RUN"` or `"LIVE"`.
    pub mode: String,
    pub started_at_ms: u64,
    pub last_signal: Option<StatusEntry>,
    pub last_trade: Option<StatusEntry>,
    pub last_take_profit: Option<StatusEntry>,
    pub last_error: Option<StatusEntry>,
    pub open_positions: usize,
    pub signals_processed: u64,
}

pub struct StatusBoard {
    state: Mutex<StatusSnapshot>,
    path: Option<PathBuf>,
}

impl StatusBoard {
    pub fn new(dry_run: bool, path: Option<PathBuf>) -> Self {
        let snapshot = StatusSnapshot {
            mode: if dry_run { "DRY RUN" } else { "LIVE" }.to_string(),
            started_at_ms: now_ms(),
            ..StatusSnapshot::default()
        };
        Self {
            state: Mutex::new(snapshot),
            path,
        }
    }

    pub async fn record_signal(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|s| {
            s.signals_processed += 1;
            s.last_signal = Some(entry(text));
        })
        .await;
    }

    pub async fn record_trade(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|s| s.last_trade = Some(entry(text))).await;
    }

    pub async fn record_take_profit(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|s| s.last_take_profit = Some(entry(text))).await;
    }

    pub async fn record_error(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|s| s.last_error = Some(entry(text))).await;
    }

    pub async fn set_open_positions(&self, count: usize) {
        self.update(|s| s.open_positions = count).await;
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().await.clone()
    }

    async fn update(&self, apply: impl FnOnce(&mut StatusSnapshot)) {
        let snapshot = {
            let mut state = self.state.lock().await;
            apply(&mut *state);
            state.clone()
        };
        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &snapshot).await {
                warn!("[status] snapshot write to {} failed: {e:#}", path.display());
            }
        }
    }
}

fn entry(text: String) -> StatusEntry {
    StatusEntry { at_ms: now_ms(), text }
}

async fn persist(path: &Path, snapshot: &StatusSnapshot) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_latest_events() {
        let board = StatusBoard::new(true, None);
        board.record_signal("Long ETH/USDT").await;
        board.record_signal("Short BTC/USDT").await;
        board.record_error("entry-timeout").await;

        let snap = board.snapshot().await;
        assert_eq!(snap.mode, "DRY RUN");
        assert_eq!(snap.signals_processed, 2);
        assert_eq!(snap.last_signal.unwrap().text, "Short BTC/USDT");
        assert_eq!(snap.last_error.unwrap().text, "entry-timeout");
        assert!(snap.last_trade.is_none());
    }

    #[tokio::test]
    async fn snapshot_written_atomically() {
        let path = std::env::temp_dir().join(format!("sigbot-status-{}.json", std::process::id()));
        let board = StatusBoard::new(false, Some(path.clone()));
        board.record_trade("ETH/USDT opened").await;

        let written: StatusSnapshot =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.mode, "LIVE");
        assert_eq!(written.last_trade.unwrap().text, "ETH/USDT opened");
        assert!(!path.with_extension("json.tmp").exists());
        let _ = std::fs::remove_file(&path);
    }
}

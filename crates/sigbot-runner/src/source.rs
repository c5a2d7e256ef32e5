//! JSON-lines message source.
//!
//! Each line is one message: `{"message_id": 42, "text": "...", "timestamp_ms": 0}`.
//! `message_id` may be a string or a number. Blank lines are skipped and
//! malformed lines are logged and skipped.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use sigbot_core::MessageEvent;
use sigbot_core::time_util::now_ms;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Deserialize)]
struct RawMessage {
    message_id: Value,
    text: String,
    #[serde(default)]
    timestamp_ms: Option<u64>,
}

/// Decode one line. `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<MessageEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let raw: RawMessage = serde_json::from_str(line)?;
    let message_id = match raw.message_id {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        other => anyhow::bail!("message_id must be a string or number, got {other}"),
    };
    Ok(Some(MessageEvent {
        message_id,
        text: raw.text,
        timestamp_ms: raw.timestamp_ms.unwrap_or_else(now_ms),
    }))
}

/// Forward every message read from `reader` until EOF or until the receiver
/// is dropped. Returns the number of messages forwarded.
pub async fn pump<R: AsyncBufRead + Unpin>(
    reader: R,
    tx: mpsc::Sender<MessageEvent>,
) -> Result<usize> {
    let mut lines = reader.lines();
    let mut forwarded = 0;
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_line(&line) {
            Ok(Some(message)) => {
                if tx.send(message).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("[source] line {line_no} skipped: {e}"),
        }
    }
    info!("[source] input finished after {forwarded} message(s)");
    Ok(forwarded)
}

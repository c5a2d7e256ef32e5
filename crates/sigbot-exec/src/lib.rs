//! # sigbot-exec
//!
//! Signal interpretation and order execution pipeline.
//!
//! ```text
//! MessageEvent ─► SignalParser ─► RiskSizer ─► ExecutionEngine ─► PositionBook
//!                                                                    │
//!                     NotificationRouter ◄── Notification ◄── OrderMonitor (periodic)
//! ```
//!
//! | Module     | Role                                                      |
//! |------------|-----------------------------------------------------------|
//! | `parser`   | message text → `Signal` (pure)                            |
//! | `sizer`    | `Signal` + account → `OrderPlan` (pure)                   |
//! | `engine`   | leverage, entry, take-profit ladder; registers positions  |
//! | `book`     | tracked positions, one lock per position                  |
//! | `monitor`  | periodic order scan, achievements, closures               |
//! | `notify`   | notifiers and the routing task                            |
//! | `status`   | last-event board with optional JSON snapshot              |
//! | `pipeline` | per-message orchestration and dedup                       |

pub mod book;
pub mod engine;
pub mod monitor;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod sizer;
pub mod status;

use std::future::Future;
use std::time::Duration;

use sigbot_core::error::ExchangeError;
use sigbot_td::ExchangeResult;

/// Run an exchange call under a deadline; an elapsed deadline becomes a
/// `Timeout` error.
pub(crate) async fn bounded<T>(
    deadline: Duration,
    call: impl Future<Output = ExchangeResult<T>>,
) -> ExchangeResult<T> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::timeout(format!("no response within {deadline:?}"))),
    }
}

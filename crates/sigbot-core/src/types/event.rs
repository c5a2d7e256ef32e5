//! Events crossing the pipeline's boundaries.
//!
//! Inbound: [`MessageEvent`] from the messaging collaborator.
//! Outbound: [`Notification`]s for the notification router.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::Direction;
use super::symbol::Symbol;

/// A raw channel message as delivered by the messaging collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: String,
    pub text: String,
    /// Delivery timestamp (ms since epoch).
    #[serde(default)]
    pub timestamp_ms: u64,
}

/// What triggered an achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AchievementSource {
    /// The take-profit order reported filled.
    OrderFill,
    /// The mark price crossed the target while the order stayed open.
    MarkPrice,
}

/// A take-profit target was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub symbol: Symbol,
    /// 1-based target index.
    pub target_index: usize,
    pub target_price: Decimal,
    pub entry_price: Decimal,
    /// Return on margin in percent (leverage included).
    pub profit_percent: Decimal,
    pub source: AchievementSource,
}

/// Why a tracked position stopped being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Every take-profit order filled.
    TargetsFilled,
    /// The exchange no longer reports the position.
    External,
}

/// Outbound events forwarded to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    SignalDetected {
        message_id: String,
        raw_text: String,
        parsed_summary: String,
    },
    PositionOpened {
        symbol: Symbol,
        direction: Direction,
        entry_price: Decimal,
        quantity: Decimal,
        leverage: u32,
    },
    PartialExecution {
        symbol: Symbol,
        failed_targets: Vec<usize>,
    },
    ExecutionFailed {
        symbol: Symbol,
        reason: String,
    },
    Achievement(Achievement),
    PositionClosed {
        symbol: Symbol,
        reason: CloseReason,
    },
}

impl Notification {
    /// Short subject line.
    pub fn subject(&self) -> String {
        match self {
            Self::SignalDetected { .. } => "Signal detected".into(),
            Self::PositionOpened {
                symbol, direction, ..
            } => format!("{direction} {symbol} opened"),
            Self::PartialExecution { symbol, .. } => format!("{symbol} opened with missing exits"),
            Self::ExecutionFailed { symbol, .. } => format!("{symbol} execution failed"),
            Self::Achievement(a) => format!("{} target {} reached", a.symbol, a.target_index),
            Self::PositionClosed { symbol, .. } => format!("{symbol} closed"),
        }
    }

    /// Message body.
    pub fn body(&self) -> String {
        match self {
            Self::SignalDetected { parsed_summary, .. } => parsed_summary.clone(),
            Self::PositionOpened {
                entry_price,
                quantity,
                leverage,
                ..
            } => format!(
                "qty {} @ {} ({leverage}x)",
                quantity.normalize(),
                entry_price.normalize()
            ),
            Self::PartialExecution { failed_targets, .. } => {
                format!("take-profit orders for targets {failed_targets:?} could not be placed")
            }
            Self::ExecutionFailed { reason, .. } => reason.clone(),
            Self::Achievement(a) => format!(
                "price {} from entry {}: profit {}%",
                a.target_price.normalize(),
                a.entry_price.normalize(),
                a.profit_percent.normalize()
            ),
            Self::PositionClosed { reason, .. } => match reason {
                CloseReason::TargetsFilled => "all take-profit targets filled".into(),
                CloseReason::External => "position closed outside the bot".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn achievement_text() {
        let n = Notification::Achievement(Achievement {
            symbol: Symbol::new("ETH", "USDT"),
            target_index: 1,
            target_price: dec!(3158.47),
            entry_price: dec!(3127.20),
            profit_percent: dec!(99.99),
            source: AchievementSource::OrderFill,
        });
        assert_eq!(n.subject(), "ETH/USDT target 1 reached");
        assert_eq!(n.body(), "price 3158.47 from entry 3127.2: profit 99.99%");
    }
}

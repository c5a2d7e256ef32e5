//! Parsed trading signals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{Direction, MarginMode};
use super::symbol::Symbol;

/// A structured trade instruction extracted from one channel message.
///
/// Produced once by the parser and never mutated afterwards. `targets` is
/// non-empty and strictly ordered away from `entry_price` in the profitable
/// direction (ascending for long, descending for short).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub symbol: Symbol,
    /// Requested leverage; `None` defers to the configured default.
    pub leverage: Option<Decimal>,
    pub margin_mode: Option<MarginMode>,
    /// Requested entry price; `None` means market entry.
    pub entry_price: Option<Decimal>,
    pub targets: Vec<Decimal>,
    /// Original message text, kept for audit and forwarding.
    pub raw_text: String,
    /// Message ID assigned by the messaging collaborator.
    pub source_message_id: String,
}

impl Signal {
    /// One-line human-readable summary used in notifications and logs.
    pub fn summary(&self) -> String {
        let leverage = self
            .leverage
            .map(|l| format!("{}x", l.normalize()))
            .unwrap_or_else(|| "default".into());
        let entry = self
            .entry_price
            .map(|p| p.normalize().to_string())
            .unwrap_or_else(|| "market".into());
        let margin = self.margin_mode.map(|m| m.to_string()).unwrap_or_else(|| "-".into());
        let targets: Vec<String> = self.targets.iter().map(|t| t.normalize().to_string()).collect();
        format!(
            "{} {} lev={leverage} margin={margin} entry={entry} targets=[{}]",
            self.direction,
            self.symbol,
            targets.join(", "),
        )
    }
}

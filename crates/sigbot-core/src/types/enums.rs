//! Enumerations used throughout the signal bot.
//!
//! `Direction` describes the position a signal asks for, `Side` the side of an
//! individual order. A long position is opened with a buy and closed with a
//! sell; a short position the other way round.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Position direction
// ---------------------------------------------------------------------------

/// Direction of the position requested by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Order side that opens a position in this direction.
    pub fn entry_side(self) -> Side {
        match self {
            Self::Long => Side::Buy,
            Self::Short => Side::Sell,
        }
    }

    /// Order side that reduces a position in this direction.
    pub fn exit_side(self) -> Side {
        match self {
            Self::Long => Side::Sell,
            Self::Short => Side::Buy,
        }
    }

    /// `+1` for long, `-1` for short.
    pub fn sign(self) -> i8 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

// ---------------------------------------------------------------------------
// Margin mode
// ---------------------------------------------------------------------------

/// Futures margin mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl std::fmt::Display for MarginMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cross => write!(f, "Cross"),
            Self::Isolated => write!(f, "Isolated"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order enums
// ---------------------------------------------------------------------------

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire representation used by the exchange REST API.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }
}

/// Order status: unified view of the exchange's order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// `true` once the exchange will not change this order any more.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }

    /// `true` while the order can still fill.
    pub fn is_open(self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sides_follow_direction() {
        assert_eq!(Direction::Long.entry_side(), Side::Buy);
        assert_eq!(Direction::Long.exit_side(), Side::Sell);
        assert_eq!(Direction::Short.entry_side(), Side::Sell);
        assert_eq!(Direction::Short.exit_side(), Side::Buy);
    }

    #[test]
    fn final_statuses() {
        assert!(OrderStatus::Filled.is_final());
        assert!(OrderStatus::Canceled.is_final());
        assert!(!OrderStatus::PartiallyFilled.is_final());
        assert!(OrderStatus::PartiallyFilled.is_open());
    }
}

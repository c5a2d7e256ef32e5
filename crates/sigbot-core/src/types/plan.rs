//! Order plans: the sizer's output and the execution engine's input.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{Direction, MarginMode};
use super::symbol::Symbol;

/// How the entry order is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOrder {
    Market,
    Limit { price: Decimal },
}

/// One take-profit exit of the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderRung {
    /// 1-based index of the signal target this rung exits at.
    pub target_index: usize,
    pub price: Decimal,
    /// Share of the position closed by this rung.
    pub fraction: Decimal,
    /// Quantity in base units (already rounded to the instrument step).
    pub quantity: Decimal,
}

/// Informational changes the sizer made to what the signal asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingAdjustment {
    /// The signal carried no leverage; the configured default was used.
    DefaultLeverage { applied: u32 },
    /// Requested leverage above the exchange maximum was clamped.
    LeverageClamped { requested: Decimal, applied: u32 },
    /// Fractional leverage was floored to an integer.
    LeverageRounded { requested: Decimal, applied: u32 },
    /// Only the first `kept` targets enter the ladder.
    TargetsTruncated { kept: usize, dropped: usize },
    /// Rungs below the instrument minimum were merged into a neighbor.
    RungsMerged { merged: Vec<usize> },
}

impl std::fmt::Display for SizingAdjustment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DefaultLeverage { applied } => write!(f, "default leverage {applied}x applied"),
            Self::LeverageClamped { requested, applied } => {
                write!(f, "leverage {requested}x clamped to exchange maximum {applied}x")
            }
            Self::LeverageRounded { requested, applied } => {
                write!(f, "leverage {requested}x rounded down to {applied}x")
            }
            Self::TargetsTruncated { kept, dropped } => {
                write!(f, "kept {kept} targets, dropped {dropped}")
            }
            Self::RungsMerged { merged } => write!(f, "targets {merged:?} merged into neighbors"),
        }
    }
}

/// Everything the execution engine needs to open one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub symbol: Symbol,
    pub direction: Direction,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    /// Position size in base units.
    pub quantity: Decimal,
    pub entry: EntryOrder,
    /// Price used for sizing (signal entry or current mark).
    pub reference_price: Decimal,
    pub take_profit_ladder: Vec<LadderRung>,
    pub adjustments: Vec<SizingAdjustment>,
    pub source_message_id: String,
}

impl OrderPlan {
    /// Sum of all ladder fractions (1 for any valid plan).
    pub fn fraction_sum(&self) -> Decimal {
        self.take_profit_ladder.iter().map(|r| r.fraction).sum()
    }
}

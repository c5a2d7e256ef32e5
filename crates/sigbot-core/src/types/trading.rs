//! Exchange-facing data structures: order requests, handles, status reports,
//! account snapshots and instrument trading rules.
//!
//! These types flow between the execution pipeline and the exchange
//! collaborator (live or simulated).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{OrderStatus, OrderType, Side};

// ---------------------------------------------------------------------------
// Order request (pipeline → exchange)
// ---------------------------------------------------------------------------

/// An order the pipeline asks the exchange to place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Exchange symbol (e.g. `"ETHUSDT"`).
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price (required for limit orders, ignored for market orders).
    pub price: Option<Decimal>,
    /// Only reduce an existing position (take-profit exits).
    pub reduce_only: bool,
    /// Price the pipeline expects the order to fill near. Never sent to a live
    /// exchange; the simulator fills market orders at it.
    pub reference_price: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Order handle / state (exchange → pipeline)
// ---------------------------------------------------------------------------

/// Identifies an order placed on the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHandle {
    /// Exchange symbol.
    pub symbol: String,
    /// Exchange-assigned order ID.
    pub order_id: u64,
    /// Client-assigned order ID.
    pub client_order_id: String,
}

impl std::fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.symbol, self.order_id)
    }
}

/// Point-in-time status of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub status: OrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Average fill price, if anything filled.
    pub avg_price: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A non-zero position reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Exchange symbol.
    pub symbol: String,
    /// Net amount (positive = long, negative = short).
    pub amount: Decimal,
    pub entry_price: Decimal,
}

/// Balance and open positions of the trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Available balance in the quote asset.
    pub balance: Decimal,
    pub open_positions: Vec<OpenPosition>,
}

impl AccountSnapshot {
    /// Returns the open position for an exchange symbol, if any.
    pub fn position(&self, symbol: &str) -> Option<&OpenPosition> {
        self.open_positions.iter().find(|p| p.symbol == symbol && !p.amount.is_zero())
    }
}

// ---------------------------------------------------------------------------
// Instrument rules
// ---------------------------------------------------------------------------

/// Trading filters of one instrument (from the exchange's symbol info).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRules {
    /// Exchange symbol.
    pub symbol: String,
    /// Quantity increment.
    pub step_size: Decimal,
    /// Smallest accepted order quantity.
    pub min_qty: Decimal,
    /// Smallest accepted order notional (quantity × price).
    pub min_notional: Decimal,
    /// Price increment.
    pub tick_size: Decimal,
    /// Highest leverage the exchange allows for this symbol.
    pub max_leverage: u32,
}

impl InstrumentRules {
    /// Round a quantity down to the step size.
    pub fn floor_qty(&self, qty: Decimal) -> Decimal {
        floor_to_increment(qty, self.step_size)
    }

    /// Round a price to the nearest tick.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        ((price / self.tick_size).round() * self.tick_size).normalize()
    }

    /// `true` if an order of `qty` at `price` passes the minimum filters.
    pub fn accepts(&self, qty: Decimal, price: Decimal) -> bool {
        qty > Decimal::ZERO && qty >= self.min_qty && qty * price >= self.min_notional
    }
}

/// Round `value` down to a multiple of `increment` (no-op for a zero increment).
pub fn floor_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    ((value / increment).floor() * increment).normalize()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn rules() -> InstrumentRules {
        InstrumentRules {
            symbol: "ETHUSDT".into(),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
            tick_size: dec!(0.01),
            max_leverage: 125,
        }
    }

    #[test]
    fn floor_qty_rounds_down() {
        assert_eq!(rules().floor_qty(dec!(1.23456)), dec!(1.234));
        assert_eq!(rules().floor_qty(dec!(0.0009)), dec!(0));
    }

    #[test]
    fn round_price_to_tick() {
        assert_eq!(rules().round_price(dec!(3158.474)), dec!(3158.47));
        assert_eq!(rules().round_price(dec!(3158.476)), dec!(3158.48));
    }

    #[test]
    fn minimum_filters() {
        assert!(rules().accepts(dec!(0.002), dec!(3000)));
        assert!(!rules().accepts(dec!(0.001), dec!(3000)));
        assert!(!rules().accepts(dec!(0), dec!(3000)));
    }

    #[test]
    fn snapshot_ignores_flat_positions() {
        let snap = AccountSnapshot {
            balance: dec!(100),
            open_positions: vec![OpenPosition {
                symbol: "ETHUSDT".into(),
                amount: dec!(0),
                entry_price: dec!(0),
            }],
        };
        assert!(snap.position("ETHUSDT").is_none());
    }
}

//! Live positions tracked between entry fill and final exit.
//!
//! A [`Position`] is created by the execution engine once the entry order has
//! filled and is afterwards mutated only by the order monitor. An entry whose
//! cancel could not be confirmed is tracked as well, as a position awaiting
//! entry; the monitor settles it once the order reaches a final state. The set of
//! notified targets grows monotonically; it is the only mechanism that keeps a
//! target from being announced twice.
//!
//! Fill quantities are applied as *cumulative* per-order amounts, so observing
//! the same order state twice never reduces the remaining quantity twice.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{Direction, OrderStatus};
use super::event::{Achievement, AchievementSource};
use super::plan::{EntryOrder, LadderRung, OrderPlan};
use super::symbol::Symbol;
use super::trading::{InstrumentRules, OrderHandle, OrderState};

/// Key of a tracked position: exchange symbol + entry order ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub entry_order_id: u64,
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.symbol, self.entry_order_id)
    }
}

/// Result of applying one take-profit order observation to a position.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetUpdate {
    /// Nothing changed (order still resting).
    Pending,
    /// Part of the order filled; no notification yet.
    PartiallyFilled { filled: Decimal },
    /// The order filled. Carries the achievement if this is the first time
    /// the target is reported.
    Filled(Option<Achievement>),
    /// The order ended without filling completely; it is no longer polled.
    Detached(OrderStatus),
}

/// An entry order still resting on the exchange after the bot gave up on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub order: OrderHandle,
    pub plan: OrderPlan,
    pub rules: InstrumentRules,
}

/// A position opened from a signal, together with its take-profit ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    key: PositionKey,
    symbol: Symbol,
    direction: Direction,
    leverage: u32,
    entry_fill_price: Decimal,
    total_quantity: Decimal,
    remaining_quantity: Decimal,
    /// Ladder rungs, keyed by target index.
    targets: BTreeMap<usize, LadderRung>,
    /// Live take-profit orders still being polled.
    take_profit_orders: BTreeMap<usize, OrderHandle>,
    /// Target indices already announced.
    filled_targets: BTreeSet<usize>,
    /// Cumulative filled quantity per target order.
    target_fills: BTreeMap<usize, Decimal>,
    /// Set while the entry order has not reached a final state.
    pending_entry: Option<PendingEntry>,
    opened_at_ms: u64,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        key: PositionKey,
        symbol: Symbol,
        direction: Direction,
        leverage: u32,
        entry_fill_price: Decimal,
        quantity: Decimal,
        ladder: Vec<LadderRung>,
        take_profit_orders: BTreeMap<usize, OrderHandle>,
        opened_at_ms: u64,
    ) -> Self {
        Self {
            key,
            symbol,
            direction,
            leverage,
            entry_fill_price,
            total_quantity: quantity,
            remaining_quantity: quantity,
            targets: ladder.into_iter().map(|r| (r.target_index, r)).collect(),
            take_profit_orders,
            filled_targets: BTreeSet::new(),
            target_fills: BTreeMap::new(),
            pending_entry: None,
            opened_at_ms,
        }
    }

    /// Track an entry order whose outcome is not known yet. Nothing is
    /// exposed until [`Position::settle_entry`] records the fill.
    pub fn awaiting_entry(key: PositionKey, entry: PendingEntry, opened_at_ms: u64) -> Self {
        let plan = &entry.plan;
        let price = match plan.entry {
            EntryOrder::Limit { price } => price,
            EntryOrder::Market => plan.reference_price,
        };
        let mut position = Self::open(
            key,
            plan.symbol.clone(),
            plan.direction,
            plan.leverage,
            price,
            Decimal::ZERO,
            Vec::new(),
            BTreeMap::new(),
            opened_at_ms,
        );
        position.pending_entry = Some(entry);
        position
    }

    /// Record the settled entry: fill, ladder and the take-profit orders
    /// placed for it.
    pub fn settle_entry(
        &mut self,
        entry_fill_price: Decimal,
        quantity: Decimal,
        ladder: Vec<LadderRung>,
        take_profit_orders: BTreeMap<usize, OrderHandle>,
    ) {
        self.pending_entry = None;
        self.entry_fill_price = entry_fill_price;
        self.total_quantity = quantity;
        self.remaining_quantity = quantity;
        self.targets = ladder.into_iter().map(|r| (r.target_index, r)).collect();
        self.take_profit_orders = take_profit_orders;
    }

    /// Give up on an entry that ended without any fill.
    pub fn abandon_entry(&mut self) -> Option<PendingEntry> {
        self.pending_entry.take()
    }

    pub fn pending_entry(&self) -> Option<&PendingEntry> {
        self.pending_entry.as_ref()
    }

    pub fn key(&self) -> &PositionKey {
        &self.key
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    pub fn entry_fill_price(&self) -> Decimal {
        self.entry_fill_price
    }

    pub fn total_quantity(&self) -> Decimal {
        self.total_quantity
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.remaining_quantity
    }

    pub fn opened_at_ms(&self) -> u64 {
        self.opened_at_ms
    }

    pub fn filled_targets(&self) -> &BTreeSet<usize> {
        &self.filled_targets
    }

    /// Take-profit orders that still need polling.
    pub fn open_orders(&self) -> Vec<(usize, OrderHandle)> {
        self.take_profit_orders.iter().map(|(i, h)| (*i, h.clone())).collect()
    }

    /// `true` once nothing is left to exit.
    pub fn is_closed(&self) -> bool {
        self.pending_entry.is_none() && self.remaining_quantity <= Decimal::ZERO
    }

    /// Targets not yet announced.
    pub fn pending_targets(&self) -> Vec<usize> {
        self.targets.keys().copied().filter(|i| !self.filled_targets.contains(i)).collect()
    }

    /// Apply an observed state of the take-profit order for `index`.
    pub fn apply_order_state(&mut self, index: usize, state: &OrderState) -> TargetUpdate {
        if !self.take_profit_orders.contains_key(&index) {
            return TargetUpdate::Pending;
        }
        match state.status {
            OrderStatus::New => TargetUpdate::Pending,
            OrderStatus::PartiallyFilled => {
                self.record_fill(index, state.filled_quantity);
                TargetUpdate::PartiallyFilled {
                    filled: state.filled_quantity,
                }
            }
            OrderStatus::Filled => {
                let filled = if state.filled_quantity > Decimal::ZERO {
                    state.filled_quantity
                } else {
                    self.targets.get(&index).map(|r| r.quantity).unwrap_or_default()
                };
                self.record_fill(index, filled);
                self.take_profit_orders.remove(&index);
                TargetUpdate::Filled(self.notify_once(index, AchievementSource::OrderFill))
            }
            status @ (OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired) => {
                self.record_fill(index, state.filled_quantity);
                self.take_profit_orders.remove(&index);
                TargetUpdate::Detached(status)
            }
        }
    }

    /// Announce every pending target whose price the mark price has crossed.
    pub fn apply_mark_price(&mut self, mark: Decimal) -> Vec<Achievement> {
        if self.pending_entry.is_some() {
            return Vec::new();
        }
        let crossed: Vec<usize> = self
            .targets
            .values()
            .filter(|r| !self.filled_targets.contains(&r.target_index))
            .filter(|r| match self.direction {
                Direction::Long => mark >= r.price,
                Direction::Short => mark <= r.price,
            })
            .map(|r| r.target_index)
            .collect();
        crossed
            .into_iter()
            .filter_map(|i| self.notify_once(i, AchievementSource::MarkPrice))
            .collect()
    }

    /// Mark the position as closed outside the bot's control.
    pub fn close_externally(&mut self) -> Vec<(usize, OrderHandle)> {
        self.remaining_quantity = Decimal::ZERO;
        std::mem::take(&mut self.take_profit_orders).into_iter().collect()
    }

    /// Profit of the target in percent of margin:
    /// `(target − entry) / entry × leverage × sign × 100`.
    pub fn profit_percent(&self, target_price: Decimal) -> Decimal {
        if self.entry_fill_price.is_zero() {
            return Decimal::ZERO;
        }
        let change = (target_price - self.entry_fill_price) / self.entry_fill_price;
        let sign = Decimal::from(self.direction.sign());
        (change * Decimal::from(self.leverage) * sign * Decimal::ONE_HUNDRED).round_dp(2)
    }

    fn record_fill(&mut self, index: usize, cumulative: Decimal) {
        let previous = self.target_fills.get(&index).copied().unwrap_or_default();
        if cumulative <= previous {
            return;
        }
        self.target_fills.insert(index, cumulative);
        self.remaining_quantity =
            (self.remaining_quantity - (cumulative - previous)).max(Decimal::ZERO);
    }

    fn notify_once(&mut self, index: usize, source: AchievementSource) -> Option<Achievement> {
        let rung = self.targets.get(&index)?;
        let target_price = rung.price;
        if !self.filled_targets.insert(index) {
            return None;
        }
        Some(Achievement {
            symbol: self.symbol.clone(),
            target_index: index,
            target_price,
            entry_price: self.entry_fill_price,
            profit_percent: self.profit_percent(target_price),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::types::enums::MarginMode;

    fn handle(id: u64) -> OrderHandle {
        OrderHandle {
            symbol: "ETHUSDT".into(),
            order_id: id,
            client_order_id: format!("c{id}"),
        }
    }

    fn rung(index: usize, price: Decimal, qty: Decimal) -> LadderRung {
        LadderRung {
            target_index: index,
            price,
            fraction: dec!(0.5),
            quantity: qty,
        }
    }

    fn long_position() -> Position {
        let orders = BTreeMap::from([(1, handle(11)), (2, handle(12))]);
        Position::open(
            PositionKey {
                symbol: "ETHUSDT".into(),
                entry_order_id: 10,
            },
            Symbol::new("ETH", "USDT"),
            Direction::Long,
            100,
            dec!(3127.20),
            dec!(2),
            vec![rung(1, dec!(3158.47), dec!(1)), rung(2, dec!(3189.74), dec!(1))],
            orders,
            0,
        )
    }

    fn filled(qty: Decimal) -> OrderState {
        OrderState {
            status: OrderStatus::Filled,
            filled_quantity: qty,
            avg_price: None,
        }
    }

    #[test]
    fn fill_notifies_once() {
        let mut pos = long_position();
        let first = pos.apply_order_state(1, &filled(dec!(1)));
        let TargetUpdate::Filled(Some(ach)) = first else {
            panic!("expected achievement, got {first:?}");
        };
        assert_eq!(ach.target_index, 1);
        assert_eq!(ach.profit_percent, dec!(99.99));
        assert_eq!(pos.remaining_quantity(), dec!(1));

        // Same observation again: no second achievement, no second reduction.
        assert_eq!(pos.apply_order_state(1, &filled(dec!(1))), TargetUpdate::Pending);
        assert_eq!(pos.remaining_quantity(), dec!(1));
        assert_eq!(pos.filled_targets().len(), 1);
    }

    #[test]
    fn partial_fills_are_cumulative() {
        let mut pos = long_position();
        let partial = OrderState {
            status: OrderStatus::PartiallyFilled,
            filled_quantity: dec!(0.4),
            avg_price: None,
        };
        pos.apply_order_state(2, &partial);
        pos.apply_order_state(2, &partial);
        assert_eq!(pos.remaining_quantity(), dec!(1.6));
        assert!(pos.filled_targets().is_empty());

        pos.apply_order_state(2, &filled(dec!(1)));
        assert_eq!(pos.remaining_quantity(), dec!(1));
    }

    #[test]
    fn all_targets_close_position() {
        let mut pos = long_position();
        pos.apply_order_state(1, &filled(dec!(1)));
        pos.apply_order_state(2, &filled(dec!(1)));
        assert!(pos.is_closed());
        assert!(pos.open_orders().is_empty());
    }

    #[test]
    fn canceled_order_detaches_without_notifying() {
        let mut pos = long_position();
        let canceled = OrderState {
            status: OrderStatus::Canceled,
            filled_quantity: dec!(0),
            avg_price: None,
        };
        assert_eq!(
            pos.apply_order_state(1, &canceled),
            TargetUpdate::Detached(OrderStatus::Canceled)
        );
        assert_eq!(pos.open_orders().len(), 1);
        assert_eq!(pos.pending_targets(), vec![1, 2]);
    }

    #[test]
    fn mark_price_fallback_then_fill_notifies_once() {
        let mut pos = long_position();
        let achieved = pos.apply_mark_price(dec!(3160));
        assert_eq!(achieved.len(), 1);
        assert_eq!(achieved[0].source, AchievementSource::MarkPrice);

        // The order fills later: quantity is reduced, no second announcement.
        assert_eq!(pos.apply_order_state(1, &filled(dec!(1))), TargetUpdate::Filled(None));
        assert_eq!(pos.remaining_quantity(), dec!(1));
        assert!(pos.apply_mark_price(dec!(3160)).is_empty());
    }

    #[test]
    fn awaiting_entry_stays_open_until_settled() {
        let plan = OrderPlan {
            symbol: Symbol::new("ETH", "USDT"),
            direction: Direction::Long,
            leverage: 20,
            margin_mode: MarginMode::Cross,
            quantity: dec!(2),
            entry: EntryOrder::Limit { price: dec!(3127.20) },
            reference_price: dec!(3127.20),
            take_profit_ladder: vec![
                rung(1, dec!(3158.47), dec!(1)),
                rung(2, dec!(3189.74), dec!(1)),
            ],
            adjustments: Vec::new(),
            source_message_id: "7".into(),
        };
        let rules = InstrumentRules {
            symbol: "ETHUSDT".into(),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
            tick_size: dec!(0.01),
            max_leverage: 125,
        };
        let key = PositionKey {
            symbol: "ETHUSDT".into(),
            entry_order_id: 10,
        };
        let mut pos = Position::awaiting_entry(
            key,
            PendingEntry {
                order: handle(10),
                plan,
                rules,
            },
            0,
        );
        assert!(!pos.is_closed());
        assert!(pos.open_orders().is_empty());
        assert!(pos.apply_mark_price(dec!(4000)).is_empty());

        pos.settle_entry(
            dec!(3127.20),
            dec!(2),
            vec![rung(1, dec!(3158.47), dec!(1)), rung(2, dec!(3189.74), dec!(1))],
            BTreeMap::from([(1, handle(11)), (2, handle(12))]),
        );
        assert!(pos.pending_entry().is_none());
        assert_eq!(pos.remaining_quantity(), dec!(2));
        assert_eq!(pos.pending_targets(), vec![1, 2]);
        assert_eq!(pos.apply_mark_price(dec!(3160)).len(), 1);
    }

    #[test]
    fn short_profit_is_positive_below_entry() {
        let pos = Position::open(
            PositionKey {
                symbol: "BTCUSDT".into(),
                entry_order_id: 1,
            },
            Symbol::new("BTC", "USDT"),
            Direction::Short,
            10,
            dec!(100),
            dec!(1),
            vec![rung(1, dec!(95), dec!(1))],
            BTreeMap::new(),
            0,
        );
        assert_eq!(pos.profit_percent(dec!(95)), dec!(50));
    }
}

//! Signal → order plan translation.
//!
//! [`RiskSizer::size`] is pure: it combines a [`Signal`] with an account
//! snapshot and the instrument's trading rules and either returns an
//! [`OrderPlan`] or a [`SizingFailure`]. Nothing here talks to the exchange.
//!
//! # Sizing
//!
//! ```text
//! leverage  = signal leverage (floored, clamped to the exchange maximum)
//!             or the configured default
//! reference = signal entry price, else current mark price
//! quantity  = floor_step(balance × position_fraction × leverage / reference)
//! ```
//!
//! Every deviation from what the signal asked for is recorded as a
//! [`SizingAdjustment`] on the plan.
//!
//! # Take-profit ladder
//!
//! The position is split across targets by the configured [`SplitPolicy`].
//! Each rung except the last is floored to the step size; the last rung takes
//! the remainder so quantities always sum to the position size. A rung too
//! small for the exchange's minimum order is merged into the next rung (the
//! last into the previous one).

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sigbot_core::config::{EntryMode, SplitPolicy, TradingConfig};
use sigbot_core::error::SizingFailure;
use sigbot_core::{
    AccountSnapshot, EntryOrder, InstrumentRules, LadderRung, OrderPlan, Signal, SizingAdjustment,
};

/// Computes order plans from signals.
#[derive(Debug, Clone)]
pub struct RiskSizer {
    config: TradingConfig,
}

impl RiskSizer {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Build an order plan for `signal`.
    ///
    /// `mark_price` is only consulted when the signal has no entry price.
    pub fn size(
        &self,
        signal: &Signal,
        account: &AccountSnapshot,
        rules: &InstrumentRules,
        mark_price: Option<Decimal>,
    ) -> Result<OrderPlan, SizingFailure> {
        let exchange_symbol = signal.symbol.exchange();
        if account.position(&exchange_symbol).is_some() {
            return Err(SizingFailure::PositionAlreadyOpen(exchange_symbol));
        }
        if rules.step_size <= Decimal::ZERO || rules.max_leverage == 0 {
            return Err(SizingFailure::InvalidInstrument(exchange_symbol));
        }

        let mut adjustments = Vec::new();
        let leverage =
            self.resolve_leverage(signal.leverage, rules.max_leverage, &mut adjustments)?;

        let reference_price = signal
            .entry_price
            .or(mark_price)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or(SizingFailure::NoReferencePrice)?;

        if account.balance <= Decimal::ZERO {
            return Err(SizingFailure::InsufficientBalance);
        }
        let margin = account.balance * self.config.position_fraction;
        let quantity = rules.floor_qty(margin * Decimal::from(leverage) / reference_price);
        if !rules.accepts(quantity, reference_price) {
            return Err(SizingFailure::InsufficientBalance);
        }

        let kept = self
            .config
            .max_targets
            .map_or(signal.targets.len(), |max| max.min(signal.targets.len()));
        if kept < signal.targets.len() {
            adjustments.push(SizingAdjustment::TargetsTruncated {
                kept,
                dropped: signal.targets.len() - kept,
            });
        }

        let weighted = weight_targets(&signal.targets[..kept], &self.config.split_policy);
        let (take_profit_ladder, merged) = split_ladder(quantity, &weighted, rules);
        if !merged.is_empty() {
            adjustments.push(SizingAdjustment::RungsMerged { merged });
        }

        let entry = match (self.config.entry_mode, signal.entry_price) {
            (EntryMode::Limit, Some(price)) => EntryOrder::Limit {
                price: rules.round_price(price),
            },
            _ => EntryOrder::Market,
        };

        Ok(OrderPlan {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            leverage,
            margin_mode: signal.margin_mode.unwrap_or(self.config.margin_mode),
            quantity,
            entry,
            reference_price,
            take_profit_ladder,
            adjustments,
            source_message_id: signal.source_message_id.clone(),
        })
    }

    fn resolve_leverage(
        &self,
        requested: Option<Decimal>,
        max: u32,
        adjustments: &mut Vec<SizingAdjustment>,
    ) -> Result<u32, SizingFailure> {
        let Some(requested) = requested else {
            let applied = self.config.default_leverage;
            if applied > max {
                return self.clamp(Decimal::from(applied), max, adjustments);
            }
            adjustments.push(SizingAdjustment::DefaultLeverage { applied });
            return Ok(applied);
        };

        if requested < Decimal::ONE {
            return Err(SizingFailure::InvalidLeverage(requested.normalize().to_string()));
        }
        let floored = requested.floor();
        let applied = floored.to_u32().unwrap_or(u32::MAX);
        if applied > max {
            return self.clamp(requested, max, adjustments);
        }
        if floored != requested {
            adjustments.push(SizingAdjustment::LeverageRounded { requested, applied });
        }
        Ok(applied)
    }

    fn clamp(
        &self,
        requested: Decimal,
        max: u32,
        adjustments: &mut Vec<SizingAdjustment>,
    ) -> Result<u32, SizingFailure> {
        if !self.config.clamp_leverage {
            return Err(SizingFailure::LeverageOutOfBounds {
                requested: requested.normalize().to_string(),
                max,
            });
        }
        adjustments.push(SizingAdjustment::LeverageClamped { requested, applied: max });
        Ok(max)
    }
}

/// `(target_index, price, weight)` for each target with a positive weight.
fn weight_targets(targets: &[Decimal], policy: &SplitPolicy) -> Vec<(usize, Decimal, Decimal)> {
    let even = || -> Vec<(usize, Decimal, Decimal)> {
        targets.iter().enumerate().map(|(i, p)| (i + 1, *p, Decimal::ONE)).collect()
    };
    match policy {
        SplitPolicy::Even => even(),
        SplitPolicy::Weighted { weights } => {
            let weighted: Vec<_> = targets
                .iter()
                .enumerate()
                .filter_map(|(i, p)| {
                    let w = weights.get(i).copied().unwrap_or_default();
                    (w > Decimal::ZERO).then_some((i + 1, *p, w))
                })
                .collect();
            if weighted.is_empty() { even() } else { weighted }
        }
    }
}

/// Rebuild a ladder for a different quantity, keeping each rung's share.
///
/// Used when the entry only partially filled. Rung quantities serve as the
/// weights so the shares carry over exactly.
pub fn rescale_ladder(
    ladder: &[LadderRung],
    quantity: Decimal,
    rules: &InstrumentRules,
) -> (Vec<LadderRung>, Vec<usize>) {
    let weighted: Vec<_> = ladder.iter().map(|r| (r.target_index, r.price, r.quantity)).collect();
    split_ladder(quantity, &weighted, rules)
}

/// Split `quantity` over weighted targets. Returns the rungs and the target
/// indices that were merged away.
fn split_ladder(
    quantity: Decimal,
    targets: &[(usize, Decimal, Decimal)],
    rules: &InstrumentRules,
) -> (Vec<LadderRung>, Vec<usize>) {
    if targets.is_empty() || quantity <= Decimal::ZERO {
        return (Vec::new(), Vec::new());
    }
    let total_weight: Decimal = targets.iter().map(|(_, _, w)| *w).sum();

    // (index, price, qty)
    let mut rungs: Vec<(usize, Decimal, Decimal)> = Vec::with_capacity(targets.len());
    let mut assigned = Decimal::ZERO;
    for (pos, (index, price, weight)) in targets.iter().enumerate() {
        let qty = if pos + 1 == targets.len() {
            quantity - assigned
        } else {
            rules.floor_qty(quantity * *weight / total_weight)
        };
        assigned += qty;
        rungs.push((*index, rules.round_price(*price), qty));
    }

    let mut merged = Vec::new();

    // Forward merge: a too-small rung hands its quantity to the next one.
    let mut i = 0;
    while i + 1 < rungs.len() {
        let (index, price, qty) = rungs[i];
        if !rules.accepts(qty, price) {
            rungs[i + 1].2 += qty;
            rungs.remove(i);
            merged.push(index);
            continue;
        }
        i += 1;
    }

    // Backward merge for the last rung.
    if rungs.len() > 1 {
        if let Some(&(index, price, qty)) = rungs.last() {
            if !rules.accepts(qty, price) {
                rungs.pop();
                if let Some(prev) = rungs.last_mut() {
                    prev.2 += qty;
                }
                merged.push(index);
            }
        }
    }
    merged.sort_unstable();

    let mut fraction_sum = Decimal::ZERO;
    let count = rungs.len();
    let ladder = rungs
        .into_iter()
        .enumerate()
        .map(|(pos, (target_index, price, qty))| {
            let fraction = if pos + 1 == count {
                Decimal::ONE - fraction_sum
            } else {
                (qty / quantity).round_dp(12)
            };
            fraction_sum += fraction;
            LadderRung {
                target_index,
                price,
                fraction,
                quantity: qty.normalize(),
            }
        })
        .collect();
    (ladder, merged)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use sigbot_core::{Direction, MarginMode, OpenPosition, Symbol};

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

    fn account(balance: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            balance,
            open_positions: Vec::new(),
        }
    }

    fn eth_signal() -> Signal {
        Signal {
            direction: Direction::Long,
            symbol: Symbol::new("ETH", "USDT"),
            leverage: Some(dec!(100.0)),
            margin_mode: Some(MarginMode::Cross),
            entry_price: Some(dec!(3127.20)),
            targets: vec![dec!(3158.47), dec!(3189.74), dec!(3220.01)],
            raw_text: String::new(),
            source_message_id: "42".into(),
        }
    }

    fn sizer() -> RiskSizer {
        RiskSizer::new(TradingConfig::default())
    }

    #[test]
    fn sizes_reference_signal() {
        let plan = sizer().size(&eth_signal(), &account(dec!(1000)), &rules(), None).unwrap();
        assert_eq!(plan.leverage, 100);
        assert_eq!(plan.margin_mode, MarginMode::Cross);
        assert_eq!(plan.entry, EntryOrder::Market);
        assert_eq!(plan.reference_price, dec!(3127.20));
        // 1000 × 0.95 × 100 / 3127.2 = 30.3786… → 30.378
        assert_eq!(plan.quantity, dec!(30.378));
        assert!(plan.adjustments.is_empty());

        let qtys: Vec<Decimal> = plan.take_profit_ladder.iter().map(|r| r.quantity).collect();
        assert_eq!(qtys, vec![dec!(10.126), dec!(10.126), dec!(10.126)]);
        assert_eq!(plan.fraction_sum(), Decimal::ONE);
    }

    #[test]
    fn quantity_stays_within_balance_fraction() {
        let plan = sizer().size(&eth_signal(), &account(dec!(57.31)), &rules(), None).unwrap();
        let margin_used = plan.quantity * plan.reference_price / Decimal::from(plan.leverage);
        assert!(margin_used <= dec!(57.31) * dec!(0.95));
        assert!(plan.quantity >= rules().min_qty);
    }

    #[test]
    fn tiny_balance_is_insufficient() {
        let err = sizer().size(&eth_signal(), &account(dec!(0.01)), &rules(), None).unwrap_err();
        assert_eq!(err, SizingFailure::InsufficientBalance);
    }

    #[test]
    fn leverage_clamped_or_refused() {
        let mut signal = eth_signal();
        signal.leverage = Some(dec!(200));
        let plan = sizer().size(&signal, &account(dec!(1000)), &rules(), None).unwrap();
        assert_eq!(plan.leverage, 125);
        assert_eq!(
            plan.adjustments,
            vec![SizingAdjustment::LeverageClamped {
                requested: dec!(200),
                applied: 125
            }]
        );

        let strict = RiskSizer::new(TradingConfig {
            clamp_leverage: false,
            ..TradingConfig::default()
        });
        let err = strict.size(&signal, &account(dec!(1000)), &rules(), None).unwrap_err();
        assert_eq!(
            err,
            SizingFailure::LeverageOutOfBounds {
                requested: "200".into(),
                max: 125
            }
        );
    }

    #[test]
    fn fractional_and_default_leverage() {
        let mut signal = eth_signal();
        signal.leverage = Some(dec!(12.5));
        let plan = sizer().size(&signal, &account(dec!(1000)), &rules(), None).unwrap();
        assert_eq!(plan.leverage, 12);
        assert!(matches!(
            plan.adjustments[0],
            SizingAdjustment::LeverageRounded { applied: 12, .. }
        ));

        signal.leverage = None;
        let plan = sizer().size(&signal, &account(dec!(1000)), &rules(), None).unwrap();
        assert_eq!(plan.leverage, 20);
        assert_eq!(plan.adjustments, vec![SizingAdjustment::DefaultLeverage { applied: 20 }]);

        signal.leverage = Some(dec!(0.5));
        assert!(matches!(
            sizer().size(&signal, &account(dec!(1000)), &rules(), None),
            Err(SizingFailure::InvalidLeverage(_))
        ));
    }

    #[test]
    fn existing_position_blocks_signal() {
        let snapshot = AccountSnapshot {
            balance: dec!(1000),
            open_positions: vec![OpenPosition {
                symbol: "ETHUSDT".into(),
                amount: dec!(1),
                entry_price: dec!(3000),
            }],
        };
        let err = sizer().size(&eth_signal(), &snapshot, &rules(), None).unwrap_err();
        assert_eq!(err, SizingFailure::PositionAlreadyOpen("ETHUSDT".into()));
    }

    #[test]
    fn market_signal_sizes_against_mark() {
        let mut signal = eth_signal();
        signal.entry_price = None;
        assert_eq!(
            sizer().size(&signal, &account(dec!(1000)), &rules(), None).unwrap_err(),
            SizingFailure::NoReferencePrice
        );
        let plan = sizer()
            .size(&signal, &account(dec!(1000)), &rules(), Some(dec!(3000)))
            .unwrap();
        assert_eq!(plan.reference_price, dec!(3000));
        assert_eq!(plan.entry, EntryOrder::Market);
    }

    #[test]
    fn extra_targets_truncated() {
        let mut signal = eth_signal();
        signal.targets.extend([dec!(3250), dec!(3300)]);
        let plan = sizer().size(&signal, &account(dec!(1000)), &rules(), None).unwrap();
        assert_eq!(plan.take_profit_ladder.len(), 3);
        assert!(plan
            .adjustments
            .contains(&SizingAdjustment::TargetsTruncated { kept: 3, dropped: 2 }));
    }

    #[test]
    fn weighted_split_and_limit_entry() {
        let sizer = RiskSizer::new(TradingConfig {
            split_policy: SplitPolicy::Weighted {
                weights: vec![dec!(0.5), dec!(0.3), dec!(0.2)],
            },
            entry_mode: EntryMode::Limit,
            ..TradingConfig::default()
        });
        let plan = sizer.size(&eth_signal(), &account(dec!(1000)), &rules(), None).unwrap();
        let qtys: Vec<Decimal> = plan.take_profit_ladder.iter().map(|r| r.quantity).collect();
        assert_eq!(qtys, vec![dec!(15.189), dec!(9.113), dec!(6.076)]);
        assert_eq!(plan.fraction_sum(), Decimal::ONE);
        assert_eq!(plan.entry, EntryOrder::Limit { price: dec!(3127.2) });
    }

    #[test]
    fn small_rungs_merge_into_neighbors() {
        let sizer = RiskSizer::new(TradingConfig {
            position_fraction: Decimal::ONE,
            ..TradingConfig::default()
        });
        let signal = Signal {
            leverage: Some(dec!(1)),
            entry_price: Some(dec!(100)),
            targets: vec![dec!(101), dec!(102), dec!(103)],
            ..eth_signal()
        };
        let plan = sizer.size(&signal, &account(dec!(12)), &rules(), None).unwrap();
        assert_eq!(plan.quantity, dec!(0.12));
        assert_eq!(plan.take_profit_ladder.len(), 1);
        assert_eq!(plan.take_profit_ladder[0].target_index, 2);
        assert_eq!(plan.take_profit_ladder[0].quantity, dec!(0.12));
        assert_eq!(plan.fraction_sum(), Decimal::ONE);
        assert!(plan
            .adjustments
            .contains(&SizingAdjustment::RungsMerged { merged: vec![1, 3] }));
    }

    #[test]
    fn rescale_keeps_shares() {
        let plan = sizer().size(&eth_signal(), &account(dec!(1000)), &rules(), None).unwrap();
        let (ladder, merged) = rescale_ladder(&plan.take_profit_ladder, dec!(3), &rules());
        assert!(merged.is_empty());
        let total: Decimal = ladder.iter().map(|r| r.quantity).sum();
        assert_eq!(total, dec!(3));
        assert_eq!(ladder[0].quantity, dec!(1));
    }
}

//! Exit Manager (spec §4.5): per-bar update/stop/target/breakeven logic
//! for one open position. Pure function over `(PositionState, Bar)` that
//! returns the ordered list of actions the caller (Trade Simulator) must
//! apply to the Virtual Account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::bar::Bar;
use crate::fill;
use crate::position::{PositionState, TradeStatus};
use crate::signal::{Direction, ExitStrategy, MoveStopTo, Target, Trail};

/// One action the Exit Manager wants applied, in the order they must be
/// processed (spec §5: `update_stop` -> partial exits ascending -> full
/// exit).
#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    UpdateStop { new_stop: Decimal },
    PartialExit {
        target_index: usize,
        shares: Decimal,
        price: Decimal,
        reason: TradeStatus,
    },
    FullExit {
        price: Decimal,
        reason: TradeStatus,
        time: DateTime<Utc>,
    },
}

/// Runs one bar through the Exit Manager for `position`, returning the
/// ordered actions. Does not mutate `position` directly; the Trade
/// Simulator applies the returned stop/partial/full actions through the
/// Virtual Account and then updates bookkeeping fields (`highest_price`,
/// `max_favorable_r`, etc.) via [`update_tracking`].
pub fn evaluate(position: &PositionState, bar: &Bar) -> Vec<ExitAction> {
    let mut actions = Vec::new();
    let dir = position.direction;

    // --- 1. Trailing-stop recompute (part of "update state" in spec §4.5) ---
    if let ExitStrategy::Trailing {
        trail,
        activation_r,
        ..
    } = &position.exit_strategy
    {
        let activated = activation_r
            .map(|thresh| position.max_favorable_r >= thresh)
            .unwrap_or(true);
        if activated {
            let extreme = match dir {
                Direction::Long => bar.high.max(position.highest_price),
                Direction::Short => bar.low.min(position.lowest_price),
            };
            let distance = trail.distance(extreme, None);
            let proposed = match dir {
                Direction::Long => extreme - distance,
                Direction::Short => extreme + distance,
            };
            if is_more_favorable(dir, proposed, position.current_stop) {
                actions.push(ExitAction::UpdateStop { new_stop: proposed });
            }
        }
    }

    let effective_stop = actions
        .iter()
        .find_map(|a| match a {
            ExitAction::UpdateStop { new_stop } => Some(*new_stop),
            _ => None,
        })
        .unwrap_or(position.current_stop);

    // --- 2. Check stop (before targets, per spec §4.5 tie-break) ---
    if let Some(hit) = fill::check_stop(dir, effective_stop, bar) {
        let is_trailing = matches!(position.exit_strategy, ExitStrategy::Trailing { .. });
        let reason = if is_trailing && effective_stop != position.initial_stop {
            TradeStatus::TrailingStopped
        } else {
            TradeStatus::StoppedOut
        };
        actions.push(ExitAction::FullExit {
            price: hit.fill,
            reason,
            time: bar.bar_time,
        });
        return actions;
    }

    // --- 3. Check targets (only if no full exit pending) ---
    if let ExitStrategy::Fixed {
        take_profit: Some(tp),
        ..
    } = &position.exit_strategy
    {
        if let Some(price) = fill::check_target(dir, *tp, bar) {
            actions.push(ExitAction::FullExit {
                price,
                reason: TradeStatus::TargetHit,
                time: bar.bar_time,
            });
            return actions;
        }
    }
    let mut target_moved_to_breakeven = false;
    if let ExitStrategy::Scaled { targets, .. } = &position.exit_strategy {
        let mut order: Vec<usize> = (0..targets.len())
            .filter(|i| !position.targets_hit.contains(i))
            .collect();
        order.sort_by(|&a, &b| {
            let pa = targets[a].price;
            let pb = targets[b].price;
            match dir {
                Direction::Long => pa.cmp(&pb),
                Direction::Short => pb.cmp(&pa),
            }
        });

        let mut moved_stop: Option<Decimal> = None;
        for idx in order {
            let target: &Target = &targets[idx];
            if let Some(price) = fill::check_target(dir, target.price, bar) {
                let shares = shares_for_target(position, target.exit_percent);
                actions.push(ExitAction::PartialExit {
                    target_index: idx,
                    shares,
                    price,
                    reason: TradeStatus::TargetHit,
                });
                if let Some(action) = target.post_hit_action {
                    if matches!(action, MoveStopTo::Breakeven) {
                        target_moved_to_breakeven = true;
                    }
                    let new_stop = resolve_move_stop(
                        action,
                        dir,
                        position.entry_price,
                        position.exit_strategy.breakeven(),
                    );
                    if is_more_favorable(dir, new_stop, moved_stop.unwrap_or(effective_stop)) {
                        moved_stop = Some(new_stop);
                    }
                }
            }
        }
        if let Some(new_stop) = moved_stop {
            if is_more_favorable(dir, new_stop, effective_stop) {
                actions.push(ExitAction::UpdateStop { new_stop });
            }
        }
    }

    // --- 4. Check breakeven (only if not already moved, and not set by a
    // target's MoveStopTo(Breakeven) action this same bar — spec §4.5
    // tie-break: the target's action owns the breakeven flag for the bar) ---
    if !position.stop_moved_to_breakeven && !target_moved_to_breakeven {
        if let Some(be) = position.exit_strategy.breakeven() {
            let current_r = favorable_r(position, bar);
            if current_r >= be.trigger_r {
                let new_stop = match dir {
                    Direction::Long => position.entry_price + be.buffer,
                    Direction::Short => position.entry_price - be.buffer,
                };
                if is_more_favorable(dir, new_stop, effective_stop) {
                    actions.push(ExitAction::UpdateStop { new_stop });
                }
            }
        }
    }

    actions
}

/// Whether `candidate` is a strictly more favorable stop than `current`
/// for `direction` (spec §4.5: stop only moves favorably).
fn is_more_favorable(direction: Direction, candidate: Decimal, current: Decimal) -> bool {
    match direction {
        Direction::Long => candidate > current,
        Direction::Short => candidate < current,
    }
}

fn resolve_move_stop(
    action: MoveStopTo,
    direction: Direction,
    entry_price: Decimal,
    breakeven: Option<crate::signal::BreakevenConfig>,
) -> Decimal {
    match action {
        MoveStopTo::Entry => entry_price,
        MoveStopTo::Price(p) => p,
        MoveStopTo::Breakeven => {
            let buffer = breakeven.map(|b| b.buffer).unwrap_or(Decimal::new(5, 2));
            match direction {
                Direction::Long => entry_price + buffer,
                Direction::Short => entry_price - buffer,
            }
        }
    }
}

fn shares_for_target(position: &PositionState, exit_percent: Decimal) -> Decimal {
    let raw = (position.original_size * exit_percent / Decimal::from(100)).floor();
    raw.min(position.remaining_size)
}

/// Favorable R-multiple implied by the bar's best price for `direction`.
fn favorable_r(position: &PositionState, bar: &Bar) -> Decimal {
    if position.risk_per_share.is_zero() {
        return Decimal::ZERO;
    }
    let best = match position.direction {
        Direction::Long => bar.high,
        Direction::Short => bar.low,
    };
    let favorable_move = (best - position.entry_price) * position.direction.sign();
    favorable_move / position.risk_per_share
}

/// Updates the bookkeeping fields that are not exit decisions themselves:
/// `highest_price`/`lowest_price` and `max_favorable_r`/`max_adverse_r`.
/// Called once per bar before [`evaluate`] so trailing activation sees
/// this bar's extremes.
pub fn update_tracking(position: &mut PositionState, bar: &Bar) {
    position.highest_price = position.highest_price.max(bar.high);
    position.lowest_price = position.lowest_price.min(bar.low);

    if position.risk_per_share.is_zero() {
        return;
    }
    let (best, worst) = match position.direction {
        Direction::Long => (bar.high, bar.low),
        Direction::Short => (bar.low, bar.high),
    };
    let favorable_move = (best - position.entry_price) * position.direction.sign();
    let adverse_move = (position.entry_price - worst) * position.direction.sign();
    let favorable_r = favorable_move / position.risk_per_share;
    let adverse_r = adverse_move / position.risk_per_share;
    position.max_favorable_r = position.max_favorable_r.max(favorable_r);
    position.max_adverse_r = position.max_adverse_r.max(adverse_r);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Session;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar::new("SPY", Utc::now(), open, high, low, close, dec!(1000), Session::Regular)
    }

    fn long_position(exit: ExitStrategy) -> PositionState {
        PositionState::new(1, "SPY".into(), Direction::Long, dec!(100), Utc::now(), dec!(100), dec!(99), exit)
    }

    #[test]
    fn scenario_1_clean_target_hit() {
        let mut pos = long_position(ExitStrategy::Fixed {
            stop: dec!(99),
            take_profit: Some(dec!(102)),
            breakeven: None,
        });
        pos.entry_price = dec!(100.10);
        pos.risk_per_share = dec!(1.10);
        let b = bar(dec!(100.10), dec!(102.50), dec!(99.50), dec!(101.0));
        update_tracking(&mut pos, &b);
        let actions = evaluate(&pos, &b);
        assert_eq!(
            actions,
            vec![ExitAction::FullExit {
                price: dec!(102.0),
                reason: TradeStatus::TargetHit,
                time: b.bar_time,
            }]
        );
    }

    #[test]
    fn scenario_2_short_gap_through_stop() {
        let mut pos = PositionState::new(
            1,
            "SPY".into(),
            Direction::Short,
            dec!(50.0),
            Utc::now(),
            dec!(20),
            dec!(51.0),
            ExitStrategy::Fixed {
                stop: dec!(51.0),
                take_profit: None,
                breakeven: None,
            },
        );
        let b = bar(dec!(51.50), dec!(52.00), dec!(51.20), dec!(51.80));
        update_tracking(&mut pos, &b);
        let actions = evaluate(&pos, &b);
        assert_eq!(
            actions,
            vec![ExitAction::FullExit {
                price: dec!(51.50),
                reason: TradeStatus::StoppedOut,
                time: b.bar_time,
            }]
        );
    }

    #[test]
    fn scenario_3_scaled_exit_with_breakeven() {
        let mut pos = long_position(ExitStrategy::Scaled {
            stop: dec!(99),
            targets: vec![
                Target {
                    price: dec!(101),
                    exit_percent: dec!(50),
                    post_hit_action: Some(MoveStopTo::Breakeven),
                },
                Target {
                    price: dec!(103),
                    exit_percent: dec!(50),
                    post_hit_action: None,
                },
            ],
            breakeven: None,
        });
        pos.original_size = dec!(100);
        pos.remaining_size = dec!(100);

        let bar_a = bar(dec!(100.2), dec!(101.2), dec!(99.8), dec!(101.0));
        update_tracking(&mut pos, &bar_a);
        let actions = evaluate(&pos, &bar_a);
        assert_eq!(
            actions[0],
            ExitAction::PartialExit {
                target_index: 0,
                shares: dec!(50),
                price: dec!(101),
                reason: TradeStatus::TargetHit,
            }
        );
        assert!(actions
            .iter()
            .any(|a| matches!(a, ExitAction::UpdateStop { new_stop } if *new_stop == dec!(100.05))));

        // apply manually for next step
        pos.remaining_size = dec!(50);
        pos.targets_hit.insert(0);
        pos.current_stop = dec!(100.05);
        pos.stop_moved_to_breakeven = true;

        let bar_b = bar(dec!(100.10), dec!(100.10), dec!(99.80), dec!(99.9));
        update_tracking(&mut pos, &bar_b);
        let actions_b = evaluate(&pos, &bar_b);
        assert_eq!(
            actions_b,
            vec![ExitAction::FullExit {
                price: dec!(100.05),
                reason: TradeStatus::StoppedOut,
                time: bar_b.bar_time,
            }]
        );
    }

    #[test]
    fn scenario_4_trailing_activation_and_unfavorable_ignored() {
        let mut pos = long_position(ExitStrategy::Trailing {
            stop: dec!(99),
            trail: Trail::FixedDistance(dec!(0.50)),
            activation_r: Some(dec!(1)),
            breakeven: None,
        });
        let highs = [dec!(100.5), dec!(101.0), dec!(101.3), dec!(100.8), dec!(100.2)];
        let lows = [dec!(100.0), dec!(100.3), dec!(100.9), dec!(100.5), dec!(99.9)];

        // bar 1: not yet activated (max_favorable_r = 0.5 < 1)
        let b1 = bar(dec!(100.2), highs[0], lows[0], dec!(100.3));
        update_tracking(&mut pos, &b1);
        let a1 = evaluate(&pos, &b1);
        assert!(a1.is_empty());

        // bar 2: favorable_r reaches 1.0 -> activation; stop -> 100.50
        let b2 = bar(dec!(100.3), highs[1], lows[1], dec!(100.8));
        update_tracking(&mut pos, &b2);
        let a2 = evaluate(&pos, &b2);
        assert_eq!(a2, vec![ExitAction::UpdateStop { new_stop: dec!(100.50) }]);
        pos.current_stop = dec!(100.50);

        // bar 3: stop -> 100.80
        let b3 = bar(dec!(100.8), highs[2], lows[2], dec!(101.2));
        update_tracking(&mut pos, &b3);
        let a3 = evaluate(&pos, &b3);
        assert_eq!(a3, vec![ExitAction::UpdateStop { new_stop: dec!(100.80) }]);
        pos.current_stop = dec!(100.80);

        // bar 4: proposal 100.30 is unfavorable, ignored
        let b4 = bar(dec!(101.2), highs[3], lows[3], dec!(100.9));
        update_tracking(&mut pos, &b4);
        let a4 = evaluate(&pos, &b4);
        assert!(a4.is_empty());

        // bar 5: low 100.2 (wait, spec says low=100.2 triggers stop 100.80)
        let b5 = bar(dec!(100.9), highs[4], dec!(100.2), dec!(100.3));
        update_tracking(&mut pos, &b5);
        let a5 = evaluate(&pos, &b5);
        assert_eq!(
            a5,
            vec![ExitAction::FullExit {
                price: dec!(100.80),
                reason: TradeStatus::TrailingStopped,
                time: b5.bar_time,
            }]
        );
    }
}

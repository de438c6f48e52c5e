//! Fill Policy (spec §4.4): entry/exit fills and stop/target triggering.

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::signal::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillType {
    SignalPrice,
    NextBarOpen,
    BarClose,
    Vwap,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Slippage {
    None,
    Fixed(Decimal),
    /// Uniformly sampled in `[0, max_fraction]` of price, applied against
    /// the trader. Not used when determinism is required (tests should
    /// use `Slippage::None` or `Slippage::Fixed`).
    Random(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillPolicy {
    pub fill_type: FillType,
    pub slippage: Slippage,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            fill_type: FillType::NextBarOpen,
            slippage: Slippage::None,
        }
    }
}

/// Result of an entry fill: the executed price and the slippage amount
/// actually applied (signed, always unfavorable to the trader).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryFill {
    pub price: Decimal,
    pub slippage: Decimal,
}

fn slippage_amount(slippage: Slippage, base: Decimal, rng: &mut impl Rng) -> Decimal {
    match slippage {
        Slippage::None => Decimal::ZERO,
        Slippage::Fixed(amount) => amount,
        Slippage::Random(max_fraction) => {
            let frac: f64 = rng.gen_range(0.0..=1.0);
            let sampled = max_fraction * Decimal::try_from(frac).unwrap_or(Decimal::ZERO);
            base * sampled
        }
    }
}

/// Computes the entry fill per spec §4.4. `next_bar` is the bar the
/// Trade Simulator is currently processing (the bar *after* the one the
/// signal was generated on), required for `NextBarOpen`/`BarClose`/`Vwap`.
pub fn entry_fill(
    policy: &FillPolicy,
    signal_price: Decimal,
    direction: Direction,
    next_bar: Option<&Bar>,
    rng: &mut impl Rng,
) -> EntryFill {
    let base = match policy.fill_type {
        FillType::SignalPrice => signal_price,
        FillType::NextBarOpen => next_bar.map(|b| b.open).unwrap_or(signal_price),
        FillType::BarClose => next_bar.map(|b| b.close).unwrap_or(signal_price),
        FillType::Vwap => next_bar
            .map(|b| b.vwap_or(signal_price))
            .unwrap_or(signal_price),
    };
    let slip = slippage_amount(policy.slippage, base, rng);
    // Longs pay higher on entry; shorts pay lower (symmetric, spec §4.4).
    let price = match direction {
        Direction::Long => base + slip,
        Direction::Short => base - slip,
    };
    EntryFill {
        price,
        slippage: slip,
    }
}

/// Computes the exit fill for a forced/manual exit at bar close.
pub fn exit_fill(policy: &FillPolicy, bar: &Bar, direction: Direction, rng: &mut impl Rng) -> Decimal {
    let base = bar.close;
    let slip = slippage_amount(policy.slippage, base, rng);
    // Exit direction is opposite of entry: longs sell lower, shorts buy higher.
    match direction {
        Direction::Long => base - slip,
        Direction::Short => base + slip,
    }
}

/// Outcome of checking whether a bar triggers the stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopHit {
    pub fill: Decimal,
    pub gapped: bool,
}

/// Spec §4.4 `check_stop`: long triggers iff `bar.low <= stop`; short
/// symmetric. Gap-through fills at `bar.open`, never at the stop price.
pub fn check_stop(direction: Direction, stop: Decimal, bar: &Bar) -> Option<StopHit> {
    let triggered = match direction {
        Direction::Long => bar.low <= stop,
        Direction::Short => bar.high >= stop,
    };
    if !triggered {
        return None;
    }
    let gapped = match direction {
        Direction::Long => bar.open < stop,
        Direction::Short => bar.open > stop,
    };
    let fill = if gapped { bar.open } else { stop };
    Some(StopHit { fill, gapped })
}

/// Spec §4.4 `check_target`: targets are limit-like, filling exactly at
/// the target price.
pub fn check_target(direction: Direction, target: Decimal, bar: &Bar) -> Option<Decimal> {
    let triggered = match direction {
        Direction::Long => bar.high >= target,
        Direction::Short => bar.low <= target,
    };
    triggered.then_some(target)
}

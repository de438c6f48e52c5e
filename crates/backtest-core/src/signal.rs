//! Signal/Setup and ExitStrategy types (spec §3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short — used in every P&L formula in spec §4.6.
    pub fn sign(self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => -Decimal::ONE,
        }
    }
}

/// A trailing-stop distance rule (spec §3 `ExitStrategy::Trailing`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trail {
    FixedDistance(Decimal),
    Percent(Decimal),
    AtrMultiple(Decimal),
}

impl Trail {
    /// Distance (always positive) the stop trails behind the price
    /// extreme, given the extreme price and the current ATR (required
    /// only for `AtrMultiple`; callers without an ATR pass `None` and
    /// must not configure `AtrMultiple`).
    pub fn distance(&self, extreme_price: Decimal, atr: Option<Decimal>) -> Decimal {
        match self {
            Trail::FixedDistance(d) => *d,
            Trail::Percent(pct) => extreme_price * *pct / Decimal::from(100),
            Trail::AtrMultiple(mult) => *mult * atr.unwrap_or(Decimal::ZERO),
        }
    }
}

/// Post-target-hit stop relocation (spec §3 `Target::MoveStopTo`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MoveStopTo {
    Breakeven,
    Entry,
    Price(Decimal),
}

/// One scaled-exit target (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub price: Decimal,
    /// Percent of the *original* size to exit when this target hits.
    pub exit_percent: Decimal,
    pub post_hit_action: Option<MoveStopTo>,
}

/// Breakeven-stop configuration attachable to any exit strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakevenConfig {
    pub trigger_r: Decimal,
    pub buffer: Decimal,
}

impl Default for BreakevenConfig {
    fn default() -> Self {
        Self {
            trigger_r: Decimal::ONE,
            buffer: Decimal::new(5, 2), // 0.05
        }
    }
}

/// Exit-strategy specification (spec §3 tagged variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitStrategy {
    Fixed {
        stop: Decimal,
        take_profit: Option<Decimal>,
        breakeven: Option<BreakevenConfig>,
    },
    Trailing {
        stop: Decimal,
        trail: Trail,
        activation_r: Option<Decimal>,
        breakeven: Option<BreakevenConfig>,
    },
    Scaled {
        stop: Decimal,
        targets: Vec<Target>,
        breakeven: Option<BreakevenConfig>,
    },
}

impl ExitStrategy {
    pub fn initial_stop(&self) -> Decimal {
        match self {
            ExitStrategy::Fixed { stop, .. } => *stop,
            ExitStrategy::Trailing { stop, .. } => *stop,
            ExitStrategy::Scaled { stop, .. } => *stop,
        }
    }

    pub fn breakeven(&self) -> Option<BreakevenConfig> {
        match self {
            ExitStrategy::Fixed { breakeven, .. } => *breakeven,
            ExitStrategy::Trailing { breakeven, .. } => *breakeven,
            ExitStrategy::Scaled { breakeven, .. } => *breakeven,
        }
    }
}

/// A proposed trade, emitted by a [`crate::strategy::Strategy`] (spec §3, §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    pub exit_strategy: Option<ExitStrategy>,
    pub strategy_id: String,
    pub level_type: Option<String>,
    pub level_price: Option<Decimal>,
    /// Anchors the entry time: the bar on which the setup's retest/trigger
    /// condition was confirmed.
    pub retest_bar: Bar,
}

/// Error returned when a `Setup`'s price ordering violates spec §3.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("setup price ordering invalid for {direction:?}: stop={stop} entry={entry} target={target:?}")]
pub struct SetupOrderingError {
    pub direction: Direction,
    pub stop: Decimal,
    pub entry: Decimal,
    pub target: Option<Decimal>,
}

impl Setup {
    /// Validates `stop_loss < entry_price < take_profit` for long (reversed
    /// for short), per spec §3.
    pub fn validate(&self) -> Result<(), SetupOrderingError> {
        let ok = match self.direction {
            Direction::Long => {
                self.stop_loss < self.entry_price
                    && self
                        .take_profit
                        .map(|tp| self.entry_price < tp)
                        .unwrap_or(true)
            }
            Direction::Short => {
                self.stop_loss > self.entry_price
                    && self
                        .take_profit
                        .map(|tp| self.entry_price > tp)
                        .unwrap_or(true)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(SetupOrderingError {
                direction: self.direction,
                stop: self.stop_loss,
                entry: self.entry_price,
                target: self.take_profit,
            })
        }
    }
}

/// A `Setup` promoted to a `Signal` by the Signal Collector (spec §4.3):
/// assigns a fresh id and `generated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: u64,
    pub setup: Setup,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Session;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn retest_bar() -> Bar {
        Bar::new(
            "SPY",
            Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap(),
            dec!(100),
            dec!(101),
            dec!(99),
            dec!(100.5),
            dec!(1000),
            Session::Regular,
        )
    }

    #[test]
    fn long_setup_ordering_enforced() {
        let setup = Setup {
            symbol: "SPY".into(),
            direction: Direction::Long,
            entry_price: dec!(100),
            stop_loss: dec!(99),
            take_profit: Some(dec!(102)),
            exit_strategy: None,
            strategy_id: "test".into(),
            level_type: None,
            level_price: None,
            retest_bar: retest_bar(),
        };
        assert!(setup.validate().is_ok());

        let mut bad = setup.clone();
        bad.stop_loss = dec!(101);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn short_setup_ordering_is_reversed() {
        let setup = Setup {
            symbol: "SPY".into(),
            direction: Direction::Short,
            entry_price: dec!(100),
            stop_loss: dec!(101),
            take_profit: Some(dec!(98)),
            exit_strategy: None,
            strategy_id: "test".into(),
            level_type: None,
            level_price: None,
            retest_bar: retest_bar(),
        };
        assert!(setup.validate().is_ok());
    }

    #[test]
    fn trail_distance_variants() {
        assert_eq!(Trail::FixedDistance(dec!(0.5)).distance(dec!(100), None), dec!(0.5));
        assert_eq!(
            Trail::Percent(dec!(1)).distance(dec!(100), None),
            dec!(1.00)
        );
        assert_eq!(
            Trail::AtrMultiple(dec!(2)).distance(dec!(100), Some(dec!(0.25))),
            dec!(0.50)
        );
    }
}

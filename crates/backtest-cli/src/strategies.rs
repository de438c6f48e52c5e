//! Illustrative built-in strategy shipped with the CLI.
//!
//! Spec §4.3 documents the strategy contract as an external call-out, not
//! a concrete deliverable of the backtesting core itself. This module
//! gives the CLI something real to run out of the box: a breakout of the
//! 5-minute opening range, entered on the bar that retests and reclaims
//! the level.

use std::collections::VecDeque;

use rust_decimal::Decimal;

use backtest_core::bar::Bar;
use backtest_core::error::RuntimeError;
use backtest_core::key_levels::KeyLevels;
use backtest_core::signal::{Direction, Setup};
use backtest_core::strategy::{Strategy, StrategyParams};

/// Minimum reward-to-risk ratio applied when a run doesn't override it
/// via `strategy_params["min_rr"]`.
const DEFAULT_MIN_RR: Decimal = Decimal::TWO;

pub struct Or5RetestStrategy;

impl Strategy for Or5RetestStrategy {
    fn id(&self) -> &str {
        "or5_retest"
    }

    fn evaluate(
        &self,
        window: &VecDeque<Bar>,
        levels: &KeyLevels,
        params: &StrategyParams,
    ) -> Result<Vec<Setup>, RuntimeError> {
        let (Some(or5_high), Some(or5_low)) = (levels.opening_range_5m_high, levels.opening_range_5m_low) else {
            return Ok(Vec::new());
        };
        let cur = window.back().expect("non-empty window guaranteed by caller");
        let min_rr = params.min_rr.unwrap_or(DEFAULT_MIN_RR);

        let long_retest = cur.close > or5_high && cur.low <= or5_high;
        let short_retest = cur.close < or5_low && cur.high >= or5_low;

        let setup = if long_retest {
            let stop_loss = or5_low;
            let risk = cur.close - stop_loss;
            if risk <= Decimal::ZERO {
                return Ok(Vec::new());
            }
            Some(self.setup(cur, Direction::Long, cur.close, stop_loss, risk * min_rr, "or5_high"))
        } else if short_retest {
            let stop_loss = or5_high;
            let risk = stop_loss - cur.close;
            if risk <= Decimal::ZERO {
                return Ok(Vec::new());
            }
            Some(self.setup(cur, Direction::Short, cur.close, stop_loss, -(risk * min_rr), "or5_low"))
        } else {
            None
        };

        Ok(setup.into_iter().collect())
    }
}

impl Or5RetestStrategy {
    #[allow(clippy::too_many_arguments)]
    fn setup(
        &self,
        cur: &Bar,
        direction: Direction,
        entry_price: Decimal,
        stop_loss: Decimal,
        target_offset: Decimal,
        level_type: &str,
    ) -> Setup {
        Setup {
            symbol: cur.symbol.clone(),
            direction,
            entry_price,
            stop_loss,
            take_profit: Some(entry_price + target_offset),
            exit_strategy: None,
            strategy_id: self.id().to_string(),
            level_type: Some(level_type.to_string()),
            level_price: Some(if matches!(direction, Direction::Long) { stop_loss } else { stop_loss }),
            retest_bar: cur.clone(),
        }
    }
}

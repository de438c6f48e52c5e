//! Position state and the closed-trade ledger record (spec §3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::signal::{Direction, ExitStrategy};
use crate::symbol::Symbol;

/// Why a position's position (or partial) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    StoppedOut,
    TrailingStopped,
    TargetHit,
    TimeExit,
    ManualExit,
}

/// One partial (scaled) exit record (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExit {
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    pub shares_exited: Decimal,
    pub remaining_after: Decimal,
    pub reason: TradeStatus,
    pub target_index: Option<usize>,
    pub pnl: Decimal,
    pub r_multiple: Decimal,
}

/// An alive, possibly partially-exited position (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub trade_id: u64,
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub original_size: Decimal,
    pub remaining_size: Decimal,
    pub risk_per_share: Decimal,
    /// Total dollar risk committed to this trade at open (spec §4.6): used
    /// as the denominator for `r_multiple`, independent of `risk_per_share
    /// * size` once partial exits reduce `remaining_size`.
    pub risk_amount: Decimal,
    pub initial_stop: Decimal,
    pub current_stop: Decimal,
    pub highest_price: Decimal,
    pub lowest_price: Decimal,
    pub targets_hit: BTreeSet<usize>,
    pub partial_exits: Vec<PartialExit>,
    pub stop_moved_to_breakeven: bool,
    pub max_favorable_r: Decimal,
    pub max_adverse_r: Decimal,
    pub exit_strategy: ExitStrategy,
}

impl PositionState {
    pub fn new(
        trade_id: u64,
        symbol: Symbol,
        direction: Direction,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
        original_size: Decimal,
        initial_stop: Decimal,
        exit_strategy: ExitStrategy,
    ) -> Self {
        let risk_per_share = (entry_price - initial_stop).abs();
        Self {
            trade_id,
            symbol,
            direction,
            entry_price,
            entry_time,
            original_size,
            remaining_size: original_size,
            risk_per_share,
            // Sensible standalone default (used directly by callers that
            // construct a `PositionState` outside the Virtual Account,
            // e.g. exit-manager tests); `VirtualAccount::open_position`
            // overwrites this with the account-level risk_amount it
            // actually sized the trade against.
            risk_amount: risk_per_share * original_size,
            initial_stop,
            current_stop: initial_stop,
            highest_price: entry_price,
            lowest_price: entry_price,
            targets_hit: BTreeSet::new(),
            partial_exits: Vec::new(),
            stop_moved_to_breakeven: false,
            max_favorable_r: Decimal::ZERO,
            max_adverse_r: Decimal::ZERO,
            exit_strategy,
        }
    }

    /// Size-conservation invariant from spec §3 and §8.
    pub fn size_conserved(&self) -> bool {
        let exited: Decimal = self.partial_exits.iter().map(|p| p.shares_exited).sum();
        exited + self.remaining_size == self.original_size
    }

    /// Attempts to move the stop; ignored silently if it would move the
    /// stop in the unfavorable direction (spec §4.5 tie-break rule).
    pub fn try_move_stop(&mut self, new_stop: Decimal) -> bool {
        let improves = match self.direction {
            Direction::Long => new_stop > self.current_stop,
            Direction::Short => new_stop < self.current_stop,
        };
        if improves {
            self.current_stop = new_stop;
        }
        improves
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_size.is_zero()
    }
}

/// An immutable closed-trade ledger record (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub trade_id: u64,
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub original_size: Decimal,
    pub exit_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub status: TradeStatus,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub r_multiple: Decimal,
    pub final_stop: Decimal,
    pub stop_moved_to_breakeven: bool,
    pub max_favorable_r: Decimal,
    pub max_adverse_r: Decimal,
    pub partial_exit_count: usize,
    pub partial_exits: Vec<PartialExit>,
}

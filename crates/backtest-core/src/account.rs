//! Virtual Account (spec §4.6): cash/equity bookkeeping, position sizing,
//! and the closed-trade ledger.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};
use crate::position::{ClosedTrade, PartialExit, PositionState, TradeStatus};
use crate::signal::{Direction, ExitStrategy};
use crate::symbol::Symbol;

/// Parameters for opening a new position, as resolved by the Trade
/// Simulator from a filled [`crate::signal::Signal`].
pub struct OpenPositionParams {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub initial_stop: Decimal,
    pub exit_strategy: ExitStrategy,
}

/// Cash, equity, open positions, and the closed-trade ledger for one run
/// (spec §3, §4.6). Either `risk_per_trade`-sized ("normal" mode) or
/// fixed-one-share ("unlimited capital" mode, used for R-multiple-only
/// research where position sizing is not the subject of study).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualAccount {
    pub initial_capital: Decimal,
    pub risk_per_trade: Decimal,
    pub current_equity: Decimal,
    pub cash: Decimal,
    pub open_positions: HashMap<u64, PositionState>,
    pub closed_trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
    pub unlimited_capital: bool,
    next_trade_id: u64,
}

impl VirtualAccount {
    pub fn new(initial_capital: Decimal, risk_per_trade: Decimal, unlimited_capital: bool) -> Self {
        Self {
            initial_capital,
            risk_per_trade,
            current_equity: initial_capital,
            cash: initial_capital,
            open_positions: HashMap::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
            unlimited_capital,
            next_trade_id: 1,
        }
    }

    /// Opens a position per spec §4.6 sizing rules, returning the new
    /// `trade_id`. Fails with `InvalidStop` if entry and stop coincide, or
    /// `InsufficientFunds` if not even one share is affordable (normal
    /// mode only).
    pub fn open_position(&mut self, params: OpenPositionParams) -> RuntimeResult<u64> {
        let price_risk = (params.entry_price - params.initial_stop).abs();
        if price_risk.is_zero() {
            return Err(RuntimeError::InvalidStop);
        }

        let (size, risk_amount) = if self.unlimited_capital {
            (Decimal::ONE, price_risk)
        } else {
            let risk_amount = self.current_equity * self.risk_per_trade;
            let mut size = (risk_amount / price_risk).floor().max(Decimal::ONE);
            let notional = size * params.entry_price;
            if notional > self.cash {
                size = (self.cash / params.entry_price).floor();
                if size < Decimal::ONE {
                    return Err(RuntimeError::InsufficientFunds {
                        entry: params.entry_price.to_string(),
                    });
                }
            }
            (size, risk_amount)
        };

        let notional = size * params.entry_price;
        self.cash -= notional;

        let trade_id = self.next_trade_id;
        self.next_trade_id += 1;

        let mut position = PositionState::new(
            trade_id,
            params.symbol,
            params.direction,
            params.entry_price,
            params.entry_time,
            size,
            params.initial_stop,
            params.exit_strategy,
        );
        position.risk_amount = risk_amount;
        self.open_positions.insert(trade_id, position);

        Ok(trade_id)
    }

    /// Closes a position in full (spec §4.6).
    pub fn close_position(
        &mut self,
        trade_id: u64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        status: TradeStatus,
    ) -> RuntimeResult<ClosedTrade> {
        let position = self
            .open_positions
            .remove(&trade_id)
            .ok_or_else(|| RuntimeError::PositionNotFound(trade_id.to_string()))?;

        let size = position.remaining_size;
        let final_leg_pnl = (exit_price - position.entry_price) * size * position.direction.sign();
        let partials_pnl: Decimal = position.partial_exits.iter().map(|p| p.pnl).sum();
        let pnl = final_leg_pnl + partials_pnl;
        let pnl_pct = if position.entry_price.is_zero() || size.is_zero() {
            Decimal::ZERO
        } else {
            (pnl / (position.entry_price * size) * Decimal::from(100)).round_dp(2)
        };
        let r_multiple = if position.risk_amount.is_zero() {
            Decimal::ZERO
        } else {
            (pnl / position.risk_amount).round_dp(2)
        };

        self.cash += size * position.entry_price + pnl;
        self.current_equity += pnl;

        let closed = ClosedTrade {
            trade_id: position.trade_id,
            symbol: position.symbol,
            direction: position.direction,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            original_size: position.original_size,
            exit_price,
            exit_time,
            status,
            pnl,
            pnl_pct,
            r_multiple,
            final_stop: position.current_stop,
            stop_moved_to_breakeven: position.stop_moved_to_breakeven,
            max_favorable_r: position.max_favorable_r,
            max_adverse_r: position.max_adverse_r,
            partial_exit_count: position.partial_exits.len(),
            partial_exits: position.partial_exits,
        };
        self.closed_trades.insert(0, closed.clone());
        Ok(closed)
    }

    /// Partially closes a position (spec §4.6). Finalizes the trade as a
    /// closed trade if `shares_to_exit` brings `remaining_size` to zero.
    pub fn partial_close(
        &mut self,
        trade_id: u64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        shares_to_exit: Decimal,
        reason: TradeStatus,
        target_index: Option<usize>,
    ) -> RuntimeResult<Option<ClosedTrade>> {
        let position = self
            .open_positions
            .get_mut(&trade_id)
            .ok_or_else(|| RuntimeError::PositionNotFound(trade_id.to_string()))?;

        let shares = shares_to_exit.min(position.remaining_size);
        if shares <= Decimal::ZERO {
            return Err(RuntimeError::PositionNotFound(format!(
                "trade {trade_id} has no remaining shares to partially exit"
            )));
        }

        let partial_pnl = (exit_price - position.entry_price) * shares * position.direction.sign();
        let r_multiple = if position.risk_per_share.is_zero() {
            Decimal::ZERO
        } else {
            (partial_pnl / (position.risk_per_share * shares)).round_dp(2)
        };

        self.cash += shares * position.entry_price + partial_pnl;
        self.current_equity += partial_pnl;

        position.remaining_size -= shares;
        let remaining_after = position.remaining_size;
        position.partial_exits.push(PartialExit {
            exit_time,
            exit_price,
            shares_exited: shares,
            remaining_after,
            reason,
            target_index,
            pnl: partial_pnl,
            r_multiple,
        });
        if let Some(idx) = target_index {
            position.targets_hit.insert(idx);
        }

        if remaining_after.is_zero() {
            // `reason` is already one of the `TradeStatus` final-status
            // variants, so no further mapping is needed here.
            Ok(Some(self.close_position(trade_id, exit_price, exit_time, reason)?))
        } else {
            Ok(None)
        }
    }

    /// Replaces the stored stop (spec §4.6), used by trailing/breakeven
    /// transitions emitted by the Exit Manager.
    pub fn update_stop(&mut self, trade_id: u64, new_stop: Decimal) -> RuntimeResult<()> {
        let position = self
            .open_positions
            .get_mut(&trade_id)
            .ok_or_else(|| RuntimeError::PositionNotFound(trade_id.to_string()))?;
        let moved = position.try_move_stop(new_stop);
        if moved && new_stop == resolve_breakeven_price(position) {
            position.stop_moved_to_breakeven = true;
        }
        Ok(())
    }

    /// Appends `(ts, current_equity)` to the curve. Unrealized P&L on open
    /// positions is not marked-to-market (spec §4.6 documented limitation).
    pub fn record_equity(&mut self, ts: DateTime<Utc>) {
        self.equity_curve.push((ts, self.current_equity));
    }

    pub fn position_value(&self) -> Decimal {
        self.open_positions
            .values()
            .map(|p| p.remaining_size * p.entry_price)
            .sum()
    }
}

fn resolve_breakeven_price(position: &PositionState) -> Decimal {
    let buffer = position
        .exit_strategy
        .breakeven()
        .map(|b| b.buffer)
        .unwrap_or(Decimal::new(5, 2));
    match position.direction {
        Direction::Long => position.entry_price + buffer,
        Direction::Short => position.entry_price - buffer,
    }
}

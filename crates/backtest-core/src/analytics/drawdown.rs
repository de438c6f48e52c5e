//! Drawdown (spec §4.8): running-peak walk over the equity curve plus
//! winning/losing streaks from the trade ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::ClosedTrade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawdown {
    /// Maximum drawdown as a fraction of the peak (e.g. `0.12` = 12%).
    pub max_drawdown: Decimal,
    pub max_drawdown_dollars: Decimal,
    /// Calendar days from the peak immediately before the trough to the
    /// point equity recovered to that peak; `None` if never recovered.
    pub max_drawdown_duration_days: Option<i64>,
    /// `net_profit / max_drawdown_dollars`; `None` if max_drawdown is zero.
    pub recovery_factor: Option<Decimal>,
    pub longest_winning_streak: usize,
    pub longest_losing_streak: usize,
    pub empty: bool,
}

/// Walks the equity curve computing the maximum drawdown and its recovery
/// duration (spec §4.8). `net_profit` is required to compute the recovery
/// factor and is normally `TradeMetrics::net_profit`.
pub fn compute(equity_curve: &[(DateTime<Utc>, Decimal)], trades: &[ClosedTrade], net_profit: Decimal) -> Drawdown {
    if equity_curve.is_empty() {
        return Drawdown {
            max_drawdown: Decimal::ZERO,
            max_drawdown_dollars: Decimal::ZERO,
            max_drawdown_duration_days: None,
            recovery_factor: None,
            longest_winning_streak: 0,
            longest_losing_streak: 0,
            empty: true,
        };
    }

    // Pass 1: track the running peak and find the point of maximum
    // drawdown, remembering the peak that preceded it.
    let mut peak = equity_curve[0].1;
    let mut peak_ts = equity_curve[0].0;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_dollars = Decimal::ZERO;
    let mut max_dd_peak_value = peak;
    let mut max_dd_peak_ts = peak_ts;
    let mut max_dd_trough_idx = 0usize;

    for (idx, &(ts, equity)) in equity_curve.iter().enumerate() {
        if equity > peak {
            peak = equity;
            peak_ts = ts;
        }
        if peak.is_zero() {
            continue;
        }
        let dd_dollars = peak - equity;
        let dd = dd_dollars / peak;
        if dd > max_dd {
            max_dd = dd;
            max_dd_dollars = dd_dollars;
            max_dd_peak_value = peak;
            max_dd_peak_ts = peak_ts;
            max_dd_trough_idx = idx;
        }
    }

    // Pass 2: from the trough onward, find the first point equity climbs
    // back to the peak that preceded the drawdown.
    let max_drawdown_duration_days = equity_curve[max_dd_trough_idx..]
        .iter()
        .find(|&&(_, equity)| equity >= max_dd_peak_value)
        .map(|&(ts, _)| (ts - max_dd_peak_ts).num_days());

    let recovery_factor = if max_dd_dollars.is_zero() {
        None
    } else {
        Some((net_profit / max_dd_dollars).round_dp(2))
    };

    let (longest_winning_streak, longest_losing_streak) = streaks(trades);

    Drawdown {
        max_drawdown: max_dd.round_dp(4),
        max_drawdown_dollars: max_dd_dollars.round_dp(2),
        max_drawdown_duration_days,
        recovery_factor,
        longest_winning_streak,
        longest_losing_streak,
        empty: false,
    }
}

fn streaks(trades: &[ClosedTrade]) -> (usize, usize) {
    let mut longest_win = 0;
    let mut longest_loss = 0;
    let mut current_win = 0;
    let mut current_loss = 0;
    for trade in trades {
        if trade.pnl > Decimal::ZERO {
            current_win += 1;
            current_loss = 0;
        } else if trade.pnl < Decimal::ZERO {
            current_loss += 1;
            current_win = 0;
        } else {
            current_win = 0;
            current_loss = 0;
        }
        longest_win = longest_win.max(current_win);
        longest_loss = longest_loss.max(current_loss);
    }
    (longest_win, longest_loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 16, 0, 0).unwrap()
    }

    #[test]
    fn empty_curve_returns_flagged_zeroes() {
        let dd = compute(&[], &[], Decimal::ZERO);
        assert!(dd.empty);
    }

    #[test]
    fn tracks_max_drawdown_fraction() {
        let curve = vec![
            (ts(1), dec!(100_000)),
            (ts(2), dec!(110_000)),
            (ts(3), dec!(99_000)),
            (ts(4), dec!(112_000)),
        ];
        let dd = compute(&curve, &[], dec!(12_000));
        assert_eq!(dd.max_drawdown_dollars, dec!(11_000));
        assert_eq!(dd.recovery_factor, Some((dec!(12_000) / dec!(11_000)).round_dp(2)));
    }

    #[test]
    fn streak_lengths_from_trade_sequence() {
        use crate::position::TradeStatus;
        use crate::signal::Direction;

        let mk = |pnl: Decimal| ClosedTrade {
            trade_id: 1,
            symbol: "SPY".into(),
            direction: Direction::Long,
            entry_price: dec!(100),
            entry_time: ts(1),
            original_size: dec!(10),
            exit_price: dec!(101),
            exit_time: ts(1),
            status: TradeStatus::TargetHit,
            pnl,
            pnl_pct: dec!(0),
            r_multiple: dec!(1),
            final_stop: dec!(99),
            stop_moved_to_breakeven: false,
            max_favorable_r: dec!(1),
            max_adverse_r: dec!(0),
            partial_exit_count: 0,
            partial_exits: vec![],
        };
        let trades = vec![
            mk(dec!(10)),
            mk(dec!(10)),
            mk(dec!(-5)),
            mk(dec!(10)),
            mk(dec!(10)),
            mk(dec!(10)),
        ];
        let (win_streak, loss_streak) = streaks(&trades);
        assert_eq!(win_streak, 3);
        assert_eq!(loss_streak, 1);
    }
}

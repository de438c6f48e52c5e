//! TradeMetrics (spec §4.8): aggregate win/loss statistics over the
//! closed-trade ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::ClosedTrade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub total_trades: usize,
    pub winners: usize,
    pub losers: usize,
    pub breakeven: usize,
    pub win_rate: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub net_profit: Decimal,
    /// `None` when `gross_loss` is zero (spec §4.8: undefined, not infinite).
    pub profit_factor: Option<Decimal>,
    pub expectancy: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_r_multiple: Decimal,
    pub sharpe: Option<Decimal>,
    pub sortino: Option<Decimal>,
    pub avg_hold_minutes: Decimal,
    pub max_hold_minutes: i64,
    /// True when `total_trades == 0`: every other field is a zeroed
    /// placeholder rather than a meaningful statistic (spec §7: analytics
    /// tolerate empty inputs by returning zeroed metrics with a flag).
    pub empty: bool,
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().sum::<Decimal>() / Decimal::from(values.len())
}

fn stdev(values: &[Decimal]) -> Decimal {
    if values.len() < 2 {
        return Decimal::ZERO;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (*v - m) * (*v - m)).sum::<Decimal>() / Decimal::from(values.len());
    variance.sqrt().unwrap_or(Decimal::ZERO)
}

fn downside_stdev(values: &[Decimal]) -> Decimal {
    let downside: Vec<Decimal> = values.iter().copied().filter(|v| *v < Decimal::ZERO).collect();
    if downside.is_empty() {
        return Decimal::ZERO;
    }
    let variance = downside.iter().map(|v| *v * *v).sum::<Decimal>() / Decimal::from(values.len());
    variance.sqrt().unwrap_or(Decimal::ZERO)
}

/// Computes TradeMetrics over a closed-trade ledger (spec §4.8). Tolerates
/// an empty ledger by returning a zeroed, flagged result.
pub fn compute(trades: &[ClosedTrade]) -> TradeMetrics {
    if trades.is_empty() {
        return TradeMetrics {
            total_trades: 0,
            winners: 0,
            losers: 0,
            breakeven: 0,
            win_rate: Decimal::ZERO,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            net_profit: Decimal::ZERO,
            profit_factor: None,
            expectancy: Decimal::ZERO,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            avg_r_multiple: Decimal::ZERO,
            sharpe: None,
            sortino: None,
            avg_hold_minutes: Decimal::ZERO,
            max_hold_minutes: 0,
            empty: true,
        };
    }

    let winners: Vec<&ClosedTrade> = trades.iter().filter(|t| t.pnl > Decimal::ZERO).collect();
    let losers: Vec<&ClosedTrade> = trades.iter().filter(|t| t.pnl < Decimal::ZERO).collect();
    let breakeven = trades.len() - winners.len() - losers.len();

    let gross_profit: Decimal = winners.iter().map(|t| t.pnl).sum();
    let gross_loss: Decimal = losers.iter().map(|t| t.pnl).sum();
    let net_profit = gross_profit + gross_loss;

    let profit_factor = if gross_loss.is_zero() {
        None
    } else {
        Some(gross_profit / gross_loss.abs())
    };

    let avg_win = if winners.is_empty() {
        Decimal::ZERO
    } else {
        gross_profit / Decimal::from(winners.len())
    };
    let avg_loss = if losers.is_empty() {
        Decimal::ZERO
    } else {
        gross_loss / Decimal::from(losers.len())
    };

    let r_multiples: Vec<Decimal> = trades.iter().map(|t| t.r_multiple).collect();
    let returns: Vec<Decimal> = trades.iter().map(|t| t.pnl).collect();

    let hold_minutes: Vec<i64> = trades
        .iter()
        .map(|t| (t.exit_time - t.entry_time).num_minutes())
        .collect();
    let avg_hold_minutes = if hold_minutes.is_empty() {
        Decimal::ZERO
    } else {
        Decimal::from(hold_minutes.iter().sum::<i64>()) / Decimal::from(hold_minutes.len())
    };
    let max_hold_minutes = hold_minutes.into_iter().max().unwrap_or(0);

    let sharpe = {
        let sd = stdev(&returns);
        if sd.is_zero() {
            None
        } else {
            Some(mean(&returns) / sd)
        }
    };
    let sortino = {
        let sd = downside_stdev(&returns);
        if sd.is_zero() {
            None
        } else {
            Some(mean(&returns) / sd)
        }
    };

    TradeMetrics {
        total_trades: trades.len(),
        winners: winners.len(),
        losers: losers.len(),
        breakeven,
        win_rate: (Decimal::from(winners.len()) / Decimal::from(trades.len()) * Decimal::from(100)).round_dp(2),
        gross_profit,
        gross_loss,
        net_profit,
        profit_factor: profit_factor.map(|p| p.round_dp(2)),
        expectancy: (net_profit / Decimal::from(trades.len())).round_dp(2),
        avg_win: avg_win.round_dp(2),
        avg_loss: avg_loss.round_dp(2),
        avg_r_multiple: (mean(&r_multiples)).round_dp(2),
        sharpe: sharpe.map(|s| s.round_dp(2)),
        sortino: sortino.map(|s| s.round_dp(2)),
        avg_hold_minutes: avg_hold_minutes.round_dp(2),
        max_hold_minutes,
        empty: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::TradeStatus;
    use crate::signal::Direction;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal, r: Decimal) -> ClosedTrade {
        ClosedTrade {
            trade_id: 1,
            symbol: "SPY".into(),
            direction: Direction::Long,
            entry_price: dec!(100),
            entry_time: Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap(),
            original_size: dec!(10),
            exit_price: dec!(100) + pnl / dec!(10),
            exit_time: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            status: TradeStatus::TargetHit,
            pnl,
            pnl_pct: dec!(0),
            r_multiple: r,
            final_stop: dec!(99),
            stop_moved_to_breakeven: false,
            max_favorable_r: r,
            max_adverse_r: dec!(0),
            partial_exit_count: 0,
            partial_exits: vec![],
        }
    }

    #[test]
    fn empty_ledger_returns_flagged_zeroes() {
        let metrics = compute(&[]);
        assert!(metrics.empty);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.profit_factor, None);
    }

    #[test]
    fn profit_factor_is_none_when_gross_loss_is_zero() {
        let metrics = compute(&[trade(dec!(10), dec!(1)), trade(dec!(20), dec!(2))]);
        assert_eq!(metrics.profit_factor, None);
        assert_eq!(metrics.gross_loss, dec!(0));
    }

    #[test]
    fn scaled_exit_trade_counts_partial_exit_pnl_in_aggregates() {
        // Regression for a scaled exit (spec §8 concrete scenario 3):
        // a trade's total realized pnl must fold in every partial exit,
        // not just the final leg, or profit_factor/net_profit/expectancy
        // all silently undercount winners closed via `Scaled` targets.
        use crate::position::PartialExit;

        let mut scaled = trade(dec!(52.50), dec!(5.25));
        scaled.partial_exits = vec![PartialExit {
            exit_time: Utc.with_ymd_and_hms(2024, 1, 2, 14, 40, 0).unwrap(),
            exit_price: dec!(101),
            shares_exited: dec!(50),
            remaining_after: dec!(50),
            reason: TradeStatus::TargetHit,
            target_index: Some(0),
            pnl: dec!(50),
            r_multiple: dec!(5),
        }];
        scaled.partial_exit_count = 1;

        let metrics = compute(&[scaled]);
        assert_eq!(metrics.gross_profit, dec!(52.50));
        assert_eq!(metrics.net_profit, dec!(52.50));
        assert_eq!(metrics.profit_factor, None); // no losers
        assert_eq!(metrics.winners, 1);
    }

    #[test]
    fn win_rate_and_expectancy() {
        let metrics = compute(&[
            trade(dec!(100), dec!(2)),
            trade(dec!(-50), dec!(-1)),
            trade(dec!(50), dec!(1)),
            trade(dec!(-50), dec!(-1)),
        ]);
        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.winners, 2);
        assert_eq!(metrics.losers, 2);
        assert_eq!(metrics.win_rate, dec!(50.00));
        assert_eq!(metrics.net_profit, dec!(50));
        assert_eq!(metrics.expectancy, dec!(12.50));
        assert_eq!(metrics.profit_factor, Some(dec!(1.50)));
    }
}

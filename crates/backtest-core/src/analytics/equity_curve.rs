//! EquityCurve metrics (spec §4.8): return, volatility, and risk-adjusted
//! ratios derived from the daily-resampled equity curve.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading days per year used to annualize daily statistics (spec §4.8).
const TRADING_DAYS_PER_YEAR: i64 = 252;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurveMetrics {
    pub total_return_pct: Decimal,
    pub annualized_return_pct: Decimal,
    pub volatility_pct: Decimal,
    pub sharpe: Option<Decimal>,
    pub sortino: Option<Decimal>,
    /// `annualized_return / max_drawdown`; `None` if max_drawdown is zero.
    pub calmar: Option<Decimal>,
    pub empty: bool,
}

fn daily_returns(curve: &[(DateTime<Utc>, Decimal)]) -> Vec<Decimal> {
    curve
        .windows(2)
        .filter(|w| !w[0].1.is_zero())
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect()
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        Decimal::ZERO
    } else {
        values.iter().sum::<Decimal>() / Decimal::from(values.len())
    }
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

/// Computes EquityCurve metrics (spec §4.8). `rf_daily` is the daily
/// risk-free rate subtracted from mean daily return for Sharpe.
pub fn compute(curve: &[(DateTime<Utc>, Decimal)], rf_daily: Decimal, max_drawdown: Decimal) -> EquityCurveMetrics {
    if curve.len() < 2 {
        return EquityCurveMetrics {
            total_return_pct: Decimal::ZERO,
            annualized_return_pct: Decimal::ZERO,
            volatility_pct: Decimal::ZERO,
            sharpe: None,
            sortino: None,
            calmar: None,
            empty: true,
        };
    }

    let start_equity = curve.first().unwrap().1;
    let end_equity = curve.last().unwrap().1;
    let elapsed_days = (curve.last().unwrap().0 - curve.first().unwrap().0).num_days().max(1);

    let total_return = if start_equity.is_zero() {
        Decimal::ZERO
    } else {
        (end_equity - start_equity) / start_equity
    };
    let total_return_pct = (total_return * Decimal::from(100)).round_dp(2);

    let years = Decimal::from(elapsed_days) / Decimal::from(365);
    let annualized_return = if years.is_zero() {
        total_return
    } else {
        total_return / years
    };
    let annualized_return_pct = (annualized_return * Decimal::from(100)).round_dp(2);

    let returns = daily_returns(curve);
    let sd = stdev(&returns);
    let sqrt_252 = Decimal::from(TRADING_DAYS_PER_YEAR).sqrt().unwrap_or(Decimal::ZERO);
    let volatility = sd * sqrt_252;
    let volatility_pct = (volatility * Decimal::from(100)).round_dp(2);

    let sharpe = if sd.is_zero() {
        None
    } else {
        Some((((mean(&returns) - rf_daily) / sd) * sqrt_252).round_dp(2))
    };
    let sortino = {
        let dsd = downside_stdev(&returns);
        if dsd.is_zero() {
            None
        } else {
            Some((((mean(&returns) - rf_daily) / dsd) * sqrt_252).round_dp(2))
        }
    };
    let calmar = if max_drawdown.is_zero() {
        None
    } else {
        Some((annualized_return / max_drawdown).round_dp(2))
    };

    EquityCurveMetrics {
        total_return_pct,
        annualized_return_pct,
        volatility_pct,
        sharpe,
        sortino,
        calmar,
        empty: false,
    }
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
    fn single_point_curve_is_flagged_empty() {
        let metrics = compute(&[(ts(1), dec!(100_000))], Decimal::ZERO, Decimal::ZERO);
        assert!(metrics.empty);
    }

    #[test]
    fn total_return_reflects_start_and_end_equity() {
        let curve = vec![(ts(1), dec!(100_000)), (ts(31), dec!(110_000))];
        let metrics = compute(&curve, Decimal::ZERO, dec!(0.05));
        assert_eq!(metrics.total_return_pct, dec!(10.00));
        assert!(metrics.calmar.is_some());
    }
}

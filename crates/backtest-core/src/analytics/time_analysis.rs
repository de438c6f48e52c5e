//! TimeAnalysis (spec §4.8): partitions closed trades by entry time-of-day
//! bucket, ET weekday, and calendar month.

use std::collections::BTreeMap;

use chrono::Weekday;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::ClosedTrade;
use crate::time;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub count: usize,
    pub win_rate: Decimal,
    /// `None` when the bucket's gross loss is zero (same convention as
    /// `TradeMetrics::profit_factor`).
    pub profit_factor: Option<Decimal>,
    pub net_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeAnalysis {
    /// Keyed by 15-minute bucket index from market open (spec §3.8.8,
    /// `time::time_bucket_15m`); trades outside the regular session are
    /// excluded from this breakdown only.
    pub by_time_bucket: BTreeMap<u32, BucketStats>,
    pub by_weekday: BTreeMap<String, BucketStats>,
    pub by_month: BTreeMap<String, BucketStats>,
    pub best_time_bucket: Option<u32>,
    pub worst_time_bucket: Option<u32>,
    pub empty: bool,
}

fn bucket_stats(trades: &[&ClosedTrade]) -> BucketStats {
    let count = trades.len();
    let winners = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
    let gross_profit: Decimal = trades.iter().filter(|t| t.pnl > Decimal::ZERO).map(|t| t.pnl).sum();
    let gross_loss: Decimal = trades.iter().filter(|t| t.pnl < Decimal::ZERO).map(|t| t.pnl).sum();
    let net_profit: Decimal = trades.iter().map(|t| t.pnl).sum();
    let win_rate = if count == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(winners) / Decimal::from(count) * Decimal::from(100)).round_dp(2)
    };
    let profit_factor = if gross_loss.is_zero() {
        None
    } else {
        Some((gross_profit / gross_loss.abs()).round_dp(2))
    };
    BucketStats {
        count,
        win_rate,
        profit_factor,
        net_profit,
    }
}

fn weekday_label(w: Weekday) -> String {
    match w {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
    .to_string()
}

/// Computes TimeAnalysis (spec §4.8) over a closed-trade ledger, bucketing
/// by each trade's *entry* time.
pub fn compute(trades: &[ClosedTrade]) -> TimeAnalysis {
    if trades.is_empty() {
        return TimeAnalysis {
            empty: true,
            ..Default::default()
        };
    }

    let mut by_bucket_raw: BTreeMap<u32, Vec<&ClosedTrade>> = BTreeMap::new();
    let mut by_weekday_raw: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();
    let mut by_month_raw: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();

    for trade in trades {
        if let Some(bucket) = time::time_bucket_15m(trade.entry_time) {
            by_bucket_raw.entry(bucket).or_default().push(trade);
        }
        let weekday = weekday_label(time::weekday_et(trade.entry_time));
        by_weekday_raw.entry(weekday).or_default().push(trade);
        let et_date = time::date_et(trade.entry_time);
        let month = et_date.format("%Y-%m").to_string();
        by_month_raw.entry(month).or_default().push(trade);
    }

    let by_time_bucket: BTreeMap<u32, BucketStats> = by_bucket_raw
        .iter()
        .map(|(k, v)| (*k, bucket_stats(v)))
        .collect();
    let by_weekday: BTreeMap<String, BucketStats> = by_weekday_raw
        .iter()
        .map(|(k, v)| (k.clone(), bucket_stats(v)))
        .collect();
    let by_month: BTreeMap<String, BucketStats> = by_month_raw
        .iter()
        .map(|(k, v)| (k.clone(), bucket_stats(v)))
        .collect();

    let best_time_bucket = by_time_bucket
        .iter()
        .max_by_key(|(_, stats)| stats.net_profit)
        .map(|(k, _)| *k);
    let worst_time_bucket = by_time_bucket
        .iter()
        .min_by_key(|(_, stats)| stats.net_profit)
        .map(|(k, _)| *k);

    TimeAnalysis {
        by_time_bucket,
        by_weekday,
        by_month,
        best_time_bucket,
        worst_time_bucket,
        empty: false,
    }
}

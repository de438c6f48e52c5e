//! SignalAnalysis (spec §4.8): partitions closed trades by strategy id,
//! symbol, and direction (grade, when present, is left to callers that
//! enrich `ClosedTrade` with a custom tag — not modeled in the core).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::position::ClosedTrade;
use crate::signal::Direction;

use super::time_analysis::BucketStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SignalAnalysis {
    pub by_strategy: BTreeMap<String, BucketStats>,
    pub by_symbol: BTreeMap<String, BucketStats>,
    pub by_direction: BTreeMap<String, BucketStats>,
    pub empty: bool,
}

fn direction_label(d: Direction) -> String {
    match d {
        Direction::Long => "long".to_string(),
        Direction::Short => "short".to_string(),
    }
}

/// Computes SignalAnalysis (spec §4.8). `strategy_of` resolves a trade to
/// its originating strategy id; `ClosedTrade` does not itself retain the
/// strategy id, so callers (the Trade Simulator) pass a lookup keyed by
/// `trade_id`.
pub fn compute(trades: &[ClosedTrade], strategy_of: impl Fn(u64) -> Option<String>) -> SignalAnalysis {
    if trades.is_empty() {
        return SignalAnalysis {
            empty: true,
            ..Default::default()
        };
    }

    let mut by_strategy_raw: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();
    let mut by_symbol_raw: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();
    let mut by_direction_raw: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();

    for trade in trades {
        if let Some(strategy_id) = strategy_of(trade.trade_id) {
            by_strategy_raw.entry(strategy_id).or_default().push(trade);
        }
        by_symbol_raw
            .entry(trade.symbol.to_string())
            .or_default()
            .push(trade);
        by_direction_raw
            .entry(direction_label(trade.direction))
            .or_default()
            .push(trade);
    }

    SignalAnalysis {
        by_strategy: by_strategy_raw.iter().map(|(k, v)| (k.clone(), raw_stats(v))).collect(),
        by_symbol: by_symbol_raw.iter().map(|(k, v)| (k.clone(), raw_stats(v))).collect(),
        by_direction: by_direction_raw.iter().map(|(k, v)| (k.clone(), raw_stats(v))).collect(),
        empty: false,
    }
}

fn raw_stats(trades: &[&ClosedTrade]) -> BucketStats {
    use rust_decimal::Decimal;

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

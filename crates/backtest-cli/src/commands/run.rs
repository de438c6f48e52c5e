//! `backtest run` — a single inline backtest against a JSON bar file
//! (spec §6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use colored::Colorize;
use rust_decimal::Decimal;

use backtest_core::analytics::trade_metrics;
use backtest_core::run::BacktestRunConfig;
use backtest_core::strategy::StrategyRegistry;
use backtest_engine::coordinator::{self, ExecutionSettings, RunOutcome};
use backtest_engine::store::InMemoryBarStore;

use crate::bars::load_bars;
use crate::strategies::Or5RetestStrategy;

/// Parses `k=v` pairs from repeated `--strategy-param` flags.
pub fn parse_strategy_params(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        let Some((k, v)) = pair.split_once('=') else {
            bail!("invalid --strategy-param '{pair}', expected key=value");
        };
        map.insert(k.to_string(), v.to_string());
    }
    Ok(map)
}

/// Every strategy the CLI ships with, pre-registered.
pub fn builtin_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry.register(Box::new(Or5RetestStrategy));
    registry
}

#[allow(clippy::too_many_arguments)]
pub fn run_command(
    bars_path: PathBuf,
    symbols: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
    strategies: Vec<String>,
    capital: Decimal,
    risk: Decimal,
    unlimited: bool,
    strategy_params: Vec<String>,
) -> Result<RunOutcome> {
    let bars = load_bars(&bars_path)?;
    let store = InMemoryBarStore::new(bars);
    let registry = builtin_registry();

    let config = BacktestRunConfig {
        symbols: symbols.into_iter().map(Into::into).collect(),
        start_date: start,
        end_date: end,
        strategy_ids: strategies,
        strategy_params: parse_strategy_params(&strategy_params)?,
        initial_capital: capital,
        risk_per_trade: risk,
        unlimited_capital: unlimited,
    };

    let cancel = AtomicBool::new(false);
    // The one-shot CLI run has no interactive control surface to toggle
    // this, so it stays clear for the whole run.
    let paused = AtomicBool::new(false);
    let outcome = coordinator::run_backtest(
        &store,
        &registry,
        config,
        format!("cli-{}", uuid_like()),
        &ExecutionSettings::default(),
        &cancel,
        &paused,
        Box::new(|_| {}),
    )?;
    Ok(outcome)
}

/// A process-unique-enough id without pulling in a uuid dependency: the
/// teacher's CLI has no multi-run registry, so collisions across
/// processes are harmless.
fn uuid_like() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

pub fn format_outcome(outcome: &RunOutcome) -> String {
    let metrics = trade_metrics::compute(&outcome.account.closed_trades);
    let mut out = String::new();

    out.push_str(&format!("\n{}\n", "=".repeat(60).cyan()));
    out.push_str(&format!(
        "  {} {}\n",
        "BACKTEST RUN".cyan().bold(),
        outcome.run.id.dimmed()
    ));
    out.push_str(&format!("{}\n\n", "=".repeat(60).cyan()));

    out.push_str(&format!("  {:<20} {:?}\n", "Status:".dimmed(), outcome.run.status));
    out.push_str(&format!("  {:<20} {}\n", "Bars processed:".dimmed(), outcome.run.bars_processed));
    out.push_str(&format!("  {:<20} {}\n", "Signals generated:".dimmed(), outcome.run.signals_generated));
    out.push_str(&format!("  {:<20} {}\n", "Trades opened:".dimmed(), outcome.run.trades_opened));
    out.push_str(&format!("  {:<20} {}\n", "Trades closed:".dimmed(), outcome.run.trades_closed));

    out.push_str(&format!("\n{}\n", "-".repeat(60).dimmed()));
    out.push_str(&format!("{}\n", "  Trade Metrics".cyan().bold()));
    out.push_str(&format!("{}\n", "-".repeat(60).dimmed()));

    if metrics.empty {
        out.push_str("    (no closed trades)\n");
    } else {
        out.push_str(&format!("    {:<20} {}\n", "Net profit:".dimmed(), colorize(metrics.net_profit)));
        out.push_str(&format!("    {:<20} {:.1}%\n", "Win rate:".dimmed(), metrics.win_rate * Decimal::from(100)));
        out.push_str(&format!(
            "    {:<20} {}\n",
            "Profit factor:".dimmed(),
            metrics.profit_factor.map(|pf| pf.to_string()).unwrap_or_else(|| "inf".to_string())
        ));
        out.push_str(&format!("    {:<20} {}\n", "Expectancy:".dimmed(), colorize(metrics.expectancy)));
        out.push_str(&format!("    {:<20} {}\n", "Avg R-multiple:".dimmed(), colorize(metrics.avg_r_multiple)));
    }

    out.push_str(&format!("\n{}\n", "=".repeat(60).cyan()));
    out
}

fn colorize(value: Decimal) -> String {
    if value > Decimal::ZERO {
        value.to_string().green().to_string()
    } else if value < Decimal::ZERO {
        value.to_string().red().to_string()
    } else {
        value.to_string().yellow().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_param_pairs() {
        let pairs = vec!["min_rr=1.5".to_string(), "lookback=20".to_string()];
        let map = parse_strategy_params(&pairs).unwrap();
        assert_eq!(map.get("min_rr"), Some(&"1.5".to_string()));
        assert_eq!(map.get("lookback"), Some(&"20".to_string()));
    }

    #[test]
    fn rejects_malformed_pair() {
        let pairs = vec!["no-equals-sign".to_string()];
        assert!(parse_strategy_params(&pairs).is_err());
    }

    #[test]
    fn builtin_registry_has_or5_retest() {
        let registry = builtin_registry();
        assert!(registry.get("or5_retest").is_some());
    }
}

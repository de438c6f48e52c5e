//! `optimize run` — parameter-grid search, optionally walk-forward
//! validated (spec §4.9, §6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use colored::Colorize;
use rust_decimal::Decimal;

use backtest_core::run::BacktestRunConfig;
use backtest_engine::optimizer::{self, GridSearchResult, SelectionMetric, WalkForwardConfig, WalkForwardFold};
use backtest_engine::store::InMemoryBarStore;
use backtest_engine::ExecutionSettings;

use crate::bars::load_bars;
use crate::commands::run::{builtin_registry, parse_strategy_params};

/// Parses `axis=v1,v2,v3` entries into a parameter grid.
pub fn parse_grid(entries: &[String]) -> Result<HashMap<String, Vec<String>>> {
    let mut grid = HashMap::new();
    for entry in entries {
        let Some((axis, values)) = entry.split_once('=') else {
            bail!("invalid --grid '{entry}', expected axis=v1,v2,...");
        };
        let values: Vec<String> = values.split(',').map(str::to_string).collect();
        if values.is_empty() {
            bail!("--grid axis '{axis}' has no candidate values");
        }
        grid.insert(axis.to_string(), values);
    }
    Ok(grid)
}

/// Loads a parameter grid from a TOML file, one array-of-strings per
/// axis (grounded in the teacher's `Universe::from_toml` pattern):
///
/// ```toml
/// min_rr = ["1", "1.5", "2"]
/// lookback = ["10", "20"]
/// ```
pub fn load_grid_file(path: &Path) -> Result<HashMap<String, Vec<String>>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading grid file {}", path.display()))?;
    let grid: HashMap<String, Vec<String>> =
        toml::from_str(&content).with_context(|| format!("parsing grid file {} as axis = [values...] tables", path.display()))?;
    if grid.is_empty() {
        bail!("grid file {} defines no axes", path.display());
    }
    Ok(grid)
}

pub enum OptimizeOutcome {
    Grid { results: Vec<GridSearchResult>, metric: SelectionMetric },
    WalkForward(Vec<WalkForwardFold>),
}

#[allow(clippy::too_many_arguments)]
pub fn optimize_command(
    bars_path: PathBuf,
    symbols: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
    strategies: Vec<String>,
    capital: Decimal,
    risk: Decimal,
    grid_entries: Vec<String>,
    grid_file: Option<PathBuf>,
    metric: &str,
    walk_forward: bool,
) -> Result<OptimizeOutcome> {
    let metric = SelectionMetric::parse(metric)
        .with_context(|| format!("unknown --metric '{metric}'"))?;
    let bars = load_bars(&bars_path)?;
    let store = InMemoryBarStore::new(bars);
    let registry = builtin_registry();

    let mut grid = if let Some(path) = &grid_file {
        load_grid_file(path)?
    } else {
        HashMap::new()
    };
    grid.extend(parse_grid(&grid_entries)?);
    if grid.is_empty() {
        bail!("no grid axes supplied via --grid or --grid-file");
    }

    let base_config = BacktestRunConfig {
        symbols: symbols.into_iter().map(Into::into).collect(),
        start_date: start,
        end_date: end,
        strategy_ids: strategies,
        strategy_params: HashMap::new(),
        initial_capital: capital,
        risk_per_trade: risk,
        unlimited_capital: false,
    };
    let settings = ExecutionSettings::default();
    let cancel = AtomicBool::new(false);

    if walk_forward {
        let wf = WalkForwardConfig {
            training_months: 2,
            testing_months: 1,
            step_months: 1,
            min_trades: 5,
        };
        let folds = optimizer::run_walk_forward(&store, &registry, &base_config, &grid, &wf, &settings, &cancel, metric);
        Ok(OptimizeOutcome::WalkForward(folds))
    } else {
        let results = optimizer::run_parameter_grid(&store, &registry, &base_config, &grid, &settings, &cancel, Box::new(|_| {}));
        Ok(OptimizeOutcome::Grid { results, metric })
    }
}

pub fn format_outcome(outcome: &OptimizeOutcome) -> String {
    let mut out = String::new();
    match outcome {
        OptimizeOutcome::Grid { results, metric } => {
            out.push_str(&format!("\n{}\n", "Parameter grid results".cyan().bold()));
            let mut sorted: Vec<&GridSearchResult> = results.iter().collect();
            sorted.sort_by(|a, b| metric.score(&b.metrics).cmp(&metric.score(&a.metrics)));
            for r in sorted {
                out.push_str(&format!(
                    "  {:<40} net_profit={:<12} trades={}\n",
                    format!("{:?}", r.params),
                    r.metrics.net_profit,
                    r.trade_count
                ));
            }
        }
        OptimizeOutcome::WalkForward(folds) => {
            out.push_str(&format!("\n{}\n", "Walk-forward folds".cyan().bold()));
            for fold in folds {
                let overfit_tag = if fold.overfit { "OVERFIT".red().to_string() } else { "ok".green().to_string() };
                out.push_str(&format!(
                    "  {} -> {}: params={:?} train_net_profit={} test_net_profit={} [{}]\n",
                    fold.window.train_start,
                    fold.window.test_end,
                    fold.best_params,
                    fold.train_net_profit,
                    fold.test_metrics.net_profit,
                    overfit_tag
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_axis_grid() {
        let entries = vec!["min_rr=1,1.5,2".to_string(), "lookback=10,20".to_string()];
        let grid = parse_grid(&entries).unwrap();
        assert_eq!(grid.get("min_rr").unwrap().len(), 3);
        assert_eq!(grid.get("lookback").unwrap().len(), 2);
    }

    #[test]
    fn rejects_malformed_entry() {
        let entries = vec!["no-equals".to_string()];
        assert!(parse_grid(&entries).is_err());
    }

    #[test]
    fn loads_grid_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.toml");
        std::fs::write(&path, "min_rr = [\"1\", \"1.5\", \"2\"]\nlookback = [\"10\", \"20\"]\n").unwrap();
        let grid = load_grid_file(&path).unwrap();
        assert_eq!(grid.get("min_rr").unwrap().len(), 3);
        assert_eq!(grid.get("lookback").unwrap().len(), 2);
    }

    #[test]
    fn rejects_grid_file_with_no_axes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();
        assert!(load_grid_file(&path).is_err());
    }
}

//! Optimization Runner (spec §4.9): parameter-grid search executed in
//! parallel across independent runs, and a walk-forward harness that
//! selects a best parameter set per training window and scores it
//! out-of-sample.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use rust_decimal::Decimal;

use backtest_core::analytics::trade_metrics::{self, TradeMetrics};
use backtest_core::run::BacktestRunConfig;
use backtest_core::strategy::StrategyRegistry;

use crate::coordinator::{self, ExecutionSettings};
use crate::progress::{ProgressCallback, ProgressPayload, ThrottledProgress};
use crate::store::HistoricalBarStore;

/// Degradation beyond which a walk-forward fold is flagged overfit
/// (spec §4.9): `1 - test_net_profit / train_net_profit > 0.30`.
pub fn overfit_threshold() -> Decimal {
    Decimal::new(30, 2)
}

/// Expands a `{axis -> candidate values}` map into every combination
/// (spec §4.9). Order is unspecified across runs but deterministic for a
/// given `grid` (`HashMap` iteration order is stable within one process
/// run, and results are keyed by their own parameter map, not position).
pub fn cartesian_product(grid: &HashMap<String, Vec<String>>) -> Vec<HashMap<String, String>> {
    grid.iter().fold(vec![HashMap::new()], |acc, (key, values)| {
        acc.into_iter()
            .flat_map(|combo| {
                values.iter().map(move |v| {
                    let mut next = combo.clone();
                    next.insert(key.clone(), v.clone());
                    next
                })
            })
            .collect()
    })
}

/// One parameter combination's backtest result.
#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub params: HashMap<String, String>,
    pub metrics: TradeMetrics,
    pub trade_count: usize,
}

/// Runs every combination in `grid` against `base_config`'s date range,
/// overriding only `strategy_params`, in parallel (spec §4.9: independent
/// runs, no shared mutable state). Combinations whose run fails (e.g. an
/// invalid parameter) are silently dropped from the result set.
pub fn run_parameter_grid(
    store: &dyn HistoricalBarStore,
    registry: &StrategyRegistry,
    base_config: &BacktestRunConfig,
    grid: &HashMap<String, Vec<String>>,
    settings: &ExecutionSettings,
    cancel: &AtomicBool,
    progress_cb: ProgressCallback,
) -> Vec<GridSearchResult> {
    let paused = AtomicBool::new(false);
    let combos = cartesian_product(grid);
    let total = combos.len() as u64;
    tracing::info!(combinations = total, "grid search starting");
    let completed = AtomicU64::new(0);
    let progress = Mutex::new(ThrottledProgress::new(progress_cb, settings.progress_interval));

    let results: Vec<GridSearchResult> = combos
        .par_iter()
        .enumerate()
        .filter_map(|(i, combo)| {
            if cancel.load(Ordering::SeqCst) {
                tracing::debug!(combo = ?combo, "grid combination skipped, run cancelled");
                return None;
            }
            let mut config = base_config.clone();
            config.strategy_params = combo.clone();
            let run_id = format!("grid-{i}");

            let outcome = coordinator::run_backtest(
                store,
                registry,
                config,
                run_id,
                settings,
                cancel,
                &paused,
                Box::new(|_| {}),
            )
            .ok()?;

            let metrics = trade_metrics::compute(&outcome.account.closed_trades);
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress
                .lock()
                .expect("progress mutex poisoned")
                .report(ProgressPayload { completed: done, total });

            Some(GridSearchResult {
                trade_count: outcome.account.closed_trades.len(),
                params: combo.clone(),
                metrics,
            })
        })
        .collect();

    tracing::info!(combinations = total, completed = results.len(), "grid search finished");
    results
}

/// Sliding-window walk-forward configuration (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct WalkForwardConfig {
    pub training_months: u32,
    pub testing_months: u32,
    pub step_months: u32,
    /// Parameter sets producing fewer trades than this on the training
    /// window are excluded from selection as statistically unreliable.
    pub min_trades: usize,
}

/// One training/testing date range pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkForwardWindow {
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

/// Result of one walk-forward fold: the parameter set selected on the
/// training window, and how it performed out-of-sample.
#[derive(Debug, Clone)]
pub struct WalkForwardFold {
    pub window: WalkForwardWindow,
    pub best_params: HashMap<String, String>,
    pub train_net_profit: Decimal,
    pub test_metrics: TradeMetrics,
    /// `None` when `train_net_profit` is zero (degradation undefined).
    pub degradation: Option<Decimal>,
    pub overfit: bool,
}

/// Adds whole calendar months to `date`, clamping the day into the
/// target month's range (e.g. Jan 31 + 1 month -> Feb 28/29).
fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let total_months = i64::from(date.year()) * 12 + i64::from(date.month0()) + i64::from(months);
    let year = total_months.div_euclid(12) as i32;
    let month0 = total_months.rem_euclid(12) as u32;
    let mut day = date.day();
    loop {
        if let Some(d) = NaiveDate::from_ymd_opt(year, month0 + 1, day) {
            return d;
        }
        day -= 1;
    }
}

/// Generates consecutive train/test windows spanning `[start, end]`
/// (spec §4.9). Stops once a test window would extend past `end`.
pub fn generate_windows(start: NaiveDate, end: NaiveDate, cfg: &WalkForwardConfig) -> Vec<WalkForwardWindow> {
    let mut windows = Vec::new();
    let mut train_start = start;
    loop {
        let train_end = add_months(train_start, cfg.training_months);
        let test_start = train_end;
        let test_end = add_months(test_start, cfg.testing_months);
        if test_end > end {
            break;
        }
        windows.push(WalkForwardWindow {
            train_start,
            train_end,
            test_start,
            test_end,
        });
        train_start = add_months(train_start, cfg.step_months);
    }
    windows
}

/// Ranking metrics a grid search or walk-forward fold can select on
/// (spec §4.9, §6). `--metric profit_factor` is the CLI's named example;
/// `ProfitFactor` treats an undefined factor (no losers) as the worst
/// possible score so a single lucky all-winner combo can't rank above a
/// combo with a real, computed factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMetric {
    NetProfit,
    ProfitFactor,
    Expectancy,
    WinRate,
    AvgRMultiple,
}

impl SelectionMetric {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "net_profit" => Some(Self::NetProfit),
            "profit_factor" => Some(Self::ProfitFactor),
            "expectancy" => Some(Self::Expectancy),
            "win_rate" => Some(Self::WinRate),
            "avg_r_multiple" => Some(Self::AvgRMultiple),
            _ => None,
        }
    }

    /// The `Decimal` value of this metric for one run's `TradeMetrics`,
    /// used for both ranking and CLI display.
    pub fn score(self, metrics: &TradeMetrics) -> Decimal {
        match self {
            Self::NetProfit => metrics.net_profit,
            Self::ProfitFactor => metrics.profit_factor.unwrap_or(Decimal::MIN),
            Self::Expectancy => metrics.expectancy,
            Self::WinRate => metrics.win_rate,
            Self::AvgRMultiple => metrics.avg_r_multiple,
        }
    }
}

/// Picks the training-window winner: highest `metric` among combinations
/// meeting `min_trades`, breaking ties by trade count (more trades behind
/// the same score is the more reliable estimate).
fn select_best(results: &[GridSearchResult], min_trades: usize, metric: SelectionMetric) -> Option<&GridSearchResult> {
    let eligible: Vec<&GridSearchResult> = results.iter().filter(|r| r.trade_count >= min_trades).collect();
    let best_score = eligible.iter().map(|r| metric.score(&r.metrics)).max()?;
    eligible
        .into_iter()
        .filter(|r| metric.score(&r.metrics) == best_score)
        .max_by_key(|r| r.trade_count)
}

/// Runs the full walk-forward procedure over `base_config`'s date range
/// (spec §4.9): for each window, grid-search the training range, then
/// backtest the winning parameter set on the following test range.
/// Windows are processed sequentially because each one's grid search
/// already parallelizes internally across the full core count.
pub fn run_walk_forward(
    store: &dyn HistoricalBarStore,
    registry: &StrategyRegistry,
    base_config: &BacktestRunConfig,
    grid: &HashMap<String, Vec<String>>,
    wf: &WalkForwardConfig,
    settings: &ExecutionSettings,
    cancel: &AtomicBool,
    metric: SelectionMetric,
) -> Vec<WalkForwardFold> {
    let paused = AtomicBool::new(false);
    let windows = generate_windows(base_config.start_date, base_config.end_date, wf);
    tracing::info!(folds = windows.len(), "walk-forward starting");
    let mut folds = Vec::new();

    for window in windows {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("walk-forward cancelled");
            break;
        }

        let mut train_config = base_config.clone();
        train_config.start_date = window.train_start;
        train_config.end_date = window.train_end;

        let train_results = run_parameter_grid(
            store,
            registry,
            &train_config,
            grid,
            settings,
            cancel,
            Box::new(|_| {}),
        );

        let Some(best) = select_best(&train_results, wf.min_trades, metric) else {
            continue;
        };
        let best_params = best.params.clone();
        let train_net_profit = best.metrics.net_profit;

        let mut test_config = base_config.clone();
        test_config.start_date = window.test_start;
        test_config.end_date = window.test_end;
        test_config.strategy_params = best_params.clone();

        let run_id = format!("wf-test-{}-{}", window.test_start, window.test_end);
        let Ok(outcome) = coordinator::run_backtest(
            store,
            registry,
            test_config,
            run_id,
            settings,
            cancel,
            &paused,
            Box::new(|_| {}),
        ) else {
            continue;
        };

        let test_metrics = trade_metrics::compute(&outcome.account.closed_trades);
        let degradation = if train_net_profit.is_zero() {
            None
        } else {
            Some(Decimal::ONE - test_metrics.net_profit / train_net_profit)
        };
        let overfit = degradation.map(|d| d > overfit_threshold()).unwrap_or(false);
        if overfit {
            tracing::warn!(?window, ?degradation, "walk-forward fold flagged overfit");
        }

        folds.push(WalkForwardFold {
            window,
            best_params,
            train_net_profit,
            test_metrics,
            degradation,
            overfit,
        });
    }

    tracing::info!(folds = folds.len(), "walk-forward finished");
    folds
}

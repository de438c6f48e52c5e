//! Run Coordinator (spec §4, §6): wires the Bar Replayer, Signal
//! Collector, Trade Simulator, and Virtual Account into one run, and
//! offers both an inline (blocking) and a threaded execution mode. The
//! threaded mode mirrors the teacher's worker actor: an `mpsc` channel
//! pair plus an `Arc<AtomicBool>` cancel flag checked cooperatively
//! between timestamp groups, never an async runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::Utc;

use backtest_core::account::VirtualAccount;
use backtest_core::clock::VirtualClock;
use backtest_core::error::{ConfigError, Fatal, ReplayError, RuntimeError};
use backtest_core::fill::FillPolicy;
use backtest_core::run::{BacktestRun, BacktestRunConfig};
use backtest_core::strategy::{StrategyParams, StrategyRegistry};

use crate::collector::SignalCollector;
use crate::progress::{ProgressCallback, ProgressPayload, ThrottledProgress};
use crate::replayer::{BarReplayer, ReplayOutcome};
use crate::simulator::TradeSimulator;
use crate::store::{HistoricalBarStore, SessionFilter};

/// Errors a run can fail with, spanning all three core error taxonomies
/// plus the engine's own fatal-invariant marker.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Everything produced by a completed (or cancelled) run.
pub struct RunOutcome {
    pub run: BacktestRun,
    pub account: VirtualAccount,
}

/// Extra, run-independent settings the Coordinator needs beyond
/// `BacktestRunConfig` (spec §3 keeps fill/determinism knobs separate
/// from the run's trading configuration).
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub fill_policy: FillPolicy,
    pub rng_seed: u64,
    pub session_filter: SessionFilter,
    pub batch_size: u64,
    pub progress_interval: StdDuration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            fill_policy: FillPolicy::default(),
            rng_seed: 0,
            session_filter: SessionFilter::RegularOnly,
            batch_size: crate::replayer::DEFAULT_BATCH_SIZE,
            progress_interval: StdDuration::from_millis(200),
        }
    }
}

/// Runs one backtest to completion, cancellation, or failure, blocking
/// the calling thread (spec §4: Inline mode).
pub fn run_backtest(
    store: &dyn HistoricalBarStore,
    registry: &StrategyRegistry,
    config: BacktestRunConfig,
    run_id: String,
    settings: &ExecutionSettings,
    cancel: &AtomicBool,
    paused: &AtomicBool,
    progress_cb: ProgressCallback,
) -> Result<RunOutcome, RunError> {
    config.validate()?;

    tracing::info!(run_id = %run_id, symbols = ?config.symbols, strategies = ?config.strategy_ids, "run starting");

    let mut run = BacktestRun::new(run_id, config.clone());
    run.mark_running(Utc::now());

    let mut clock = VirtualClock::new();
    let mut account = VirtualAccount::new(config.initial_capital, config.risk_per_trade, config.unlimited_capital);
    let mut collector = SignalCollector::new(registry);
    let mut simulator = TradeSimulator::new(settings.fill_policy, settings.rng_seed);
    let mut replayer = BarReplayer::new(store).with_batch_size(settings.batch_size);

    let shared_params = StrategyParams {
        min_rr: config
            .strategy_params
            .get("min_rr")
            .and_then(|v| v.parse().ok()),
        extra: config.strategy_params.clone(),
    };
    let params_by_strategy: HashMap<String, StrategyParams> = config
        .strategy_ids
        .iter()
        .map(|id| (id.clone(), shared_params.clone()))
        .collect();

    let progress = ThrottledProgress::new(progress_cb, settings.progress_interval);
    let symbols = config.symbols.clone();

    let run_result = replayer.run(
        &mut clock,
        &symbols,
        config.start_date,
        config.end_date,
        settings.session_filter,
        cancel,
        paused,
        progress,
        |ts, group| {
            for bar in group {
                let signals = collector.on_bar(bar, &config.strategy_ids, &params_by_strategy);
                run.bars_processed += 1;
                run.signals_generated += signals.len() as u64;
                run.trades_opened += signals.len() as u64;

                let closed = simulator
                    .process_bar(&mut account, bar)
                    .map_err(|e| Fatal(e.to_string()))?;
                run.trades_closed += closed.len() as u64;

                simulator.enqueue_signals(signals);
            }
            account.record_equity(ts);
            run.current_date = Some(backtest_core::time::date_et(ts));
            Ok(())
        },
    );

    let now = Utc::now();
    match run_result {
        Ok(ReplayOutcome::Completed) => {
            tracing::info!(
                run_id = %run.id,
                bars_processed = run.bars_processed,
                trades_opened = run.trades_opened,
                trades_closed = run.trades_closed,
                "run completed"
            );
            run.mark_completed(now);
            Ok(RunOutcome { run, account })
        }
        Ok(ReplayOutcome::Cancelled) => {
            tracing::info!(run_id = %run.id, bars_processed = run.bars_processed, "run cancelled");
            run.mark_cancelled(now);
            Ok(RunOutcome { run, account })
        }
        Err(err) => {
            tracing::warn!(run_id = %run.id, error = %err, "run failed");
            run.mark_failed(now, err.to_string());
            Err(RunError::Replay(err))
        }
    }
}

/// A message from the Coordinator thread to whoever launched it
/// (spec §6: progress channel plus a terminal outcome).
pub enum CoordinatorUpdate {
    Progress(ProgressPayload),
    Finished(Result<RunOutcome, RunError>),
}

/// Handle to a run executing on its own thread (spec §4: Threaded mode),
/// grounded on the teacher's worker actor: an owned cancel flag plus a
/// receiver for updates, no shared mutable state with the caller.
pub struct RunHandle {
    cancel_flag: Arc<AtomicBool>,
    pause_flag: Arc<AtomicBool>,
    pub updates: Receiver<CoordinatorUpdate>,
    join_handle: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Cooperative cancellation: observed between timestamp groups, never
    /// mid-group (spec §5).
    pub fn cancel(&self) {
        tracing::info!("cancel requested");
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Suspends batch pulls between timestamp groups without losing replay
    /// position (spec §4.2). No-op if already paused.
    pub fn pause(&self) {
        tracing::info!("pause requested");
        self.pause_flag.store(true, Ordering::SeqCst);
    }

    /// Clears a prior `pause`, letting the run loop continue from where it
    /// suspended (spec §4.2). No-op if not paused.
    pub fn resume(&self) {
        tracing::info!("resume requested");
        self.pause_flag.store(false, Ordering::SeqCst);
    }

    /// Blocks until the run thread exits. Safe to call after already
    /// having drained `updates` to `Finished`.
    pub fn join(mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns a run on its own thread and returns immediately with a handle
/// (spec §4: Threaded mode). `store` and `registry` must outlive the
/// thread, hence the `Arc` bounds.
pub fn spawn_backtest(
    store: Arc<dyn HistoricalBarStore>,
    registry: Arc<StrategyRegistry>,
    config: BacktestRunConfig,
    run_id: String,
    settings: ExecutionSettings,
) -> RunHandle {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let cancel_flag_clone = cancel_flag.clone();
    let pause_flag = Arc::new(AtomicBool::new(false));
    let pause_flag_clone = pause_flag.clone();
    let (update_tx, update_rx): (Sender<CoordinatorUpdate>, Receiver<CoordinatorUpdate>) = mpsc::channel();

    let join_handle = thread::spawn(move || {
        let progress_tx = update_tx.clone();
        let progress_cb: ProgressCallback = Box::new(move |payload| {
            let _ = progress_tx.send(CoordinatorUpdate::Progress(payload));
        });

        let outcome = run_backtest(
            store.as_ref(),
            registry.as_ref(),
            config,
            run_id,
            &settings,
            &cancel_flag_clone,
            &pause_flag_clone,
            progress_cb,
        );
        let _ = update_tx.send(CoordinatorUpdate::Finished(outcome));
    });

    RunHandle {
        cancel_flag,
        pause_flag,
        updates: update_rx,
        join_handle: Some(join_handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_core::bar::{Bar, Session};
    use backtest_core::key_levels::KeyLevels;
    use backtest_core::signal::{Direction, Setup};
    use backtest_core::strategy::Strategy;
    use crate::store::InMemoryBarStore;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;

    struct AlwaysLong;

    impl Strategy for AlwaysLong {
        fn id(&self) -> &str {
            "always_long"
        }

        fn evaluate(
            &self,
            window: &VecDeque<Bar>,
            _levels: &KeyLevels,
            _params: &StrategyParams,
        ) -> Result<Vec<Setup>, RuntimeError> {
            let last = window.back().unwrap();
            Ok(vec![Setup {
                symbol: last.symbol.clone(),
                direction: Direction::Long,
                entry_price: last.close,
                stop_loss: last.close - dec!(1),
                take_profit: Some(last.close + dec!(2)),
                exit_strategy: None,
                strategy_id: "always_long".to_string(),
                level_type: None,
                level_price: None,
                retest_bar: last.clone(),
            }])
        }
    }

    fn bars_for_one_session() -> Vec<Bar> {
        let open = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(); // 09:30 ET
        (0..30)
            .map(|i| {
                let ts = open + chrono::Duration::minutes(i);
                Bar::new("SPY", ts, dec!(100), dec!(100.5), dec!(99.5), dec!(100.2), dec!(1000), Session::Regular)
            })
            .collect()
    }

    fn base_config() -> BacktestRunConfig {
        BacktestRunConfig {
            symbols: vec!["SPY".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            strategy_ids: vec!["always_long".to_string()],
            strategy_params: HashMap::new(),
            initial_capital: dec!(100_000),
            risk_per_trade: dec!(0.01),
            unlimited_capital: false,
        }
    }

    #[test]
    fn inline_run_completes_and_processes_all_bars() {
        let store = InMemoryBarStore::new(bars_for_one_session());
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(AlwaysLong));
        let cancel = AtomicBool::new(false);
        let paused = AtomicBool::new(false);

        let outcome = run_backtest(
            &store,
            &registry,
            base_config(),
            "run-1".to_string(),
            &ExecutionSettings::default(),
            &cancel,
            &paused,
            Box::new(|_| {}),
        )
        .unwrap();

        assert_eq!(outcome.run.status, backtest_core::run::RunStatus::Completed);
        assert_eq!(outcome.run.bars_processed, 30);
    }

    #[test]
    fn invalid_config_is_rejected_before_any_bar_runs() {
        let store = InMemoryBarStore::new(bars_for_one_session());
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(AlwaysLong));
        let cancel = AtomicBool::new(false);
        let paused = AtomicBool::new(false);
        let mut config = base_config();
        config.symbols.clear();

        let err = run_backtest(
            &store,
            &registry,
            config,
            "run-1".to_string(),
            &ExecutionSettings::default(),
            &cancel,
            &paused,
            Box::new(|_| {}),
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::EmptySymbols)));
    }

    #[test]
    fn threaded_run_delivers_finished_update() {
        let store: Arc<dyn HistoricalBarStore> = Arc::new(InMemoryBarStore::new(bars_for_one_session()));
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(AlwaysLong));
        let registry = Arc::new(registry);

        let handle = spawn_backtest(
            store,
            registry,
            base_config(),
            "run-2".to_string(),
            ExecutionSettings::default(),
        );

        let mut finished = None;
        for update in handle.updates.iter() {
            if let CoordinatorUpdate::Finished(outcome) = update {
                finished = Some(outcome);
                break;
            }
        }
        handle.join();
        let outcome = finished.expect("run should send a Finished update").unwrap();
        assert_eq!(outcome.run.status, backtest_core::run::RunStatus::Completed);
    }

    #[test]
    fn pause_then_resume_still_completes() {
        let store: Arc<dyn HistoricalBarStore> = Arc::new(InMemoryBarStore::new(bars_for_one_session()));
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(AlwaysLong));
        let registry = Arc::new(registry);

        let handle = spawn_backtest(
            store,
            registry,
            base_config(),
            "run-3".to_string(),
            ExecutionSettings::default(),
        );

        handle.pause();
        std::thread::sleep(StdDuration::from_millis(20));
        handle.resume();

        let mut finished = None;
        for update in handle.updates.iter() {
            if let CoordinatorUpdate::Finished(outcome) = update {
                finished = Some(outcome);
                break;
            }
        }
        handle.join();
        let outcome = finished.expect("run should send a Finished update").unwrap();
        assert_eq!(outcome.run.status, backtest_core::run::RunStatus::Completed);
    }
}

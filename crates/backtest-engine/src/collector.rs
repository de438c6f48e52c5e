//! Signal Collector (spec §4.3): per-symbol rolling bar window plus
//! `KeyLevels`, dispatching configured strategies inside the trading
//! window and promoting their `Setup`s to `Signal`s.

use std::collections::{HashMap, VecDeque};

use chrono::NaiveTime;

use backtest_core::bar::Bar;
use backtest_core::key_levels::KeyLevels;
use backtest_core::signal::Signal;
use backtest_core::strategy::{StrategyParams, StrategyRegistry};
use backtest_core::symbol::Symbol;
use backtest_core::time;

/// Rolling window length (spec §4.3).
pub const WINDOW_SIZE: usize = 100;
/// Minimum window size before strategies are evaluated (spec §4.3).
pub const MIN_WINDOW_FOR_EVALUATION: usize = 10;
/// Default end of the trading window, 11:00 ET (spec §4.3, §4.7).
pub const DEFAULT_TRADING_WINDOW_END: NaiveTime = NaiveTime::from_hms_opt(11, 0, 0).unwrap();

struct SymbolState {
    window: VecDeque<Bar>,
    levels: KeyLevels,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_SIZE),
            levels: KeyLevels::new(),
        }
    }

    fn push(&mut self, bar: Bar) {
        self.levels.update(&bar);
        self.window.push_back(bar);
        while self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }
    }
}

/// Per-symbol rolling state and the strategy registry (spec §4.3).
pub struct SignalCollector<'a> {
    states: HashMap<Symbol, SymbolState>,
    registry: &'a StrategyRegistry,
    trading_window_end: NaiveTime,
    signals_count: u64,
    next_signal_id: u64,
}

impl<'a> SignalCollector<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self {
            states: HashMap::new(),
            registry,
            trading_window_end: DEFAULT_TRADING_WINDOW_END,
            signals_count: 0,
            next_signal_id: 1,
        }
    }

    pub fn with_trading_window_end(mut self, end: NaiveTime) -> Self {
        self.trading_window_end = end;
        self
    }

    pub fn signals_count(&self) -> u64 {
        self.signals_count
    }

    pub fn levels_for(&self, symbol: &Symbol) -> Option<&KeyLevels> {
        self.states.get(symbol).map(|s| &s.levels)
    }

    /// Processes one bar for its symbol (spec §4.3 steps 1-3), returning
    /// any signals generated this bar. `active_strategy_ids` restricts
    /// dispatch to the strategies the current run selected, even if the
    /// registry holds more. The bar's own `bar_time` stands in for
    /// "clock.now()" (spec §4.1: the replayer has already advanced the
    /// clock to this exact timestamp before a group is dispatched).
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        active_strategy_ids: &[String],
        params_by_strategy: &HashMap<String, StrategyParams>,
    ) -> Vec<Signal> {
        let state = self
            .states
            .entry(bar.symbol.clone())
            .or_insert_with(SymbolState::new);
        state.push(bar.clone());

        let mut signals = Vec::new();

        let eligible = time::is_market_open(bar.bar_time)
            && time::is_in_trading_window(bar.bar_time, self.trading_window_end)
            && state.window.len() >= MIN_WINDOW_FOR_EVALUATION;
        if !eligible {
            return signals;
        }

        for strategy_id in active_strategy_ids {
            let strategy_id = strategy_id.as_str();
            let strategy = match self.registry.get(strategy_id) {
                Some(s) => s,
                None => continue,
            };
            let default_params = StrategyParams::default();
            let params = params_by_strategy.get(strategy_id).unwrap_or(&default_params);
            let setups = match strategy.evaluate(&state.window, &state.levels, params) {
                Ok(setups) => setups,
                Err(err) => {
                    tracing::warn!(strategy = strategy_id, error = %err, "strategy evaluation failed");
                    continue;
                }
            };
            for setup in setups {
                if setup.validate().is_err() {
                    tracing::warn!(strategy = strategy_id, "dropping setup with invalid price ordering");
                    continue;
                }
                let signal = Signal {
                    id: self.next_signal_id,
                    setup,
                    generated_at: bar.bar_time,
                };
                self.next_signal_id += 1;
                self.signals_count += 1;
                signals.push(signal);
            }
        }

        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_core::bar::Session;
    use backtest_core::signal::{Direction, Setup};
    use backtest_core::strategy::Strategy;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

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
        ) -> Result<Vec<Setup>, backtest_core::error::RuntimeError> {
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

    fn bar_at(ts: chrono::DateTime<Utc>) -> Bar {
        Bar::new("SPY", ts, dec!(100), dec!(101), dec!(99), dec!(100.5), dec!(1000), Session::Regular)
    }

    #[test]
    fn does_not_evaluate_before_window_fills() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(AlwaysLong));
        let mut collector = SignalCollector::new(&registry);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap();
        let active = vec!["always_long".to_string()];
        let signals = collector.on_bar(&bar_at(t0), &active, &HashMap::new());
        assert!(signals.is_empty());
    }

    #[test]
    fn evaluates_once_window_and_trading_window_conditions_hold() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(AlwaysLong));
        let mut collector = SignalCollector::new(&registry);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap();
        let active = vec!["always_long".to_string()];

        for i in 0..10 {
            let ts = t0 + chrono::Duration::minutes(i);
            let signals = collector.on_bar(&bar_at(ts), &active, &HashMap::new());
            if i < 9 {
                assert!(signals.is_empty());
            } else {
                assert_eq!(signals.len(), 1);
                assert_eq!(collector.signals_count(), 1);
            }
        }
    }

    #[test]
    fn outside_trading_window_never_evaluates() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(AlwaysLong));
        let mut collector = SignalCollector::new(&registry);
        let late = Utc.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).unwrap(); // 15:00 ET
        let active = vec!["always_long".to_string()];
        for i in 0..15 {
            let ts = late + chrono::Duration::minutes(i);
            let signals = collector.on_bar(&bar_at(ts), &active, &HashMap::new());
            assert!(signals.is_empty());
        }
    }
}

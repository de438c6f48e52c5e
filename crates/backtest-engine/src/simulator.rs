//! Trade Simulator (spec §4.7): per-bar application of the Exit Manager's
//! actions, the end-of-window time exit, and delayed execution of
//! pending entry signals.

use std::collections::{HashMap, VecDeque};

use chrono::NaiveTime;
use rand::rngs::StdRng;
use rand::SeedableRng;

use backtest_core::account::{OpenPositionParams, VirtualAccount};
use backtest_core::bar::Bar;
use backtest_core::error::RuntimeResult;
use backtest_core::exit_manager::{self, ExitAction};
use backtest_core::fill::{self, FillPolicy};
use backtest_core::position::{ClosedTrade, TradeStatus};
use backtest_core::signal::{ExitStrategy, Signal};
use backtest_core::symbol::Symbol;
use backtest_core::time;

/// Default end of the trading window, after which any position still
/// open on its symbol is force-closed (spec §4.7).
pub const DEFAULT_TIME_EXIT: NaiveTime = NaiveTime::from_hms_opt(11, 0, 0).unwrap();

/// Executes a signal's entry on the first bar of its symbol seen after
/// the signal was generated, applies exit-manager actions each bar, and
/// force-closes positions past the time-exit cutoff (spec §4.7).
pub struct TradeSimulator {
    fill_policy: FillPolicy,
    time_exit: NaiveTime,
    pending: HashMap<Symbol, VecDeque<Signal>>,
    trade_strategy: HashMap<u64, String>,
    rng: StdRng,
}

impl TradeSimulator {
    pub fn new(fill_policy: FillPolicy, seed: u64) -> Self {
        Self {
            fill_policy,
            time_exit: DEFAULT_TIME_EXIT,
            pending: HashMap::new(),
            trade_strategy: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_time_exit(mut self, time_exit: NaiveTime) -> Self {
        self.time_exit = time_exit;
        self
    }

    /// Strategy id that opened `trade_id`, if the simulator itself opened
    /// it (used by signal-level analytics breakdowns).
    pub fn strategy_of(&self, trade_id: u64) -> Option<String> {
        self.trade_strategy.get(&trade_id).cloned()
    }

    /// Queues `signals` for entry execution on the next bar seen for
    /// their symbol. Must be called only after [`Self::process_bar`] has
    /// run for the bar the signals were generated on, so a signal never
    /// executes on the same bar it was generated (spec §4.7).
    pub fn enqueue_signals(&mut self, signals: Vec<Signal>) {
        for signal in signals {
            self.pending
                .entry(signal.setup.symbol.clone())
                .or_default()
                .push_back(signal);
        }
    }

    /// Processes one bar: time-exit force-closes, then exit-manager
    /// actions for this symbol's open positions (in creation order), then
    /// execution of one pending entry signal for this symbol. Returns the
    /// trades closed this bar.
    pub fn process_bar(&mut self, account: &mut VirtualAccount, bar: &Bar) -> RuntimeResult<Vec<ClosedTrade>> {
        let mut closed = Vec::new();

        let mut trade_ids: Vec<u64> = account
            .open_positions
            .values()
            .filter(|p| p.symbol == bar.symbol)
            .map(|p| p.trade_id)
            .collect();
        trade_ids.sort_unstable();

        if time::time_et(bar.bar_time) >= self.time_exit {
            for trade_id in trade_ids {
                let Some(position) = account.open_positions.get(&trade_id) else {
                    continue;
                };
                let direction = position.direction;
                let price = fill::exit_fill(&self.fill_policy, bar, direction, &mut self.rng);
                let trade = account.close_position(trade_id, price, bar.bar_time, TradeStatus::TimeExit)?;
                closed.push(trade);
            }
        } else {
            for trade_id in trade_ids {
                let Some(position) = account.open_positions.get_mut(&trade_id) else {
                    continue;
                };
                exit_manager::update_tracking(position, bar);
                let snapshot = account.open_positions.get(&trade_id).expect("just updated").clone();
                let actions = exit_manager::evaluate(&snapshot, bar);

                for action in actions {
                    match action {
                        ExitAction::UpdateStop { new_stop } => {
                            account.update_stop(trade_id, new_stop)?;
                        }
                        ExitAction::PartialExit {
                            target_index,
                            shares,
                            price,
                            reason,
                        } => {
                            account.partial_close(
                                trade_id,
                                price,
                                bar.bar_time,
                                shares,
                                reason,
                                Some(target_index),
                            )?;
                        }
                        ExitAction::FullExit { price, reason, time } => {
                            let trade = account.close_position(trade_id, price, time, reason)?;
                            closed.push(trade);
                        }
                    }
                }
            }
        }

        if let Some(queue) = self.pending.get_mut(&bar.symbol) {
            if let Some(signal) = queue.pop_front() {
                self.execute_entry(account, bar, signal);
            }
        }

        Ok(closed)
    }

    fn execute_entry(&mut self, account: &mut VirtualAccount, bar: &Bar, signal: Signal) {
        let setup = &signal.setup;
        let fill = fill::entry_fill(
            &self.fill_policy,
            setup.entry_price,
            setup.direction,
            Some(bar),
            &mut self.rng,
        );
        let exit_strategy = setup.exit_strategy.clone().unwrap_or(ExitStrategy::Fixed {
            stop: setup.stop_loss,
            take_profit: setup.take_profit,
            breakeven: None,
        });

        let params = OpenPositionParams {
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            entry_price: fill.price,
            entry_time: bar.bar_time,
            initial_stop: setup.stop_loss,
            exit_strategy,
        };

        match account.open_position(params) {
            Ok(trade_id) => {
                self.trade_strategy.insert(trade_id, setup.strategy_id.clone());
            }
            Err(err) => {
                tracing::warn!(
                    symbol = %setup.symbol,
                    strategy = %setup.strategy_id,
                    error = %err,
                    "dropping signal: could not open position"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_core::bar::Session;
    use backtest_core::signal::{Direction, Setup};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, ts: chrono::DateTime<Utc>, open: rust_decimal::Decimal, high: rust_decimal::Decimal, low: rust_decimal::Decimal, close: rust_decimal::Decimal) -> Bar {
        Bar::new(symbol, ts, open, high, low, close, dec!(1000), Session::Regular)
    }

    fn setup_signal(ts: chrono::DateTime<Utc>) -> Signal {
        Signal {
            id: 1,
            generated_at: ts,
            setup: Setup {
                symbol: "SPY".into(),
                direction: Direction::Long,
                entry_price: dec!(100),
                stop_loss: dec!(99),
                take_profit: Some(dec!(102)),
                exit_strategy: None,
                strategy_id: "always_long".to_string(),
                level_type: None,
                level_price: None,
                retest_bar: bar("SPY", ts, dec!(100), dec!(100.5), dec!(99.5), dec!(100)),
            },
        }
    }

    #[test]
    fn pending_signal_executes_on_next_bar_not_same_bar() {
        let mut account = VirtualAccount::new(dec!(100_000), dec!(0.01), false);
        let mut sim = TradeSimulator::new(FillPolicy::default(), 7);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(1);

        let b0 = bar("SPY", t0, dec!(100), dec!(100.5), dec!(99.5), dec!(100.2));
        sim.process_bar(&mut account, &b0).unwrap();
        sim.enqueue_signals(vec![setup_signal(t0)]);
        assert!(account.open_positions.is_empty());

        let b1 = bar("SPY", t1, dec!(100.2), dec!(100.8), dec!(100.0), dec!(100.5));
        sim.process_bar(&mut account, &b1).unwrap();
        assert_eq!(account.open_positions.len(), 1);
    }

    #[test]
    fn time_exit_force_closes_open_positions() {
        let mut account = VirtualAccount::new(dec!(100_000), dec!(0.01), false);
        account
            .open_position(OpenPositionParams {
                symbol: "SPY".into(),
                direction: Direction::Long,
                entry_price: dec!(100),
                entry_time: Utc.with_ymd_and_hms(2024, 1, 2, 14, 35, 0).unwrap(),
                initial_stop: dec!(99),
                exit_strategy: ExitStrategy::Fixed {
                    stop: dec!(99),
                    take_profit: Some(dec!(110)),
                    breakeven: None,
                },
            })
            .unwrap();

        let mut sim = TradeSimulator::new(FillPolicy::default(), 7);
        let past_cutoff = Utc.with_ymd_and_hms(2024, 1, 2, 16, 0, 0).unwrap(); // 11:00 ET
        let b = bar("SPY", past_cutoff, dec!(101), dec!(101.5), dec!(100.5), dec!(101.2));
        let closed = sim.process_bar(&mut account, &b).unwrap();

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, TradeStatus::TimeExit);
        assert!(account.open_positions.is_empty());
    }

    #[test]
    fn exit_manager_full_exit_closes_and_is_reported() {
        let mut account = VirtualAccount::new(dec!(100_000), dec!(0.01), false);
        account
            .open_position(OpenPositionParams {
                symbol: "SPY".into(),
                direction: Direction::Long,
                entry_price: dec!(100),
                entry_time: Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap(),
                initial_stop: dec!(99),
                exit_strategy: ExitStrategy::Fixed {
                    stop: dec!(99),
                    take_profit: Some(dec!(102)),
                    breakeven: None,
                },
            })
            .unwrap();

        let mut sim = TradeSimulator::new(FillPolicy::default(), 7);
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 14, 35, 0).unwrap();
        let b = bar("SPY", ts, dec!(100.2), dec!(102.5), dec!(99.8), dec!(102.1));
        let closed = sim.process_bar(&mut account, &b).unwrap();

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, TradeStatus::TargetHit);
        assert!(account.open_positions.is_empty());
    }
}

//! Bar Replayer (spec §4.2): the only component that advances the
//! Virtual Clock, fetching batches from a `HistoricalBarStore` and
//! fanning each timestamp group out to its consumers synchronously so
//! the per-run ordering invariant (spec §5) holds regardless of how many
//! threads the actors run on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use backtest_core::bar::Bar;
use backtest_core::clock::VirtualClock;
use backtest_core::error::{Fatal, ReplayResult};
use backtest_core::symbol::Symbol;

use crate::progress::{ProgressPayload, ThrottledProgress};
use crate::store::{HistoricalBarStore, SessionFilter};

/// Default fetch size for one round-trip to the store (spec §4.2).
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

/// Lifecycle state of one replay (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// Outcome of a full `BarReplayer::run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed,
    Cancelled,
}

/// Replays bars from `store` in non-decreasing `bar_time` order, grouped
/// by timestamp, advancing `clock` once per group and invoking `on_group`
/// synchronously before moving to the next timestamp (spec §5: every bar
/// is processed to completion before the next timestamp is dispatched).
pub struct BarReplayer<'a> {
    store: &'a dyn HistoricalBarStore,
    batch_size: u64,
    state: ReplayState,
}

impl<'a> BarReplayer<'a> {
    pub fn new(store: &'a dyn HistoricalBarStore) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            state: ReplayState::Idle,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Runs the replay to completion or cancellation. `on_group` receives
    /// the bars sharing one `bar_time`, already sorted by ascending
    /// symbol (spec §5). `cancel` and `paused` are polled between
    /// timestamp groups only — both are cooperative and never interrupt a
    /// group in flight (spec §5). While `paused` is set, batch pulls are
    /// suspended until it clears (or `cancel` is set, which always wins).
    pub fn run(
        &mut self,
        clock: &mut VirtualClock,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
        session_filter: SessionFilter,
        cancel: &AtomicBool,
        paused: &AtomicBool,
        mut progress: ThrottledProgress,
        mut on_group: impl FnMut(DateTime<Utc>, &[Bar]) -> Result<(), Fatal>,
    ) -> ReplayResult<ReplayOutcome> {
        self.state = ReplayState::Running;
        tracing::debug!(symbols = ?symbols, start = %start, end = %end, "replay starting");

        let total = self.store.count(symbols, start, end, session_filter)?;
        let mut offset = 0u64;
        let mut processed = 0u64;
        let mut pending: Vec<Bar> = Vec::new();

        loop {
            if cancel.load(Ordering::SeqCst) {
                self.state = ReplayState::Cancelled;
                tracing::info!(processed, "replay cancelled");
                return Ok(ReplayOutcome::Cancelled);
            }

            if self.wait_while_paused(cancel, paused, processed)? {
                return Ok(ReplayOutcome::Cancelled);
            }

            let batch = self
                .store
                .fetch_batch(symbols, start, end, session_filter, offset, self.batch_size)?;
            offset += batch.len() as u64;

            if batch.is_empty() && pending.is_empty() {
                break;
            }
            pending.extend(batch);

            // Drain complete timestamp groups; the last group in `pending`
            // might be split across the next batch, so it is kept back
            // unless this was the final fetch.
            let last_fetch = (offset) >= total;
            while let Some(group_end) = self.next_group_boundary(&pending, last_fetch) {
                let group: Vec<Bar> = pending.drain(..group_end).collect();
                let ts = group[0].bar_time;
                clock.advance(ts);

                if let Err(fatal) = on_group(ts, &group) {
                    self.state = ReplayState::Failed;
                    return Err(backtest_core::error::ReplayError::ReplayFailed {
                        cause: fatal.0,
                    });
                }

                processed += group.len() as u64;
                progress.report(ProgressPayload {
                    completed: processed,
                    total,
                });

                if cancel.load(Ordering::SeqCst) {
                    self.state = ReplayState::Cancelled;
                    tracing::info!(processed, "replay cancelled");
                    return Ok(ReplayOutcome::Cancelled);
                }
            }

            if batch.is_empty() {
                break;
            }
        }

        self.state = ReplayState::Completed;
        tracing::debug!(processed, "replay completed");
        Ok(ReplayOutcome::Completed)
    }

    /// Blocks while `paused` is set, re-checking `cancel` on each wake so a
    /// cancel issued during a pause still takes effect immediately rather
    /// than waiting for `resume` (spec §4.2). Returns `true` if the caller
    /// should treat the run as cancelled.
    fn wait_while_paused(&mut self, cancel: &AtomicBool, paused: &AtomicBool, processed: u64) -> ReplayResult<bool> {
        if !paused.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.state = ReplayState::Paused;
        tracing::debug!(processed, "replay paused");
        while paused.load(Ordering::SeqCst) {
            if cancel.load(Ordering::SeqCst) {
                self.state = ReplayState::Cancelled;
                tracing::info!(processed, "replay cancelled while paused");
                return Ok(true);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.state = ReplayState::Running;
        tracing::debug!(processed, "replay resumed");
        Ok(false)
    }

    /// Length of the next complete timestamp-group prefix of `pending`,
    /// or `None` if the buffer ends mid-group and more data may still
    /// arrive (`force` bypasses this when the store is exhausted).
    fn next_group_boundary(&self, pending: &[Bar], force: bool) -> Option<usize> {
        if pending.is_empty() {
            return None;
        }
        let first_ts = pending[0].bar_time;
        let boundary = pending.iter().position(|b| b.bar_time != first_ts);
        match boundary {
            Some(idx) => Some(idx),
            None if force => Some(pending.len()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBarStore;
    use backtest_core::bar::Session;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    fn bar(symbol: &str, ts: DateTime<Utc>) -> Bar {
        Bar::new(symbol, ts, dec!(100), dec!(101), dec!(99), dec!(100.5), dec!(1000), Session::Regular)
    }

    #[test]
    fn groups_bars_by_timestamp_in_symbol_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let t1 = t0 + ChronoDuration::minutes(1);
        let store = InMemoryBarStore::new(vec![
            bar("TSLA", t0),
            bar("AAPL", t0),
            bar("AAPL", t1),
            bar("TSLA", t1),
        ]);
        let symbols: Vec<Symbol> = vec!["AAPL".into(), "TSLA".into()];
        let mut clock = VirtualClock::new();
        let cancel = AtomicBool::new(false);
        let paused = AtomicBool::new(false);
        let progress = ThrottledProgress::new(Box::new(|_| {}), StdDuration::from_secs(0));

        let mut groups: Vec<(DateTime<Utc>, Vec<Symbol>)> = Vec::new();
        let mut replayer = BarReplayer::new(&store).with_batch_size(2);
        let outcome = replayer
            .run(
                &mut clock,
                &symbols,
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                SessionFilter::RegularOnly,
                &cancel,
                &paused,
                progress,
                |ts, group| {
                    groups.push((ts, group.iter().map(|b| b.symbol.clone()).collect()));
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(outcome, ReplayOutcome::Completed);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, t0);
        assert_eq!(groups[0].1, vec![Symbol::from("AAPL"), Symbol::from("TSLA")]);
        assert_eq!(groups[1].0, t1);
    }

    #[test]
    fn cancellation_stops_before_next_group() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let t1 = t0 + ChronoDuration::minutes(1);
        let store = InMemoryBarStore::new(vec![bar("AAPL", t0), bar("AAPL", t1)]);
        let symbols: Vec<Symbol> = vec!["AAPL".into()];
        let mut clock = VirtualClock::new();
        let cancel = AtomicBool::new(false);
        let paused = AtomicBool::new(false);
        let progress = ThrottledProgress::new(Box::new(|_| {}), StdDuration::from_secs(0));

        let mut seen = 0;
        let mut replayer = BarReplayer::new(&store);
        let outcome = replayer
            .run(
                &mut clock,
                &symbols,
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                SessionFilter::RegularOnly,
                &cancel,
                &paused,
                progress,
                |_, _| {
                    seen += 1;
                    cancel.store(true, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(outcome, ReplayOutcome::Cancelled);
        assert_eq!(seen, 1);
    }

    #[test]
    fn pause_suspends_between_groups_and_resume_continues() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let t1 = t0 + ChronoDuration::minutes(1);
        let store = InMemoryBarStore::new(vec![bar("AAPL", t0), bar("AAPL", t1)]);
        let symbols: Vec<Symbol> = vec!["AAPL".into()];
        let mut clock = VirtualClock::new();
        let cancel = AtomicBool::new(false);
        let paused = AtomicBool::new(false);
        let progress = ThrottledProgress::new(Box::new(|_| {}), StdDuration::from_secs(0));

        let mut seen = 0;
        let mut replayer = BarReplayer::new(&store);
        let outcome = std::thread::scope(|scope| {
            scope.spawn(|| {
                // Give the first group a chance to dispatch, then pause and
                // resume mid-run; resume happens quickly so the assertion
                // below doesn't depend on timing beyond "it does finish".
                std::thread::sleep(StdDuration::from_millis(5));
                paused.store(true, Ordering::SeqCst);
                std::thread::sleep(StdDuration::from_millis(30));
                paused.store(false, Ordering::SeqCst);
            });

            replayer
                .run(
                    &mut clock,
                    &symbols,
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                    SessionFilter::RegularOnly,
                    &cancel,
                    &paused,
                    progress,
                    |_, _| {
                        seen += 1;
                        Ok(())
                    },
                )
                .unwrap()
        });

        assert_eq!(outcome, ReplayOutcome::Completed);
        assert_eq!(seen, 2);
        assert_eq!(replayer.state(), ReplayState::Completed);
    }
}

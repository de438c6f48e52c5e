//! Historical bar store (spec §6): the external read interface the Bar
//! Replayer pulls from. Production backends (Parquet, a time-series
//! database) implement this trait; `InMemoryBarStore` backs tests and the
//! BDD suite.

use chrono::NaiveDate;

use backtest_core::bar::{Bar, Session};
use backtest_core::error::{ReplayError, ReplayResult};
use backtest_core::symbol::Symbol;

/// Which sessions a replay should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFilter {
    RegularOnly,
    IncludeExtended,
}

impl SessionFilter {
    fn accepts(self, session: Session) -> bool {
        match self {
            SessionFilter::RegularOnly => session == Session::Regular,
            SessionFilter::IncludeExtended => true,
        }
    }
}

/// Read-only historical bar source (spec §6). Requires efficient
/// `(symbol, bar_time)` range scans and a total count, used by the
/// Replayer to size its progress denominator up front.
pub trait HistoricalBarStore: Send + Sync {
    /// Total bars matching the filter, used as the Replayer's progress
    /// denominator.
    fn count(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
        session_filter: SessionFilter,
    ) -> ReplayResult<u64>;

    /// Fetches up to `batch_size` bars starting at `offset`, ordered by
    /// `(bar_time, symbol)` ascending (spec §5 ordering guarantee).
    fn fetch_batch(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
        session_filter: SessionFilter,
        offset: u64,
        batch_size: u64,
    ) -> ReplayResult<Vec<Bar>>;
}

/// An in-memory store backed by a pre-sorted `Vec<Bar>`, for tests and
/// the BDD suite. Sorts and validates its source slice once at
/// construction.
pub struct InMemoryBarStore {
    bars: Vec<Bar>,
}

impl InMemoryBarStore {
    /// Builds a store from `bars`, sorting by `(bar_time, symbol)` to
    /// guarantee the ordering invariant regardless of input order.
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by(|a, b| a.bar_time.cmp(&b.bar_time).then_with(|| a.symbol.cmp(&b.symbol)));
        Self { bars }
    }

    fn matches(&self, bar: &Bar, symbols: &[Symbol], start: NaiveDate, end: NaiveDate, filter: SessionFilter) -> bool {
        let date = backtest_core::time::date_et(bar.bar_time);
        symbols.contains(&bar.symbol) && date >= start && date <= end && filter.accepts(bar.session)
    }
}

impl HistoricalBarStore for InMemoryBarStore {
    fn count(&self, symbols: &[Symbol], start: NaiveDate, end: NaiveDate, session_filter: SessionFilter) -> ReplayResult<u64> {
        Ok(self
            .bars
            .iter()
            .filter(|b| self.matches(b, symbols, start, end, session_filter))
            .count() as u64)
    }

    fn fetch_batch(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
        session_filter: SessionFilter,
        offset: u64,
        batch_size: u64,
    ) -> ReplayResult<Vec<Bar>> {
        if batch_size == 0 {
            return Err(ReplayError::ReplayFailed {
                cause: "batch_size must be positive".to_string(),
            });
        }
        let filtered: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| self.matches(b, symbols, start, end, session_filter))
            .cloned()
            .collect();
        Ok(filtered
            .into_iter()
            .skip(offset as usize)
            .take(batch_size as usize)
            .collect())
    }
}

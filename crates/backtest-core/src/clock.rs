//! Virtual Clock (spec §4.1).
//!
//! Owns the single `current_time` for a run. No component other than the
//! Bar Replayer may call [`VirtualClock::advance`]; every other reader is
//! pure against whatever was last advanced to. This is the one source of
//! wall-clock truth inside a run — nothing in the core calls
//! `Utc::now()`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::RuntimeError;
use crate::time;

#[derive(Debug, Default)]
pub struct VirtualClock {
    current_time: Option<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock. Callers must supply non-decreasing values;
    /// violating monotonicity is a programming bug (the replayer is the
    /// only caller, and it sources timestamps from an ascending stream),
    /// so this panics rather than returning a recoverable error.
    pub fn advance(&mut self, t: DateTime<Utc>) {
        if let Some(prev) = self.current_time {
            assert!(
                t >= prev,
                "VirtualClock::advance called with non-monotonic time: {t} < {prev}"
            );
        }
        self.current_time = Some(t);
    }

    pub fn now(&self) -> Result<DateTime<Utc>, RuntimeError> {
        self.current_time.ok_or(RuntimeError::ClockNotStarted)
    }

    pub fn today_et(&self) -> Result<NaiveDate, RuntimeError> {
        Ok(time::date_et(self.now()?))
    }

    pub fn time_et(&self) -> Result<NaiveTime, RuntimeError> {
        Ok(time::time_et(self.now()?))
    }

    pub fn market_open(&self) -> bool {
        match self.current_time {
            Some(t) => time::is_market_open(t),
            None => false,
        }
    }
}

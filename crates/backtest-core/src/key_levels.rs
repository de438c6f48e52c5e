//! Intraday key-level tracking (spec §3, §4.3).
//!
//! `KeyLevels` holds one symbol's reference prices for the trading day
//! currently in progress. [`KeyLevels::update`] is the pure transition
//! function the Signal Collector calls once per bar; it is deterministic
//! over `(bar, previous state)` so replays are bit-identical.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::time;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extreme {
    pub high: Decimal,
    pub low: Decimal,
}

impl Extreme {
    fn extend(&mut self, high: Decimal, low: Decimal) {
        self.high = self.high.max(high);
        self.low = self.low.min(low);
    }

    fn from_bar(bar: &Bar) -> Self {
        Self {
            high: bar.high,
            low: bar.low,
        }
    }
}

/// Per-symbol, per-day reference levels (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyLevels {
    tracked_date: Option<NaiveDate>,

    pub previous_day_high: Option<Decimal>,
    pub previous_day_low: Option<Decimal>,

    pub premarket_high: Option<Decimal>,
    pub premarket_low: Option<Decimal>,

    pub opening_range_5m_high: Option<Decimal>,
    pub opening_range_5m_low: Option<Decimal>,
    or5_frozen: bool,

    pub opening_range_15m_high: Option<Decimal>,
    pub opening_range_15m_low: Option<Decimal>,
    or15_frozen: bool,

    /// Running intraday extreme for today, rolled into tomorrow's PDH/PDL
    /// at the next day boundary.
    intraday_extreme: Option<Extreme>,
}

impl KeyLevels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one bar's effect on the level state (spec §4.3 step 2).
    pub fn update(&mut self, bar: &Bar) {
        let bar_date = time::date_et(bar.bar_time);

        match self.tracked_date {
            None => {
                self.tracked_date = Some(bar_date);
            }
            Some(prev) if prev != bar_date => {
                // Day boundary: snapshot yesterday's intraday extreme into
                // today's PDH/PDL, then reset the rest.
                if let Some(extreme) = self.intraday_extreme.take() {
                    self.previous_day_high = Some(extreme.high);
                    self.previous_day_low = Some(extreme.low);
                }
                self.premarket_high = None;
                self.premarket_low = None;
                self.opening_range_5m_high = None;
                self.opening_range_5m_low = None;
                self.or5_frozen = false;
                self.opening_range_15m_high = None;
                self.opening_range_15m_low = None;
                self.or15_frozen = false;
                self.tracked_date = Some(bar_date);
            }
            _ => {}
        }

        if time::is_premarket(bar.bar_time) {
            extend_opt(&mut self.premarket_high, &mut self.premarket_low, bar);
        } else if time::is_or5_window(bar.bar_time) {
            if !self.or5_frozen {
                extend_opt(
                    &mut self.opening_range_5m_high,
                    &mut self.opening_range_5m_low,
                    bar,
                );
            }
        } else if time::is_or15_window(bar.bar_time) {
            // OR5 freezes the instant its window ends.
            self.or5_frozen = true;
            if !self.or15_frozen {
                // Promote OR5 extremes if absent (e.g. first bar the
                // symbol was ever observed landed inside the OR15 window).
                if self.opening_range_5m_high.is_none() {
                    self.opening_range_5m_high = Some(bar.high);
                    self.opening_range_5m_low = Some(bar.low);
                }
                extend_opt(
                    &mut self.opening_range_15m_high,
                    &mut self.opening_range_15m_low,
                    bar,
                );
            }
        } else {
            self.or5_frozen = true;
            self.or15_frozen = true;
        }

        // Intraday extremes accumulate all session bars for tomorrow's PDH/PDL.
        match &mut self.intraday_extreme {
            Some(extreme) => extreme.extend(bar.high, bar.low),
            None => self.intraday_extreme = Some(Extreme::from_bar(bar)),
        }
    }

    pub fn tracked_date(&self) -> Option<NaiveDate> {
        self.tracked_date
    }
}

fn extend_opt(high: &mut Option<Decimal>, low: &mut Option<Decimal>, bar: &Bar) {
    match (high.as_mut(), low.as_mut()) {
        (Some(h), Some(l)) => {
            *h = (*h).max(bar.high);
            *l = (*l).min(bar.low);
        }
        _ => {
            *high = Some(bar.high);
            *low = Some(bar.low);
        }
    }
}

/// Shared helper for constructing a `DateTime<Utc>` at a given ET
/// wall-clock time, used heavily by tests in this crate and the engine.
pub fn et_naive_to_utc(date: NaiveDate, time: chrono::NaiveTime) -> DateTime<Utc> {
    use chrono_tz::America::New_York;
    let naive = date.and_time(time);
    New_York
        .from_local_datetime(&naive)
        .single()
        .expect("unambiguous local time")
        .with_timezone(&Utc)
}

use chrono::TimeZone as _;

//! UTC -> America/New_York conversions for market-hour predicates (spec §9).
//!
//! This is the only place in the core that is allowed to know about a
//! time zone other than UTC; every other component reasons in UTC and
//! calls into here for ET-derived predicates.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::America::New_York;

/// `09:30:00` ET — regular session open.
pub const REGULAR_OPEN: NaiveTime = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
/// `16:00:00` ET — regular session close.
pub const REGULAR_CLOSE: NaiveTime = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
/// `04:00:00` ET — premarket session open.
pub const PREMARKET_OPEN: NaiveTime = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
/// `09:35:00` ET — opening-range-5m window end.
pub const OR5_END: NaiveTime = NaiveTime::from_hms_opt(9, 35, 0).unwrap();
/// `09:45:00` ET — opening-range-15m window end.
pub const OR15_END: NaiveTime = NaiveTime::from_hms_opt(9, 45, 0).unwrap();

/// Converts a UTC timestamp to its Eastern calendar date.
pub fn date_et(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&New_York).date_naive()
}

/// Converts a UTC timestamp to its Eastern time-of-day.
pub fn time_et(ts: DateTime<Utc>) -> NaiveTime {
    ts.with_timezone(&New_York).time()
}

/// True iff `ts`'s Eastern time-of-day lies in `[09:30, 16:00)`.
pub fn is_market_open(ts: DateTime<Utc>) -> bool {
    let t = time_et(ts);
    t >= REGULAR_OPEN && t < REGULAR_CLOSE
}

/// True iff `ts`'s Eastern time-of-day lies in `[04:00, 09:30)` (premarket).
pub fn is_premarket(ts: DateTime<Utc>) -> bool {
    let t = time_et(ts);
    t >= PREMARKET_OPEN && t < REGULAR_OPEN
}

/// True iff `ts`'s Eastern time-of-day lies in `[09:30, 09:35)` (OR5 window).
pub fn is_or5_window(ts: DateTime<Utc>) -> bool {
    let t = time_et(ts);
    t >= REGULAR_OPEN && t < OR5_END
}

/// True iff `ts`'s Eastern time-of-day lies in `[09:35, 09:45)` (OR15 window).
pub fn is_or15_window(ts: DateTime<Utc>) -> bool {
    let t = time_et(ts);
    t >= OR5_END && t < OR15_END
}

/// True iff `ts`'s Eastern time-of-day lies in `[09:30, 11:00)`, the
/// default strategy-evaluation trading window (spec §4.3).
pub fn is_in_trading_window(ts: DateTime<Utc>, window_end: NaiveTime) -> bool {
    let t = time_et(ts);
    t >= REGULAR_OPEN && t < window_end
}

/// Minute-of-day-resolution bucket index for TimeAnalysis (spec §4.8):
/// 15-minute buckets starting at market open. Returns `None` outside the
/// regular session.
pub fn time_bucket_15m(ts: DateTime<Utc>) -> Option<u32> {
    let t = time_et(ts);
    if t < REGULAR_OPEN || t >= REGULAR_CLOSE {
        return None;
    }
    let minutes_since_open =
        (t.num_seconds_from_midnight() - REGULAR_OPEN.num_seconds_from_midnight()) / 60;
    Some(minutes_since_open / 15)
}

/// ET weekday, used by TimeAnalysis.
pub fn weekday_et(ts: DateTime<Utc>) -> chrono::Weekday {
    ts.with_timezone(&New_York).weekday()
}

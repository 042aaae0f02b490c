//! Timestamp and calendar-day utilities
//!
//! Streak and attendance rules work at calendar-day granularity in one fixed
//! reference timezone. Everything here is pure; callers pass `now` in.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Calendar day of `ts` as observed in `tz`
pub fn calendar_day(ts: DateTime<Utc>, tz: &FixedOffset) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

/// Whole days from `from` to `to` (negative when `to` is earlier)
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    to.signed_duration_since(from).num_days()
}

/// Fractional hours elapsed from `earlier` to `later`
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    later.signed_duration_since(earlier).num_milliseconds() as f64 / 3_600_000.0
}

/// English weekday name ("Monday" .. "Sunday")
pub fn day_name(day: NaiveDate) -> &'static str {
    match day.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Build the reference timezone from a minute offset east of UTC
pub fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

/// Unix epoch milliseconds of a timestamp (storage representation)
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Timestamp from stored unix epoch milliseconds
///
/// Out-of-range values collapse to the epoch rather than failing a read.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

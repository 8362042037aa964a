//! Clocks, half-open intervals, and aggregation-window computation.
//!
//! All window boundaries align to fixed epochs so that independent
//! scheduler runs compute identical windows (and therefore identical
//! task-marker names) for the same wall-clock period.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// The timestamp layout used in batch object keys and task payloads.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d/%H/%M";

/// A source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// The default clock, backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a fixed instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A half-open time interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Inclusive lower bound.
    pub begin: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl Interval {
    /// Creates a new interval.
    #[must_use]
    pub const fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { begin, end }
    }

    /// Returns true if `instant` falls within the interval.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.begin <= instant && instant < self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", fmt_rfc3339(self.begin), fmt_rfc3339(self.end))
    }
}

/// Returns the window of batches eligible for intake scheduling.
///
/// Extends 24 hours into the future to pick up batches written by
/// producers with skewed clocks.
#[must_use]
pub fn intake_interval(clock: &dyn Clock, max_age: Duration) -> Interval {
    let now = clock.now();
    Interval::new(now - max_age, now + Duration::hours(24))
}

/// Returns the most recent fully-elapsed aggregation window.
///
/// Lets `t = now - grace` and `n = floor(t / period)`; the window is
/// `[n * period, (n + 1) * period)`, anchored at the Unix epoch. Two
/// processes whose `t` values land in the same aligned period compute
/// the same window.
#[must_use]
pub fn aggregation_interval(clock: &dyn Clock, period: Duration, grace: Duration) -> Interval {
    let t = clock.now() - grace;
    let period_secs = period.num_seconds().max(1);
    let n = t.timestamp().div_euclid(period_secs);
    let begin = DateTime::from_timestamp(n * period_secs, 0).unwrap_or_default();
    Interval::new(begin, begin + period)
}

/// Formats a timestamp the way batch keys and task payloads spell it,
/// e.g. `2020/10/31/20/29`.
#[must_use]
pub fn fmt_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Formats a timestamp as RFC 3339 with second precision in UTC,
/// e.g. `2020-10-31T18:00:00Z`. Used in aggregate task-marker names.
#[must_use]
pub fn fmt_rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Serde adapter for the `YYYY/MM/DD/HH/mm` timestamp layout used in
/// task payloads.
pub mod slash_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::TIMESTAMP_FORMAT;

    /// Serializes `instant` as `YYYY/MM/DD/HH/mm`.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn serialize<S>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::fmt_timestamp(*instant))
    }

    /// Deserializes a `YYYY/MM/DD/HH/mm` string into a UTC timestamp.
    ///
    /// # Errors
    ///
    /// Fails when the string does not match the layout.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .map_err(|e| de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))?;
        Ok(naive.and_utc())
    }
}

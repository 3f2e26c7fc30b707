//! Conversion between wall-clock instants and floating-point second
//! counts.

use chrono::{DateTime, Utc};

/// Signed number of seconds elapsed from `start` to `end`.
///
/// Negative when `end` precedes `start` (clock skew, future-dated starts).
/// Millisecond precision is sufficient for audible synchronization.
#[must_use]
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds();
    millis as f64 / 1000.0
}

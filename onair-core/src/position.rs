//! Pure position reconstruction for a looping broadcast.
//!
//! Every client derives its playback offset from the same persisted start
//! instant and its own wall clock; no client-to-client communication is
//! involved. The functions here are deterministic and side-effect free.

use crate::error::{CoreError, Result};
use crate::model::{start_anchor, BroadcastState, StartAnchor};
use crate::time::seconds_between;
use chrono::{DateTime, Utc};

/// Current offset in seconds into a track that started at `start` and loops
/// every `duration_seconds`.
///
/// Returns `0.0` when `now` precedes `start` (clock skew or a future-dated
/// start); never returns a negative offset.
///
/// # Errors
///
/// Returns [`CoreError::DurationInvalid`] when `duration_seconds` is not a
/// finite positive number. Callers with an unprobed media file should fall
/// back to the stored nominal duration or defer the computation.
pub fn position(now: DateTime<Utc>, start: DateTime<Utc>, duration_seconds: f64) -> Result<f64> {
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return Err(CoreError::DurationInvalid {
            seconds: duration_seconds,
        });
    }
    let elapsed = seconds_between(start, now);
    if elapsed < 0.0 {
        return Ok(0.0);
    }
    Ok(elapsed % duration_seconds)
}

/// Target offset for a broadcast snapshot, preferring a measured media
/// duration over the stored nominal one.
///
/// Returns `None` when no usable duration is known yet; the caller defers
/// the seek until the media element reports one.
#[must_use]
pub fn target_offset(
    state: &BroadcastState,
    now: DateTime<Utc>,
    measured_duration: Option<f64>,
) -> Option<f64> {
    let valid = |d: &f64| d.is_finite() && *d > 0.0;
    let duration = measured_duration
        .filter(valid)
        .or_else(|| {
            state
                .current_track
                .as_ref()
                .map(|t| t.duration_seconds)
                .filter(valid)
        })?;

    match start_anchor(state, now) {
        StartAnchor::Instant(start) => position(now, start, duration).ok(),
        StartAnchor::FixedOffset(seconds) => Some(seconds.max(0.0) % duration),
    }
}

//! Shared broadcast state model.
//!
//! One [`BroadcastState`] exists system-wide; every client reconstructs its
//! playback position from the instants recorded here plus its own wall
//! clock. Writes go through [`BroadcastPatch`] so each update is an explicit
//! merge against the singleton document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Denormalized copy of a track's identifying fields, embedded in
/// [`BroadcastState`] at the moment the track was selected.
///
/// This is a snapshot, not a live foreign key: deleting the track afterward
/// does not retroactively change an in-flight broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSnapshot {
    /// Identifier of the track in the track library.
    pub track_id: String,
    /// Where the media element loads the audio from.
    pub source_url: String,
    /// Nominal duration in seconds, corrected lazily once a client measures
    /// the true media duration.
    pub duration_seconds: f64,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub cover_url: Option<String>,
}

/// A track as owned by the track library collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub source_url: String,
    pub cover_url: Option<String>,
    pub duration_seconds: f64,
}

impl Track {
    /// Take a denormalized snapshot suitable for embedding in the broadcast
    /// state.
    #[must_use]
    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            track_id: self.id.clone(),
            source_url: self.source_url.clone(),
            duration_seconds: self.duration_seconds,
            title: self.title.clone(),
            artist: self.artist.clone(),
            cover_url: self.cover_url.clone(),
        }
    }
}

/// The single shared broadcast state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastState {
    /// Snapshot of the track currently on air (None when off air).
    pub current_track: Option<TrackSnapshot>,
    /// Whether a broadcast is currently authorized to play.
    pub is_playing: bool,
    /// Wall-clock moment the current track began or was last restarted.
    /// The single source of truth for position reconstruction.
    pub broadcast_start_time: Option<DateTime<Utc>>,
    /// Legacy/fallback position in seconds, authoritative only when
    /// `broadcast_start_time` is absent.
    pub current_time: f64,
    /// Instant of the last write; last-resort fallback start time.
    pub timestamp: DateTime<Utc>,
    /// Start of the authorized broadcast window, when armed.
    pub scheduled_start_time: Option<DateTime<Utc>>,
    /// End of the authorized broadcast window, when armed.
    pub scheduled_end_time: Option<DateTime<Utc>>,
    /// Track to play during the scheduled window.
    pub scheduled_track_id: Option<String>,
    /// Whether a schedule is currently armed.
    pub is_scheduled: bool,
}

impl Default for BroadcastState {
    fn default() -> Self {
        Self {
            current_track: None,
            is_playing: false,
            broadcast_start_time: None,
            current_time: 0.0,
            timestamp: Utc::now(),
            scheduled_start_time: None,
            scheduled_end_time: None,
            scheduled_track_id: None,
            is_scheduled: false,
        }
    }
}

impl BroadcastState {
    /// Check if the on-air track differs from another state's.
    #[must_use]
    pub fn track_changed(&self, other: &Self) -> bool {
        match (&self.current_track, &other.current_track) {
            (Some(a), Some(b)) => a.track_id != b.track_id || a.source_url != b.source_url,
            (None, None) => false,
            _ => true,
        }
    }

    /// Whether an armed schedule window contains `now`.
    #[must_use]
    pub fn schedule_active(&self, now: DateTime<Utc>) -> bool {
        if !self.is_scheduled {
            return false;
        }
        match (self.scheduled_start_time, self.scheduled_end_time) {
            (Some(start), Some(end)) => start <= now && now <= end,
            _ => false,
        }
    }
}

/// The instant (or fixed offset) a client should anchor its position
/// computation to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartAnchor {
    /// Compute position as elapsed wall-clock time since this instant.
    Instant(DateTime<Utc>),
    /// No usable instant; the stored position stands as-is.
    FixedOffset(f64),
}

/// Select the start anchor for position reconstruction.
///
/// Canonical priority order: the scheduled start (while its window is
/// active) wins over `broadcast_start_time`, which wins over the last write
/// `timestamp` (only while playing); otherwise the stored `current_time`
/// is used verbatim. Every client applying this order to the same snapshot
/// converges to the same offset.
#[must_use]
pub fn start_anchor(state: &BroadcastState, now: DateTime<Utc>) -> StartAnchor {
    if state.schedule_active(now) {
        if let Some(start) = state.scheduled_start_time {
            return StartAnchor::Instant(start);
        }
    }
    if let Some(start) = state.broadcast_start_time {
        return StartAnchor::Instant(start);
    }
    if state.is_playing {
        return StartAnchor::Instant(state.timestamp);
    }
    StartAnchor::FixedOffset(state.current_time)
}

/// Partial update against the broadcast state singleton.
///
/// Outer `Option` = "field present in this patch"; inner `Option` on
/// nullable fields = the new value, which may be an explicit null.
#[derive(Debug, Clone, Default)]
pub struct BroadcastPatch {
    pub current_track: Option<Option<TrackSnapshot>>,
    pub is_playing: Option<bool>,
    pub broadcast_start_time: Option<Option<DateTime<Utc>>>,
    pub current_time: Option<f64>,
    pub scheduled_start_time: Option<Option<DateTime<Utc>>>,
    pub scheduled_end_time: Option<Option<DateTime<Utc>>>,
    pub scheduled_track_id: Option<Option<String>>,
    pub is_scheduled: Option<bool>,
}

impl BroadcastPatch {
    /// Set (or clear) the on-air track snapshot.
    #[must_use]
    pub fn track(mut self, track: Option<TrackSnapshot>) -> Self {
        self.current_track = Some(track);
        self
    }

    #[must_use]
    pub const fn playing(mut self, is_playing: bool) -> Self {
        self.is_playing = Some(is_playing);
        self
    }

    /// Set (or clear) the broadcast start instant.
    #[must_use]
    pub const fn start_time(mut self, start: Option<DateTime<Utc>>) -> Self {
        self.broadcast_start_time = Some(start);
        self
    }

    #[must_use]
    pub const fn position(mut self, seconds: f64) -> Self {
        self.current_time = Some(seconds);
        self
    }

    /// Arm a schedule window for a track.
    #[must_use]
    pub fn schedule(
        mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        track_id: impl Into<String>,
    ) -> Self {
        self.scheduled_start_time = Some(Some(start));
        self.scheduled_end_time = Some(Some(end));
        self.scheduled_track_id = Some(Some(track_id.into()));
        self.is_scheduled = Some(true);
        self
    }

    /// Clear all schedule fields and disarm.
    #[must_use]
    pub fn clear_schedule(mut self) -> Self {
        self.scheduled_start_time = Some(None);
        self.scheduled_end_time = Some(None);
        self.scheduled_track_id = Some(None);
        self.is_scheduled = Some(false);
        self
    }

    /// Convenience patch taking a broadcast off air while leaving any armed
    /// schedule intact.
    #[must_use]
    pub fn stop_broadcast() -> Self {
        Self::default()
            .track(None)
            .playing(false)
            .position(0.0)
            .start_time(None)
    }

    /// Merge this patch into a state. The caller stamps `timestamp`.
    pub fn apply(&self, state: &mut BroadcastState) {
        if let Some(track) = &self.current_track {
            state.current_track = track.clone();
        }
        if let Some(is_playing) = self.is_playing {
            state.is_playing = is_playing;
        }
        if let Some(start) = self.broadcast_start_time {
            state.broadcast_start_time = start;
        }
        if let Some(seconds) = self.current_time {
            state.current_time = seconds;
        }
        if let Some(start) = self.scheduled_start_time {
            state.scheduled_start_time = start;
        }
        if let Some(end) = self.scheduled_end_time {
            state.scheduled_end_time = end;
        }
        if let Some(track_id) = &self.scheduled_track_id {
            state.scheduled_track_id = track_id.clone();
        }
        if let Some(is_scheduled) = self.is_scheduled {
            state.is_scheduled = is_scheduled;
        }
    }

    /// True when the patch carries no fields at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.current_track.is_none()
            && self.is_playing.is_none()
            && self.broadcast_start_time.is_none()
            && self.current_time.is_none()
            && self.scheduled_start_time.is_none()
            && self.scheduled_end_time.is_none()
            && self.scheduled_track_id.is_none()
            && self.is_scheduled.is_none()
    }
}

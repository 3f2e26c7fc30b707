use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the broadcast synchronization engine.
///
/// Backends and collaborators return these variants directly so callers can
/// branch on typed errors instead of inspecting error messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The singleton broadcast state document does not exist yet.
    #[error("broadcast state has not been initialized")]
    StateNotFound,

    /// A create raced another creator of the singleton document.
    #[error("broadcast state already exists")]
    AlreadyExists,

    /// A referenced track is absent from the track library.
    #[error("track not found: {track_id}")]
    TrackNotFound { track_id: String },

    /// A non-admin caller attempted a privileged operation.
    #[error("not authorized to {action}")]
    Unauthorized { action: String },

    /// A read, update, or subscribe failed due to connectivity.
    #[error("transient backend failure: {reason}")]
    Transient { reason: String },

    /// The media element refused to start playback (commonly an autoplay
    /// policy). The synchronizer recovers by treating the client as paused.
    #[error("media element refused playback: {reason}")]
    Playback { reason: String },

    /// A schedule window where the start is not strictly before the end.
    #[error("invalid schedule window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A non-positive or non-finite track duration.
    #[error("invalid track duration: {seconds}s")]
    DurationInvalid { seconds: f64 },

    /// The serialized track snapshot blob failed to round-trip.
    #[error("track snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Storage-layer failure from a concrete backend.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - please edit it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Shorthand for a transient connectivity failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Shorthand for a storage-layer failure.
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for Results with [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

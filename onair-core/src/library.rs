//! Track library collaborator seam.

use crate::error::{CoreError, Result};
use crate::model::Track;
use async_trait::async_trait;

/// Validate a duration measured or supplied for a track.
///
/// # Errors
///
/// Returns [`CoreError::DurationInvalid`] for non-positive or non-finite
/// values.
pub fn validate_duration(seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(CoreError::DurationInvalid { seconds });
    }
    Ok(())
}

/// The audio-library collaborator: owns tracks and their metadata.
///
/// Tracks are immutable once uploaded except for `duration_seconds`
/// (lazily corrected the first time a client measures the true media
/// duration) and metadata edits.
#[async_trait]
pub trait TrackLibrary: Send + Sync {
    /// All known tracks.
    async fn list_tracks(&self) -> Result<Vec<Track>>;

    /// Look up a single track.
    ///
    /// # Errors
    ///
    /// [`CoreError::TrackNotFound`] when the id is unknown.
    async fn get_track(&self, track_id: &str) -> Result<Track>;

    /// Correct a track's nominal duration with a measured one.
    ///
    /// # Errors
    ///
    /// [`CoreError::DurationInvalid`] for non-positive durations,
    /// [`CoreError::TrackNotFound`] when the id is unknown.
    async fn update_track_duration(&self, track_id: &str, seconds: f64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_duration() {
        assert!(validate_duration(183.0).is_ok());
        assert!(matches!(
            validate_duration(0.0),
            Err(CoreError::DurationInvalid { .. })
        ));
        assert!(matches!(
            validate_duration(-3.0),
            Err(CoreError::DurationInvalid { .. })
        ));
        assert!(matches!(
            validate_duration(f64::INFINITY),
            Err(CoreError::DurationInvalid { .. })
        ));
    }
}

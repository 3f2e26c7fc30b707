//! Track snapshot codec.
//!
//! The backing document store is flat, so the on-air track snapshot is
//! persisted as a JSON string inside a single field. This module is the one
//! place that serialization lives; encode and decode must stay lossless for
//! the snapshot shape.

use crate::error::Result;
use crate::model::TrackSnapshot;

/// Serialize a track snapshot into the string blob stored in the state
/// document.
///
/// # Errors
///
/// Returns [`CoreError::Codec`](crate::CoreError::Codec) if serialization
/// fails.
pub fn encode_track(snapshot: &TrackSnapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

/// Deserialize a track snapshot from the stored string blob.
///
/// # Errors
///
/// Returns [`CoreError::Codec`](crate::CoreError::Codec) for malformed
/// blobs; callers on the read path log and drop rather than crash.
pub fn decode_track(blob: &str) -> Result<TrackSnapshot> {
    Ok(serde_json::from_str(blob)?)
}

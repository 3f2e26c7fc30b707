//! State store: the client-facing proxy over the persisted broadcast state
//! singleton.
//!
//! The backing data service only needs to offer document-level get, put,
//! and create-if-absent over a well-known key; everything richer (patch
//! merging, self-healing writes, snapshot codec, numeric normalization)
//! lives here.

use crate::codec::{decode_track, encode_track};
use crate::error::{CoreError, Result};
use crate::model::{BroadcastPatch, BroadcastState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Well-known identifier of the broadcast state singleton.
pub const BROADCAST_STATE_KEY: &str = "broadcast";

/// The flat persisted shape of the broadcast state.
///
/// `current_track` is an opaque string blob (see [`crate::codec`]) and
/// `current_time` is normalized to integral seconds because the backing
/// store requires integral numeric types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub current_track: Option<String>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub broadcast_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_time: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_track_id: Option<String>,
    #[serde(default)]
    pub is_scheduled: bool,
}

impl StateDocument {
    /// Flatten a broadcast state into its persisted document form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the track snapshot cannot be
    /// serialized.
    pub fn from_state(state: &BroadcastState) -> Result<Self> {
        let current_track = match &state.current_track {
            Some(snapshot) => Some(encode_track(snapshot)?),
            None => None,
        };
        Ok(Self {
            current_track,
            is_playing: state.is_playing,
            broadcast_start_time: state.broadcast_start_time,
            current_time: state.current_time.round() as i64,
            timestamp: state.timestamp,
            scheduled_start_time: state.scheduled_start_time,
            scheduled_end_time: state.scheduled_end_time,
            scheduled_track_id: state.scheduled_track_id.clone(),
            is_scheduled: state.is_scheduled,
        })
    }

    /// Rehydrate the rich broadcast state from the persisted document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the track snapshot blob is
    /// malformed.
    pub fn into_state(self) -> Result<BroadcastState> {
        let current_track = match self.current_track {
            Some(blob) => Some(decode_track(&blob)?),
            None => None,
        };
        Ok(BroadcastState {
            current_track,
            is_playing: self.is_playing,
            broadcast_start_time: self.broadcast_start_time,
            current_time: self.current_time as f64,
            timestamp: self.timestamp,
            scheduled_start_time: self.scheduled_start_time,
            scheduled_end_time: self.scheduled_end_time,
            scheduled_track_id: self.scheduled_track_id,
            is_scheduled: self.is_scheduled,
        })
    }
}

/// Document-level persistence contract the backing data service fulfills.
///
/// Implementations are expected to provide per-document atomicity and
/// nothing more; concurrent writers resolve last-writer-wins.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Fetch a document, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<StateDocument>>;

    /// Replace (or create) a document, returning the stored version.
    async fn put(&self, key: &str, doc: StateDocument) -> Result<StateDocument>;

    /// Create a document, failing with [`CoreError::AlreadyExists`] when the
    /// key is already present.
    async fn create(&self, key: &str, doc: StateDocument) -> Result<StateDocument>;
}

/// Client-facing proxy over the broadcast state singleton.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
}

impl StateStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// Read the singleton broadcast state.
    ///
    /// # Errors
    ///
    /// [`CoreError::StateNotFound`] when the document is absent; callers
    /// then [`initialize`](Self::initialize).
    pub async fn read(&self) -> Result<BroadcastState> {
        match self.backend.get(BROADCAST_STATE_KEY).await? {
            Some(doc) => doc.into_state(),
            None => Err(CoreError::StateNotFound),
        }
    }

    /// Create the singleton with all-empty defaults.
    ///
    /// Safe to call concurrently: if another caller created the document
    /// first, the existing one is returned rather than an error.
    ///
    /// # Errors
    ///
    /// Propagates backend failures other than [`CoreError::AlreadyExists`].
    pub async fn initialize(&self) -> Result<BroadcastState> {
        let doc = StateDocument::from_state(&BroadcastState::default())?;
        match self.backend.create(BROADCAST_STATE_KEY, doc).await {
            Ok(created) => created.into_state(),
            Err(CoreError::AlreadyExists) => {
                debug!("broadcast state already initialized by another client");
                self.read().await
            }
            Err(e) => Err(e),
        }
    }

    /// Merge a patch into the singleton, stamping `timestamp = now`.
    ///
    /// Self-healing: if the document is missing it is initialized first and
    /// the patch applied on top.
    ///
    /// # Errors
    ///
    /// Propagates backend and codec failures.
    pub async fn update(&self, patch: &BroadcastPatch) -> Result<BroadcastState> {
        let mut state = match self.read().await {
            Ok(state) => state,
            Err(CoreError::StateNotFound) => self.initialize().await?,
            Err(e) => return Err(e),
        };

        patch.apply(&mut state);
        state.timestamp = Utc::now();

        let doc = StateDocument::from_state(&state)?;
        let stored = self.backend.put(BROADCAST_STATE_KEY, doc).await?;
        stored.into_state()
    }
}

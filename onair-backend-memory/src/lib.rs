//! In-process implementations of the ONAIR collaborator seams.
//!
//! [`MemoryBackend`] keeps the state document in a map and fans every write
//! out to push subscribers, so a whole station (admin, reconciler, any
//! number of listeners) can run inside one process. Used by the integration
//! tests and by embedders that want a self-contained station.

use async_trait::async_trait;
use onair_core::{
    AuthProvider, CoreError, RealtimeTransport, Result, Role, StateBackend, StateDocument, Track,
    TrackLibrary,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// In-memory document store with push fan-out.
pub struct MemoryBackend {
    docs: Mutex<HashMap<String, StateDocument>>,
    events: broadcast::Sender<String>,
    /// Connection attempts to refuse before accepting, for exercising the
    /// channel's backoff and fallback paths.
    refuse_connects: AtomicU32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            docs: Mutex::new(HashMap::new()),
            events,
            refuse_connects: AtomicU32::new(0),
        }
    }

    fn lock_docs(&self) -> std::sync::MutexGuard<'_, HashMap<String, StateDocument>> {
        match self.docs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Refuse the next `n` push connection attempts with a transient error.
    pub fn refuse_next_connects(&self, n: u32) {
        self.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Publish a raw payload to push subscribers, bypassing the document
    /// store. Lets tests exercise malformed-payload handling.
    pub fn publish_raw(&self, payload: impl Into<String>) {
        let _ = self.events.send(payload.into());
    }

    fn publish(&self, doc: &StateDocument) -> Result<()> {
        let payload = serde_json::to_string(doc)?;
        // No subscribers is fine.
        let _ = self.events.send(payload);
        Ok(())
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<StateDocument>> {
        Ok(self.lock_docs().get(key).cloned())
    }

    async fn put(&self, key: &str, doc: StateDocument) -> Result<StateDocument> {
        self.lock_docs().insert(key.to_string(), doc.clone());
        self.publish(&doc)?;
        Ok(doc)
    }

    async fn create(&self, key: &str, doc: StateDocument) -> Result<StateDocument> {
        {
            let mut docs = self.lock_docs();
            if docs.contains_key(key) {
                return Err(CoreError::AlreadyExists);
            }
            docs.insert(key.to_string(), doc.clone());
        }
        self.publish(&doc)?;
        Ok(doc)
    }
}

#[async_trait]
impl RealtimeTransport for MemoryBackend {
    async fn connect(&self, key: &str) -> Result<mpsc::Receiver<String>> {
        let remaining = self.refuse_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.refuse_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(CoreError::transient("push connection refused"));
        }

        debug!("opening in-memory push subscription for {key}");
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Deliveries are full snapshots; the next one
                        // supersedes whatever was skipped.
                        debug!("push subscriber lagged, skipped {skipped} payloads");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(rx)
    }
}

/// In-memory track library.
#[derive(Default)]
pub struct MemoryTrackLibrary {
    tracks: Mutex<HashMap<String, Track>>,
}

impl MemoryTrackLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_tracks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Track>> {
        match self.tracks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add (or replace) a track.
    pub fn insert(&self, track: Track) {
        self.lock_tracks().insert(track.id.clone(), track);
    }

    /// Remove a track, returning whether it existed. The caller is
    /// responsible for the broadcast-state cleanup duty
    /// (`Station::on_track_deleted`).
    pub fn remove(&self, track_id: &str) -> bool {
        self.lock_tracks().remove(track_id).is_some()
    }
}

#[async_trait]
impl TrackLibrary for MemoryTrackLibrary {
    async fn list_tracks(&self) -> Result<Vec<Track>> {
        let mut tracks: Vec<Track> = self.lock_tracks().values().cloned().collect();
        tracks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tracks)
    }

    async fn get_track(&self, track_id: &str) -> Result<Track> {
        self.lock_tracks()
            .get(track_id)
            .cloned()
            .ok_or_else(|| CoreError::TrackNotFound {
                track_id: track_id.to_string(),
            })
    }

    async fn update_track_duration(&self, track_id: &str, seconds: f64) -> Result<()> {
        onair_core::library::validate_duration(seconds)?;
        let mut tracks = self.lock_tracks();
        let track = tracks
            .get_mut(track_id)
            .ok_or_else(|| CoreError::TrackNotFound {
                track_id: track_id.to_string(),
            })?;
        track.duration_seconds = seconds;
        Ok(())
    }
}

/// Auth collaborator asserting one fixed role for the whole process.
#[derive(Debug, Clone, Copy)]
pub struct StaticAuth {
    role: Role,
}

impl StaticAuth {
    #[must_use]
    pub const fn admin() -> Self {
        Self { role: Role::Admin }
    }

    #[must_use]
    pub const fn listener() -> Self {
        Self {
            role: Role::Listener,
        }
    }
}

impl AuthProvider for StaticAuth {
    fn current_role(&self) -> Role {
        self.role
    }
}

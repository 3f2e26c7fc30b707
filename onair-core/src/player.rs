//! Playback synchronizer: keeps one media element audibly in step with the
//! shared broadcast.
//!
//! Driven by two inputs only: state snapshots delivered by the change
//! channel and a local resync timer. Every reaction recomputes the target
//! offset from the snapshot's instants, so duplicate or out-of-order
//! deliveries are harmless.

use crate::config::PlayerConfig;
use crate::error::{CoreError, Result};
use crate::library::TrackLibrary;
use crate::model::{BroadcastState, TrackSnapshot};
use crate::position::target_offset;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The one media element a synchronizer owns.
///
/// Implementations wrap whatever actually produces sound (an HTML audio
/// element behind a bridge, a native decoder). `load` resolves once the
/// element is ready to play the new source.
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Load a new source, resolving when it is ready to play.
    ///
    /// # Errors
    ///
    /// Transport or decode failures; the synchronizer logs and retries on
    /// the next snapshot.
    async fn load(&self, url: &str) -> Result<()>;

    /// True duration of the loaded media, once probed.
    fn measured_duration(&self) -> Option<f64>;

    /// Current playback position in seconds.
    fn position(&self) -> f64;

    /// Jump to an offset in seconds.
    fn seek(&self, seconds: f64);

    /// Begin playback.
    ///
    /// # Errors
    ///
    /// [`CoreError::Playback`] when the element refuses (autoplay policy).
    async fn play(&self) -> Result<()>;

    /// Halt playback, keeping the loaded source.
    fn pause(&self);
}

/// Events emitted by the synchronizer for UI binding.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// A new source finished loading.
    SourceLoaded { url: String },
    /// Seeked to the live broadcast offset and started playing.
    Synced { offset: f64 },
    /// Periodic resync found drift beyond the threshold and hard-seeked.
    Drifted { by: f64 },
    /// User paused locally; the broadcast continues without this client.
    Paused,
    /// User rejoined the live broadcast.
    Resumed,
    /// The broadcast went off air.
    BroadcastEnded,
    /// The element refused to play; a "tap to play" affordance should be
    /// shown and resume called on user gesture.
    PlaybackBlocked,
}

struct PlayerInner {
    snapshot: BroadcastState,
    has_snapshot: bool,
    user_paused: bool,
    loaded_url: Option<String>,
    /// Track we already reported a duration correction for.
    corrected_track: Option<String>,
}

enum LoadOutcome {
    /// The on-air source is already loaded (or there is nothing to load).
    Ready,
    /// A new source was just loaded.
    Loaded,
    /// The load failed; retried on the next resync pass.
    Failed,
}

/// Per-client runtime binding one media element to the live broadcast
/// state.
pub struct PlaybackSynchronizer {
    media: Arc<dyn MediaElement>,
    library: Arc<dyn TrackLibrary>,
    config: PlayerConfig,
    inner: RwLock<PlayerInner>,
    event_tx: broadcast::Sender<PlayerEvent>,
    cancel: CancellationToken,
}

impl PlaybackSynchronizer {
    #[must_use]
    pub fn new(
        media: Arc<dyn MediaElement>,
        library: Arc<dyn TrackLibrary>,
        config: PlayerConfig,
        cancel_token: Option<CancellationToken>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            media,
            library,
            config,
            inner: RwLock::new(PlayerInner {
                snapshot: BroadcastState::default(),
                has_snapshot: false,
                user_paused: false,
                loaded_url: None,
                corrected_track: None,
            }),
            event_tx,
            cancel: cancel_token.unwrap_or_default(),
        })
    }

    /// Subscribe to player events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    /// Get a clone of the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the synchronizer loop: reacts to snapshots from `updates` and
    /// resyncs periodically while a broadcast is active.
    #[must_use]
    pub fn start(
        self: Arc<Self>,
        mut updates: mpsc::Receiver<BroadcastState>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("starting playback synchronizer");
            let mut tick = tokio::time::interval(self.config.resync_interval());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        info!("synchronizer shutting down");
                        return;
                    }
                    update = updates.recv() => match update {
                        Some(state) => self.apply_snapshot(state).await,
                        None => {
                            info!("state update stream closed, synchronizer stopping");
                            return;
                        }
                    },
                    _ = tick.tick() => self.resync(false).await,
                }
            }
        })
    }

    /// React to an authoritative state snapshot.
    pub async fn apply_snapshot(&self, state: BroadcastState) {
        let (was_playing, user_paused) = {
            let mut inner = self.inner.write().await;
            if inner.has_snapshot && state.timestamp < inner.snapshot.timestamp {
                debug!("ignoring snapshot older than the one already applied");
                return;
            }
            let was_playing = inner.has_snapshot && inner.snapshot.is_playing;
            inner.snapshot = state.clone();
            inner.has_snapshot = true;
            (was_playing, inner.user_paused)
        };

        if state.is_playing && state.current_track.is_some() {
            if user_paused {
                // Load even while paused so resume is instant.
                self.ensure_loaded(&state).await;
            } else {
                self.resync(true).await;
            }
        } else {
            // Keep (or get) the source loaded so resume is instant.
            self.ensure_loaded(&state).await;
            self.media.pause();
            if was_playing && !state.is_playing {
                let _ = self.event_tx.send(PlayerEvent::BroadcastEnded);
            }
        }
    }

    /// Make sure the on-air track's source is loaded into the element.
    async fn ensure_loaded(&self, state: &BroadcastState) -> LoadOutcome {
        let Some(track) = state.current_track.clone() else {
            return LoadOutcome::Ready;
        };
        {
            let inner = self.inner.read().await;
            if inner.loaded_url.as_deref() == Some(track.source_url.as_str()) {
                return LoadOutcome::Ready;
            }
        }
        match self.media.load(&track.source_url).await {
            Ok(()) => {
                self.inner.write().await.loaded_url = Some(track.source_url.clone());
                let _ = self.event_tx.send(PlayerEvent::SourceLoaded {
                    url: track.source_url.clone(),
                });
                self.maybe_correct_duration(&track).await;
                LoadOutcome::Loaded
            }
            Err(e) => {
                warn!("failed to load {}: {e}", track.source_url);
                LoadOutcome::Failed
            }
        }
    }

    /// Recompute the target offset and correct the element.
    ///
    /// `force` seeks unconditionally and starts playback (used on track
    /// change and resume); otherwise only drift beyond the threshold is
    /// corrected to avoid audible micro-seeking. A source that failed to
    /// load earlier is retried here, and a fresh load is always hard-synced.
    async fn resync(&self, force: bool) {
        let state = {
            let inner = self.inner.read().await;
            if !inner.has_snapshot || inner.user_paused {
                return;
            }
            inner.snapshot.clone()
        };
        if !state.is_playing || state.current_track.is_none() {
            return;
        }

        let force = match self.ensure_loaded(&state).await {
            LoadOutcome::Failed => return,
            LoadOutcome::Loaded => true,
            LoadOutcome::Ready => force,
        };

        let Some(target) = target_offset(&state, Utc::now(), self.media.measured_duration())
        else {
            debug!("no usable duration yet, deferring sync");
            return;
        };

        if force {
            self.media.seek(target);
            match self.media.play().await {
                Ok(()) => {
                    let _ = self.event_tx.send(PlayerEvent::Synced { offset: target });
                }
                Err(CoreError::Playback { reason }) => {
                    warn!("playback blocked ({reason}), treating client as paused");
                    self.inner.write().await.user_paused = true;
                    let _ = self.event_tx.send(PlayerEvent::PlaybackBlocked);
                }
                Err(e) => warn!("play failed: {e}"),
            }
            return;
        }

        let drift = (target - self.media.position()).abs();
        if drift > self.config.drift_threshold_secs {
            debug!("drift {drift:.2}s exceeds threshold, hard-seeking to {target:.2}s");
            self.media.seek(target);
            let _ = self.event_tx.send(PlayerEvent::Drifted { by: drift });
        }
    }

    /// Fire-and-forget duration correction back to the track library when
    /// the measured duration differs materially from the stored one.
    async fn maybe_correct_duration(&self, track: &TrackSnapshot) {
        let Some(measured) = self
            .media
            .measured_duration()
            .filter(|d| d.is_finite() && *d > 0.0)
        else {
            return;
        };
        if (measured - track.duration_seconds).abs()
            <= self.config.duration_correction_threshold_secs
        {
            return;
        }
        {
            let mut inner = self.inner.write().await;
            if inner.corrected_track.as_deref() == Some(track.track_id.as_str()) {
                return;
            }
            inner.corrected_track = Some(track.track_id.clone());
        }

        let library = Arc::clone(&self.library);
        let track_id = track.track_id.clone();
        tokio::spawn(async move {
            match library.update_track_duration(&track_id, measured).await {
                Ok(()) => debug!("corrected duration of {track_id} to {measured:.2}s"),
                Err(e) => warn!("duration correction for {track_id} failed: {e}"),
            }
        });
    }

    /// Explicit local pause. The broadcast carries on without this client.
    pub async fn pause(&self) {
        self.inner.write().await.user_paused = true;
        self.media.pause();
        let _ = self.event_tx.send(PlayerEvent::Paused);
    }

    /// Explicit local resume: rejoins the live broadcast position, never
    /// "where the user left off".
    pub async fn resume(&self) {
        self.inner.write().await.user_paused = false;
        let _ = self.event_tx.send(PlayerEvent::Resumed);
        self.resync(true).await;
    }

    /// Whether the shared broadcast is currently authorized to play.
    pub async fn is_playing(&self) -> bool {
        self.inner.read().await.snapshot.is_playing
    }

    /// Whether this client has locally paused.
    pub async fn is_user_paused(&self) -> bool {
        self.inner.read().await.user_paused
    }

    /// Snapshot of the track currently on air.
    pub async fn current_track(&self) -> Option<TrackSnapshot> {
        self.inner.read().await.snapshot.current_track.clone()
    }
}

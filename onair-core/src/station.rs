//! Station facade: the surface the surrounding UI and admin tooling talk
//! to.
//!
//! A [`Station`] is built from explicitly injected collaborator handles
//! (state backend, real-time transport, track library, auth) with a defined
//! lifecycle; there are no hidden globals. Privileged operations are gated
//! on the auth collaborator's asserted role.

use crate::auth::{require_admin, AuthProvider};
use crate::channel::{ChangeChannel, ChannelGuard, RealtimeTransport};
use crate::config::StationConfig;
use crate::error::{CoreError, Result};
use crate::library::TrackLibrary;
use crate::model::{BroadcastPatch, BroadcastState, TrackSnapshot};
use crate::player::{MediaElement, PlaybackSynchronizer, PlayerEvent};
use crate::schedule::Reconciler;
use crate::store::{StateBackend, StateStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One client's connection to the shared radio station.
pub struct Station {
    config: StationConfig,
    store: StateStore,
    channel: ChangeChannel,
    library: Arc<dyn TrackLibrary>,
    auth: Arc<dyn AuthProvider>,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
}

impl Station {
    #[must_use]
    pub fn new(
        config: StationConfig,
        backend: Arc<dyn StateBackend>,
        transport: Arc<dyn RealtimeTransport>,
        library: Arc<dyn TrackLibrary>,
        auth: Arc<dyn AuthProvider>,
        cancel_token: Option<CancellationToken>,
    ) -> Self {
        let store = StateStore::new(Arc::clone(&backend));
        let channel = ChangeChannel::new(backend, transport, config.channel.clone());
        let reconciler = Arc::new(Reconciler::new(store.clone(), Arc::clone(&library)));
        Self {
            config,
            store,
            channel,
            library,
            auth,
            reconciler,
            cancel: cancel_token.unwrap_or_default(),
        }
    }

    /// Current broadcast state, initializing the singleton on first touch.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn broadcast_state(&self) -> Result<BroadcastState> {
        match self.store.read().await {
            Ok(state) => Ok(state),
            Err(CoreError::StateNotFound) => self.store.initialize().await,
            Err(e) => Err(e),
        }
    }

    /// Merge a partial update into the broadcast state. Admin only.
    ///
    /// # Errors
    ///
    /// [`CoreError::Unauthorized`] for non-admin callers; backend failures.
    pub async fn update_broadcast_state(&self, patch: &BroadcastPatch) -> Result<BroadcastState> {
        require_admin(self.auth.as_ref(), "update broadcast state")?;
        self.store.update(patch).await
    }

    /// Arm a broadcast schedule. Admin only.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidWindow`] when `start >= end`;
    /// [`CoreError::TrackNotFound`] when the track does not exist at
    /// schedule time; [`CoreError::Unauthorized`] for non-admin callers.
    pub async fn schedule_broadcast(
        &self,
        track_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        require_admin(self.auth.as_ref(), "schedule a broadcast")?;
        if start >= end {
            return Err(CoreError::InvalidWindow { start, end });
        }
        // Validated once here, not re-validated per reconciler tick.
        let track = self.library.get_track(track_id).await?;
        let patch = BroadcastPatch::default().schedule(start, end, track.id);
        self.store.update(&patch).await?;
        info!("scheduled broadcast of {track_id} for {start} .. {end}");
        Ok(())
    }

    /// Disarm and clear the schedule. Admin only.
    ///
    /// # Errors
    ///
    /// [`CoreError::Unauthorized`] for non-admin callers; backend failures.
    pub async fn cancel_schedule(&self) -> Result<()> {
        require_admin(self.auth.as_ref(), "cancel the schedule")?;
        self.store
            .update(&BroadcastPatch::default().clear_schedule())
            .await?;
        info!("schedule cancelled");
        Ok(())
    }

    /// Manual reconciliation tick. Admin only.
    ///
    /// # Errors
    ///
    /// [`CoreError::Unauthorized`] for non-admin callers; backend failures.
    pub async fn reconcile_now(&self) -> Result<()> {
        require_admin(self.auth.as_ref(), "reconcile the schedule")?;
        self.reconciler.tick(Utc::now()).await
    }

    /// Keep the broadcast state consistent after a track deletion: a
    /// deleted track must not remain on air or armed in the schedule.
    ///
    /// # Errors
    ///
    /// [`CoreError::Unauthorized`] for non-admin callers; backend failures.
    pub async fn on_track_deleted(&self, track_id: &str) -> Result<()> {
        require_admin(self.auth.as_ref(), "clean up a deleted track")?;
        let state = self.broadcast_state().await?;

        let mut patch = BroadcastPatch::default();
        let on_air = state
            .current_track
            .as_ref()
            .is_some_and(|t| t.track_id == track_id);
        if on_air {
            patch = patch.track(None).playing(false).position(0.0).start_time(None);
        }
        if state.scheduled_track_id.as_deref() == Some(track_id) {
            patch = patch.clear_schedule();
        }

        if patch.is_empty() {
            debug!("deleted track {track_id} was not referenced by the broadcast state");
            return Ok(());
        }
        self.store.update(&patch).await?;
        info!("cleared deleted track {track_id} from broadcast state");
        Ok(())
    }

    /// Subscribe to broadcast state changes. Any authenticated client.
    pub fn subscribe<F>(&self, on_change: F) -> ChannelGuard
    where
        F: Fn(BroadcastState) + Send + Sync + 'static,
    {
        self.channel.subscribe(on_change)
    }

    /// Run the schedule reconciler on its coarse timer until the station is
    /// shut down. Spawned by the privileged admin client only.
    #[must_use]
    pub fn spawn_reconciler(&self) -> tokio::task::JoinHandle<()> {
        Arc::clone(&self.reconciler).spawn(self.config.reconciler.clone(), self.cancel.child_token())
    }

    /// Bind a media element to the live broadcast: subscribes to the change
    /// channel and runs a [`PlaybackSynchronizer`] until shut down.
    #[must_use]
    pub fn spawn_synchronizer(&self, media: Arc<dyn MediaElement>) -> PlayerHandle {
        let cancel = self.cancel.child_token();
        let synchronizer = PlaybackSynchronizer::new(
            media,
            Arc::clone(&self.library),
            self.config.player.clone(),
            Some(cancel.clone()),
        );

        let (tx, rx) = mpsc::channel(16);
        let guard = self.channel.subscribe(move |state| {
            // Snapshots are full states; dropping one under backpressure is
            // safe because the next delivery supersedes it.
            let _ = tx.try_send(state);
        });
        let task = Arc::clone(&synchronizer).start(rx);

        PlayerHandle {
            synchronizer,
            guard,
            cancel,
            task,
        }
    }

    /// Direct handle to the state store, for embedders wiring their own
    /// plumbing.
    #[must_use]
    pub fn store(&self) -> StateStore {
        self.store.clone()
    }

    /// Cancel every task spawned from this station.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// UI-facing hook onto a running synchronizer.
pub struct PlayerHandle {
    synchronizer: Arc<PlaybackSynchronizer>,
    guard: ChannelGuard,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl PlayerHandle {
    pub async fn is_playing(&self) -> bool {
        self.synchronizer.is_playing().await
    }

    pub async fn is_user_paused(&self) -> bool {
        self.synchronizer.is_user_paused().await
    }

    pub async fn current_track(&self) -> Option<TrackSnapshot> {
        self.synchronizer.current_track().await
    }

    /// Locally pause this client; the broadcast continues without it.
    pub async fn pause(&self) {
        self.synchronizer.pause().await;
    }

    /// Rejoin the live broadcast position.
    pub async fn resume(&self) {
        self.synchronizer.resume().await;
    }

    /// Subscribe to player events for UI binding.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.synchronizer.subscribe()
    }

    /// Connection guard of the underlying change channel subscription.
    #[must_use]
    pub fn channel(&self) -> &ChannelGuard {
        &self.guard
    }

    /// Tear the synchronizer down, cancelling its timers and subscription.
    pub async fn shutdown(self) {
        self.guard.unsubscribe();
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

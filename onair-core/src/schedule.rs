//! Scheduler reconciler: enforces schedule-derived invariants on the
//! shared broadcast state.
//!
//! Classification and planning are pure functions over `(now, state)`; the
//! [`Reconciler`] applies the planned write. Each invocation re-derives the
//! full target state, so redundant or concurrent ticks are harmless.

use crate::config::ReconcilerConfig;
use crate::error::{CoreError, Result};
use crate::library::TrackLibrary;
use crate::model::{BroadcastPatch, BroadcastState};
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where `now` falls relative to the armed schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    /// No schedule armed.
    Idle,
    /// Armed, window not yet open.
    ArmedWaiting,
    /// Armed and inside the window.
    ArmedActive,
    /// Armed and past the window end.
    ArmedExpired,
}

/// Classify the schedule phase for a state at an instant.
#[must_use]
pub fn phase(now: DateTime<Utc>, state: &BroadcastState) -> SchedulePhase {
    if !state.is_scheduled {
        return SchedulePhase::Idle;
    }
    let (Some(start), Some(end)) = (state.scheduled_start_time, state.scheduled_end_time) else {
        // Armed without a window is unactionable; treat as idle.
        return SchedulePhase::Idle;
    };
    if now < start {
        SchedulePhase::ArmedWaiting
    } else if now <= end {
        SchedulePhase::ArmedActive
    } else {
        SchedulePhase::ArmedExpired
    }
}

/// Corrective write the reconciler should issue, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// State already matches the schedule.
    None,
    /// Start (or correct) the broadcast for the scheduled track.
    ///
    /// `start_time` is the *scheduled* start instant, never "now": every
    /// client computing position from the same fixed instant converges to
    /// the same offset regardless of reconciler cadence.
    Start {
        track_id: String,
        start_time: DateTime<Utc>,
    },
    /// Take the broadcast off air, leaving schedule fields armed for audit.
    Stop,
}

/// Plan the corrective write for a state at an instant. Pure.
#[must_use]
pub fn plan(now: DateTime<Utc>, state: &BroadcastState) -> ReconcileAction {
    match phase(now, state) {
        SchedulePhase::Idle | SchedulePhase::ArmedWaiting => ReconcileAction::None,
        SchedulePhase::ArmedActive => {
            let (Some(track_id), Some(start_time)) =
                (&state.scheduled_track_id, state.scheduled_start_time)
            else {
                return ReconcileAction::None;
            };
            let already_running = state.is_playing
                && state
                    .current_track
                    .as_ref()
                    .is_some_and(|t| t.track_id == *track_id);
            if already_running {
                ReconcileAction::None
            } else {
                ReconcileAction::Start {
                    track_id: track_id.clone(),
                    start_time,
                }
            }
        }
        SchedulePhase::ArmedExpired => {
            if state.is_playing {
                ReconcileAction::Stop
            } else {
                ReconcileAction::None
            }
        }
    }
}

/// Applies planned schedule corrections to the state store.
///
/// Run by a privileged (admin) client only; the engine trusts the caller's
/// asserted role here and gates only the facade-level entry points.
pub struct Reconciler {
    store: StateStore,
    library: Arc<dyn TrackLibrary>,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: StateStore, library: Arc<dyn TrackLibrary>) -> Self {
        Self { store, library }
    }

    /// One reconciliation pass at an explicit instant.
    ///
    /// A scheduled track that has been deleted is logged and skipped; the
    /// schedule stays armed but inert until corrected.
    ///
    /// # Errors
    ///
    /// Propagates state store failures. A missing scheduled track is not an
    /// error.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let state = match self.store.read().await {
            Ok(state) => state,
            Err(CoreError::StateNotFound) => self.store.initialize().await?,
            Err(e) => return Err(e),
        };

        match plan(now, &state) {
            ReconcileAction::None => {
                debug!("reconcile: no action");
                Ok(())
            }
            ReconcileAction::Start {
                track_id,
                start_time,
            } => {
                let track = match self.library.get_track(&track_id).await {
                    Ok(track) => track,
                    Err(CoreError::TrackNotFound { track_id }) => {
                        warn!("scheduled track {track_id} no longer exists, leaving schedule inert");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                let patch = BroadcastPatch::default()
                    .track(Some(track.snapshot()))
                    .playing(true)
                    .position(0.0)
                    .start_time(Some(start_time));
                self.store.update(&patch).await?;
                info!(
                    "reconcile: started scheduled broadcast of {track_id} anchored at {start_time}"
                );
                Ok(())
            }
            ReconcileAction::Stop => {
                self.store.update(&BroadcastPatch::stop_broadcast()).await?;
                info!("reconcile: schedule window ended, broadcast stopped");
                Ok(())
            }
        }
    }

    /// Run reconciliation on a coarse timer until cancelled.
    #[must_use]
    pub fn spawn(
        self: Arc<Self>,
        config: ReconcilerConfig,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "starting schedule reconciler (every {}ms)",
                config.tick_interval_ms
            );
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("reconciler shutting down");
                        return;
                    }
                    () = tokio::time::sleep(config.tick_interval()) => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            warn!("reconcile tick failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

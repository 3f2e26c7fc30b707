//! Broadcast synchronization engine for a single shared radio station.
//!
//! Many independent clients render one logical broadcast in audible
//! synchrony without talking to each other and without a media-streaming
//! server: position is reconstructed purely from wall-clock time and a
//! persisted broadcast-start instant.
//!
//! The moving parts, leaf first: [`position`] (pure offset math),
//! [`store`] (the persisted state singleton), [`channel`] (real-time
//! delivery with reconnect and polling fallback), [`schedule`] (the
//! reconciler that starts/stops broadcasts on a schedule), and [`player`]
//! (the per-client synchronizer nudging a media element toward the live
//! offset). [`station`] ties them together behind injected collaborator
//! handles.

pub mod auth;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod library;
pub mod model;
pub mod paths;
pub mod player;
pub mod position;
pub mod schedule;
pub mod station;
pub mod store;
pub mod time;

pub use auth::{require_admin, AuthProvider, Role};
pub use channel::{ChangeChannel, ChannelGuard, ConnectionState, RealtimeTransport};
pub use config::{ChannelConfig, PlayerConfig, ReconcilerConfig, StationConfig};
pub use error::{CoreError, Result};
pub use library::TrackLibrary;
pub use model::{
    start_anchor, BroadcastPatch, BroadcastState, StartAnchor, Track, TrackSnapshot,
};
pub use player::{MediaElement, PlaybackSynchronizer, PlayerEvent};
pub use position::{position, target_offset};
pub use schedule::{phase, plan, ReconcileAction, Reconciler, SchedulePhase};
pub use station::{PlayerHandle, Station};
pub use store::{StateBackend, StateDocument, StateStore, BROADCAST_STATE_KEY};
pub use time::seconds_between;

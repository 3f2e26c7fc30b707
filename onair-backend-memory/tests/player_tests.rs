//! Full-stack playback test: admin updates flow through the change channel
//! into a synchronizer driving a scripted media element.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use onair_backend_memory::{MemoryBackend, MemoryTrackLibrary, StaticAuth};
use onair_core::{
    AuthProvider, BroadcastPatch, ConnectionState, MediaElement, RealtimeTransport, Result,
    StateBackend, Station, StationConfig, Track, TrackLibrary,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct MediaState {
    loaded: Option<String>,
    position: f64,
    playing: bool,
    duration: Option<f64>,
    seeks: Vec<f64>,
}

#[derive(Default)]
struct FakeMedia {
    state: Mutex<MediaState>,
}

impl FakeMedia {
    fn with_duration(duration: f64) -> Self {
        let media = Self::default();
        media.lock().duration = Some(duration);
        media
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MediaState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl MediaElement for FakeMedia {
    async fn load(&self, url: &str) -> Result<()> {
        let mut state = self.lock();
        state.loaded = Some(url.to_string());
        state.position = 0.0;
        state.playing = false;
        Ok(())
    }

    fn measured_duration(&self) -> Option<f64> {
        self.lock().duration
    }

    fn position(&self) -> f64 {
        self.lock().position
    }

    fn seek(&self, seconds: f64) {
        let mut state = self.lock();
        state.position = seconds;
        state.seeks.push(seconds);
    }

    async fn play(&self) -> Result<()> {
        self.lock().playing = true;
        Ok(())
    }

    fn pause(&self) {
        self.lock().playing = false;
    }
}

fn track(id: &str, duration: f64) -> Track {
    Track {
        id: id.to_string(),
        title: "Song".to_string(),
        artist: "Artist".to_string(),
        source_url: format!("https://cdn.example/{id}.mp3"),
        cover_url: None,
        duration_seconds: duration,
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn admin_station() -> (Station, Arc<MemoryTrackLibrary>) {
    let backend = Arc::new(MemoryBackend::new());
    let library = Arc::new(MemoryTrackLibrary::new());
    let station = Station::new(
        StationConfig::default(),
        Arc::clone(&backend) as Arc<dyn StateBackend>,
        backend as Arc<dyn RealtimeTransport>,
        Arc::clone(&library) as Arc<dyn TrackLibrary>,
        Arc::new(StaticAuth::admin()) as Arc<dyn AuthProvider>,
        None,
    );
    (station, library)
}

#[tokio::test]
async fn test_admin_update_drives_listener_playback() {
    let (station, library) = admin_station();

    let song = track("t1", 40.0);
    library.insert(song.clone());

    let media = Arc::new(FakeMedia::with_duration(40.0));
    let handle = station.spawn_synchronizer(Arc::clone(&media) as Arc<dyn MediaElement>);
    wait_until("push connection", || {
        handle.channel().connection_state() == ConnectionState::Connected
    })
    .await;
    let mut events = handle.events();

    // Admin puts the track on air, started 125 seconds ago.
    let go_live = BroadcastPatch::default()
        .track(Some(song.snapshot()))
        .playing(true)
        .start_time(Some(Utc::now() - ChronoDuration::seconds(125)));
    assert!(station.update_broadcast_state(&go_live).await.is_ok());

    wait_until("listener playing", || media.lock().playing).await;
    {
        let state = media.lock();
        assert_eq!(state.loaded.as_deref(), Some("https://cdn.example/t1.mp3"));
        // 125 mod 40 = 5, allow wall-clock slop for the delivery hop.
        let Some(&seek) = state.seeks.last() else {
            panic!("seeked");
        };
        assert!((seek - 5.0).abs() < 1.5, "joined at {seek}");
    }
    assert!(handle.is_playing().await);

    // Local pause detaches this client only; the broadcast stays live.
    handle.pause().await;
    assert!(!media.lock().playing);
    assert!(handle.is_user_paused().await);
    assert!(handle.is_playing().await, "broadcast itself still on air");

    // Resume rejoins the live position, not where the pause left off.
    media.lock().position = 0.5;
    handle.resume().await;
    wait_until("listener rejoined", || media.lock().playing).await;
    {
        let state = media.lock();
        let Some(&seek) = state.seeks.last() else {
            panic!("seeked on resume");
        };
        assert!(seek > 3.0, "rejoined at {seek}, not live");
    }

    // Admin takes the broadcast off air; the listener falls silent.
    assert!(station
        .update_broadcast_state(&BroadcastPatch::stop_broadcast())
        .await
        .is_ok());
    wait_until("listener silent", || !media.lock().playing).await;

    let mut saw_ended = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, onair_core::PlayerEvent::BroadcastEnded) {
            saw_ended = true;
        }
    }
    assert!(saw_ended, "off-air transition surfaces BroadcastEnded");

    handle.shutdown().await;
    station.shutdown();
}

#[tokio::test]
async fn test_late_joiner_syncs_to_live_broadcast() {
    let (station, library) = admin_station();
    let song = track("t1", 40.0);
    library.insert(song.clone());

    // The broadcast has been live for 125 seconds before this client exists.
    let go_live = BroadcastPatch::default()
        .track(Some(song.snapshot()))
        .playing(true)
        .start_time(Some(Utc::now() - ChronoDuration::seconds(125)));
    assert!(station.update_broadcast_state(&go_live).await.is_ok());

    let media = Arc::new(FakeMedia::with_duration(40.0));
    let handle = station.spawn_synchronizer(Arc::clone(&media) as Arc<dyn MediaElement>);

    // No writes after joining: the connect-time seed alone must bring this
    // client onto the air at the shared position.
    wait_until("late joiner playing", || media.lock().playing).await;
    {
        let state = media.lock();
        assert_eq!(state.loaded.as_deref(), Some("https://cdn.example/t1.mp3"));
        let Some(&seek) = state.seeks.last() else {
            panic!("seeked");
        };
        // 125 mod 40 = 5, allow wall-clock slop.
        assert!((seek - 5.0).abs() < 1.5, "joined at {seek}");
    }

    handle.shutdown().await;
    station.shutdown();
}

//! End-to-end schedule and facade behavior against the in-memory backend.

use chrono::{DateTime, TimeZone, Utc};
use onair_backend_memory::{MemoryBackend, MemoryTrackLibrary, StaticAuth};
use onair_core::{
    target_offset, AuthProvider, BroadcastPatch, CoreError, RealtimeTransport, Reconciler,
    StateBackend, Station, StationConfig, Track, TrackLibrary,
};
use std::sync::Arc;

fn instant(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2025, 1, 1, h, m, s).single() {
        Some(t) => t,
        None => panic!("valid timestamp"),
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

struct Harness {
    station: Station,
    library: Arc<MemoryTrackLibrary>,
}

fn station_with_role(auth: StaticAuth) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let library = Arc::new(MemoryTrackLibrary::new());
    let station = Station::new(
        StationConfig::default(),
        Arc::clone(&backend) as Arc<dyn StateBackend>,
        backend as Arc<dyn RealtimeTransport>,
        Arc::clone(&library) as Arc<dyn TrackLibrary>,
        Arc::new(auth) as Arc<dyn AuthProvider>,
        None,
    );
    Harness { station, library }
}

fn admin_station() -> Harness {
    station_with_role(StaticAuth::admin())
}

fn reconciler_for(harness: &Harness) -> Reconciler {
    Reconciler::new(
        harness.station.store(),
        Arc::clone(&harness.library) as Arc<dyn TrackLibrary>,
    )
}

#[tokio::test]
async fn test_update_self_heals_missing_singleton() {
    let harness = admin_station();
    // No initialize() anywhere: the first write must create the document
    // and apply the patch on top.
    let patch = BroadcastPatch::default().playing(true);
    let Ok(state) = harness.station.update_broadcast_state(&patch).await else {
        panic!("self-healing update");
    };
    assert!(state.is_playing);

    let Ok(read_back) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(read_back.is_playing);
}

#[tokio::test]
async fn test_listener_cannot_write() {
    let harness = station_with_role(StaticAuth::listener());
    let patch = BroadcastPatch::default().playing(true);
    assert!(matches!(
        harness.station.update_broadcast_state(&patch).await,
        Err(CoreError::Unauthorized { .. })
    ));
    assert!(matches!(
        harness
            .station
            .schedule_broadcast("t1", instant(10, 0, 0), instant(10, 10, 0))
            .await,
        Err(CoreError::Unauthorized { .. })
    ));
    assert!(matches!(
        harness.station.cancel_schedule().await,
        Err(CoreError::Unauthorized { .. })
    ));
    assert!(matches!(
        harness.station.reconcile_now().await,
        Err(CoreError::Unauthorized { .. })
    ));

    // Reads stay open to listeners.
    assert!(harness.station.broadcast_state().await.is_ok());
}

#[tokio::test]
async fn test_schedule_rejects_invalid_window() {
    let harness = admin_station();
    harness.library.insert(track("t1", 180.0));
    let result = harness
        .station
        .schedule_broadcast("t1", instant(10, 10, 0), instant(10, 0, 0))
        .await;
    assert!(matches!(result, Err(CoreError::InvalidWindow { .. })));

    let result = harness
        .station
        .schedule_broadcast("t1", instant(10, 0, 0), instant(10, 0, 0))
        .await;
    assert!(matches!(result, Err(CoreError::InvalidWindow { .. })));
}

#[tokio::test]
async fn test_schedule_requires_existing_track() {
    let harness = admin_station();
    let result = harness
        .station
        .schedule_broadcast("ghost", instant(10, 0, 0), instant(10, 10, 0))
        .await;
    assert!(matches!(result, Err(CoreError::TrackNotFound { .. })));
}

#[tokio::test]
async fn test_scheduled_window_lifecycle() {
    let harness = admin_station();
    harness.library.insert(track("t1", 180.0));
    let start = instant(10, 0, 0);
    let end = instant(10, 10, 0);
    assert!(harness
        .station
        .schedule_broadcast("t1", start, end)
        .await
        .is_ok());

    let reconciler = reconciler_for(&harness);

    // Before the window: armed but silent.
    assert!(reconciler.tick(instant(9, 30, 0)).await.is_ok());
    let Ok(state) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(!state.is_playing);

    // Inside the window: on air, anchored at the *scheduled* start.
    assert!(reconciler.tick(instant(10, 3, 0)).await.is_ok());
    let Ok(state) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(state.is_playing);
    assert_eq!(state.broadcast_start_time, Some(start));
    let Some(on_air) = &state.current_track else {
        panic!("track on air");
    };
    assert_eq!(on_air.track_id, "t1");

    // 180s elapsed on a 180s track: exactly one loop, offset zero.
    let Some(offset) = target_offset(&state, instant(10, 3, 0), None) else {
        panic!("duration known");
    };
    assert!(offset.abs() < 1e-9, "offset was {offset}");

    // Reconciling again inside the window changes nothing material.
    assert!(reconciler.tick(instant(10, 3, 30)).await.is_ok());
    let Ok(again) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert_eq!(again.broadcast_start_time, state.broadcast_start_time);
    assert_eq!(again.current_track, state.current_track);
    assert!(again.is_playing);

    // Past the window: off air, schedule fields kept for audit.
    assert!(reconciler.tick(instant(10, 10, 50)).await.is_ok());
    let Ok(expired) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(!expired.is_playing);
    assert!(expired.current_track.is_none());
    assert!(expired.broadcast_start_time.is_none());
    assert!(expired.is_scheduled);
    assert_eq!(expired.scheduled_start_time, Some(start));

    // Expired reconcile is idempotent.
    assert!(reconciler.tick(instant(10, 11, 0)).await.is_ok());
    let Ok(still_expired) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(!still_expired.is_playing);
    assert!(still_expired.current_track.is_none());
}

#[tokio::test]
async fn test_mid_window_join_offset() {
    // 600s window, 40s track: at T0+125s the shared position is 5s.
    let harness = admin_station();
    harness.library.insert(track("t1", 40.0));
    let start = instant(10, 0, 0);
    assert!(harness
        .station
        .schedule_broadcast("t1", start, instant(10, 10, 0))
        .await
        .is_ok());

    let reconciler = reconciler_for(&harness);
    assert!(reconciler.tick(instant(10, 2, 5)).await.is_ok());

    let Ok(state) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(state.is_playing);
    let Some(offset) = target_offset(&state, instant(10, 2, 5), None) else {
        panic!("duration known");
    };
    assert!((offset - 5.0).abs() < 1e-9, "offset was {offset}");
}

#[tokio::test]
async fn test_reconcile_twice_produces_same_state() {
    let harness = admin_station();
    harness.library.insert(track("t1", 40.0));
    assert!(harness
        .station
        .schedule_broadcast("t1", instant(10, 0, 0), instant(10, 10, 0))
        .await
        .is_ok());

    let reconciler = reconciler_for(&harness);
    let now = instant(10, 2, 5);
    assert!(reconciler.tick(now).await.is_ok());
    let Ok(first) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(reconciler.tick(now).await.is_ok());
    let Ok(second) = harness.station.broadcast_state().await else {
        panic!("read");
    };

    // Identical up to the write stamp.
    assert_eq!(second.current_track, first.current_track);
    assert_eq!(second.is_playing, first.is_playing);
    assert_eq!(second.broadcast_start_time, first.broadcast_start_time);
    assert_eq!(second.scheduled_start_time, first.scheduled_start_time);
    assert_eq!(second.is_scheduled, first.is_scheduled);
}

#[tokio::test]
async fn test_deleted_scheduled_track_leaves_schedule_inert() {
    let harness = admin_station();
    harness.library.insert(track("t1", 40.0));
    assert!(harness
        .station
        .schedule_broadcast("t1", instant(10, 0, 0), instant(10, 10, 0))
        .await
        .is_ok());
    harness.library.remove("t1");

    let reconciler = reconciler_for(&harness);
    assert!(reconciler.tick(instant(10, 2, 0)).await.is_ok());

    let Ok(state) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(!state.is_playing, "missing track must not start a broadcast");
    assert!(state.is_scheduled, "schedule stays armed until corrected");
}

#[tokio::test]
async fn test_cancel_schedule_clears_fields() {
    let harness = admin_station();
    harness.library.insert(track("t1", 40.0));
    assert!(harness
        .station
        .schedule_broadcast("t1", instant(10, 0, 0), instant(10, 10, 0))
        .await
        .is_ok());

    assert!(harness.station.cancel_schedule().await.is_ok());
    let Ok(state) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(!state.is_scheduled);
    assert!(state.scheduled_start_time.is_none());
    assert!(state.scheduled_end_time.is_none());
    assert!(state.scheduled_track_id.is_none());
}

#[tokio::test]
async fn test_track_deletion_clears_broadcast_and_schedule() {
    let harness = admin_station();
    harness.library.insert(track("t1", 40.0));
    assert!(harness
        .station
        .schedule_broadcast("t1", instant(10, 0, 0), instant(10, 10, 0))
        .await
        .is_ok());
    let reconciler = reconciler_for(&harness);
    assert!(reconciler.tick(instant(10, 1, 0)).await.is_ok());

    harness.library.remove("t1");
    assert!(harness.station.on_track_deleted("t1").await.is_ok());

    let Ok(state) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(!state.is_playing);
    assert!(state.current_track.is_none());
    assert!(!state.is_scheduled);
    assert!(state.scheduled_track_id.is_none());
}

#[tokio::test]
async fn test_track_deletion_of_unreferenced_track_is_noop() {
    let harness = admin_station();
    harness.library.insert(track("t1", 40.0));
    assert!(harness
        .station
        .schedule_broadcast("t1", instant(10, 0, 0), instant(10, 10, 0))
        .await
        .is_ok());

    assert!(harness.station.on_track_deleted("other").await.is_ok());
    let Ok(state) = harness.station.broadcast_state().await else {
        panic!("read");
    };
    assert!(state.is_scheduled);
}

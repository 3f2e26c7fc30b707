//! SQLite-backed state store and track library for ONAIR.
//!
//! Persists the broadcast state singleton and the track catalog in one
//! database file. This backend has no push transport: a station running on
//! it relies on the change channel's fallback polling mode, which the
//! channel supports by design.

use async_trait::async_trait;
use onair_core::{CoreError, Result, StateBackend, StateDocument, Track, TrackLibrary};
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r"
-- Broadcast state singleton, one row per well-known key
CREATE TABLE IF NOT EXISTS broadcast_state (
    key TEXT PRIMARY KEY,
    document TEXT NOT NULL
);

-- Track catalog owned by the audio-library collaborator
CREATE TABLE IF NOT EXISTS tracks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    source_url TEXT NOT NULL,
    cover_url TEXT,
    duration_seconds REAL NOT NULL
);
";

/// SQLite persistence for the broadcast state document and track catalog.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (or create) a database at a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening station database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        Self::init(conn).await
    }

    /// Open a transient in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::storage(e.to_string()))?;

        info!("Station database initialized");
        Ok(Self { conn })
    }

    /// Add (or replace) a track in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn insert_track(&self, track: Track) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT OR REPLACE INTO tracks
                        (id, title, artist, source_url, cover_url, duration_seconds)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ",
                    rusqlite::params![
                        track.id,
                        track.title,
                        track.artist,
                        track.source_url,
                        track.cover_url,
                        track.duration_seconds,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))
    }

    /// Remove a track, returning whether it existed. The caller is
    /// responsible for the broadcast-state cleanup duty
    /// (`Station::on_track_deleted`).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn delete_track(&self, track_id: &str) -> Result<bool> {
        let track_id = track_id.to_string();
        self.conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM tracks WHERE id = ?1", [track_id])?;
                Ok(n > 0)
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))
    }
}

#[async_trait]
impl StateBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<StateDocument>> {
        let key = key.to_string();
        let blob: Option<String> = self
            .conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        "SELECT document FROM broadcast_state WHERE key = ?1",
                        [key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        match blob {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, doc: StateDocument) -> Result<StateDocument> {
        let key = key.to_string();
        let blob = serde_json::to_string(&doc)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO broadcast_state (key, document) VALUES (?1, ?2)",
                    rusqlite::params![key, blob],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        Ok(doc)
    }

    async fn create(&self, key: &str, doc: StateDocument) -> Result<StateDocument> {
        let key = key.to_string();
        let blob = serde_json::to_string(&doc)?;
        let inserted: usize = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "INSERT OR IGNORE INTO broadcast_state (key, document) VALUES (?1, ?2)",
                    rusqlite::params![key, blob],
                )?;
                Ok(n)
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        if inserted == 0 {
            debug!("broadcast state row already present");
            return Err(CoreError::AlreadyExists);
        }
        Ok(doc)
    }
}

fn track_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        source_url: row.get(3)?,
        cover_url: row.get(4)?,
        duration_seconds: row.get(5)?,
    })
}

#[async_trait]
impl TrackLibrary for SqliteBackend {
    async fn list_tracks(&self) -> Result<Vec<Track>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT id, title, artist, source_url, cover_url, duration_seconds
                    FROM tracks ORDER BY id
                    ",
                )?;
                let tracks = stmt
                    .query_map([], track_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tracks)
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))
    }

    async fn get_track(&self, track_id: &str) -> Result<Track> {
        let id = track_id.to_string();
        let track = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT id, title, artist, source_url, cover_url, duration_seconds
                    FROM tracks WHERE id = ?1
                    ",
                )?;
                let result = stmt.query_row([id], track_from_row).optional()?;
                Ok(result)
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        track.ok_or_else(|| CoreError::TrackNotFound {
            track_id: track_id.to_string(),
        })
    }

    async fn update_track_duration(&self, track_id: &str, seconds: f64) -> Result<()> {
        onair_core::library::validate_duration(seconds)?;
        let id = track_id.to_string();
        let updated: usize = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE tracks SET duration_seconds = ?1 WHERE id = ?2",
                    rusqlite::params![seconds, id],
                )?;
                Ok(n)
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        if updated == 0 {
            return Err(CoreError::TrackNotFound {
                track_id: track_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onair_core::{BroadcastState, StateStore, BROADCAST_STATE_KEY};
    use std::sync::Arc;

    fn doc() -> StateDocument {
        match StateDocument::from_state(&BroadcastState::default()) {
            Ok(doc) => doc,
            Err(_) => panic!("default state encodes"),
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

    #[tokio::test]
    async fn test_state_document_round_trip() {
        let Ok(backend) = SqliteBackend::open_in_memory().await else {
            panic!("open");
        };
        let Ok(stored) = backend.put(BROADCAST_STATE_KEY, doc()).await else {
            panic!("put");
        };
        let Ok(Some(fetched)) = backend.get(BROADCAST_STATE_KEY).await else {
            panic!("get");
        };
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn test_create_conflict_is_typed() {
        let Ok(backend) = SqliteBackend::open_in_memory().await else {
            panic!("open");
        };
        assert!(backend.create(BROADCAST_STATE_KEY, doc()).await.is_ok());
        assert!(matches!(
            backend.create(BROADCAST_STATE_KEY, doc()).await,
            Err(CoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_self_healing_update_through_store() {
        let Ok(backend) = SqliteBackend::open_in_memory().await else {
            panic!("open");
        };
        let store = StateStore::new(Arc::new(backend));
        // No initialize() call: update must create the singleton itself.
        let patch = onair_core::BroadcastPatch::default().playing(true);
        let Ok(state) = store.update(&patch).await else {
            panic!("self-healing update");
        };
        assert!(state.is_playing);
    }

    #[tokio::test]
    async fn test_track_catalog() {
        let Ok(backend) = SqliteBackend::open_in_memory().await else {
            panic!("open");
        };
        assert!(backend.insert_track(track("t2", 40.0)).await.is_ok());
        assert!(backend.insert_track(track("t1", 180.0)).await.is_ok());

        let Ok(tracks) = backend.list_tracks().await else {
            panic!("list");
        };
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, "t1");

        assert!(backend.update_track_duration("t1", 183.0).await.is_ok());
        let Ok(fetched) = backend.get_track("t1").await else {
            panic!("get");
        };
        assert!((fetched.duration_seconds - 183.0).abs() < f64::EPSILON);

        let Ok(deleted) = backend.delete_track("t2").await else {
            panic!("delete");
        };
        assert!(deleted);
        assert!(matches!(
            backend.get_track("t2").await,
            Err(CoreError::TrackNotFound { .. })
        ));
    }
}

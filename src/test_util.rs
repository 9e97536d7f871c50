use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sea_orm::{Database, DatabaseConnection, DbErr};
use tempfile::TempDir;

use migration::{Migrator, MigratorTrait};

use crate::error::RepositoryError;
use crate::library::{GenreCount, PlaylistRecord, TrackMetadata};
use crate::repository::{CatalogRepository, SeaOrmRepository};

/// Migrated SQLite catalog in a temp dir; keep the `TempDir` alive for the test.
pub async fn catalog_db() -> (DatabaseConnection, TempDir) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("catalog.db").display());
    let db = Database::connect(url).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    (db, dir)
}

/// Real catalog with a failing genre and a callback run on `all_track_ids`.
pub struct HookedRepository {
    pub inner: SeaOrmRepository,
    pub failing_genre: Option<String>,
    pub on_all_track_ids: Option<Box<dyn Fn() + Send + Sync>>,
}

impl HookedRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            inner: SeaOrmRepository::new(db),
            failing_genre: None,
            on_all_track_ids: None,
        }
    }
}

#[async_trait]
impl CatalogRepository for HookedRepository {
    async fn existing_source_paths(&self) -> Result<HashSet<String>, RepositoryError> {
        self.inner.existing_source_paths().await
    }

    async fn bulk_insert_tracks(&self, records: &[TrackMetadata]) -> Result<u64, RepositoryError> {
        self.inner.bulk_insert_tracks(records).await
    }

    async fn find_or_create_playlist(
        &self,
        name: &str,
        is_user_created: bool,
        created_by: &str,
    ) -> Result<PlaylistRecord, RepositoryError> {
        self.inner
            .find_or_create_playlist(name, is_user_created, created_by)
            .await
    }

    async fn clear_membership(&self, playlist_id: i32) -> Result<(), RepositoryError> {
        self.inner.clear_membership(playlist_id).await
    }

    async fn bulk_insert_membership(
        &self,
        playlist_id: i32,
        track_ids: &BTreeSet<i32>,
    ) -> Result<u64, RepositoryError> {
        self.inner.bulk_insert_membership(playlist_id, track_ids).await
    }

    async fn all_track_ids(&self) -> Result<BTreeSet<i32>, RepositoryError> {
        if let Some(hook) = &self.on_all_track_ids {
            hook();
        }
        self.inner.all_track_ids().await
    }

    async fn top_genres_by_count(&self, limit: u64) -> Result<Vec<GenreCount>, RepositoryError> {
        self.inner.top_genres_by_count(limit).await
    }

    async fn track_ids_by_genre(
        &self,
        genre: &str,
        limit: u64,
    ) -> Result<BTreeSet<i32>, RepositoryError> {
        if self.failing_genre.as_deref() == Some(genre) {
            return Err(RepositoryError::Write(DbErr::Custom(format!(
                "no tracks readable for {}",
                genre
            ))));
        }
        self.inner.track_ids_by_genre(genre, limit).await
    }

    async fn count_system_playlists(&self, excluding: &str) -> Result<u64, RepositoryError> {
        self.inner.count_system_playlists(excluding).await
    }
}

pub fn track_in_genre(path: &str, genre: &str) -> TrackMetadata {
    let mut track = TrackMetadata::with_defaults(Path::new(path));
    track.genre = genre.to_string();
    track
}

/// MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, no padding: 417 bytes per frame.
pub fn mpeg_frames(count: usize) -> Vec<u8> {
    const FRAME_LEN: usize = 417;
    let mut out = Vec::with_capacity(count * FRAME_LEN);
    for _ in 0..count {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        out.extend_from_slice(&frame);
    }
    out
}

fn syncsafe(n: usize) -> [u8; 4] {
    [
        ((n >> 21) & 0x7F) as u8,
        ((n >> 14) & 0x7F) as u8,
        ((n >> 7) & 0x7F) as u8,
        (n & 0x7F) as u8,
    ]
}

fn id3v2_frame(id: &str, payload: &[u8]) -> Vec<u8> {
    let mut frame = id.as_bytes().to_vec();
    frame.extend_from_slice(&syncsafe(payload.len()));
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);
    frame
}

/// APIC frame with a Latin-1 description; `picture_type` 0x03 is the front cover.
pub fn apic_frame(picture_type: u8, description: &str, mime: &str, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend_from_slice(mime.as_bytes());
    payload.push(0);
    payload.push(picture_type);
    payload.extend_from_slice(description.as_bytes());
    payload.push(0);
    payload.extend_from_slice(data);
    id3v2_frame("APIC", &payload)
}

/// ID3v2.4 tag with UTF-8 text frames followed by any prebuilt frames.
pub fn id3v2_tag(text_frames: &[(&str, &str)], raw_frames: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, text) in text_frames {
        let mut payload = vec![0x03];
        payload.extend_from_slice(text.as_bytes());
        body.extend_from_slice(&id3v2_frame(id, &payload));
    }
    for frame in raw_frames {
        body.extend_from_slice(frame);
    }

    let mut tag = b"ID3".to_vec();
    tag.extend_from_slice(&[0x04, 0x00, 0x00]);
    tag.extend_from_slice(&syncsafe(body.len()));
    tag.extend_from_slice(&body);
    tag
}

pub fn write_mp3(dir: &Path, name: &str, frames: &[(&str, &str)]) -> PathBuf {
    write_mp3_with_frames(dir, name, frames, &[])
}

pub fn write_mp3_with_frames(
    dir: &Path,
    name: &str,
    text_frames: &[(&str, &str)],
    raw_frames: &[Vec<u8>],
) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = id3v2_tag(text_frames, raw_frames);
    bytes.extend_from_slice(&mpeg_frames(50));
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn write_untagged_mp3(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, mpeg_frames(50)).unwrap();
    path
}

/// An ID3 header promising far more data than the file holds.
pub fn write_truncated_mp3(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = b"ID3".to_vec();
    bytes.extend_from_slice(&[0x04, 0x00, 0x00]);
    bytes.extend_from_slice(&syncsafe(64 * 1024));
    bytes.extend_from_slice(b"TIT2");
    std::fs::write(&path, bytes).unwrap();
    path
}

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::DecodeFailure;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_GENRE: &str = "Unknown";
pub const LOCAL_SOURCE: &str = "local";

/// Normalized metadata for one audio file, as produced by the tag decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub source_path: String,
    pub extension: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub year: u32,
    pub duration_seconds: u32,
    pub cover_art: Option<CoverArt>,
}

impl TrackMetadata {
    /// Metadata for a file whose tags could not supply anything.
    pub fn with_defaults(path: &Path) -> Self {
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        Self {
            source_path: source_key(path),
            extension,
            title,
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            genre: UNKNOWN_GENRE.to_string(),
            year: 0,
            duration_seconds: 0,
            cover_art: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: String,
}

/// Catalog key for a file on disk.
pub fn source_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRecord {
    pub id: i32,
    pub name: String,
    pub is_user_created: bool,
    pub created_by: String,
}

impl From<entity::playlist::Model> for PlaylistRecord {
    fn from(model: entity::playlist::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            is_user_created: model.is_user_created,
            created_by: model.created_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreCount {
    pub genre: String,
    pub track_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Decode(DecodeFailure),
    BatchWrite(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Decode(reason) => write!(f, "{}", reason),
            FailureReason::BatchWrite(message) => write!(f, "batch write failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub failed: Vec<FailedFile>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenrePlaylistSummary {
    pub name: String,
    pub members: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenreFailure {
    pub genre: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub all_tracks_members: usize,
    pub genre_playlists: Vec<GenrePlaylistSummary>,
    pub genre_failures: Vec<GenreFailure>,
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use lofty::file::FileType;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use log::debug;

use crate::error::DecodeFailure;
use crate::library::{CoverArt, TrackMetadata};

pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of decoding one file.
#[derive(Debug)]
pub enum ExtractionResult {
    Ok(TrackMetadata),
    Failed { path: PathBuf, reason: DecodeFailure },
}

#[derive(Debug, Clone)]
pub struct TagDecoder {
    timeout: Duration,
}

impl Default for TagDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_TIMEOUT)
    }
}

impl TagDecoder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Decodes `path` on the blocking pool, giving up after the per-file budget.
    pub async fn decode(&self, path: &Path) -> ExtractionResult {
        decode_with(path.to_path_buf(), self.timeout, read_metadata).await
    }
}

async fn decode_with<F>(path: PathBuf, budget: Duration, read: F) -> ExtractionResult
where
    F: FnOnce(&Path) -> Result<TrackMetadata, DecodeFailure> + Send + 'static,
{
    let task_path = path.clone();
    let handle = tokio::task::spawn_blocking(move || read(&task_path));

    // A timed-out decode keeps running on its blocking thread; its result is discarded.
    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(Ok(metadata))) => ExtractionResult::Ok(metadata),
        Ok(Ok(Err(reason))) => ExtractionResult::Failed { path, reason },
        Ok(Err(join_error)) => ExtractionResult::Failed {
            path,
            reason: DecodeFailure::MalformedTag(format!("decoder aborted: {}", join_error)),
        },
        Err(_) => ExtractionResult::Failed {
            path,
            reason: DecodeFailure::Timeout,
        },
    }
}

/// Reads tags and audio properties, synthesizing defaults for every missing field.
pub fn read_metadata(path: &Path) -> Result<TrackMetadata, DecodeFailure> {
    if FileType::from_path(path).is_none() {
        return Err(DecodeFailure::UnsupportedFormat);
    }
    if path.to_str().is_none() {
        return Err(DecodeFailure::Unreadable(format!(
            "path is not valid UTF-8: {}",
            path.display()
        )));
    }

    let tagged_file = Probe::open(path)?.read()?;
    let properties = tagged_file.properties();

    let mut metadata = TrackMetadata::with_defaults(path);
    metadata.duration_seconds = properties.duration().as_secs().min(u64::from(u32::MAX)) as u32;

    match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => apply_tag(&mut metadata, tag),
        None => debug!("No tags found in {}", path.display()),
    }

    Ok(metadata)
}

fn apply_tag(metadata: &mut TrackMetadata, tag: &Tag) {
    if let Some(title) = tag.title().as_deref().and_then(clean_text) {
        metadata.title = title;
    }
    if let Some(artist) = tag.artist().as_deref().and_then(clean_text) {
        metadata.artist = artist;
    }
    if let Some(album) = tag.album().as_deref().and_then(clean_text) {
        metadata.album = album;
    }
    if let Some(genre) = tag.genre().as_deref().and_then(clean_text) {
        metadata.genre = genre;
    }

    metadata.year = tag
        .year()
        .or_else(|| tag.get_string(&ItemKey::RecordingDate).and_then(parse_year))
        .or_else(|| tag.get_string(&ItemKey::OriginalReleaseDate).and_then(parse_year))
        .unwrap_or(0);

    // Only the first embedded image is kept, whatever its picture type.
    metadata.cover_art = tag.pictures().first().map(|picture| {
        let data = picture.data().to_vec();
        let mime = guess_mime(&data).to_string();
        CoverArt { data, mime }
    });
}

/// Trims a tag value and keeps the first entry of a NUL-separated list.
fn clean_text(value: &str) -> Option<String> {
    value
        .split('\0')
        .map(str::trim)
        .find(|part| !part.is_empty())
        .map(|part| part.to_string())
}

fn parse_year(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            digits.clear();
        }
    }
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}


fn guess_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav"];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.iter().any(|e| *e == ext)
        })
        .unwrap_or(false)
}

/// Lazily yields every audio file under `root`.
///
/// Symlinks are followed, but each real directory is entered at most once, so
/// link cycles and duplicate mounts terminate. Unreadable entries are logged
/// and skipped. Order is whatever the filesystem returns.
pub fn walk(root: &Path) -> impl Iterator<Item = PathBuf> {
    let mut visited: HashSet<PathBuf> = HashSet::new();

    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(move |entry| first_visit(entry, &mut visited))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|path| is_audio_file(path))
}

fn first_visit(entry: &DirEntry, visited: &mut HashSet<PathBuf>) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }
    match std::fs::canonicalize(entry.path()) {
        Ok(real) => {
            if visited.insert(real) {
                true
            } else {
                debug!("Already visited {}, skipping", entry.path().display());
                false
            }
        }
        Err(_) => true,
    }
}

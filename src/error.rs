use std::fmt;

use lofty::error::{ErrorKind, LoftyError};
use sea_orm::DbErr;
use serde::Serialize;

/// Why a single file could not be decoded. Never fatal to a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailure {
    Unreadable(String),
    MalformedTag(String),
    Timeout,
    UnsupportedFormat,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeFailure::Unreadable(message) => write!(f, "unreadable: {}", message),
            DecodeFailure::MalformedTag(message) => write!(f, "malformed tag: {}", message),
            DecodeFailure::Timeout => write!(f, "decode timed out"),
            DecodeFailure::UnsupportedFormat => write!(f, "unsupported format"),
        }
    }
}

impl std::error::Error for DecodeFailure {}

impl From<LoftyError> for DecodeFailure {
    fn from(e: LoftyError) -> Self {
        match e.kind() {
            ErrorKind::Io(_) => DecodeFailure::Unreadable(e.to_string()),
            ErrorKind::UnknownFormat => DecodeFailure::UnsupportedFormat,
            _ => DecodeFailure::MalformedTag(e.to_string()),
        }
    }
}

impl From<std::io::Error> for DecodeFailure {
    fn from(e: std::io::Error) -> Self {
        DecodeFailure::Unreadable(e.to_string())
    }
}

#[derive(Debug)]
pub enum RepositoryError {
    /// The store cannot be reached at all.
    Unavailable(DbErr),
    /// A statement or transaction failed; the store itself is still usable.
    Write(DbErr),
    /// Refused to touch a user-created playlist.
    Protected(String),
    PlaylistNotFound(i32),
}

impl RepositoryError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::Unavailable(e) => write!(f, "catalog store unavailable: {}", e),
            RepositoryError::Write(e) => write!(f, "catalog write failed: {}", e),
            RepositoryError::Protected(name) => {
                write!(f, "playlist '{}' is user-created and cannot be rebuilt", name)
            }
            RepositoryError::PlaylistNotFound(id) => write!(f, "playlist {} does not exist", id),
        }
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepositoryError::Unavailable(e) | RepositoryError::Write(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbErr> for RepositoryError {
    fn from(e: DbErr) -> Self {
        match &e {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => RepositoryError::Unavailable(e),
            _ => RepositoryError::Write(e),
        }
    }
}

#[derive(Debug)]
pub enum SyncError {
    /// Another synchronization pass holds the catalog.
    AlreadyRunning,
    Repository(RepositoryError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::AlreadyRunning => write!(f, "a synchronization pass is already running"),
            SyncError::Repository(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Repository(e) => Some(e),
            SyncError::AlreadyRunning => None,
        }
    }
}

impl From<RepositoryError> for SyncError {
    fn from(e: RepositoryError) -> Self {
        SyncError::Repository(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::RuntimeErr;

    #[test]
    fn connection_errors_are_unavailable() {
        let err = RepositoryError::from(DbErr::Conn(RuntimeErr::Internal("refused".into())));
        assert!(err.is_unavailable());

        let err = RepositoryError::from(DbErr::Exec(RuntimeErr::Internal("constraint".into())));
        assert!(!err.is_unavailable());
        assert!(matches!(err, RepositoryError::Write(_)));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(DecodeFailure::from(io), DecodeFailure::Unreadable(_)));
    }
}

//! Error types for Floxy core operations.
//!
//! Validation failures ([`ProfileError`]) surface synchronously to callers of
//! `enqueue`. Processing failures never leave the service: they are logged and
//! replaced by an opaque reference on the entry.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving an encode profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// The requested profile name is not in the catalog.
    #[error("Profile {0} is not a valid profile.")]
    NotFound(String),

    /// The requested bitrate is outside the profile's range.
    #[error(
        "Bitrate {bitrate} is not a valid bitrate for profile '{profile}' (Min: {min} Max: {max})."
    )]
    BitrateOutOfRange {
        /// Profile name.
        profile: String,
        /// Requested bitrate in bits per second.
        bitrate: u32,
        /// Lowest accepted bitrate.
        min: u32,
        /// Highest accepted bitrate.
        max: u32,
    },
}

/// File system failures, tagged with the path involved.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Creating a directory failed.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Directory path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Writing a file failed.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// File path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Removing a file or directory failed.
    #[error("Failed to delete {path}: {reason}")]
    DeleteFailed {
        /// Path being removed.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Renaming a file failed.
    #[error("Failed to rename {from} to {to}: {reason}")]
    RenameFailed {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Reading a file failed.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// File path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },
}

/// Errors that can occur in Floxy core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Encode profile validation failed.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// The external downloader failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// The downloader did not finish within the configured timeout.
    #[error("Download timed out after {0:?}")]
    DownloadTimedOut(Duration),

    /// Metadata extraction failed.
    #[error("Metadata extraction failed: {0}")]
    Metadata(String),

    /// File system operation failed.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this is a request validation failure that callers should see.
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Profile(_))
    }
}

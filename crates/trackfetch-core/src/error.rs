//! Error types for Trackfetch core operations.
//!
//! Errors are grouped by domain ([`DownloadError`], [`TagError`],
//! [`FileSystemError`]) and wrapped by the top-level [`Error`]. Every error
//! maps onto an [`ErrorKind`], which is what a failed job reports to the
//! caller.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse category of a failure, reported with every failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid request or configuration, or the extraction tool is missing.
    Configuration,
    /// Transfer, extraction, or cover-fetch failure.
    Network,
    /// The external post-processing (audio conversion) failed.
    Conversion,
    /// The tag could not be built or written.
    TagWrite,
    /// Local filesystem failure outside of tag writing.
    FileSystem,
    /// Anything else (worker panic, malformed service output).
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Network => write!(f, "network"),
            Self::Conversion => write!(f, "conversion"),
            Self::TagWrite => write!(f, "tag write"),
            Self::FileSystem => write!(f, "file system"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Errors raised while talking to the extraction service.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The transfer or the metadata extraction failed.
    #[error("Download failed for {url}: {reason}")]
    Network {
        /// Source URL.
        url: String,
        /// Failure description.
        reason: String,
    },

    /// The audio conversion step failed.
    #[error("Audio conversion failed for {url}: {reason}")]
    ConversionFailed {
        /// Source URL.
        url: String,
        /// Failure description.
        reason: String,
    },

    /// The extraction tool could not be started.
    #[error("Extraction tool not available at {path}: {reason}")]
    ToolMissing {
        /// Configured tool path.
        path: String,
        /// Spawn error.
        reason: String,
    },

    /// The service finished but its output could not be understood.
    #[error("Unexpected extraction output: {reason}")]
    InvalidOutput {
        /// What was wrong with the output.
        reason: String,
    },
}

/// Errors raised while building or writing the ID3 tag.
#[derive(Debug, Error)]
pub enum TagError {
    /// The release date was not a compact `YYYYMMDD` date.
    #[error("Invalid release date '{value}': expected YYYYMMDD")]
    InvalidDate {
        /// The rejected input.
        value: String,
    },

    /// The existing tag could not be read.
    #[error("Failed to read tag from {path}: {reason}")]
    ReadFailed {
        /// Audio file path.
        path: PathBuf,
        /// Underlying id3 error.
        reason: String,
    },

    /// The tag could not be flushed to disk.
    #[error("Failed to write tag to {path}: {reason}")]
    WriteFailed {
        /// Audio file path.
        path: PathBuf,
        /// Underlying id3 error.
        reason: String,
    },
}

/// Filesystem errors outside of tag writing.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// The path does not exist.
    #[error("Path not found: {path}")]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// A directory could not be created.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Directory path.
        path: PathBuf,
        /// Error message.
        reason: String,
    },

    /// A file could not be read.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// File path.
        path: PathBuf,
        /// Error message.
        reason: String,
    },

    /// A file could not be written.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// File path.
        path: PathBuf,
        /// Error message.
        reason: String,
    },
}

/// Errors that can occur in Trackfetch core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration or request validation error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Extraction service error.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Tag building or writing error.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// Filesystem error.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Plain network error (cover art and similar side fetches).
    #[error("Network error: {0}")]
    Network(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal failure that does not fit elsewhere.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a network error from a message.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// The category reported to callers.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Download(DownloadError::ToolMissing { .. }) => {
                ErrorKind::Configuration
            }
            Self::Download(DownloadError::ConversionFailed { .. }) => ErrorKind::Conversion,
            Self::Download(DownloadError::InvalidOutput { .. }) => ErrorKind::Internal,
            Self::Download(_) | Self::Network(_) => ErrorKind::Network,
            Self::Tag(_) => ErrorKind::TagWrite,
            Self::FileSystem(_) | Self::Io(_) => ErrorKind::FileSystem,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The underlying cause, when the error wraps one.
    #[must_use]
    pub fn cause(&self) -> Option<String> {
        match self {
            Self::Download(
                DownloadError::Network { reason, .. }
                | DownloadError::ConversionFailed { reason, .. }
                | DownloadError::ToolMissing { reason, .. }
                | DownloadError::InvalidOutput { reason },
            )
            | Self::Tag(TagError::ReadFailed { reason, .. } | TagError::WriteFailed { reason, .. }) => {
                Some(reason.clone())
            }
            Self::Io(e) => Some(e.to_string()),
            Self::Serialization(e) => Some(e.to_string()),
            _ => None,
        }
    }
}

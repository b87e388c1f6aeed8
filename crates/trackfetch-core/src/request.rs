//! Download requests.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::default_target_folder;
use crate::error::{Error, Result};
use crate::path::sanitize_file_stem;

/// Unique identifier for a submitted job.
pub type JobId = u64;

/// Everything the caller provides to acquire one track.
///
/// A job takes its request by value; it is never mutated after the job
/// starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Track title; must not be empty. Also names the output file.
    pub title: String,
    /// Optional subtitle (stored as TIT3).
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Remote media URL.
    #[serde(alias = "url")]
    pub source_url: String,
    /// Caller-side track id, echoed back in every event.
    #[serde(default)]
    pub track_id: Option<String>,
    /// Folder the audio file is written to.
    #[serde(default = "default_target_folder")]
    pub target_folder: PathBuf,
}

impl DownloadRequest {
    /// Create a request saving into the default music folder.
    pub fn new(title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            source_url: source_url.into(),
            track_id: None,
            target_folder: default_target_folder(),
        }
    }

    /// Set the subtitle.
    #[must_use]
    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// Set the caller-side track id.
    #[must_use]
    pub fn with_track_id(mut self, track_id: impl Into<String>) -> Self {
        self.track_id = Some(track_id.into());
        self
    }

    /// Set the target folder.
    #[must_use]
    pub fn with_target_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.target_folder = folder.into();
        self
    }

    /// Check the request before any I/O happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the title is blank or yields no
    /// file name, or the URL is missing.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Configuration(
                "track title must not be empty".to_string(),
            ));
        }
        if sanitize_file_stem(&self.title).is_empty() {
            return Err(Error::Configuration(format!(
                "track title '{}' has no usable file name characters",
                self.title
            )));
        }
        if self.source_url.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "no source URL given for '{}'",
                self.title
            )));
        }
        Ok(())
    }
}

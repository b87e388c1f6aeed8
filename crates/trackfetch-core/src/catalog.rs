//! Hand-off of completed tracks to a local catalog.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::job::CompletedTrack;
use crate::tagger::read_embedded_cover;
use crate::thumbnail::CoverArt;

/// What a catalog stores for one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRecord {
    /// Track title.
    pub title: String,
    /// Track subtitle.
    pub subtitle: Option<String>,
    /// Path of the tagged audio file.
    pub path: PathBuf,
    /// Embedded front cover, if any.
    pub cover: Option<CoverArt>,
    /// Caller-supplied track id.
    pub track_id: Option<String>,
}

impl SongRecord {
    /// Build a record for a completed track, reading its embedded cover.
    ///
    /// # Errors
    ///
    /// Returns a tag error if the file's tag cannot be read.
    pub fn from_completed(track: &CompletedTrack) -> Result<Self> {
        let cover = read_embedded_cover(&track.file_path)?;
        Ok(Self {
            title: track.title.clone(),
            subtitle: track.subtitle.clone(),
            path: track.file_path.clone(),
            cover,
            track_id: track.track_id.clone(),
        })
    }
}

/// A store that accepts new songs.
pub trait CatalogStore {
    /// Insert or replace the song at `record.path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the record.
    fn insert_song(&mut self, record: SongRecord) -> Result<()>;
}

/// Summary line of a stored song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongSummary {
    /// Track title.
    pub title: String,
    /// File path.
    pub path: PathBuf,
    /// Whether a cover is embedded.
    pub has_cover: bool,
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    songs: Vec<SongRecord>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored songs, in insertion order.
    #[must_use]
    pub fn songs(&self) -> &[SongRecord] {
        &self.songs
    }

    /// Number of stored songs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Summaries of the stored songs.
    #[must_use]
    pub fn summaries(&self) -> Vec<SongSummary> {
        self.songs
            .iter()
            .map(|s| SongSummary {
                title: s.title.clone(),
                path: s.path.clone(),
                has_cover: s.cover.is_some(),
            })
            .collect()
    }
}

impl CatalogStore for MemoryCatalog {
    fn insert_song(&mut self, record: SongRecord) -> Result<()> {
        if let Some(existing) = self.songs.iter_mut().find(|s| s.path == record.path) {
            debug!("Replacing catalog entry for {}", record.path.display());
            *existing = record;
        } else {
            info!("Added '{}' to catalog", record.title);
            self.songs.push(record);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(title: &str, path: &str) -> SongRecord {
        SongRecord {
            title: title.to_string(),
            subtitle: None,
            path: PathBuf::from(path),
            cover: None,
            track_id: None,
        }
    }

    #[test]
    fn test_insert_and_replace() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_song(record("A", "/m/a.mp3")).unwrap();
        catalog.insert_song(record("B", "/m/b.mp3")).unwrap();
        catalog.insert_song(record("A2", "/m/a.mp3")).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.songs()[0].title, "A2");
        assert!(!catalog.summaries()[1].has_cover);
    }

    #[test]
    fn test_from_completed_without_tag() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, [0u8; 16]).expect("write");

        let track = CompletedTrack {
            job_id: 1,
            title: "Song".to_string(),
            subtitle: Some("Live".to_string()),
            file_path: path.clone(),
            track_id: Some("t1".to_string()),
        };
        let record = SongRecord::from_completed(&track).expect("record");
        assert_eq!(record.path, path);
        assert_eq!(record.subtitle.as_deref(), Some("Live"));
        assert!(record.cover.is_none());
    }
}

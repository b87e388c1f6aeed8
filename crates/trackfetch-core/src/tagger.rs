//! ID3 metadata tagging.
//!
//! Tagging is split in two: [`apply_tag_set`] is a pure function from an
//! existing tag plus the new fields to the replacement tag, and
//! [`MetadataTagger::write`] does the I/O around it (read, fetch cover,
//! single flush).

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use id3::frame::{Comment, ExtendedText, Picture, PictureType};
use id3::{Tag, TagLike, Version};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, TagError};
use crate::extractor::ExtractedInfo;
use crate::request::DownloadRequest;
use crate::thumbnail::{CoverArt, CoverFetcher};

/// Label of the TXXX frame carrying the external source id.
pub const SOURCE_ID_LABEL: &str = "SOURCE_ID";

const COMMENT_LANG: &str = "eng";

/// Convert a compact `YYYYMMDD` date to ISO `YYYY-MM-DD`.
///
/// # Errors
///
/// Returns [`TagError::InvalidDate`] unless the input is exactly eight ASCII
/// digits forming a valid calendar date.
pub fn normalize_release_date(compact: &str) -> Result<String> {
    let invalid = || {
        Error::Tag(TagError::InvalidDate {
            value: compact.to_string(),
        })
    };

    if compact.len() != 8 || !compact.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let date = NaiveDate::parse_from_str(compact, "%Y%m%d").map_err(|_| invalid())?;
    Ok(date.format("%Y-%m-%d").to_string())
}

/// The fields written into a track's tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    /// TIT2.
    pub title: String,
    /// TIT3.
    pub subtitle: Option<String>,
    /// TPE1, one frame with every artist.
    pub artists: Vec<String>,
    /// TALB.
    pub album: Option<String>,
    /// COMM.
    pub description: Option<String>,
    /// TDRC, ISO `YYYY-MM-DD`.
    pub release_date: Option<String>,
    /// TXXX under [`SOURCE_ID_LABEL`].
    pub source_id: Option<String>,
    /// APIC front cover.
    pub cover: Option<CoverArt>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl TagSet {
    /// Build the tag fields from the request and the extracted info.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::InvalidDate`] if the reported release date is
    /// malformed.
    pub fn from_extracted(
        request: &DownloadRequest,
        info: &ExtractedInfo,
        cover: Option<CoverArt>,
    ) -> Result<Self> {
        let release_date = info
            .compact_date()
            .map(normalize_release_date)
            .transpose()?;

        Ok(Self {
            title: request.title.trim().to_string(),
            subtitle: non_blank(request.subtitle.as_deref()),
            artists: info.artist_list(),
            album: non_blank(info.album.as_deref()),
            description: non_blank(info.description.as_deref()),
            release_date,
            source_id: non_blank(info.id.as_deref()),
            cover,
        })
    }
}

/// Replace the fields of `old` that `set` carries a value for.
///
/// Every frame of a replaced kind is removed before its replacement is
/// added, so applying the same set twice yields the same frames.
#[must_use]
pub fn apply_tag_set(old: Tag, set: &TagSet) -> Tag {
    let mut tag = old;

    tag.remove("TIT2");
    tag.set_title(set.title.clone());

    if let Some(subtitle) = &set.subtitle {
        tag.remove("TIT3");
        tag.set_text("TIT3", subtitle.clone());
    }

    if !set.artists.is_empty() {
        tag.remove("TPE1");
        tag.set_text_values("TPE1", set.artists.iter().cloned());
    }

    if let Some(album) = &set.album {
        tag.remove("TALB");
        tag.set_album(album.clone());
    }

    if let Some(description) = &set.description {
        tag.remove_comment(None, None);
        tag.add_frame(Comment {
            lang: COMMENT_LANG.to_string(),
            description: String::new(),
            text: description.clone(),
        });
    }

    if let Some(date) = &set.release_date {
        tag.remove("TDRC");
        tag.set_text("TDRC", date.clone());
    }

    if let Some(source_id) = &set.source_id {
        tag.remove_extended_text(Some(SOURCE_ID_LABEL), None);
        tag.add_frame(ExtendedText {
            description: SOURCE_ID_LABEL.to_string(),
            value: source_id.clone(),
        });
    }

    if let Some(cover) = &set.cover {
        tag.remove_picture_by_type(PictureType::CoverFront);
        tag.add_frame(Picture {
            mime_type: cover.mime_type.clone(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: cover.data.clone(),
        });
    }

    tag
}

/// Read the tag of `path`, or an empty tag if the file has none.
fn read_tag(path: &Path) -> Result<Tag> {
    match Tag::read_from_path(path) {
        Ok(tag) => Ok(tag),
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => {
            debug!("No ID3 tag found in: {}", path.display());
            Ok(Tag::new())
        }
        Err(e) => Err(Error::Tag(TagError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })),
    }
}

/// Writes ID3 metadata into converted tracks.
#[derive(Clone)]
pub struct MetadataTagger {
    fetcher: Arc<dyn CoverFetcher>,
}

impl std::fmt::Debug for MetadataTagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTagger").finish_non_exhaustive()
    }
}

impl MetadataTagger {
    /// Create a tagger fetching covers through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn CoverFetcher>) -> Self {
        Self { fetcher }
    }

    /// Tag the file at `path`.
    ///
    /// The file is written exactly once. A cover that cannot be fetched is
    /// skipped with a warning and the remaining fields are still written.
    ///
    /// # Errors
    ///
    /// Returns a [`TagError`] if the release date is malformed or the tag
    /// cannot be read or written.
    pub fn write(
        &self,
        path: &Path,
        request: &DownloadRequest,
        info: &ExtractedInfo,
        cover_url: Option<&str>,
    ) -> Result<()> {
        let old = read_tag(path)?;
        let mut set = TagSet::from_extracted(request, info, None)?;
        set.cover = cover_url.and_then(|url| self.fetch_cover(url));

        let tag = apply_tag_set(old, &set);
        tag.write_to_path(path, Version::Id3v24).map_err(|e| {
            Error::Tag(TagError::WriteFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        info!(
            "Tagged {} (cover: {})",
            path.display(),
            if set.cover.is_some() { "yes" } else { "no" }
        );
        Ok(())
    }

    fn fetch_cover(&self, url: &str) -> Option<CoverArt> {
        match self.fetcher.fetch(url) {
            Ok(cover) => Some(cover),
            Err(e) => {
                warn!("Skipping cover art from {}: {}", url, e);
                None
            }
        }
    }
}

/// Read the embedded front cover of the file at `path`.
///
/// Returns `Ok(None)` if the file has no tag or no front cover.
///
/// # Errors
///
/// Returns [`TagError::ReadFailed`] if an existing tag cannot be parsed.
pub fn read_embedded_cover(path: &Path) -> Result<Option<CoverArt>> {
    let tag = read_tag(path)?;
    Ok(tag
        .pictures()
        .find(|p| p.picture_type == PictureType::CoverFront)
        .map(|p| CoverArt {
            data: p.data.clone(),
            mime_type: p.mime_type.clone(),
        }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::thumbnail::MockCoverFetcher;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn audio_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, [0xFF_u8, 0xFB, 0x90, 0x00, 0x00, 0x00]).expect("write audio");
        path
    }

    fn info() -> ExtractedInfo {
        ExtractedInfo {
            id: Some("abc123".to_string()),
            artists: Some(vec!["Alice".to_string(), "Bob".to_string()]),
            album: Some("Album".to_string()),
            description: Some("A description".to_string()),
            release_date: Some("20230704".to_string()),
            ..Default::default()
        }
    }

    fn count(tag: &Tag, id: &str) -> usize {
        tag.frames().filter(|f| f.id() == id).count()
    }

    fn cover_fetcher() -> Arc<MockCoverFetcher> {
        let mut fetcher = MockCoverFetcher::new();
        fetcher.expect_fetch().returning(|_| {
            Ok(CoverArt {
                data: vec![1, 2, 3],
                mime_type: "image/jpeg".to_string(),
            })
        });
        Arc::new(fetcher)
    }

    #[test]
    fn test_normalize_release_date() {
        assert_eq!(normalize_release_date("20230704").unwrap(), "2023-07-04");
        assert_eq!(normalize_release_date("20240229").unwrap(), "2024-02-29");
    }

    #[test]
    fn test_normalize_rejects_malformed_dates() {
        for bad in [
            "2023",
            "2023-07-04",
            "2023074",
            "20231301",
            "20230230",
            "2023070a",
            "",
            "+2023070",
        ] {
            let err = normalize_release_date(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TagWrite, "input {bad:?}");
        }
    }

    #[test]
    fn test_tag_set_artist_fallbacks() {
        let request = DownloadRequest::new("Song", "u");
        let from_creators = ExtractedInfo {
            creators: Some(vec!["Carol".to_string()]),
            uploader: Some("Uploader".to_string()),
            ..Default::default()
        };
        let set = TagSet::from_extracted(&request, &from_creators, None).unwrap();
        assert_eq!(set.artists, vec!["Carol".to_string()]);

        let from_uploader = ExtractedInfo {
            uploader: Some("Uploader".to_string()),
            ..Default::default()
        };
        let set = TagSet::from_extracted(&request, &from_uploader, None).unwrap();
        assert_eq!(set.artists, vec!["Uploader".to_string()]);
    }

    #[test]
    fn test_tag_set_upload_date_fallback() {
        let request = DownloadRequest::new("Song", "u");
        let info = ExtractedInfo {
            upload_date: Some("20200101".to_string()),
            ..Default::default()
        };
        let set = TagSet::from_extracted(&request, &info, None).unwrap();
        assert_eq!(set.release_date.as_deref(), Some("2020-01-01"));
    }

    #[test]
    fn test_apply_replaces_frames() {
        let mut old = Tag::new();
        old.set_title("Old");
        old.set_artist("Old Artist");
        old.add_frame(Comment {
            lang: "eng".to_string(),
            description: "other".to_string(),
            text: "old comment".to_string(),
        });
        old.add_frame(ExtendedText {
            description: SOURCE_ID_LABEL.to_string(),
            value: "old-id".to_string(),
        });
        old.add_frame(ExtendedText {
            description: "KEEP".to_string(),
            value: "kept".to_string(),
        });

        let request = DownloadRequest::new("New", "u").with_subtitle("Sub");
        let set = TagSet::from_extracted(&request, &info(), None).unwrap();
        let tag = apply_tag_set(old, &set);

        assert_eq!(tag.title(), Some("New"));
        assert_eq!(tag.get("TIT3").and_then(|f| f.content().text()), Some("Sub"));
        assert_eq!(count(&tag, "TPE1"), 1);
        let artists: Vec<&str> = tag
            .get("TPE1")
            .and_then(|f| f.content().text())
            .map(|t| t.split('\0').collect())
            .unwrap_or_default();
        assert_eq!(artists, vec!["Alice", "Bob"]);
        assert_eq!(tag.comments().count(), 1);
        assert_eq!(tag.get("TDRC").and_then(|f| f.content().text()), Some("2023-07-04"));

        let source_ids: Vec<&str> = tag
            .extended_texts()
            .filter(|t| t.description == SOURCE_ID_LABEL)
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(source_ids, vec!["abc123"]);
        assert!(tag.extended_texts().any(|t| t.description == "KEEP"));
    }

    #[test]
    fn test_apply_keeps_fields_without_new_value() {
        let mut old = Tag::new();
        old.set_album("Existing Album");

        let set = TagSet {
            title: "Title".to_string(),
            ..Default::default()
        };
        let tag = apply_tag_set(old, &set);
        assert_eq!(tag.album(), Some("Existing Album"));
    }

    #[test]
    fn test_write_twice_is_idempotent() {
        let dir = TempDir::new().expect("temp dir");
        let path = audio_file(&dir);
        let tagger = MetadataTagger::new(cover_fetcher());
        let request = DownloadRequest::new("Song", "u");

        tagger
            .write(&path, &request, &info(), Some("https://i.example.com/c.jpg"))
            .expect("first write");
        let first = Tag::read_from_path(&path).expect("read tag");
        tagger
            .write(&path, &request, &info(), Some("https://i.example.com/c.jpg"))
            .expect("second write");
        let second = Tag::read_from_path(&path).expect("read tag");

        for id in ["TIT2", "TPE1", "TALB", "COMM", "TDRC", "TXXX", "APIC"] {
            assert_eq!(count(&second, id), 1, "frame {id}");
            assert_eq!(count(&first, id), count(&second, id), "frame {id}");
        }
        assert_eq!(second.title(), Some("Song"));
    }

    #[test]
    fn test_cover_failure_still_tags_without_picture() {
        let dir = TempDir::new().expect("temp dir");
        let path = audio_file(&dir);
        let mut fetcher = MockCoverFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Err(Error::network_error("unreachable")));
        let tagger = MetadataTagger::new(Arc::new(fetcher));

        tagger
            .write(
                &path,
                &DownloadRequest::new("Song", "u"),
                &info(),
                Some("https://i.example.com/c.jpg"),
            )
            .expect("write without cover");

        let tag = Tag::read_from_path(&path).expect("read tag");
        assert_eq!(tag.title(), Some("Song"));
        assert_eq!(tag.pictures().count(), 0);
        assert!(read_embedded_cover(&path).unwrap().is_none());
    }

    #[test]
    fn test_bad_date_aborts_write() {
        let dir = TempDir::new().expect("temp dir");
        let path = audio_file(&dir);
        let mut fetcher = MockCoverFetcher::new();
        fetcher.expect_fetch().never();
        let tagger = MetadataTagger::new(Arc::new(fetcher));
        let bad = ExtractedInfo {
            release_date: Some("2023-07".to_string()),
            ..info()
        };

        let err = tagger
            .write(&path, &DownloadRequest::new("Song", "u"), &bad, Some("c.jpg"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TagWrite);
        assert!(Tag::read_from_path(&path).is_err());
    }

    #[test]
    fn test_read_embedded_cover() {
        let dir = TempDir::new().expect("temp dir");
        let path = audio_file(&dir);
        let tagger = MetadataTagger::new(cover_fetcher());
        tagger
            .write(&path, &DownloadRequest::new("Song", "u"), &info(), Some("c.jpg"))
            .expect("write");

        let cover = read_embedded_cover(&path).unwrap().expect("cover present");
        assert_eq!(cover.data, vec![1, 2, 3]);
        assert_eq!(cover.mime_type, "image/jpeg");
    }
}

//! `Trackfetch` Core Library
//!
//! This crate provides the core functionality for the `Trackfetch` pipeline:
//! - Downloading remote media and extracting audio through `yt-dlp`
//! - Translating raw service events into canonical progress phases
//! - Tagging converted tracks with ID3 metadata and cover art
//! - Running jobs on a bounded worker pool
//! - Handing completed tracks to a local catalog
//!
//! # Error Handling
//!
//! Every operation returns the crate's [`Result`]. A failed job reports a
//! typed [`JobFailure`] carrying an [`ErrorKind`]. See the [`error`] module
//! for details.
//!
//! ```rust,ignore
//! use trackfetch_core::{DownloadPool, DownloadRequest, JobDeps, JobEvent, PoolConfig};
//!
//! let (pool, mut events) = DownloadPool::new(PoolConfig::default(), deps);
//! let id = pool.submit(DownloadRequest::new("Song", url))?;
//! while let Some(event) = events.recv().await {
//!     if let JobEvent::Finished(outcome) = event {
//!         println!("job {} done: {}", outcome.job_id(), outcome.is_success());
//!     }
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod extractor;
pub mod job;
pub mod path;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod request;
pub mod tagger;
pub mod thumbnail;

pub use catalog::{CatalogStore, MemoryCatalog, SongRecord, SongSummary};
pub use config::{AppConfig, DownloadQuality, default_target_folder, ensure_target_folder};
pub use error::{DownloadError, Error, ErrorKind, FileSystemError, Result, TagError};
pub use extractor::{
    AudioPreference, ExtractedInfo, ExtractionRequest, MediaExtractor, RawEvent, YtDlpConfig,
    YtDlpExtractor,
};
pub use job::{CompletedTrack, DownloadJob, JobDeps, JobEvent, JobFailure, JobOutcome};
pub use path::{AUDIO_EXTENSION, audio_file_name, output_path, output_template, sanitize_file_stem};
pub use pool::{
    DEFAULT_MAX_CONCURRENT_JOBS, DownloadPool, MAX_CONCURRENT_JOBS, MIN_CONCURRENT_JOBS,
    PoolConfig,
};
pub use progress::{
    Phase, ProgressEvent, ProgressTranslator, RAW_LABEL_TABLE, RawClass, Signal, TranslatorState,
    classify,
};
pub use registry::{JobEntry, JobRegistry};
pub use request::{DownloadRequest, JobId};
pub use tagger::{
    MetadataTagger, SOURCE_ID_LABEL, TagSet, apply_tag_set, normalize_release_date,
    read_embedded_cover,
};
pub use thumbnail::{
    CoverArt, CoverFetcher, DEFAULT_FETCH_TIMEOUT_SECS, HttpCoverFetcher, ThumbnailDescriptor,
    mime_type_for, select_thumbnail,
};

//! External extraction/download service.
//!
//! The pipeline talks to the service through the [`MediaExtractor`] trait:
//! given a URL, an output template and an audio preference, the service
//! downloads the media, converts it to audio and returns an
//! [`ExtractedInfo`]. While it runs it reports [`RawEvent`]s through a
//! caller-supplied callback.
//!
//! [`YtDlpExtractor`] drives the `yt-dlp` executable. Its progress hooks are
//! printed as JSON lines through `--progress-template`, and the final info
//! dict is printed once the file has been moved into place.
//!
//! ## Raw labels
//!
//! Every raw event carries a namespaced label:
//! - `extract:<extractor>` for extractor banner lines (`[youtube] ...`)
//! - `info` for `[info]` lines
//! - `download:<status>` for download hook events, plus
//!   `download:destination` for the destination banner
//! - `postprocess:<status>` for post-processor hook events

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{DownloadError, Error, Result};
use crate::thumbnail::ThumbnailDescriptor;

const DOWNLOAD_PREFIX: &str = "[trackfetch:download] ";
const POSTPROCESS_PREFIX: &str = "[trackfetch:postprocess] ";
const INFO_PREFIX: &str = "[trackfetch:info] ";

/// Matches yt-dlp banner lines such as `[youtube] abc: Downloading webpage`.
static BANNER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\[([A-Za-z0-9_:.-]+)\]\s+(.*)$").ok());

/// Metadata returned by the extraction service.
///
/// Only a whitelisted subset of the service's fields is kept; every field
/// except the file path is optional and unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    /// Service-side media id, stored as the external source id.
    #[serde(default)]
    pub id: Option<String>,
    /// Title as reported by the service.
    #[serde(default)]
    pub title: Option<String>,
    /// Availability label (`public`, `unlisted`, ...).
    #[serde(default)]
    pub availability: Option<String>,
    /// Artist list.
    #[serde(default)]
    pub artists: Option<Vec<String>>,
    /// Legacy comma-separated artist field.
    #[serde(default)]
    pub artist: Option<String>,
    /// Creator list.
    #[serde(default)]
    pub creators: Option<Vec<String>>,
    /// Uploader or channel name.
    #[serde(default)]
    pub uploader: Option<String>,
    /// Album name.
    #[serde(default)]
    pub album: Option<String>,
    /// Long description.
    #[serde(default)]
    pub description: Option<String>,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Release date in compact `YYYYMMDD` form.
    #[serde(default)]
    pub release_date: Option<String>,
    /// Upload date in compact `YYYYMMDD` form.
    #[serde(default)]
    pub upload_date: Option<String>,
    /// Default thumbnail URL chosen by the service.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// All thumbnail candidates.
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailDescriptor>,
    /// Resolved path of the converted local file.
    #[serde(default)]
    pub filepath: Option<PathBuf>,
}

impl ExtractedInfo {
    /// Artists to tag, falling back to creators and then the uploader.
    #[must_use]
    pub fn artist_list(&self) -> Vec<String> {
        fn non_empty(values: &[String]) -> Option<Vec<String>> {
            let values: Vec<String> = values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(String::from)
                .collect();
            (!values.is_empty()).then_some(values)
        }

        self.artists
            .as_deref()
            .and_then(non_empty)
            .or_else(|| {
                self.artist.as_deref().and_then(|a| {
                    non_empty(&a.split(", ").map(String::from).collect::<Vec<_>>())
                })
            })
            .or_else(|| self.creators.as_deref().and_then(non_empty))
            .or_else(|| {
                self.uploader
                    .as_deref()
                    .and_then(|u| non_empty(&[u.to_string()]))
            })
            .unwrap_or_default()
    }

    /// Compact release date, falling back to the upload date.
    #[must_use]
    pub fn compact_date(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .or(self.upload_date.as_deref())
            .filter(|d| !d.is_empty())
    }
}

/// One raw status event from the extraction service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    /// Namespaced raw label, see the module docs.
    pub label: String,
    /// Bytes transferred so far.
    pub downloaded_bytes: Option<u64>,
    /// Total size, when known.
    pub total_bytes: Option<u64>,
    /// Estimated total size, when the exact size is unknown.
    pub total_bytes_estimate: Option<u64>,
    /// Ready-made percentage (0-100), when the service computes one.
    pub percent: Option<f64>,
}

impl RawEvent {
    /// Create an event with only a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Create a transfer event with byte counts.
    #[must_use]
    pub fn transfer(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            label: "download:downloading".to_string(),
            downloaded_bytes: Some(downloaded_bytes),
            total_bytes,
            ..Default::default()
        }
    }

    /// Set the ready-made percentage.
    #[must_use]
    pub const fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }
}

/// Desired output audio format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPreference {
    /// Target codec/container, e.g. `mp3`.
    pub format: String,
    /// Service quality argument, e.g. `192K` or `0` for best.
    pub quality: String,
}

impl Default for AudioPreference {
    fn default() -> Self {
        Self {
            format: crate::path::AUDIO_EXTENSION.to_string(),
            quality: "192K".to_string(),
        }
    }
}

/// Arguments of one extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    /// Source media URL.
    pub url: String,
    /// Output template; the service substitutes `%(ext)s`.
    pub output_template: String,
    /// Desired audio format.
    pub audio: AudioPreference,
}

/// The external extraction/download/conversion service.
///
/// `extract` blocks the calling thread until the service finishes.
pub trait MediaExtractor: Send + Sync {
    /// Download and convert `request.url`, reporting raw events to `progress`.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] if the transfer, extraction or conversion
    /// fails.
    fn extract(
        &self,
        request: &ExtractionRequest,
        progress: &mut dyn FnMut(RawEvent),
    ) -> Result<ExtractedInfo>;
}

/// Configuration for the yt-dlp driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp executable (looked up on `PATH` if bare).
    pub binary: PathBuf,
    /// Directory or path of ffmpeg, passed as `--ffmpeg-location`.
    #[serde(default)]
    pub ffmpeg_location: Option<PathBuf>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
        }
    }
}

/// Extraction service backed by the `yt-dlp` executable.
#[derive(Debug, Clone, Default)]
pub struct YtDlpExtractor {
    config: YtDlpConfig,
}

impl YtDlpExtractor {
    /// Create an extractor with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an extractor with custom configuration.
    #[must_use]
    pub const fn with_config(config: YtDlpConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for one extraction.
    #[must_use]
    pub fn build_args(&self, request: &ExtractionRequest) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--no-colors".to_string(),
            "--no-quiet".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            format!("download:{DOWNLOAD_PREFIX}%(progress)j"),
            "--progress-template".to_string(),
            format!("postprocess:{POSTPROCESS_PREFIX}%(progress)j"),
            "--print".to_string(),
            format!("after_move:{INFO_PREFIX}%()j"),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            request.audio.format.clone(),
            "--audio-quality".to_string(),
            request.audio.quality.clone(),
            "--output".to_string(),
            request.output_template.clone(),
        ];

        if let Some(ref location) = self.config.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(location.to_string_lossy().into_owned());
        }

        args.push(request.url.clone());
        args
    }

    fn binary(&self) -> &Path {
        &self.config.binary
    }
}

/// What a single output line of the service means.
#[derive(Debug, PartialEq)]
enum ServiceLine {
    Event(RawEvent),
    Info(Box<ExtractedInfo>),
    Other,
}

/// Progress hook payload as printed by `%(progress)j`.
#[derive(Debug, Deserialize)]
struct ProgressPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    downloaded_bytes: Option<f64>,
    #[serde(default)]
    total_bytes: Option<f64>,
    #[serde(default)]
    total_bytes_estimate: Option<f64>,
    #[serde(default, rename = "_percent")]
    percent: Option<f64>,
    #[serde(default, rename = "_percent_str")]
    percent_str: Option<String>,
}

impl ProgressPayload {
    fn into_event(self, namespace: &str) -> RawEvent {
        let status = self.status.unwrap_or_else(|| "unknown".to_string());
        let percent = self.percent.or_else(|| {
            self.percent_str
                .as_deref()
                .and_then(|s| s.trim().trim_end_matches('%').trim().parse::<f64>().ok())
        });

        RawEvent {
            label: format!("{namespace}:{status}"),
            downloaded_bytes: self.downloaded_bytes.map(|b| b as u64),
            total_bytes: self.total_bytes.map(|b| b as u64),
            total_bytes_estimate: self.total_bytes_estimate.map(|b| b as u64),
            percent,
        }
    }
}

fn parse_progress(json: &str, namespace: &str) -> ServiceLine {
    match serde_json::from_str::<ProgressPayload>(json) {
        Ok(payload) => ServiceLine::Event(payload.into_event(namespace)),
        Err(e) => {
            warn!("Unparseable {} progress line: {}", namespace, e);
            ServiceLine::Other
        }
    }
}

/// Classify one line of service output.
fn parse_line(line: &str) -> ServiceLine {
    let line = line.trim();

    if let Some(json) = line.strip_prefix(DOWNLOAD_PREFIX) {
        return parse_progress(json, "download");
    }
    if let Some(json) = line.strip_prefix(POSTPROCESS_PREFIX) {
        return parse_progress(json, "postprocess");
    }
    if let Some(json) = line.strip_prefix(INFO_PREFIX) {
        return match serde_json::from_str::<ExtractedInfo>(json) {
            Ok(info) => ServiceLine::Info(Box::new(info)),
            Err(e) => {
                warn!("Unparseable info line: {}", e);
                ServiceLine::Other
            }
        };
    }

    let Some(caps) = BANNER_RE.as_ref().and_then(|re| re.captures(line)) else {
        return ServiceLine::Other;
    };
    let tag = caps.get(1).map_or("", |m| m.as_str());
    let rest = caps.get(2).map_or("", |m| m.as_str());

    match tag {
        "info" => ServiceLine::Event(RawEvent::new("info")),
        "download" if rest.starts_with("Destination:") => {
            ServiceLine::Event(RawEvent::new("download:destination"))
        }
        // Plain progress lines duplicate the templated JSON ones.
        "download" => ServiceLine::Other,
        _ => ServiceLine::Event(RawEvent::new(format!("extract:{}", tag.to_lowercase()))),
    }
}

/// Map a failed run onto a typed download error.
fn classify_failure(url: &str, stderr_tail: &str) -> DownloadError {
    let lowered = stderr_tail.to_lowercase();
    let reason = if stderr_tail.is_empty() {
        "yt-dlp exited with an error".to_string()
    } else {
        stderr_tail.to_string()
    };

    if lowered.contains("postprocessing") || lowered.contains("ffmpeg") || lowered.contains("ffprobe")
    {
        DownloadError::ConversionFailed {
            url: url.to_string(),
            reason,
        }
    } else {
        DownloadError::Network {
            url: url.to_string(),
            reason,
        }
    }
}

impl MediaExtractor for YtDlpExtractor {
    fn extract(
        &self,
        request: &ExtractionRequest,
        progress: &mut dyn FnMut(RawEvent),
    ) -> Result<ExtractedInfo> {
        let args = self.build_args(request);
        info!("Starting yt-dlp for {}", request.url);
        debug!("yt-dlp args: {:?}", args);

        let mut child = Command::new(self.binary())
            .args(&args)
            .env("PYTHONIOENCODING", "UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DownloadError::ToolMissing {
                path: self.binary().display().to_string(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DownloadError::InvalidOutput {
            reason: "Failed to capture stdout".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| DownloadError::InvalidOutput {
            reason: "Failed to capture stderr".to_string(),
        })?;

        // Errors go to stderr; keep the last one for the failure cause.
        let stderr_handle = std::thread::spawn(move || {
            let mut last_error: Option<String> = None;
            let mut last_line: Option<String> = None;
            for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                trace!("yt-dlp stderr: {}", trimmed);
                if trimmed.starts_with("ERROR:") {
                    last_error = Some(trimmed.to_string());
                }
                last_line = Some(trimmed.to_string());
            }
            last_error.or(last_line).unwrap_or_default()
        });

        let mut extracted: Option<ExtractedInfo> = None;
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Lost yt-dlp output stream: {}", e);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            };
            match parse_line(&line) {
                ServiceLine::Event(event) => progress(event),
                ServiceLine::Info(info) => extracted = Some(*info),
                ServiceLine::Other => trace!("yt-dlp: {}", line),
            }
        }

        let status = child.wait()?;
        let stderr_tail = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            let err = classify_failure(&request.url, &stderr_tail);
            warn!("yt-dlp failed ({}): {}", status, err);
            return Err(Error::Download(err));
        }

        extracted.ok_or_else(|| {
            Error::Download(DownloadError::InvalidOutput {
                reason: "yt-dlp finished without printing the info dict".to_string(),
            })
        })
    }
}

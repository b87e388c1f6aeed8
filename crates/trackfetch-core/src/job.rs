//! A single download → convert → tag job.
//!
//! [`DownloadJob::start`] validates the request on the caller's task and then
//! runs the whole pipeline on a tokio blocking thread. The job talks to the
//! caller only through its event channel and always ends with exactly one
//! [`JobEvent::Finished`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace};

use crate::config::{AppConfig, ensure_target_folder};
use crate::error::{Error, ErrorKind, FileSystemError, Result};
use crate::extractor::{
    AudioPreference, ExtractionRequest, MediaExtractor, RawEvent, YtDlpExtractor,
};
use crate::path::{output_path, output_template};
use crate::progress::{Phase, ProgressEvent, ProgressTranslator, Signal};
use crate::request::{DownloadRequest, JobId};
use crate::tagger::MetadataTagger;
use crate::thumbnail::{CoverFetcher, HttpCoverFetcher, select_thumbnail};

/// A track that was downloaded, converted and tagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTrack {
    /// Job that produced the track.
    pub job_id: JobId,
    /// Track title.
    pub title: String,
    /// Track subtitle.
    pub subtitle: Option<String>,
    /// Path of the tagged audio file.
    pub file_path: PathBuf,
    /// Caller-supplied track id.
    pub track_id: Option<String>,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Job that failed.
    pub job_id: JobId,
    /// Caller-supplied track id.
    pub track_id: Option<String>,
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Underlying cause, when known.
    pub cause: Option<String>,
}

impl JobFailure {
    /// Describe `error` as the failure of job `job_id`.
    #[must_use]
    pub fn from_error(job_id: JobId, track_id: Option<String>, error: &Error) -> Self {
        Self {
            job_id,
            track_id,
            kind: error.kind(),
            message: error.to_string(),
            cause: error.cause(),
        }
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The file was written and tagged.
    Completed(CompletedTrack),
    /// The job failed.
    Failed(JobFailure),
}

impl JobOutcome {
    /// Job the outcome belongs to.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Completed(track) => track.job_id,
            Self::Failed(failure) => failure.job_id,
        }
    }

    /// Whether the job succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Events sent from a running job to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// Phase entry or download percentage.
    Progress(ProgressEvent),
    /// The job is over. Sent exactly once per job.
    Finished(JobOutcome),
}

impl JobEvent {
    /// Job the event belongs to.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Progress(event) => event.job_id,
            Self::Finished(outcome) => outcome.job_id(),
        }
    }
}

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct JobDeps {
    /// Extraction service.
    pub extractor: Arc<dyn MediaExtractor>,
    /// Tag writer.
    pub tagger: MetadataTagger,
    /// Audio format requested from the service.
    pub audio: AudioPreference,
}

impl std::fmt::Debug for JobDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDeps")
            .field("audio", &self.audio)
            .finish_non_exhaustive()
    }
}

impl JobDeps {
    /// Create dependencies with the default audio preference.
    #[must_use]
    pub fn new(extractor: Arc<dyn MediaExtractor>, fetcher: Arc<dyn CoverFetcher>) -> Self {
        Self {
            extractor,
            tagger: MetadataTagger::new(fetcher),
            audio: AudioPreference::default(),
        }
    }

    /// Production dependencies: yt-dlp and an HTTP cover fetcher.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let extractor = YtDlpExtractor::with_config(config.yt_dlp.clone());
        let fetcher = HttpCoverFetcher::new().with_timeout(config.cover_fetch_timeout());
        Self::new(Arc::new(extractor), Arc::new(fetcher)).with_audio(config.audio_preference())
    }

    /// Set the audio preference.
    #[must_use]
    pub fn with_audio(mut self, audio: AudioPreference) -> Self {
        self.audio = audio;
        self
    }
}

/// Sends a job's events and guarantees a single terminal event.
struct Reporter {
    job_id: JobId,
    track_id: Option<String>,
    events: UnboundedSender<JobEvent>,
    translator: ProgressTranslator,
}

impl Reporter {
    fn send(&self, event: JobEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped for job {}", self.job_id);
        }
    }

    fn raw(&mut self, event: &RawEvent) {
        for signal in self.translator.translate(event) {
            let (phase, percentage) = match signal {
                Signal::Entered(phase) => {
                    debug!("Job {} entered {}", self.job_id, phase);
                    (phase, None)
                }
                Signal::Percentage(p) => (Phase::Downloading, Some(p)),
            };
            self.send(JobEvent::Progress(ProgressEvent {
                job_id: self.job_id,
                track_id: self.track_id.clone(),
                phase,
                percentage,
            }));
        }
    }

    fn finish(&mut self, outcome: JobOutcome) {
        let Some(phase) = self.translator.finish(outcome.is_success()) else {
            debug!("Job {} already finished", self.job_id);
            return;
        };
        debug!("Job {} entered {}", self.job_id, phase);
        self.send(JobEvent::Finished(outcome));
    }
}

/// One download → convert → tag job.
#[derive(Debug)]
pub struct DownloadJob {
    id: JobId,
    request: DownloadRequest,
    deps: JobDeps,
}

impl DownloadJob {
    /// Create a job. The request is owned by the job from here on.
    #[must_use]
    pub const fn new(id: JobId, request: DownloadRequest, deps: JobDeps) -> Self {
        Self { id, request, deps }
    }

    /// Job id.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// The job's request.
    #[must_use]
    pub const fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Validate the request and run the pipeline on a blocking thread.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the request is invalid. No event
    /// is sent and no I/O happens in that case.
    pub fn start(self, events: UnboundedSender<JobEvent>) -> Result<JoinHandle<()>> {
        self.request.validate()?;
        Ok(tokio::task::spawn_blocking(move || self.run(events)))
    }

    fn run(self, events: UnboundedSender<JobEvent>) {
        let span = info_span!("job", id = self.id, track_id = ?self.request.track_id);
        let _enter = span.enter();
        info!("Starting job for '{}' from {}", self.request.title, self.request.source_url);

        let mut reporter = Reporter {
            job_id: self.id,
            track_id: self.request.track_id.clone(),
            events,
            translator: ProgressTranslator::new(),
        };

        let result = catch_unwind(AssertUnwindSafe(|| self.pipeline(&mut reporter)))
            .unwrap_or_else(|payload| Err(Error::Internal(panic_message(payload.as_ref()))));

        let outcome = match result {
            Ok(file_path) => {
                info!("Job finished: {}", file_path.display());
                JobOutcome::Completed(CompletedTrack {
                    job_id: self.id,
                    title: self.request.title.clone(),
                    subtitle: self.request.subtitle.clone(),
                    file_path,
                    track_id: self.request.track_id.clone(),
                })
            }
            Err(e) => {
                error!("Job failed: {}", e);
                JobOutcome::Failed(JobFailure::from_error(
                    self.id,
                    self.request.track_id.clone(),
                    &e,
                ))
            }
        };
        reporter.finish(outcome);
    }

    fn pipeline(&self, reporter: &mut Reporter) -> Result<PathBuf> {
        let request = &self.request;
        ensure_target_folder(&request.target_folder)?;

        let extraction = ExtractionRequest {
            url: request.source_url.clone(),
            output_template: output_template(&request.target_folder, &request.title),
            audio: self.deps.audio.clone(),
        };
        let info = self
            .deps
            .extractor
            .extract(&extraction, &mut |event: RawEvent| reporter.raw(&event))?;

        let file_path = info
            .filepath
            .clone()
            .unwrap_or_else(|| output_path(&request.target_folder, &request.title));
        if !file_path.is_file() {
            return Err(Error::FileSystem(FileSystemError::NotFound { path: file_path }));
        }

        let cover_url = select_thumbnail(&info.thumbnails, info.thumbnail.as_deref());
        debug!("Selected cover: {:?}", cover_url);

        self.deps
            .tagger
            .write(&file_path, request, &info, cover_url.as_deref())?;
        Ok(file_path)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "job worker panicked".to_string(),
            |msg| format!("job worker panicked: {msg}"),
        )
}

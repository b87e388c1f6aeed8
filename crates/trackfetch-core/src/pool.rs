//! Bounded worker pool.
//!
//! Submitted jobs wait in a FIFO queue. A dispatcher task starts them one by
//! one, holding a semaphore permit per running job, so at most
//! `max_concurrent_jobs` pipelines run at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::job::{DownloadJob, JobDeps, JobEvent, JobFailure, JobOutcome};
use crate::request::{DownloadRequest, JobId};

/// Default maximum concurrent jobs.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

/// Minimum allowed concurrent jobs.
pub const MIN_CONCURRENT_JOBS: usize = 1;

/// Maximum allowed concurrent jobs.
pub const MAX_CONCURRENT_JOBS: usize = 8;

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of jobs running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,
}

const fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

impl PoolConfig {
    /// Create a config with the given limit, clamped to the allowed range.
    #[must_use]
    pub fn with_max_concurrent(max_concurrent_jobs: usize) -> Self {
        let mut config = Self { max_concurrent_jobs };
        config.validate();
        config
    }

    /// Validate and clamp the `max_concurrent_jobs` value.
    pub fn validate(&mut self) {
        self.max_concurrent_jobs = self
            .max_concurrent_jobs
            .clamp(MIN_CONCURRENT_JOBS, MAX_CONCURRENT_JOBS);
    }
}

/// Runs download jobs with bounded concurrency.
pub struct DownloadPool {
    config: PoolConfig,
    deps: JobDeps,
    next_id: AtomicU64,
    queue_tx: mpsc::UnboundedSender<DownloadJob>,
    dispatcher: JoinHandle<()>,
}

impl DownloadPool {
    /// Create a pool and the receiver for every job's events.
    ///
    /// Must be called from within a tokio runtime. The receiver yields
    /// `None` once the pool has been shut down and every job has finished.
    #[must_use]
    pub fn new(mut config: PoolConfig, deps: JobDeps) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        config.validate();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch(config.max_concurrent_jobs, queue_rx, event_tx));
        info!(
            "Download pool started with {} worker(s)",
            config.max_concurrent_jobs
        );

        let pool = Self {
            config,
            deps,
            next_id: AtomicU64::new(1),
            queue_tx,
            dispatcher,
        };
        (pool, event_rx)
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Queue a request and return its job id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the request is invalid; nothing is
    /// queued in that case.
    pub fn submit(&self, request: DownloadRequest) -> Result<JobId> {
        request.validate()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("Queued job {} for '{}'", id, request.title);

        self.queue_tx
            .send(DownloadJob::new(id, request, self.deps.clone()))
            .map_err(|_| Error::Internal("download pool is not running".to_string()))?;
        Ok(id)
    }

    /// Stop accepting jobs and wait until every queued job has finished.
    pub async fn shutdown(self) {
        let Self {
            queue_tx,
            dispatcher,
            ..
        } = self;
        drop(queue_tx);

        if let Err(e) = dispatcher.await {
            warn!("Pool dispatcher ended abnormally: {}", e);
        }
        info!("Download pool shut down");
    }
}

impl std::fmt::Debug for DownloadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn dispatch(
    max_concurrent: usize,
    mut queue_rx: mpsc::UnboundedReceiver<DownloadJob>,
    events: mpsc::UnboundedSender<JobEvent>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    while let Some(job) = queue_rx.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };

        let id = job.id();
        let track_id = job.request().track_id.clone();
        debug!("Dispatching job {}", id);

        match job.start(events.clone()) {
            Ok(handle) => {
                tokio::spawn(async move {
                    if let Err(e) = handle.await {
                        warn!("Job {} worker did not complete: {}", id, e);
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                let failure = JobFailure::from_error(id, track_id, &e);
                if events
                    .send(JobEvent::Finished(JobOutcome::Failed(failure)))
                    .is_err()
                {
                    debug!("Event receiver dropped");
                }
            }
        }
    }

    // Wait for every running job before letting the event channel close.
    let permits = u32::try_from(max_concurrent).unwrap_or(u32::MAX);
    if semaphore.acquire_many(permits).await.is_err() {
        warn!("Pool semaphore closed while draining");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::extractor::{ExtractedInfo, ExtractionRequest, MediaExtractor, RawEvent};
    use crate::thumbnail::MockCoverFetcher;

    struct RejectingExtractor;

    impl MediaExtractor for RejectingExtractor {
        fn extract(
            &self,
            _request: &ExtractionRequest,
            _progress: &mut dyn FnMut(RawEvent),
        ) -> Result<ExtractedInfo> {
            Err(Error::network_error("offline"))
        }
    }

    fn deps() -> JobDeps {
        let mut fetcher = MockCoverFetcher::new();
        fetcher.expect_fetch().never();
        JobDeps::new(Arc::new(RejectingExtractor), Arc::new(fetcher))
    }

    #[test]
    fn test_config_default() {
        assert_eq!(PoolConfig::default().max_concurrent_jobs, 2);
    }

    #[test]
    fn test_config_clamp() {
        assert_eq!(PoolConfig::with_max_concurrent(0).max_concurrent_jobs, 1);
        assert_eq!(PoolConfig::with_max_concurrent(100).max_concurrent_jobs, 8);
        assert_eq!(PoolConfig::with_max_concurrent(3).max_concurrent_jobs, 3);
    }

    #[tokio::test]
    async fn test_invalid_submit_is_rejected() {
        let (pool, _rx) = DownloadPool::new(PoolConfig::default(), deps());
        let err = pool.submit(DownloadRequest::new(" ", "u")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_queued_jobs_run_after_shutdown() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let (pool, mut rx) = DownloadPool::new(PoolConfig::with_max_concurrent(1), deps());

        let ids: Vec<JobId> = (0..3)
            .map(|i| {
                pool.submit(
                    DownloadRequest::new(format!("Song {i}"), "https://example.com/v")
                        .with_target_folder(dir.path()),
                )
                .expect("submit")
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        pool.shutdown().await;

        let mut finished = Vec::new();
        while let Some(event) = rx.recv().await {
            if let JobEvent::Finished(outcome) = event {
                finished.push(outcome.job_id());
            }
        }
        assert_eq!(finished, ids);
    }
}

//! Caller-side bookkeeping of in-flight jobs.
//!
//! The registry is owned by the task that drains the pool's event receiver
//! and is mutated only there; it needs no locking.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::job::{JobEvent, JobOutcome};
use crate::progress::Phase;
use crate::request::{DownloadRequest, JobId};

/// Last known state of an in-flight job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEntry {
    /// The submitted request.
    pub request: DownloadRequest,
    /// Last phase entered, if any.
    pub phase: Option<Phase>,
    /// Last download percentage seen in the current phase.
    pub percentage: Option<f64>,
}

/// In-flight jobs keyed by id.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, JobEntry>,
}

impl JobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly submitted job.
    pub fn register(&mut self, job_id: JobId, request: DownloadRequest) {
        debug!("Registering job {} ('{}')", job_id, request.title);
        self.jobs.insert(
            job_id,
            JobEntry {
                request,
                phase: None,
                percentage: None,
            },
        );
    }

    /// Apply one event.
    ///
    /// Returns the outcome when the event finishes a job; the job is removed
    /// from the registry at that point.
    pub fn apply(&mut self, event: &JobEvent) -> Option<JobOutcome> {
        match event {
            JobEvent::Progress(progress) => {
                let Some(entry) = self.jobs.get_mut(&progress.job_id) else {
                    trace!("Progress for unknown job {}", progress.job_id);
                    return None;
                };
                if progress.is_phase_entry() {
                    entry.phase = Some(progress.phase);
                    entry.percentage = None;
                } else {
                    entry.percentage = progress.percentage;
                }
                None
            }
            JobEvent::Finished(outcome) => {
                if self.jobs.remove(&outcome.job_id()).is_none() {
                    debug!("Finished event for unregistered job {}", outcome.job_id());
                }
                Some(outcome.clone())
            }
        }
    }

    /// Look up an in-flight job.
    #[must_use]
    pub fn get(&self, job_id: JobId) -> Option<&JobEntry> {
        self.jobs.get(&job_id)
    }

    /// Number of in-flight jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

//! Translation of raw service events into canonical progress phases.
//!
//! The extraction service reports many differently-labeled, overlapping
//! events. [`ProgressTranslator`] classifies each one through
//! [`RAW_LABEL_TABLE`] and drives a forward-only [`TranslatorState`], so the
//! caller sees each of loading, downloading and converting at most once, in
//! that order, plus repeated download percentages.
//!
//! The service's own "fully finished" event is ignored on purpose: tagging
//! still has to run afterwards, so only the job emits the terminal phase via
//! [`ProgressTranslator::finish`].

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::extractor::RawEvent;
use crate::request::JobId;

/// Canonical caller-facing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Metadata extraction is underway.
    Loading,
    /// Media is being transferred.
    Downloading,
    /// Audio conversion is underway.
    Converting,
    /// File converted and tagged.
    Done,
    /// The job failed.
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Downloading => write!(f, "downloading"),
            Self::Converting => write!(f, "converting"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Progress notification for one job.
///
/// `percentage` is `None` when the event marks entry into `phase`, and
/// `Some(0.0..=100.0)` for a download percentage update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job the event belongs to.
    pub job_id: JobId,
    /// Caller-supplied track id.
    pub track_id: Option<String>,
    /// Current phase.
    pub phase: Phase,
    /// Download percentage, only during `downloading`.
    pub percentage: Option<f64>,
}

impl ProgressEvent {
    /// Whether this event marks entry into a new phase.
    #[must_use]
    pub const fn is_phase_entry(&self) -> bool {
        self.percentage.is_none()
    }
}

/// What a raw label means for the canonical sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawClass {
    /// Metadata extraction before any transfer.
    PreExtraction,
    /// Active transfer with byte counts.
    Transfer,
    /// The primary transfer finished; conversion follows.
    TransferFinished,
    /// A post-processor started.
    PostProcessStarted,
    /// Carries nothing the caller needs.
    Ignored,
}

/// Raw label → class lookup. A trailing `*` matches any suffix.
pub const RAW_LABEL_TABLE: &[(&str, RawClass)] = &[
    ("extract:*", RawClass::PreExtraction),
    ("info", RawClass::PreExtraction),
    ("download:destination", RawClass::PreExtraction),
    ("download:downloading", RawClass::Transfer),
    ("download:finished", RawClass::TransferFinished),
    ("download:error", RawClass::Ignored),
    ("postprocess:started", RawClass::PostProcessStarted),
    ("postprocess:processing", RawClass::Ignored),
    ("postprocess:finished", RawClass::Ignored),
];

/// Look up the class of a raw label. Unknown labels are ignored.
#[must_use]
pub fn classify(label: &str) -> RawClass {
    RAW_LABEL_TABLE
        .iter()
        .find(|(pattern, _)| match pattern.strip_suffix('*') {
            Some(prefix) => label.starts_with(prefix),
            None => label == *pattern,
        })
        .map_or(RawClass::Ignored, |(_, class)| *class)
}

/// State of the translator. Variants are ordered; transitions only move
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TranslatorState {
    /// Nothing seen yet.
    #[default]
    Idle,
    /// Loading has been emitted.
    Processing,
    /// Downloading has been emitted.
    Downloading,
    /// Converting has been emitted.
    Converting,
    /// The job finished; nothing more is emitted.
    Terminal,
}

impl TranslatorState {
    const fn entry_phase(self) -> Option<Phase> {
        match self {
            Self::Processing => Some(Phase::Loading),
            Self::Downloading => Some(Phase::Downloading),
            Self::Converting => Some(Phase::Converting),
            Self::Idle | Self::Terminal => None,
        }
    }
}

/// Output of translating one raw event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// A new phase was entered.
    Entered(Phase),
    /// Download percentage update (0-100).
    Percentage(f64),
}

/// Stateful raw-event → canonical-phase translator for one job.
#[derive(Debug, Default)]
pub struct ProgressTranslator {
    state: TranslatorState,
}

impl ProgressTranslator {
    /// Create a translator in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TranslatorState {
        self.state
    }

    /// The only non-terminal transition. Moves to `target` if that is
    /// strictly ahead of the current state and returns the phase entered.
    fn advance(&mut self, target: TranslatorState) -> Option<Phase> {
        if target == TranslatorState::Terminal || target <= self.state {
            return None;
        }
        debug!("Progress state {:?} -> {:?}", self.state, target);
        self.state = target;
        target.entry_phase()
    }

    /// Translate one raw event into zero or more signals.
    pub fn translate(&mut self, event: &RawEvent) -> Vec<Signal> {
        let class = classify(&event.label);
        trace!("Raw event '{}' classified as {:?}", event.label, class);

        let mut signals = Vec::with_capacity(2);
        match class {
            RawClass::PreExtraction => {
                signals.extend(self.advance(TranslatorState::Processing).map(Signal::Entered));
            }
            RawClass::Transfer => {
                signals.extend(self.advance(TranslatorState::Downloading).map(Signal::Entered));
                if self.state == TranslatorState::Downloading
                    && let Some(percentage) = percentage_of(event)
                {
                    signals.push(Signal::Percentage(percentage));
                }
            }
            RawClass::TransferFinished | RawClass::PostProcessStarted => {
                signals.extend(self.advance(TranslatorState::Converting).map(Signal::Entered));
            }
            RawClass::Ignored => {}
        }
        signals
    }

    /// Enter the terminal state, returning `Done` or `Error`.
    ///
    /// Returns `None` if the translator was already terminal.
    pub fn finish(&mut self, success: bool) -> Option<Phase> {
        if self.state == TranslatorState::Terminal {
            return None;
        }
        debug!("Progress state {:?} -> Terminal", self.state);
        self.state = TranslatorState::Terminal;
        Some(if success { Phase::Done } else { Phase::Error })
    }
}

/// Download percentage of a transfer event.
///
/// Prefers the service's ready-made value, else `downloaded / total`, using
/// the size estimate when the exact total is unknown.
fn percentage_of(event: &RawEvent) -> Option<f64> {
    let percentage = event.percent.or_else(|| {
        let downloaded = event.downloaded_bytes?;
        let total = event
            .total_bytes
            .or(event.total_bytes_estimate)
            .filter(|t| *t > 0)?;
        Some(downloaded as f64 / total as f64 * 100.0)
    })?;

    percentage.is_finite().then(|| percentage.clamp(0.0, 100.0))
}

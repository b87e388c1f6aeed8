//! Structured logging for the command-line caller.
//!
//! Console output is human-readable and filtered by `RUST_LOG` (or the
//! `--verbose` flag); a JSON log file is written alongside it and rotated
//! by the rolling appender.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const LOG_TARGETS: [&str; 2] = ["trackfetch", "trackfetch_core"];

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where log files are stored.
    pub log_directory: PathBuf,
    /// Log file name prefix ("trackfetch" -> "trackfetch.2026-01-15").
    pub log_file_prefix: String,
    /// Maximum level of our crates on the console.
    pub console_level: Level,
    /// Maximum level of our crates in the log file.
    pub file_level: Level,
    /// How often to rotate log files.
    pub rotation: LogRotation,
    /// Whether to include file/line info on the console.
    pub include_file_line: bool,
    /// Whether to log job span open/close.
    pub log_span_events: bool,
}

/// Log rotation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// New file every hour.
    Hourly,
    /// New file every day.
    Daily,
    /// Single log file.
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "trackfetch".to_string(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            rotation: LogRotation::Daily,
            include_file_line: false,
            log_span_events: false,
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration used with `--verbose`.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            console_level: Level::DEBUG,
            file_level: Level::TRACE,
            include_file_line: true,
            log_span_events: true,
            ..Self::default()
        }
    }

    /// Set the log directory.
    #[must_use]
    pub fn with_log_directory(mut self, path: PathBuf) -> Self {
        self.log_directory = path;
        self
    }

    /// Set the log rotation frequency.
    #[must_use]
    pub const fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Keeps file logging alive. Dropping it flushes the log file.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Filter with `base` for everything and `level` for our own crates.
fn crate_filter(base: &str, level: Level) -> Result<EnvFilter, LoggingError> {
    LOG_TARGETS
        .iter()
        .try_fold(EnvFilter::new(base), |filter, target| {
            let directive: Directive = format!("{target}={}", level_to_directive(level))
                .parse()
                .map_err(|e: tracing_subscriber::filter::ParseError| {
                    LoggingError::InvalidDirective(e.to_string())
                })?;
            Ok(filter.add_directive(directive))
        })
}

/// Install the console and file layers.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a subscriber
/// is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    if !config.log_directory.exists() {
        std::fs::create_dir_all(&config.log_directory).map_err(|e| {
            LoggingError::DirectoryCreationFailed {
                path: config.log_directory.clone(),
                reason: e.to_string(),
            }
        })?;
    }

    let file_appender = RollingFileAppender::new(
        config.rotation.into(),
        &config.log_directory,
        &config.log_file_prefix,
    );
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => crate_filter("warn", config.console_level)?,
    };
    let file_filter = crate_filter("info", config.file_level)?;

    let span_events = if config.log_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events.clone())
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .json()
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trackfetch")
        .join("logs")
}

const fn level_to_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// The path that could not be created.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// A filter directive did not parse.
    #[error("Invalid log filter directive: {0}")]
    InvalidDirective(String),

    /// A global subscriber is already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

//! Command-line arguments and request loading.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use trackfetch_core::{AppConfig, DownloadRequest, PoolConfig};

/// Download tracks, convert them to MP3 and tag them.
#[derive(Debug, Parser)]
#[command(name = "trackfetch", version, about)]
pub struct Cli {
    /// What to download.
    #[command(subcommand)]
    pub command: Command,

    /// Maximum number of jobs running at once (1-8).
    #[arg(long, short = 'j', global = true, env = "TRACKFETCH_JOBS")]
    pub jobs: Option<usize>,

    /// Path to the yt-dlp executable.
    #[arg(long = "yt-dlp", global = true, value_name = "PATH", env = "TRACKFETCH_YT_DLP")]
    pub yt_dlp: Option<PathBuf>,

    /// Config file to use instead of the per-user one.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug-level console output.
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download a single track.
    Get {
        /// Source media URL.
        url: String,
        /// Track title; also names the output file.
        #[arg(long)]
        title: String,
        /// Track subtitle.
        #[arg(long)]
        subtitle: Option<String>,
        /// Caller-side track id echoed in progress output.
        #[arg(long = "track-id")]
        track_id: Option<String>,
        /// Output folder (defaults to the configured target folder).
        #[arg(long, value_name = "DIR")]
        folder: Option<PathBuf>,
    },
    /// Download every track listed in a JSON file.
    Batch {
        /// JSON array of `{title, url, subtitle?, track_id?, target_folder?}`.
        #[arg(value_name = "FILE.json")]
        file: PathBuf,
    },
}

/// One entry of a batch file.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    title: String,
    #[serde(alias = "source_url")]
    url: String,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    track_id: Option<String>,
    #[serde(default, alias = "folder")]
    target_folder: Option<PathBuf>,
}

impl BatchEntry {
    fn into_request(self, default_folder: &Path) -> DownloadRequest {
        let mut request = DownloadRequest::new(self.title, self.url)
            .with_target_folder(self.target_folder.unwrap_or_else(|| default_folder.to_path_buf()));
        request.subtitle = self.subtitle;
        request.track_id = self.track_id;
        request
    }
}

/// Errors surfaced by the command-line caller.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Pipeline error.
    #[error(transparent)]
    Core(#[from] trackfetch_core::Error),

    /// The batch file could not be used.
    #[error("Invalid batch file {path}: {reason}")]
    Batch {
        /// Batch file path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The async runtime could not be built.
    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl Cli {
    /// Load the configuration and apply command-line overrides.
    pub fn load_config(&self) -> Result<AppConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load()?,
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(jobs) = self.jobs {
            config.pool = PoolConfig::with_max_concurrent(jobs);
        }
        if let Some(path) = &self.yt_dlp {
            config.yt_dlp.binary.clone_from(path);
        }
    }
}

impl Command {
    /// The requests this command asks for.
    pub fn requests(&self, config: &AppConfig) -> Result<Vec<DownloadRequest>, CliError> {
        match self {
            Self::Get {
                url,
                title,
                subtitle,
                track_id,
                folder,
            } => {
                let mut request = DownloadRequest::new(title.clone(), url.clone())
                    .with_target_folder(folder.clone().unwrap_or_else(|| config.target_folder.clone()));
                request.subtitle.clone_from(subtitle);
                request.track_id.clone_from(track_id);
                Ok(vec![request])
            }
            Self::Batch { file } => load_batch(file, &config.target_folder),
        }
    }
}

/// Read a batch file.
fn load_batch(path: &Path, default_folder: &Path) -> Result<Vec<DownloadRequest>, CliError> {
    let batch_error = |reason: String| CliError::Batch {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| batch_error(e.to_string()))?;
    let entries: Vec<BatchEntry> =
        serde_json::from_str(&content).map_err(|e| batch_error(e.to_string()))?;
    if entries.is_empty() {
        return Err(batch_error("no tracks listed".to_string()));
    }

    Ok(entries
        .into_iter()
        .map(|entry| entry.into_request(default_folder))
        .collect())
}

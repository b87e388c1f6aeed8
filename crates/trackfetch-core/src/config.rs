//! Application configuration management.
//!
//! Handles loading, saving, and managing pipeline settings: where tracks are
//! written, which audio format is requested from the extraction service,
//! how many jobs run at once, and how cover art is fetched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};
use crate::extractor::{AudioPreference, YtDlpConfig};
use crate::path::AUDIO_EXTENSION;
use crate::pool::PoolConfig;
use crate::thumbnail::DEFAULT_FETCH_TIMEOUT_SECS;

/// Audio quality requested from the extraction service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadQuality {
    /// Low quality (128 kbps).
    Low,
    /// Medium quality (192 kbps).
    #[default]
    Medium,
    /// High quality (320 kbps or best available).
    High,
}

impl DownloadQuality {
    /// Quality argument understood by the extraction service.
    #[must_use]
    pub const fn as_service_arg(self) -> &'static str {
        match self {
            Self::Low => "128K",
            Self::Medium => "192K",
            Self::High => "320K",
        }
    }
}

impl std::fmt::Display for DownloadQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low (128 kbps)"),
            Self::Medium => write!(f, "Medium (192 kbps)"),
            Self::High => write!(f, "High (320 kbps)"),
        }
    }
}

const fn default_cover_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_audio_format() -> String {
    AUDIO_EXTENSION.to_string()
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Folder new tracks are written to.
    #[serde(default = "default_target_folder")]
    pub target_folder: PathBuf,
    /// Audio format requested from the extraction service.
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    /// Audio quality requested from the extraction service.
    #[serde(default)]
    pub audio_quality: DownloadQuality,
    /// yt-dlp settings.
    #[serde(default)]
    pub yt_dlp: YtDlpConfig,
    /// Timeout for cover art fetches, in seconds.
    #[serde(default = "default_cover_timeout")]
    pub cover_fetch_timeout_secs: u64,
    /// Worker pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_folder: default_target_folder(),
            audio_format: default_audio_format(),
            audio_quality: DownloadQuality::default(),
            yt_dlp: YtDlpConfig::default(),
            cover_fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            pool: PoolConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, or create it with
    /// defaults if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        if !config_path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(&config_path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: config_path.to_path_buf(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", config_path.display());
        debug!("Target folder: {}", config.target_folder.display());

        Ok(config)
    }

    /// Clamp the pool settings and check the audio format.
    ///
    /// Tags are written as ID3v2, so only MP3 output is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for any audio format other than `mp3`.
    pub fn validate(&mut self) -> Result<()> {
        self.pool.validate();
        if !self.audio_format.eq_ignore_ascii_case(AUDIO_EXTENSION) {
            return Err(Error::Configuration(format!(
                "Unsupported audio format '{}': only {} can be tagged",
                self.audio_format, AUDIO_EXTENSION
            )));
        }
        self.audio_format = AUDIO_EXTENSION.to_string();
        Ok(())
    }

    /// Save configuration to an explicit file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: format!("Failed to create config directory: {e}"),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: config_path.to_path_buf(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", config_path.display());
        Ok(())
    }

    /// Audio preference handed to the extraction service.
    #[must_use]
    pub fn audio_preference(&self) -> AudioPreference {
        AudioPreference {
            format: self.audio_format.clone(),
            quality: self.audio_quality.as_service_arg().to_string(),
        }
    }

    /// Cover fetch timeout.
    #[must_use]
    pub const fn cover_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.cover_fetch_timeout_secs)
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// The per-user music folder, falling back to `~/Music`.
#[must_use]
pub fn default_target_folder() -> PathBuf {
    dirs::audio_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Music")
    })
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("trackfetch")
        .join("config.json")
}

/// Make sure a job's target folder exists and is a directory.
///
/// # Errors
///
/// Returns an error if the path is not a directory or cannot be created.
pub fn ensure_target_folder(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "Target path exists but is not a directory: {}",
                path.display()
            )));
        }
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|e| {
        Error::FileSystem(FileSystemError::CreateDirFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

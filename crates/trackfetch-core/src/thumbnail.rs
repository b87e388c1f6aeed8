//! Cover art selection and fetching.
//!
//! This module provides functionality to:
//! - Pick the best jpg cover among the thumbnails the service reports
//! - Fetch cover bytes over HTTP for embedding
//!
//! Fetching sits behind the [`CoverFetcher`] trait so tagging can be tested
//! without a network.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default timeout for cover fetch requests.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// One thumbnail candidate as reported by the extraction service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailDescriptor {
    /// Image URL.
    pub url: String,
    /// Service-specific format label, if any.
    #[serde(default)]
    pub format: Option<String>,
    /// Quality preference; higher is better.
    #[serde(default)]
    pub preference: Option<i64>,
}

/// Cover image bytes with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
}

/// Strip query and fragment, returning the lowercase URL path.
fn url_path(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_ascii_lowercase()
}

fn has_jpg_extension(url: &str) -> bool {
    let path = url_path(url);
    path.ends_with(".jpg") || path.ends_with(".jpeg")
}

/// Pick the cover URL to embed.
///
/// Returns the highest-preference candidate whose URL has a jpg extension.
/// Missing preferences rank lowest and ties keep the earlier entry. When no
/// candidate qualifies, the service's default thumbnail is used.
#[must_use]
pub fn select_thumbnail(
    candidates: &[ThumbnailDescriptor],
    fallback: Option<&str>,
) -> Option<String> {
    let mut best: Option<&ThumbnailDescriptor> = None;

    for candidate in candidates.iter().filter(|c| has_jpg_extension(&c.url)) {
        let rank = candidate.preference.unwrap_or(i64::MIN);
        match best {
            Some(current) if current.preference.unwrap_or(i64::MIN) >= rank => {}
            _ => best = Some(candidate),
        }
    }

    best.map(|c| c.url.clone())
        .or_else(|| fallback.map(String::from))
}

/// Guess the MIME type of an image from its URL.
#[must_use]
pub fn mime_type_for(url: &str) -> &'static str {
    let path = url_path(url);
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Fetches cover images for embedding.
#[cfg_attr(test, mockall::automock)]
pub trait CoverFetcher: Send + Sync {
    /// Fetch the image at `url`.
    ///
    /// # Errors
    ///
    /// Returns a network error if the fetch fails or the body is empty.
    fn fetch(&self, url: &str) -> Result<CoverArt>;
}

/// Blocking HTTP cover fetcher.
pub struct HttpCoverFetcher {
    timeout: Duration,
}

impl HttpCoverFetcher {
    /// Create a fetcher with the default timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    /// Set the fetch timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpCoverFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverFetcher for HttpCoverFetcher {
    fn fetch(&self, url: &str) -> Result<CoverArt> {
        debug!("Fetching cover art from {}", url);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::network_error(format!("Failed to create HTTP client: {e}")))?;

        let response = client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| Error::network_error(format!("Failed to fetch cover: {e}")))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_default();

        let mime_type = if content_type.starts_with("image/") {
            content_type
        } else {
            warn!("Unexpected content type for cover: {}", content_type);
            mime_type_for(url).to_string()
        };

        let data = response
            .bytes()
            .map_err(|e| Error::network_error(format!("Failed to read cover data: {e}")))?;

        if data.is_empty() {
            return Err(Error::network_error("Empty cover data"));
        }

        Ok(CoverArt {
            data: data.to_vec(),
            mime_type,
        })
    }
}

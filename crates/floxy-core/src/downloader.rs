//! Contracts for the external collaborators the cache service drives.
//!
//! The service never downloads or transcodes anything itself. It hands a
//! [`DownloadRequest`] to a [`MediaDownloader`], then asks a
//! [`MetadataParser`] to describe the result. Any error from either is
//! treated uniformly as a processing failure.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::profile::EncodeParams;

/// Progress callback for download operations.
pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Transient download progress snapshot. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    /// Completion percentage (0.0 - 100.0).
    pub percent: f64,
    /// Bytes downloaded so far, when known.
    pub downloaded_bytes: Option<u64>,
    /// Total size in bytes, when known.
    pub total_bytes: Option<u64>,
    /// Current speed in bytes per second.
    pub speed_bps: Option<f64>,
    /// Estimated seconds remaining.
    pub eta_secs: Option<u64>,
}

/// Everything the downloader needs to produce one cached file.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Output path template; `%(ext)s` is replaced with the final extension.
    pub output_template: PathBuf,
    /// Encode parameters from the resolved profile.
    pub encode: EncodeParams,
    /// Optional cookies file forwarded to the tool.
    pub cookies_path: Option<PathBuf>,
    /// Extra arguments appended verbatim.
    pub extra_args: Vec<String>,
}

impl DownloadRequest {
    /// The path the downloader is expected to produce.
    pub fn expected_output(&self) -> PathBuf {
        PathBuf::from(
            self.output_template
                .to_string_lossy()
                .replace("%(ext)s", &self.encode.extension),
        )
    }
}

/// Structured description of a downloaded item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// Track or video title.
    pub title: String,
    /// Performing artist.
    pub artist: Option<String>,
    /// Album name.
    pub album: Option<String>,
    /// Album artists.
    pub album_artist: Option<Vec<String>>,
    /// Release year.
    pub year: Option<i32>,
    /// Genre tags.
    #[serde(default)]
    pub genre: Vec<String>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Canonical page URL reported by the source.
    pub url: Option<String>,
}

/// External downloader/transcoder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download `url` according to `request`, reporting progress along the way.
    ///
    /// Returns the tool's raw log output.
    async fn download(
        &self,
        url: &str,
        request: DownloadRequest,
        on_progress: ProgressCallback,
    ) -> Result<String>;
}

/// Produces [`MediaMetadata`] for a source URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataParser: Send + Sync {
    /// Describe the media behind `url`.
    async fn parse_url(&self, url: &str) -> Result<MediaMetadata>;
}

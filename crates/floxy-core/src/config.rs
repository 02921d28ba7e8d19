//! Application configuration management.
//!
//! Settings live in a JSON file under the platform config directory
//! (`<config_dir>/floxy/config.json`), or wherever `FLOXY_CONFIG` points.
//! A missing file is created with defaults on first load.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "FLOXY_CONFIG";

/// Default maximum number of concurrent processing jobs.
pub const DEFAULT_MAX_CONCURRENT_PROCESSES: usize = 2;

/// Minimum allowed concurrent processing jobs.
pub const MIN_CONCURRENT_PROCESSES: usize = 1;

/// Maximum allowed concurrent processing jobs.
pub const MAX_CONCURRENT_PROCESSES: usize = 8;

/// Largest accepted TTL. `live_at + ttl * 1000` must stay within an SQLite
/// integer.
pub const MAX_TTL_SECS: u64 = i64::MAX as u64 / 2000;

/// Secret used in tombstone filenames when none is configured.
pub const DEFAULT_TOMBSTONE_SECRET: &str = "supersecretkey";

/// Scheduler and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Maximum number of entries in DOWNLOADING or METADATA at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_processes: usize,
    /// Scheduler tick period in milliseconds.
    #[serde(default = "default_queue_interval_ms")]
    pub queue_interval_ms: u64,
    /// Minimum seconds between two expiry sweeps.
    #[serde(default = "default_expiry_check_interval_secs")]
    pub expiry_check_interval_secs: u64,
    /// TTL applied when an enqueue request carries none.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Upper bound on one downloader call. `None` waits indefinitely.
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
}

const fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_PROCESSES
}

const fn default_queue_interval_ms() -> u64 {
    1000
}

const fn default_expiry_check_interval_secs() -> u64 {
    60
}

const fn default_ttl_secs() -> u64 {
    3600
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processes: DEFAULT_MAX_CONCURRENT_PROCESSES,
            queue_interval_ms: default_queue_interval_ms(),
            expiry_check_interval_secs: default_expiry_check_interval_secs(),
            default_ttl_secs: default_ttl_secs(),
            download_timeout_secs: None,
        }
    }
}

impl ServiceConfig {
    /// Clamp values into their accepted ranges.
    pub fn validate(&mut self) {
        self.max_concurrent_processes = self
            .max_concurrent_processes
            .clamp(MIN_CONCURRENT_PROCESSES, MAX_CONCURRENT_PROCESSES);
        self.queue_interval_ms = self.queue_interval_ms.max(1);
        self.default_ttl_secs = self.default_ttl_secs.min(MAX_TTL_SECS);
        if self.download_timeout_secs == Some(0) {
            self.download_timeout_secs = None;
        }
    }

    /// Minimum gap between expiry sweeps.
    pub const fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_check_interval_secs)
    }

    /// Downloader timeout, if any.
    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }
}

/// External tool locations and pass-through options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct YtDlpConfig {
    /// yt-dlp executable; looked up on `PATH` when unset.
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    /// ffmpeg executable or directory handed to `--ffmpeg-location`.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    /// Netscape cookies file forwarded to every download.
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,
    /// Extra arguments appended to every download.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Root folder holding one directory per cache entry.
    #[serde(default = "default_cache_folder")]
    pub cache_folder: PathBuf,
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Secret embedded in tombstoned filenames.
    #[serde(default = "default_tombstone_secret")]
    pub tombstone_secret: String,
    /// Public base URLs prefixed to completed entries' files.
    #[serde(default)]
    pub external_cache_endpoints: Vec<String>,
    /// Downloader settings.
    #[serde(default)]
    pub ytdlp: YtDlpConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub service: ServiceConfig,
}

fn default_tombstone_secret() -> String {
    DEFAULT_TOMBSTONE_SECRET.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_folder: default_cache_folder(),
            database_path: default_database_path(),
            tombstone_secret: default_tombstone_secret(),
            external_cache_endpoints: Vec::new(),
            ytdlp: YtDlpConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, creating it with defaults if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the loaded values are invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        debug!("Cache folder: {}", config.cache_folder.display());

        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
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
        fs::write(path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp service settings and reject unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an empty tombstone secret or one
    /// containing a path separator.
    pub fn validate(&mut self) -> Result<()> {
        self.service.validate();

        if self.tombstone_secret.is_empty() {
            return Err(Error::Configuration(
                "Tombstone secret must not be empty".to_string(),
            ));
        }
        if self.tombstone_secret.contains(['/', '\\']) {
            return Err(Error::Configuration(
                "Tombstone secret must not contain path separators".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("floxy")
}

/// Default cache root.
#[must_use]
pub fn default_cache_folder() -> PathBuf {
    data_dir().join("cache")
}

/// Default database file.
#[must_use]
pub fn default_database_path() -> PathBuf {
    data_dir().join("floxy.sqlite")
}

fn config_file_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("floxy")
        .join("config.json")
}

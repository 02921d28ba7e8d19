//! Cache entries: one per distinct source URL.
//!
//! An entry owns its on-disk path conventions:
//!
//! ```text
//! <cache root>/<id>/output.<ext>                    canonical file
//! <cache root>/<id>/output_deleted_<secret>.<ext>   tombstoned file
//! <cache root>/<id>/log.txt                         raw downloader output
//! ```
//!
//! State changes are never persisted implicitly. Every mutation that touches
//! a durable field must be followed by [`CacheEntry::write_to_store`].

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::downloader::{DownloadProgress, MediaMetadata};
use crate::error::{Error, FileSystemError, Result};
use crate::profile::{EncodeParams, ReencodeOptions};
use crate::store::{EntryFields, EntryRecord, EntryStore};

/// Name of the per-entry downloader log.
pub const LOG_FILE_NAME: &str = "log.txt";

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Processing status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Waiting for a scheduler slot.
    Pending,
    /// The external downloader is running.
    Downloading,
    /// Download finished; metadata is being extracted.
    Metadata,
    /// The cached file is ready.
    Completed,
    /// The last processing run failed.
    Failed,
    /// A persisted status this build does not recognise.
    Unknown,
}

impl EntryStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Downloading,
        Self::Metadata,
        Self::Completed,
        Self::Failed,
        Self::Unknown,
    ];

    /// Stored representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Metadata => "metadata",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Decode a stored status; unrecognised values map to [`Self::Unknown`].
    pub fn from_stored(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "downloading" => Self::Downloading,
            "metadata" => Self::Metadata,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// A job currently owns the entry.
    pub const fn is_processing(self) -> bool {
        matches!(self, Self::Downloading | Self::Metadata)
    }

    /// No job will touch the entry until it is reset to pending.
    pub const fn is_done_processing(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Unknown)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root folder and tombstone secret shared by all entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
    secret: String,
}

impl CacheLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            secret: secret.into(),
        }
    }

    /// Directory holding one entry's files.
    pub fn entry_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Canonical file path.
    pub fn cached_path(&self, id: &str, extension: &str) -> PathBuf {
        self.entry_dir(id).join(format!("output.{extension}"))
    }

    /// Tombstoned file path.
    pub fn deleted_path(&self, id: &str, extension: &str) -> PathBuf {
        self.entry_dir(id)
            .join(format!("output_deleted_{}.{extension}", self.secret))
    }

    /// Downloader log path.
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.entry_dir(id).join(LOG_FILE_NAME)
    }

    /// Template handed to the downloader.
    pub fn output_template(&self, id: &str) -> PathBuf {
        self.entry_dir(id).join("output.%(ext)s")
    }
}

/// Which of an entry's files exist on disk.
///
/// `AVAILABLE` and `DELETED` can both be set after an interrupted rename;
/// callers must reconcile that state. Always probed fresh, never cached.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileState(u8);

impl FileState {
    /// The canonical file exists.
    pub const AVAILABLE: Self = Self(0b001);
    /// The tombstoned file exists.
    pub const DELETED: Self = Self(0b010);
    /// Neither file exists.
    pub const MISSING: Self = Self(0b100);

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Canonical file present.
    pub const fn is_available(self) -> bool {
        self.contains(Self::AVAILABLE)
    }

    /// Tombstoned file present.
    pub const fn is_deleted(self) -> bool {
        self.contains(Self::DELETED)
    }

    /// Nothing on disk.
    pub const fn is_missing(self) -> bool {
        self.contains(Self::MISSING)
    }

    /// Both files present at once.
    pub const fn is_conflicted(self) -> bool {
        self.is_available() && self.is_deleted()
    }

    fn probe(cached: &Path, deleted: &Path) -> Self {
        let mut bits = 0;
        if cached.is_file() {
            bits |= Self::AVAILABLE.0;
        }
        if deleted.is_file() {
            bits |= Self::DELETED.0;
        }
        if bits == 0 {
            bits = Self::MISSING.0;
        }
        Self(bits)
    }
}

impl fmt::Debug for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.is_available() {
            names.push("AVAILABLE");
        }
        if self.is_deleted() {
            names.push("DELETED");
        }
        if self.is_missing() {
            names.push("MISSING");
        }
        write!(f, "FileState({})", names.join(" | "))
    }
}

/// One cached media item.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Unique id; also the entry's directory name.
    pub id: String,
    /// Source URL. Deduplication key.
    pub url: String,
    /// Output container extension.
    pub extension: String,
    /// Processing status.
    pub status: EntryStatus,
    /// Opaque reference to the last failure.
    pub error: Option<String>,
    /// Resolved encode parameters.
    pub reencode: ReencodeOptions,
    /// Set when the encode parameters changed and the file must be rebuilt.
    pub force_reencode: bool,
    /// Populated after a successful download.
    pub metadata: Option<MediaMetadata>,
    /// Latest download progress. In memory only.
    pub progress: Option<DownloadProgress>,
    /// Creation time (ms).
    pub created_at: u64,
    /// Last state transition (ms).
    pub updated_at: u64,
    /// Last successful completion (ms); the expiry anchor.
    pub live_at: Option<u64>,
    /// Seconds after `live_at` before the file may be tombstoned.
    pub ttl: u64,
    /// The canonical file has been tombstoned.
    pub deleted: bool,
    /// Caller notes attached at enqueue. In memory only.
    pub extra: BTreeMap<String, String>,
    layout: Arc<CacheLayout>,
}

impl CacheEntry {
    /// Create a fresh pending entry.
    pub fn new(
        url: impl Into<String>,
        reencode: ReencodeOptions,
        ttl: u64,
        layout: Arc<CacheLayout>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            extension: extension_for(&reencode),
            status: EntryStatus::Pending,
            error: None,
            reencode,
            force_reencode: false,
            metadata: None,
            progress: None,
            created_at: now,
            updated_at: now,
            live_at: None,
            ttl,
            deleted: false,
            extra: BTreeMap::new(),
            layout,
        }
    }

    /// Rebuild an entry from a stored row.
    ///
    /// Malformed JSON columns are logged and dropped rather than failing the read.
    pub fn from_record(record: EntryRecord, layout: Arc<CacheLayout>) -> Self {
        let metadata = record.metadata.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| warn!(id = %record.id, "Discarding unreadable metadata: {e}"))
                .ok()
        });
        let reencode = record
            .reencode
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| {
                serde_json::from_str(raw)
                    .map_err(|e| warn!(id = %record.id, "Discarding unreadable reencode: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        let extension = if record.extension.is_empty() {
            extension_for(&reencode)
        } else {
            record.extension
        };

        Self {
            id: record.id,
            url: record.url,
            extension,
            status: EntryStatus::from_stored(&record.status),
            error: record.error,
            reencode,
            force_reencode: false,
            metadata,
            progress: None,
            created_at: record.created_at,
            updated_at: record.updated_at,
            live_at: record.live_at,
            ttl: record.ttl,
            deleted: record.deleted,
            extra: BTreeMap::new(),
            layout,
        }
    }

    /// Move to `status` and refresh `updated_at`.
    pub fn set_status(&mut self, status: EntryStatus) {
        self.status = status;
        self.touch();
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Replace the encode parameters and derived extension.
    pub fn set_reencode(&mut self, reencode: ReencodeOptions) {
        self.extension = extension_for(&reencode);
        self.reencode = reencode;
    }

    /// Directory holding this entry's files.
    pub fn entry_dir(&self) -> PathBuf {
        self.layout.entry_dir(&self.id)
    }

    /// Canonical file path.
    pub fn cached_path(&self) -> PathBuf {
        self.layout.cached_path(&self.id, &self.extension)
    }

    /// Tombstoned file path.
    pub fn deleted_path(&self) -> PathBuf {
        self.layout.deleted_path(&self.id, &self.extension)
    }

    /// Downloader log path.
    pub fn log_path(&self) -> PathBuf {
        self.layout.log_path(&self.id)
    }

    /// Output template for the downloader.
    pub fn output_template(&self) -> PathBuf {
        self.layout.output_template(&self.id)
    }

    /// Probe which files exist right now.
    pub fn file_state(&self) -> FileState {
        FileState::probe(&self.cached_path(), &self.deleted_path())
    }

    /// Status is terminal.
    pub const fn is_done_processing(&self) -> bool {
        self.status.is_done_processing()
    }

    /// Status is completed.
    pub fn is_completed(&self) -> bool {
        self.status == EntryStatus::Completed
    }

    /// Encode parameters for the downloader.
    pub fn encode_params(&self) -> Result<EncodeParams> {
        let profile = self.reencode.encoding_profile()?;
        Ok(profile.encode_params(self.reencode.bitrate))
    }

    /// Rename the canonical file to its tombstoned path.
    pub fn tombstone_file(&self) -> Result<()> {
        rename(&self.cached_path(), &self.deleted_path())
    }

    /// Rename the tombstoned file back to its canonical path.
    pub fn restore_file(&self) -> Result<()> {
        rename(&self.deleted_path(), &self.cached_path())
    }

    /// Remove every canonical and tombstoned output in the entry directory,
    /// whatever its extension. Returns the number of files removed.
    pub fn discard_outputs(&self) -> Result<usize> {
        let dir = self.entry_dir();
        let Ok(listing) = fs::read_dir(&dir) else {
            return Ok(0);
        };

        let mut removed = 0;
        for path in listing.filter_map(|e| e.ok()).map(|e| e.path()) {
            let is_output = path.is_file()
                && path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                    name.starts_with("output.") || name.starts_with("output_deleted_")
                });
            if !is_output {
                continue;
            }
            fs::remove_file(&path).map_err(|e| {
                Error::FileSystem(FileSystemError::DeleteFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            })?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Public view, without internal fields.
    pub fn to_view(&self) -> EntryView {
        EntryView {
            id: self.id.clone(),
            url: self.url.clone(),
            extension: self.extension.clone(),
            status: self.status,
            error: self.error.clone(),
            metadata: self.metadata.clone(),
            reencode: self.reencode.clone(),
            progress: self.progress.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            live_at: self.live_at,
            ttl: self.ttl,
            deleted: self.deleted,
            urls: Vec::new(),
        }
    }

    /// Every durable field, ready for [`EntryStore::upsert`].
    pub fn to_store_fields(&self) -> Result<EntryFields> {
        let metadata = self
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(EntryFields {
            url: Some(self.url.clone()),
            extension: Some(self.extension.clone()),
            status: Some(self.status),
            error: Some(self.error.clone()),
            metadata: Some(metadata),
            reencode: Some(Some(serde_json::to_string(&self.reencode)?)),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            live_at: Some(self.live_at),
            deleted: Some(self.deleted),
            ttl: Some(self.ttl),
        })
    }

    /// Persist every durable field.
    pub fn write_to_store(&self, store: &dyn EntryStore) -> Result<()> {
        store.upsert(&self.id, &self.to_store_fields()?)
    }
}

/// Serialisable public view of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    /// Entry id.
    pub id: String,
    /// Source URL.
    pub url: String,
    /// Output extension.
    pub extension: String,
    /// Processing status.
    pub status: EntryStatus,
    /// Opaque failure reference.
    pub error: Option<String>,
    /// Media metadata.
    pub metadata: Option<MediaMetadata>,
    /// Encode parameters.
    pub reencode: ReencodeOptions,
    /// Download progress.
    pub progress: Option<DownloadProgress>,
    /// Creation time (ms).
    pub created_at: u64,
    /// Last update (ms).
    pub updated_at: u64,
    /// Last completion (ms).
    pub live_at: Option<u64>,
    /// TTL in seconds.
    pub ttl: u64,
    /// Soft-deleted flag.
    pub deleted: bool,
    /// Public download URLs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

impl EntryView {
    /// Attach public URLs under each external endpoint.
    ///
    /// Only completed, live entries get URLs.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[String]) -> Self {
        if self.status == EntryStatus::Completed && !self.deleted {
            self.urls = endpoints
                .iter()
                .map(|endpoint| {
                    format!(
                        "{}/{}/output.{}",
                        endpoint.trim_end_matches('/'),
                        self.id,
                        self.extension
                    )
                })
                .collect();
        }
        self
    }
}

fn extension_for(reencode: &ReencodeOptions) -> String {
    reencode
        .encoding_profile()
        .map_or_else(|_| "bin".to_string(), |p| p.format.to_string())
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        Error::FileSystem(FileSystemError::RenameFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

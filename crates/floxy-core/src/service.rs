//! The media cache service: entry index, scheduler and soft-delete protocol.
//!
//! # State machine
//!
//! ```text
//! (none) --enqueue--> PENDING --tick--> DOWNLOADING --download ok--> METADATA --parse ok--> COMPLETED
//!                                            |                           |
//!                                            +------- any error ---------+----------------> FAILED
//! ```
//!
//! Enqueue-time reconciliation moves terminal entries back to PENDING when
//! their file is missing or their encode parameters changed, and restores
//! tombstoned files.
//!
//! # Concurrency
//!
//! All index state sits behind one [`RwLock`]. A tick claims PENDING entries
//! by setting them to DOWNLOADING while it holds the write lock, before any
//! job task exists, so no entry is ever processed by two jobs at once. Each
//! job then re-acquires the lock for every state transition.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, MAX_TTL_SECS, ServiceConfig};
use crate::downloader::{
    DownloadProgress, DownloadRequest, MediaDownloader, MediaMetadata, MetadataParser,
    ProgressCallback,
};
use crate::entry::{CacheEntry, CacheLayout, EntryStatus, EntryView, now_millis};
use crate::error::{Error, FileSystemError, Result};
use crate::profile::{ReencodeOptions, ReencodeRequest, resolve_reencode};
use crate::store::{EntryFields, EntryRecord, EntryStore};

/// Options accepted by [`MediaCacheService::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// TTL in seconds; the configured default applies to new entries when unset.
    pub ttl: Option<u64>,
    /// Requested encode profile and bitrate.
    pub reencode: Option<ReencodeRequest>,
    /// Caller notes. Logged, kept in memory, never persisted.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl EnqueueOptions {
    /// Set the TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the encode request.
    #[must_use]
    pub fn with_reencode(mut self, reencode: ReencodeRequest) -> Self {
        self.reencode = Some(reencode);
        self
    }

    /// Attach a caller note.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// How [`MediaCacheService::delete_by_id`] removes an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Tombstone the cached file and flag the entry deleted.
    #[default]
    Soft,
    /// Remove the entry directory and flag the entry deleted.
    File,
    /// Remove the entry directory, the stored row and the index entry.
    Entry,
}

/// Number of indexed entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Waiting for a slot.
    pub pending: usize,
    /// Downloading.
    pub downloading: usize,
    /// Extracting metadata.
    pub metadata: usize,
    /// Completed.
    pub completed: usize,
    /// Failed.
    pub failed: usize,
    /// Unrecognised persisted status.
    pub unknown: usize,
}

impl StatusCounts {
    /// Entries currently owned by a job.
    pub const fn active(&self) -> usize {
        self.downloading + self.metadata
    }

    const fn record(&mut self, status: EntryStatus) {
        match status {
            EntryStatus::Pending => self.pending += 1,
            EntryStatus::Downloading => self.downloading += 1,
            EntryStatus::Metadata => self.metadata += 1,
            EntryStatus::Completed => self.completed += 1,
            EntryStatus::Failed => self.failed += 1,
            EntryStatus::Unknown => self.unknown += 1,
        }
    }
}

/// Read-only diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Concurrency cap.
    pub max_concurrent_processes: usize,
    /// Number of indexed entries.
    pub size: usize,
    /// Per-status counts.
    pub counts: StatusCounts,
}

/// In-memory index, kept in insertion order.
#[derive(Default)]
struct IndexState {
    entries: Vec<CacheEntry>,
    last_expiry_check: Option<Instant>,
}

impl IndexState {
    fn position_by_url(&self, url: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.url == url)
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    fn find_by_id_mut(&mut self, id: &str) -> Option<&mut CacheEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in &self.entries {
            counts.record(entry.status);
        }
        counts
    }

    fn push(&mut self, entry: CacheEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }
}

struct ServiceInner {
    config: ServiceConfig,
    interval_ms: AtomicU64,
    layout: Arc<CacheLayout>,
    endpoints: Vec<String>,
    cookies_path: Option<std::path::PathBuf>,
    extra_args: Vec<String>,
    store: Arc<dyn EntryStore>,
    downloader: Arc<dyn MediaDownloader>,
    metadata: Arc<dyn MetadataParser>,
    state: RwLock<IndexState>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded-concurrency media cache.
///
/// Cheap to clone; clones share the same index and scheduler.
#[derive(Clone)]
pub struct MediaCacheService {
    inner: Arc<ServiceInner>,
}

impl MediaCacheService {
    /// Create a service over `store` using the given collaborators.
    ///
    /// The scheduler is not running until [`Self::start`] is called.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn EntryStore>,
        downloader: Arc<dyn MediaDownloader>,
        metadata: Arc<dyn MetadataParser>,
    ) -> Self {
        let mut service_config = config.service.clone();
        service_config.validate();

        Self {
            inner: Arc::new(ServiceInner {
                interval_ms: AtomicU64::new(service_config.queue_interval_ms),
                config: service_config,
                layout: Arc::new(CacheLayout::new(
                    config.cache_folder.clone(),
                    config.tombstone_secret.clone(),
                )),
                endpoints: config.external_cache_endpoints.clone(),
                cookies_path: config.ytdlp.cookies_path.clone(),
                extra_args: config.ytdlp.extra_args.clone(),
                store,
                downloader,
                metadata,
                state: RwLock::new(IndexState::default()),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Concurrency cap in effect.
    pub fn max_concurrent_processes(&self) -> usize {
        self.inner.config.max_concurrent_processes
    }

    /// Request that `url` be cached.
    ///
    /// Returns the existing entry for `url` (reconciled) or a new PENDING one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Profile`] for an invalid profile or bitrate, before
    /// any entry is created or mutated. Store errors propagate.
    pub async fn enqueue(&self, url: &str, mut options: EnqueueOptions) -> Result<CacheEntry> {
        let reencode = resolve_reencode(options.reencode.as_ref())?;
        options.ttl = options.ttl.map(|ttl| ttl.min(MAX_TTL_SECS));

        let mut state = self.inner.state.write().await;

        let index = match state.position_by_url(url) {
            Some(index) => Some(index),
            None => self
                .inner
                .store
                .get_by_url(url)?
                .map(|record| state.push(self.hydrate(record))),
        };

        if let Some(index) = index {
            let entry = &mut state.entries[index];
            self.reconcile(entry, reencode, options)?;
            return Ok(entry.clone());
        }

        let requested_ttl = options.ttl;
        let ttl = requested_ttl.unwrap_or(self.inner.config.default_ttl_secs);
        let mut entry =
            CacheEntry::new(url, reencode.clone(), ttl, Arc::clone(&self.inner.layout));
        entry.extra = options.extra;

        if let Err(err) = entry.write_to_store(self.inner.store.as_ref()) {
            // A concurrent writer may have inserted the same URL first.
            let Some(record) = self.inner.store.get_by_url(url)? else {
                return Err(err);
            };
            warn!(url, "Entry was created concurrently, reusing stored row");
            let index = state.push(self.hydrate(record));
            let stored = &mut state.entries[index];
            let options = EnqueueOptions {
                ttl: requested_ttl,
                reencode: None,
                extra: entry.extra,
            };
            self.reconcile(stored, reencode, options)?;
            return Ok(stored.clone());
        }

        info!(
            id = %entry.id,
            profile = %entry.reencode.profile,
            extra = ?entry.extra,
            "Enqueued {}",
            url
        );
        state.push(entry.clone());
        Ok(entry)
    }

    fn reconcile(
        &self,
        entry: &mut CacheEntry,
        reencode: ReencodeOptions,
        options: EnqueueOptions,
    ) -> Result<()> {
        let mut changed = false;

        if let Some(ttl) = options.ttl
            && ttl != entry.ttl
        {
            entry.ttl = ttl;
            changed = true;
        }
        if !options.extra.is_empty() {
            debug!(id = %entry.id, extra = ?options.extra, "Re-enqueued with notes");
            entry.extra.extend(options.extra);
        }

        if entry.deleted {
            if entry.file_state().is_deleted()
                && let Err(e) = entry.restore_file()
            {
                warn!(id = %entry.id, "Failed to restore tombstoned file: {}", e);
            }
            entry.deleted = false;
            entry.live_at = Some(now_millis());
            entry.touch();
            changed = true;
            info!(id = %entry.id, "Restored deleted entry");
        }

        if entry.is_done_processing() {
            if entry.file_state().is_missing() {
                debug!(id = %entry.id, status = %entry.status, "Cached file missing, requeueing");
                reset_to_pending(entry);
                changed = true;
            }
            if entry.reencode != reencode {
                info!(
                    id = %entry.id,
                    from = %entry.reencode.profile,
                    to = %reencode.profile,
                    "Encode parameters changed, requeueing"
                );
                // Outputs under the old extension would otherwise stay servable.
                if let Err(e) = entry.discard_outputs() {
                    warn!(id = %entry.id, "Failed to discard previous outputs: {}", e);
                }
                entry.set_reencode(reencode);
                entry.force_reencode = true;
                reset_to_pending(entry);
                changed = true;
            }
        }

        if changed {
            entry.write_to_store(self.inner.store.as_ref())?;
        }
        Ok(())
    }

    /// Run one scheduler tick.
    ///
    /// Runs the expiry sweep when due, then claims PENDING entries in
    /// insertion order up to the concurrency cap and spawns one job each.
    /// Never fails; per-entry errors stay inside that entry's job.
    pub async fn process_queue(&self) {
        if self.expiry_due().await
            && let Err(e) = self.run_expiry_sweep().await
        {
            error!("Expiry sweep failed: {}", e);
        }

        let claimed = {
            let mut state = self.inner.state.write().await;
            let counts = state.counts();
            let cap = self.inner.config.max_concurrent_processes;
            debug!(?counts, "Queue tick");

            if counts.active() >= cap {
                debug!("At max concurrent processes ({}/{})", counts.active(), cap);
                return;
            }

            let mut claimed = Vec::new();
            for entry in state
                .entries
                .iter_mut()
                .filter(|entry| entry.status == EntryStatus::Pending)
                .take(cap - counts.active())
            {
                entry.set_status(EntryStatus::Downloading);
                entry.progress = None;
                claimed.push(entry.id.clone());
            }
            claimed
        };

        for id in claimed {
            let service = self.clone();
            tokio::spawn(async move {
                service.process_entry(&id).await;
            });
        }
    }

    async fn expiry_due(&self) -> bool {
        let mut state = self.inner.state.write().await;
        let interval = self.inner.config.expiry_check_interval();
        let due = state
            .last_expiry_check
            .is_none_or(|last| last.elapsed() >= interval);
        if due {
            state.last_expiry_check = Some(Instant::now());
        }
        due
    }

    async fn process_entry(&self, id: &str) {
        if let Err(err) = self.run_pipeline(id).await {
            let reference = Uuid::new_v4().to_string();
            error!(id, reference = %reference, "Processing failed: {}", err);

            let mut state = self.inner.state.write().await;
            if let Some(entry) = state.find_by_id_mut(id) {
                entry.set_status(EntryStatus::Failed);
                entry.error = Some(reference);
                entry.progress = None;
                if let Err(e) = entry.write_to_store(self.inner.store.as_ref()) {
                    error!(id, "Failed to persist failure: {}", e);
                }
            }
        }
    }

    async fn run_pipeline(&self, id: &str) -> Result<()> {
        let Some(entry) = self.update_entry(id, CacheEntry::touch).await? else {
            return Ok(());
        };
        info!(id, "Processing {}", entry.url);

        let dir = entry.entry_dir();
        fs::create_dir_all(&dir).map_err(|e| FileSystemError::CreateDirFailed {
            path: dir.clone(),
            reason: e.to_string(),
        })?;

        if entry.force_reencode {
            let removed = entry.discard_outputs()?;
            debug!(id, removed, "Discarded previous outputs for reencode");
        } else {
            let mut file_state = entry.file_state();
            if file_state.is_conflicted() {
                warn!(id, "Both canonical and tombstoned files exist, discarding canonical");
                remove_file(&entry.cached_path())?;
                file_state = entry.file_state();
            }
            if file_state.is_deleted() {
                debug!(id, "Restoring tombstoned file");
                entry.restore_file()?;
                file_state = entry.file_state();
            }
            if file_state.is_available() {
                info!(id, "File already cached, skipping download");
                self.update_entry(id, |entry| mark_completed(entry, None))
                    .await?;
                return Ok(());
            }
        }

        let request = DownloadRequest {
            output_template: entry.output_template(),
            encode: entry.encode_params()?,
            cookies_path: self.inner.cookies_path.clone(),
            extra_args: self.inner.extra_args.clone(),
        };
        let expected = request.expected_output();

        let log = self.download(&entry, request).await?;
        let log_path = entry.log_path();
        fs::write(&log_path, log).map_err(|e| FileSystemError::WriteFailed {
            path: log_path,
            reason: e.to_string(),
        })?;

        if !expected.is_file() {
            return Err(Error::Download(format!(
                "Expected output {} was not produced",
                expected.display()
            )));
        }

        let advanced = self
            .update_entry(id, |entry| {
                entry.set_status(EntryStatus::Metadata);
                entry.progress = None;
            })
            .await?;
        if advanced.is_none() {
            return Ok(());
        }

        let metadata = self.inner.metadata.parse_url(&entry.url).await?;
        self.update_entry(id, move |entry| mark_completed(entry, Some(metadata)))
            .await?;
        info!(id, "Completed {}", entry.url);
        Ok(())
    }

    async fn download(&self, entry: &CacheEntry, request: DownloadRequest) -> Result<String> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DownloadProgress>();
        let on_progress: ProgressCallback = Box::new(move |progress| {
            let _ = tx.send(progress);
        });

        let forwarder = {
            let service = self.clone();
            let id = entry.id.clone();
            tokio::spawn(async move {
                while let Some(progress) = rx.recv().await {
                    let mut state = service.inner.state.write().await;
                    if let Some(entry) = state.find_by_id_mut(&id)
                        && entry.status == EntryStatus::Downloading
                    {
                        entry.progress = Some(progress);
                    }
                }
            })
        };

        let call = self
            .inner
            .downloader
            .download(&entry.url, request, on_progress);
        let result = match self.inner.config.download_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(Error::DownloadTimedOut(limit))),
            None => call.await,
        };

        // The callback is dropped with the call, which ends the forwarder.
        let _ = forwarder.await;
        result
    }

    /// Mutate an indexed entry under the write lock and persist it.
    ///
    /// Returns `None` when the entry is no longer indexed.
    async fn update_entry<F>(&self, id: &str, mutate: F) -> Result<Option<CacheEntry>>
    where
        F: FnOnce(&mut CacheEntry) + Send,
    {
        let mut state = self.inner.state.write().await;
        let Some(entry) = state.find_by_id_mut(id) else {
            debug!(id, "Entry left the index during processing");
            return Ok(None);
        };
        mutate(entry);
        entry.write_to_store(self.inner.store.as_ref())?;
        Ok(Some(entry.clone()))
    }

    /// Tombstone every live entry whose TTL has elapsed.
    ///
    /// Rename failures are logged and do not stop the sweep; the `deleted`
    /// flag is set regardless. Returns the number of entries marked.
    ///
    /// # Errors
    ///
    /// Store errors propagate.
    pub async fn run_expiry_sweep(&self) -> Result<usize> {
        let now = now_millis();
        let expired = self.inner.store.list_expired(now)?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut state = self.inner.state.write().await;
        let mut marked = 0;

        for record in expired {
            let id = record.id.clone();
            let indexed = state.find_by_id_mut(&id);
            if indexed.as_ref().is_some_and(|entry| entry.status.is_processing()) {
                debug!(id, "Skipping expiry of an entry being processed");
                continue;
            }

            let detached;
            let entry = match indexed {
                Some(entry) => &*entry,
                None => {
                    detached = CacheEntry::from_record(record, Arc::clone(&self.inner.layout));
                    &detached
                }
            };

            if entry.file_state().is_available()
                && let Err(e) = entry.tombstone_file()
            {
                warn!(id, "Failed to tombstone expired file: {}", e);
            }

            self.inner.store.upsert(
                &id,
                &EntryFields {
                    updated_at: Some(now),
                    ..EntryFields::deleted(true)
                },
            )?;
            if let Some(entry) = state.find_by_id_mut(&id) {
                entry.deleted = true;
                entry.updated_at = now;
            }
            marked += 1;
        }

        info!("Expiry sweep tombstoned {} entries", marked);
        Ok(marked)
    }

    /// Look up an entry by source URL.
    ///
    /// # Errors
    ///
    /// Store errors propagate.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<CacheEntry>> {
        {
            let state = self.inner.state.read().await;
            if let Some(index) = state.position_by_url(url) {
                return Ok(Some(state.entries[index].clone()));
            }
        }
        let record = self.inner.store.get_by_url(url)?;
        Ok(self.index_record(record).await)
    }

    /// Look up an entry by id.
    ///
    /// # Errors
    ///
    /// Store errors propagate.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<CacheEntry>> {
        {
            let state = self.inner.state.read().await;
            if let Some(index) = state.position_by_id(id) {
                return Ok(Some(state.entries[index].clone()));
            }
        }
        let record = self.inner.store.get(id)?;
        Ok(self.index_record(record).await)
    }

    async fn index_record(&self, record: Option<EntryRecord>) -> Option<CacheEntry> {
        let record = record?;
        let mut state = self.inner.state.write().await;
        // Another caller may have indexed it while the lock was released.
        let index = match state.position_by_id(&record.id) {
            Some(index) => index,
            None => state.push(self.hydrate(record)),
        };
        Some(state.entries[index].clone())
    }

    /// One zero-based page of entries, oldest first.
    ///
    /// # Errors
    ///
    /// Store errors propagate.
    pub async fn get_all(&self, page: usize, limit: usize) -> Result<Vec<CacheEntry>> {
        let records = self.inner.store.list_page(page, limit)?;
        let mut state = self.inner.state.write().await;
        Ok(records
            .into_iter()
            .map(|record| {
                let index = match state.position_by_id(&record.id) {
                    Some(index) => index,
                    None => state.push(self.hydrate(record)),
                };
                state.entries[index].clone()
            })
            .collect())
    }

    /// Delete an entry.
    ///
    /// Returns `false` when the entry is unknown, or already deleted and
    /// `force` is not set.
    ///
    /// # Errors
    ///
    /// Store errors and directory removal failures propagate.
    pub async fn delete_by_id(&self, id: &str, mode: DeleteMode, force: bool) -> Result<bool> {
        let mut state = self.inner.state.write().await;

        let index = match state.position_by_id(id) {
            Some(index) => index,
            None => match self.inner.store.get(id)? {
                Some(record) => state.push(self.hydrate(record)),
                None => return Ok(false),
            },
        };

        let entry = &mut state.entries[index];
        if entry.deleted && !force {
            debug!(id, "Entry already deleted");
            return Ok(false);
        }

        match mode {
            DeleteMode::Soft => {
                if entry.file_state().is_available()
                    && let Err(e) = entry.tombstone_file()
                {
                    warn!(id, "Failed to tombstone file: {}", e);
                }
            }
            DeleteMode::File => remove_dir(&entry.entry_dir())?,
            DeleteMode::Entry => {
                remove_dir(&entry.entry_dir())?;
                self.inner.store.delete(id)?;
                state.entries.remove(index);
                info!(id, "Removed entry");
                return Ok(true);
            }
        }

        entry.deleted = true;
        entry.touch();
        self.inner.store.upsert(
            id,
            &EntryFields {
                updated_at: Some(entry.updated_at),
                ..EntryFields::deleted(true)
            },
        )?;
        info!(id, ?mode, "Deleted entry");
        Ok(true)
    }

    /// Concurrency cap, index size and per-status counts.
    pub async fn get_friendly_stats(&self) -> ServiceStats {
        let state = self.inner.state.read().await;
        ServiceStats {
            max_concurrent_processes: self.inner.config.max_concurrent_processes,
            size: state.entries.len(),
            counts: state.counts(),
        }
    }

    /// Public view of `entry` with the configured download URLs attached.
    pub fn public_view(&self, entry: &CacheEntry) -> EntryView {
        entry.to_view().with_endpoints(&self.inner.endpoints)
    }

    /// Load unfinished entries from the store into the index.
    ///
    /// Entries left in DOWNLOADING or METADATA by a previous process are
    /// reset to PENDING. Returns the number of entries loaded.
    ///
    /// # Errors
    ///
    /// Store errors propagate.
    pub async fn recover(&self) -> Result<usize> {
        let records = self.inner.store.list_by_status(&[
            EntryStatus::Pending,
            EntryStatus::Downloading,
            EntryStatus::Metadata,
        ])?;

        let mut state = self.inner.state.write().await;
        let mut loaded = 0;
        for record in records {
            if state.position_by_id(&record.id).is_some() {
                continue;
            }
            let orphaned = EntryStatus::from_stored(&record.status).is_processing();
            let entry = self.hydrate(record);
            if orphaned {
                entry.write_to_store(self.inner.store.as_ref())?;
            }
            state.push(entry);
            loaded += 1;
        }

        if loaded > 0 {
            info!("Recovered {} unfinished entries", loaded);
        }
        Ok(loaded)
    }

    fn hydrate(&self, record: EntryRecord) -> CacheEntry {
        let mut entry = CacheEntry::from_record(record, Arc::clone(&self.inner.layout));
        // Only jobs in this process own in-progress entries.
        if entry.status.is_processing() {
            warn!(id = %entry.id, status = %entry.status, "Resetting orphaned entry to pending");
            reset_to_pending(&mut entry);
        }
        entry
    }

    /// Start the periodic scheduler. No-op when already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut scheduler = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_some() {
            return;
        }

        let period = Duration::from_millis(self.inner.interval_ms.load(Ordering::Relaxed));
        let weak = Arc::downgrade(&self.inner);
        *scheduler = Some(tokio::spawn(run_scheduler(weak, period)));
        info!("Scheduler started ({}ms interval)", period.as_millis());
    }

    /// Stop the periodic scheduler. Running jobs are not interrupted.
    pub fn stop(&self) {
        let handle = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Scheduler stopped");
        }
    }

    /// Whether the scheduler task is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Change the tick period, restarting the scheduler if it was running.
    pub fn reset_interval(&self, interval_ms: u64) {
        self.inner
            .interval_ms
            .store(interval_ms.max(1), Ordering::Relaxed);
        if self.is_running() {
            self.stop();
            self.start();
        }
    }

    /// Current tick period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.inner.interval_ms.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for MediaCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCacheService")
            .field("config", &self.inner.config)
            .field("layout", &self.inner.layout)
            .finish_non_exhaustive()
    }
}

async fn run_scheduler(inner: Weak<ServiceInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        MediaCacheService { inner }.process_queue().await;
    }
}

fn reset_to_pending(entry: &mut CacheEntry) {
    entry.set_status(EntryStatus::Pending);
    entry.error = None;
    entry.progress = None;
}

fn mark_completed(entry: &mut CacheEntry, metadata: Option<MediaMetadata>) {
    entry.set_status(EntryStatus::Completed);
    entry.live_at = Some(entry.updated_at);
    entry.error = None;
    entry.progress = None;
    entry.force_reencode = false;
    entry.deleted = false;
    if metadata.is_some() {
        entry.metadata = metadata;
    }
}

fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| {
        Error::FileSystem(FileSystemError::DeleteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

fn remove_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    fs::remove_dir_all(path).map_err(|e| {
        Error::FileSystem(FileSystemError::DeleteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

//! Shared fixtures for service integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use floxy_core::downloader::{DownloadProgress, DownloadRequest, ProgressCallback};
use floxy_core::{
    AppConfig, CacheEntry, EntryStatus, Error, MediaCacheService, MediaDownloader, MediaMetadata,
    MetadataParser, Result, SqliteEntryStore,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

// =============================================================================
// Fake downloader
// =============================================================================

/// Downloader that writes a dummy output file.
///
/// When gated, every call blocks until [`FakeDownloader::release`] hands out
/// a permit, so tests can hold jobs in DOWNLOADING and sample the queue.
pub struct FakeDownloader {
    gate: Option<Semaphore>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeDownloader {
    /// Completes every call immediately.
    pub fn instant() -> Self {
        Self::build(None)
    }

    /// Blocks every call until released.
    pub fn gated() -> Self {
        Self::build(Some(Semaphore::new(0)))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        Self {
            gate,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Let `n` blocked calls finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Make calls for `url` fail.
    pub fn fail_on(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Total calls started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of calls in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    async fn download(
        &self,
        url: &str,
        request: DownloadRequest,
        on_progress: ProgressCallback,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        on_progress(DownloadProgress {
            percent: 50.0,
            ..Default::default()
        });

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Download(e.to_string()))?
                .forget();
        }

        if self.failing.lock().unwrap().contains(url) {
            return Err(Error::Download(format!("HTTP Error 403 for {url}")));
        }

        fs::write(request.expected_output(), url.as_bytes())?;
        Ok(format!("[download] 100% of {url}\n"))
    }
}

// =============================================================================
// Fake metadata parser
// =============================================================================

/// Describes every URL with its own text as the title.
#[derive(Default)]
pub struct FakeMetadataParser {
    calls: AtomicUsize,
}

impl FakeMetadataParser {
    /// Total calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataParser for FakeMetadataParser {
    async fn parse_url(&self, url: &str) -> Result<MediaMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MediaMetadata {
            title: url.to_string(),
            artist: Some("Fake Artist".to_string()),
            ..Default::default()
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A service wired to fakes, an in-memory store and a temporary cache root.
pub struct Harness {
    pub temp_dir: TempDir,
    pub config: AppConfig,
    pub store: Arc<SqliteEntryStore>,
    pub downloader: Arc<FakeDownloader>,
    pub metadata: Arc<FakeMetadataParser>,
    pub service: MediaCacheService,
}

impl Harness {
    /// Harness with an instant downloader and default settings.
    pub fn new() -> Self {
        Self::with(FakeDownloader::instant(), |_| {})
    }

    /// Harness with a custom downloader and config tweaks.
    pub fn with(downloader: FakeDownloader, configure: impl FnOnce(&mut AppConfig)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = AppConfig {
            cache_folder: temp_dir.path().join("cache"),
            database_path: temp_dir.path().join("floxy.sqlite"),
            tombstone_secret: "t3st".to_string(),
            ..AppConfig::default()
        };
        configure(&mut config);

        let store = Arc::new(SqliteEntryStore::in_memory().unwrap());
        let downloader = Arc::new(downloader);
        let metadata = Arc::new(FakeMetadataParser::default());
        let service = MediaCacheService::new(
            &config,
            store.clone(),
            downloader.clone(),
            metadata.clone(),
        );

        Self {
            temp_dir,
            config,
            store,
            downloader,
            metadata,
            service,
        }
    }

    /// Current state of an entry.
    pub async fn entry(&self, id: &str) -> CacheEntry {
        self.service.get_by_id(id).await.unwrap().unwrap()
    }

    /// Poll until `id` reaches `status`.
    pub async fn wait_for_status(&self, id: &str, status: EntryStatus) -> CacheEntry {
        for _ in 0..500 {
            let entry = self.entry(id).await;
            if entry.status == status {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("entry {id} never reached {status}");
    }

    /// Poll until `check` holds.
    pub async fn wait_until(&self, what: &str, check: impl Fn() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Enqueue, tick once, and wait for completion.
    pub async fn cache(&self, url: &str) -> CacheEntry {
        let entry = self
            .service
            .enqueue(url, floxy_core::EnqueueOptions::default())
            .await
            .unwrap();
        self.service.process_queue().await;
        self.wait_for_status(&entry.id, EntryStatus::Completed).await
    }
}

/// Write a file, creating its parent directory.
pub fn write_file(path: &std::path::Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"media").unwrap();
}

//! End-to-end tests for the media cache service.
//!
//! These drive the scheduler by hand through `process_queue` with fake
//! collaborators, a temporary cache root and an in-memory SQLite store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{FakeDownloader, Harness, write_file};
use floxy_core::config::MAX_TTL_SECS;
use floxy_core::entry::now_millis;
use floxy_core::error::ProfileError;
use floxy_core::profile::ReencodeRequest;
use floxy_core::store::{EntryFields, EntryStore};
use floxy_core::{
    DeleteMode, EnqueueOptions, EntryStatus, Error, MediaCacheService, MediaDownloader,
    MetadataParser,
};

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

// =============================================================================
// Enqueue and deduplication
// =============================================================================

#[tokio::test]
async fn test_repeated_enqueue_returns_single_entry() {
    let h = Harness::new();

    let first = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    let second = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    let (third, fourth) = tokio::join!(
        h.service.enqueue(URL, EnqueueOptions::default()),
        h.service.enqueue(URL, EnqueueOptions::default()),
    );

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, third.unwrap().id);
    assert_eq!(first.id, fourth.unwrap().id);
    assert_eq!(h.service.get_friendly_stats().await.size, 1);
    assert_eq!(h.store.list_page(0, 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_enqueue_persists_new_entry() {
    let h = Harness::new();
    let entry = h
        .service
        .enqueue(
            URL,
            EnqueueOptions::default()
                .with_ttl(120)
                .with_reencode(ReencodeRequest::profile("ogg-opus").with_bitrate(96_000))
                .with_extra("requested_by", "test"),
        )
        .await
        .unwrap();

    assert_eq!(entry.status, EntryStatus::Pending);
    assert_eq!(entry.extension, "ogg");
    assert_eq!(entry.ttl, 120);
    assert_eq!(entry.extra.get("requested_by").map(String::as_str), Some("test"));

    let record = h.store.get(&entry.id).unwrap().unwrap();
    assert_eq!(record.url, URL);
    assert_eq!(record.status, "pending");
    assert_eq!(record.ttl, 120);
    assert!(record.reencode.unwrap().contains("ogg-opus"));
}

#[tokio::test]
async fn test_new_entry_uses_configured_default_ttl() {
    let h = Harness::with(FakeDownloader::instant(), |config| {
        config.service.default_ttl_secs = 42;
    });
    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    assert_eq!(entry.ttl, 42);
}

#[tokio::test]
async fn test_unknown_profile_creates_nothing() {
    let h = Harness::new();
    let err = h
        .service
        .enqueue(
            URL,
            EnqueueOptions::default().with_reencode(ReencodeRequest::profile("wav")),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Profile(ProfileError::NotFound(ref name)) if name == "wav"
    ));
    assert_eq!(h.service.get_friendly_stats().await.size, 0);
    assert!(h.store.get_by_url(URL).unwrap().is_none());
}

#[tokio::test]
async fn test_bitrate_out_of_range_carries_bounds_and_mutates_nothing() {
    let h = Harness::new();
    let existing = h.cache(URL).await;

    let err = h
        .service
        .enqueue(
            URL,
            EnqueueOptions::default()
                .with_reencode(ReencodeRequest::profile("mp3").with_bitrate(512_000)),
        )
        .await
        .unwrap_err();

    match err {
        Error::Profile(ProfileError::BitrateOutOfRange {
            profile,
            bitrate,
            min,
            max,
        }) => {
            assert_eq!(profile, "mp3");
            assert_eq!(bitrate, 512_000);
            assert_eq!(min, 64_000);
            assert_eq!(max, 320_000);
        }
        other => panic!("unexpected error: {other}"),
    }

    let after = h.entry(&existing.id).await;
    assert_eq!(after.status, EntryStatus::Completed);
    assert_eq!(after.reencode, existing.reencode);
    assert_eq!(after.updated_at, existing.updated_at);
}

// =============================================================================
// Processing pipeline
// =============================================================================

#[tokio::test]
async fn test_processing_passes_through_downloading() {
    let h = Harness::with(FakeDownloader::gated(), |_| {});
    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();

    h.service.process_queue().await;
    let downloader = h.downloader.clone();
    h.wait_until("download to start", || downloader.calls() == 1)
        .await;

    let running = h.entry(&entry.id).await;
    assert_eq!(running.status, EntryStatus::Downloading);
    assert_eq!(h.store.get(&entry.id).unwrap().unwrap().status, "downloading");

    // Progress reaches the indexed entry while the download runs.
    for _ in 0..100 {
        if h.entry(&entry.id).await.progress.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let progress = h.entry(&entry.id).await.progress.unwrap();
    assert!((progress.percent - 50.0).abs() < f64::EPSILON);

    h.downloader.release(1);
    let done = h.wait_for_status(&entry.id, EntryStatus::Completed).await;

    assert!(done.cached_path().is_file());
    assert!(done.log_path().is_file());
    assert!(done.progress.is_none());
    assert_eq!(done.metadata.as_ref().unwrap().title, URL);
    assert_eq!(h.metadata.calls(), 1);
}

#[tokio::test]
async fn test_available_file_short_circuits_to_completed() {
    let h = Harness::new();
    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    write_file(&entry.cached_path());

    h.service.process_queue().await;
    let done = h.wait_for_status(&entry.id, EntryStatus::Completed).await;

    assert_eq!(h.downloader.calls(), 0);
    assert_eq!(h.metadata.calls(), 0);
    assert!(done.live_at.is_some());
    assert_eq!(h.store.get(&entry.id).unwrap().unwrap().status, "completed");
}

#[tokio::test]
async fn test_tombstone_only_is_restored_during_processing() {
    let h = Harness::new();
    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    write_file(&entry.deleted_path());

    h.service.process_queue().await;
    let done = h.wait_for_status(&entry.id, EntryStatus::Completed).await;

    assert_eq!(h.downloader.calls(), 0);
    assert!(done.cached_path().is_file());
    assert!(!done.deleted_path().exists());
}

#[tokio::test]
async fn test_conflicting_files_keep_tombstone_copy() {
    let h = Harness::new();
    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    write_file(&entry.cached_path());
    fs::write(entry.deleted_path(), b"tombstoned").unwrap();

    h.service.process_queue().await;
    let done = h.wait_for_status(&entry.id, EntryStatus::Completed).await;

    assert!(done.file_state().is_available());
    assert!(!done.file_state().is_deleted());
    assert_eq!(fs::read(done.cached_path()).unwrap(), b"tombstoned");
}

#[tokio::test]
async fn test_live_at_is_completion_time() {
    let h = Harness::new();
    let before = now_millis();
    let done = h.cache(URL).await;
    let after = now_millis();

    let live_at = done.live_at.unwrap();
    assert!(live_at >= before && live_at <= after);
    assert_eq!(live_at, done.updated_at);
    assert_eq!(h.store.get(&done.id).unwrap().unwrap().live_at, Some(live_at));
}

#[tokio::test]
async fn test_failure_records_reference_and_keeps_live_at() {
    let h = Harness::new();

    // Never completed: live_at stays empty.
    h.downloader.fail_on(URL);
    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    h.service.process_queue().await;
    let failed = h.wait_for_status(&entry.id, EntryStatus::Failed).await;

    assert!(failed.live_at.is_none());
    let reference = failed.error.unwrap();
    assert!(!reference.contains("HTTP Error"));
    assert_eq!(
        h.store.get(&entry.id).unwrap().unwrap().error.as_deref(),
        Some(reference.as_str())
    );

    // Previously completed: a later failure leaves live_at untouched.
    let other = "https://example.com/other";
    let done = h.cache(other).await;
    let live_at = done.live_at;
    fs::remove_file(done.cached_path()).unwrap();
    h.downloader.fail_on(other);

    let requeued = h.service.enqueue(other, EnqueueOptions::default()).await.unwrap();
    assert_eq!(requeued.status, EntryStatus::Pending);
    h.service.process_queue().await;
    let failed = h.wait_for_status(&done.id, EntryStatus::Failed).await;
    assert_eq!(failed.live_at, live_at);
}

#[tokio::test]
async fn test_one_failure_does_not_affect_others() {
    let h = Harness::new();
    h.downloader.fail_on("https://example.com/bad");

    let bad = h
        .service
        .enqueue("https://example.com/bad", EnqueueOptions::default())
        .await
        .unwrap();
    let good = h
        .service
        .enqueue("https://example.com/good", EnqueueOptions::default())
        .await
        .unwrap();
    h.service.process_queue().await;

    h.wait_for_status(&bad.id, EntryStatus::Failed).await;
    h.wait_for_status(&good.id, EntryStatus::Completed).await;
}

#[tokio::test]
async fn test_download_timeout_fails_entry() {
    let h = Harness::with(FakeDownloader::gated(), |config| {
        config.service.download_timeout_secs = Some(1);
    });
    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();

    h.service.process_queue().await;
    let failed = h.wait_for_status(&entry.id, EntryStatus::Failed).await;

    assert!(failed.error.is_some());
    assert_eq!(h.downloader.active(), 0);
}

// =============================================================================
// Concurrency cap
// =============================================================================

#[tokio::test]
async fn test_concurrency_cap_holds_with_five_pending() {
    let h = Harness::with(FakeDownloader::gated(), |config| {
        config.service.max_concurrent_processes = 2;
    });

    let mut ids = Vec::new();
    for i in 0..5 {
        let entry = h
            .service
            .enqueue(&format!("https://example.com/{i}"), EnqueueOptions::default())
            .await
            .unwrap();
        ids.push(entry.id);
    }

    h.service.process_queue().await;
    for (i, id) in ids.iter().enumerate() {
        let expected = if i < 2 {
            EntryStatus::Downloading
        } else {
            EntryStatus::Pending
        };
        assert_eq!(h.entry(id).await.status, expected);
    }

    let mut completed = 0;
    while completed < 5 {
        h.service.process_queue().await;
        // A second tick while at the cap must not start anything.
        h.service.process_queue().await;

        let stats = h.service.get_friendly_stats().await;
        assert!(stats.counts.active() <= 2, "cap exceeded: {stats:?}");
        assert_eq!(stats.max_concurrent_processes, 2);

        h.downloader.release(1);
        completed += 1;
        let expected = completed;
        let service = h.service.clone();
        for _ in 0..500 {
            if service.get_friendly_stats().await.counts.completed >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            h.service.get_friendly_stats().await.counts.completed,
            expected
        );
    }

    assert!(h.downloader.peak() <= 2);
    assert_eq!(h.downloader.calls(), 5);

    for id in &ids {
        assert_eq!(h.entry(id).await.status, EntryStatus::Completed);
    }
}

#[tokio::test]
async fn test_scheduler_drives_queue() {
    let h = Harness::new();
    h.service.reset_interval(20);
    h.service.start();

    let entry = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    h.wait_for_status(&entry.id, EntryStatus::Completed).await;

    h.service.stop();
    assert!(!h.service.is_running());
}

// =============================================================================
// Expiry and restore
// =============================================================================

/// Names of the `output*` files in an entry directory, sorted.
fn output_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("output"))
        .collect();
    names.sort();
    names
}

fn expire(h: &Harness, id: &str) {
    h.store
        .upsert(
            id,
            &EntryFields {
                live_at: Some(Some(now_millis() - 10_000)),
                ttl: Some(1),
                ..EntryFields::default()
            },
        )
        .unwrap();
}

#[tokio::test]
async fn test_expiry_sweep_tombstones_expired_file() {
    let h = Harness::new();
    let done = h.cache(URL).await;
    let fresh = h.cache("https://example.com/fresh").await;
    expire(&h, &done.id);

    let marked = h.service.run_expiry_sweep().await.unwrap();
    assert_eq!(marked, 1);

    let swept = h.entry(&done.id).await;
    assert!(swept.deleted);
    assert!(!swept.cached_path().exists());
    assert!(swept.deleted_path().is_file());
    assert!(h.store.get(&done.id).unwrap().unwrap().deleted);

    let untouched = h.entry(&fresh.id).await;
    assert!(!untouched.deleted);
    assert!(untouched.cached_path().is_file());

    // Already tombstoned rows are not selected again.
    assert_eq!(h.service.run_expiry_sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn test_first_tick_runs_expiry_sweep() {
    let h = Harness::new();
    let done = h.cache(URL).await;
    expire(&h, &done.id);

    // The harness's first tick already ran the sweep; a fresh service has not.
    let service = MediaCacheService::new(
        &h.config,
        h.store.clone(),
        h.downloader.clone() as Arc<dyn MediaDownloader>,
        h.metadata.clone() as Arc<dyn MetadataParser>,
    );
    service.process_queue().await;

    assert!(h.store.get(&done.id).unwrap().unwrap().deleted);
    assert!(done.deleted_path().is_file());
}

#[tokio::test]
async fn test_sweep_tolerates_missing_file() {
    let h = Harness::new();
    let done = h.cache(URL).await;
    fs::remove_file(done.cached_path()).unwrap();
    expire(&h, &done.id);

    assert_eq!(h.service.run_expiry_sweep().await.unwrap(), 1);
    assert!(h.entry(&done.id).await.deleted);
}

#[tokio::test]
async fn test_enqueue_restores_deleted_entry() {
    let h = Harness::new();
    let done = h.cache(URL).await;
    let old_live_at = done.live_at.unwrap();
    expire(&h, &done.id);
    h.service.run_expiry_sweep().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let restored = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();

    assert_eq!(restored.id, done.id);
    assert!(!restored.deleted);
    assert_eq!(restored.status, EntryStatus::Completed);
    assert!(restored.cached_path().is_file());
    assert!(!restored.deleted_path().exists());
    assert!(restored.live_at.unwrap() > old_live_at);

    let record = h.store.get(&done.id).unwrap().unwrap();
    assert!(!record.deleted);
    assert_eq!(record.live_at, restored.live_at);
}

#[tokio::test]
async fn test_enqueue_requeues_missing_file() {
    let h = Harness::new();
    let done = h.cache(URL).await;
    fs::remove_file(done.cached_path()).unwrap();

    let requeued = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    assert_eq!(requeued.status, EntryStatus::Pending);
    assert!(requeued.error.is_none());

    h.service.process_queue().await;
    h.wait_for_status(&done.id, EntryStatus::Completed).await;
    assert_eq!(h.downloader.calls(), 2);
}

#[tokio::test]
async fn test_enqueue_with_new_profile_forces_reencode() {
    let h = Harness::new();
    let done = h.cache(URL).await;
    assert_eq!(done.extension, "mp3");

    let requeued = h
        .service
        .enqueue(
            URL,
            EnqueueOptions::default().with_reencode(ReencodeRequest::profile("flac")),
        )
        .await
        .unwrap();
    assert_eq!(requeued.status, EntryStatus::Pending);
    assert!(requeued.force_reencode);
    assert_eq!(requeued.extension, "flac");
    // The old container is gone before the job even starts.
    assert!(!done.cached_path().exists());

    h.service.process_queue().await;
    let reencoded = h.wait_for_status(&done.id, EntryStatus::Completed).await;
    assert!(!reencoded.force_reencode);
    assert!(reencoded.cached_path().ends_with("output.flac"));
    assert!(reencoded.cached_path().is_file());
    assert_eq!(output_files(&reencoded.entry_dir()), vec!["output.flac"]);
    assert_eq!(h.downloader.calls(), 2);

    // Expiry tombstones the only output; nothing servable is left behind.
    expire(&h, &done.id);
    assert_eq!(h.service.run_expiry_sweep().await.unwrap(), 1);
    assert_eq!(
        output_files(&reencoded.entry_dir()),
        vec!["output_deleted_t3st.flac"]
    );

    // Same parameters again: only the tombstone is restored.
    let same = h
        .service
        .enqueue(
            URL,
            EnqueueOptions::default().with_reencode(ReencodeRequest::profile("flac")),
        )
        .await
        .unwrap();
    assert_eq!(same.status, EntryStatus::Completed);
    assert!(!same.deleted);
    assert_eq!(output_files(&done.entry_dir()), vec!["output.flac"]);
}

#[tokio::test]
async fn test_reencode_discards_leftovers_of_any_extension() {
    let h = Harness::new();
    let done = h.cache(URL).await;
    let dir = done.entry_dir();

    let requeued = h
        .service
        .enqueue(
            URL,
            EnqueueOptions::default().with_reencode(ReencodeRequest::profile("ogg-opus")),
        )
        .await
        .unwrap();
    assert_eq!(requeued.extension, "ogg");
    assert!(output_files(&dir).is_empty());

    // Leftovers appearing before the job runs, e.g. from an interrupted run.
    write_file(&dir.join("output.mp3"));
    write_file(&dir.join("output.opus"));
    write_file(&dir.join("output_deleted_t3st.mp3"));

    h.service.process_queue().await;
    let reencoded = h.wait_for_status(&done.id, EntryStatus::Completed).await;
    assert_eq!(output_files(&dir), vec!["output.ogg"]);
    assert_eq!(fs::read(reencoded.cached_path()).unwrap(), URL.as_bytes());
}

#[tokio::test]
async fn test_oversized_ttl_is_clamped() {
    let h = Harness::new();
    let entry = h
        .service
        .enqueue(URL, EnqueueOptions::default().with_ttl(u64::MAX))
        .await
        .unwrap();
    assert_eq!(entry.ttl, MAX_TTL_SECS);

    h.service.process_queue().await;
    h.wait_for_status(&entry.id, EntryStatus::Completed).await;

    assert_eq!(h.service.run_expiry_sweep().await.unwrap(), 0);
    assert!(!h.entry(&entry.id).await.deleted);
    assert_eq!(h.store.get(&entry.id).unwrap().unwrap().ttl, MAX_TTL_SECS);
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn test_soft_delete_is_idempotent_unless_forced() {
    let h = Harness::new();
    let done = h.cache(URL).await;

    assert!(h.service.delete_by_id(&done.id, DeleteMode::Soft, false).await.unwrap());
    assert!(done.deleted_path().is_file());
    assert!(!done.cached_path().exists());
    assert!(h.store.get(&done.id).unwrap().unwrap().deleted);

    // A stray canonical file is left alone by a no-op delete...
    write_file(&done.cached_path());
    assert!(!h.service.delete_by_id(&done.id, DeleteMode::Soft, false).await.unwrap());
    assert!(done.cached_path().is_file());

    // ...and tombstoned again when forced.
    assert!(h.service.delete_by_id(&done.id, DeleteMode::Soft, true).await.unwrap());
    assert!(!done.cached_path().exists());
    assert!(done.deleted_path().is_file());
}

#[tokio::test]
async fn test_delete_unknown_id_is_noop() {
    let h = Harness::new();
    assert!(!h.service.delete_by_id("missing", DeleteMode::Entry, true).await.unwrap());
}

#[tokio::test]
async fn test_file_delete_removes_directory_and_flags_entry() {
    let h = Harness::new();
    let done = h.cache(URL).await;

    assert!(h.service.delete_by_id(&done.id, DeleteMode::File, false).await.unwrap());
    assert!(!done.entry_dir().exists());
    assert!(h.entry(&done.id).await.deleted);

    // Re-requesting downloads it again.
    let requeued = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    assert!(!requeued.deleted);
    assert_eq!(requeued.status, EntryStatus::Pending);
}

#[tokio::test]
async fn test_entry_delete_removes_everything() {
    let h = Harness::new();
    let done = h.cache(URL).await;

    assert!(h.service.delete_by_id(&done.id, DeleteMode::Entry, false).await.unwrap());

    assert!(h.service.get_by_id(&done.id).await.unwrap().is_none());
    assert!(h.service.get_by_url(URL).await.unwrap().is_none());
    assert!(h.store.get(&done.id).unwrap().is_none());
    assert!(!done.entry_dir().exists());
    assert_eq!(h.service.get_friendly_stats().await.size, 0);

    // The URL can be cached again under a new id.
    let again = h.service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    assert_ne!(again.id, done.id);
}

// =============================================================================
// Queries, hydration and stats
// =============================================================================

#[tokio::test]
async fn test_lookups_hydrate_from_store() {
    let h = Harness::new();
    let done = h.cache(URL).await;

    let service = MediaCacheService::new(
        &h.config,
        h.store.clone(),
        h.downloader.clone() as Arc<dyn MediaDownloader>,
        h.metadata.clone() as Arc<dyn MetadataParser>,
    );
    assert_eq!(service.get_friendly_stats().await.size, 0);

    let by_url = service.get_by_url(URL).await.unwrap().unwrap();
    assert_eq!(by_url.id, done.id);
    assert_eq!(by_url.status, EntryStatus::Completed);
    assert_eq!(by_url.metadata, done.metadata);
    assert_eq!(service.get_friendly_stats().await.size, 1);

    let by_id = service.get_by_id(&done.id).await.unwrap().unwrap();
    assert_eq!(by_id.url, URL);
    assert_eq!(service.get_friendly_stats().await.size, 1);

    assert!(service.get_by_id("nope").await.unwrap().is_none());
    assert!(service.get_by_url("https://nope").await.unwrap().is_none());

    // Enqueue on the fresh service reuses the stored entry.
    let again = service.enqueue(URL, EnqueueOptions::default()).await.unwrap();
    assert_eq!(again.id, done.id);
    assert_eq!(again.status, EntryStatus::Completed);
}

#[tokio::test]
async fn test_get_all_pages() {
    let h = Harness::new();
    for i in 0..5 {
        h.service
            .enqueue(&format!("https://example.com/{i}"), EnqueueOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = h.service.get_all(0, 2).await.unwrap();
    let last = h.service.get_all(2, 2).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].url, "https://example.com/0");
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].url, "https://example.com/4");
    assert!(h.service.get_all(5, 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_friendly_stats_and_public_view() {
    let h = Harness::with(FakeDownloader::instant(), |config| {
        config.external_cache_endpoints = vec!["https://cdn.example.com".to_string()];
    });
    let done = h.cache(URL).await;
    h.service
        .enqueue("https://example.com/waiting", EnqueueOptions::default())
        .await
        .unwrap();

    let stats = h.service.get_friendly_stats().await;
    assert_eq!(stats.size, 2);
    assert_eq!(stats.counts.completed, 1);
    assert_eq!(stats.counts.pending, 1);
    assert_eq!(stats.max_concurrent_processes, 2);

    let view = h.service.public_view(&done);
    assert_eq!(
        view.urls,
        vec![format!("https://cdn.example.com/{}/output.mp3", done.id)]
    );
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["status"], "completed");
    assert!(json.get("forceReencode").is_none());
}

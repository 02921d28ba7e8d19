//! Floxy Core Library
//!
//! This crate provides the media cache behind the Floxy fetch proxy:
//! - A bounded-concurrency processing queue deduplicated by source URL
//! - Entry lifecycle tracking, persisted to SQLite for crash recovery
//! - Rename-based soft delete, TTL expiry and restore of cached files
//! - yt-dlp/ffmpeg adapters for downloading and describing media

pub mod config;
pub mod downloader;
pub mod entry;
pub mod error;
pub mod profile;
pub mod service;
pub mod store;
pub mod ytdlp;

pub use config::AppConfig;
pub use downloader::{MediaDownloader, MediaMetadata, MetadataParser};
pub use entry::{CacheEntry, EntryStatus, EntryView};
pub use error::{Error, Result};
pub use service::{DeleteMode, EnqueueOptions, MediaCacheService};
pub use store::{EntryStore, SqliteEntryStore};
pub use ytdlp::{YtDlpDownloader, YtDlpMetadataParser};

//! Floxy media cache daemon.
//!
//! URLs given on the command line are enqueued with the same options before
//! the scheduler starts. The daemon runs until Ctrl-C.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use floxy_core::config::AppConfig;
use floxy_core::profile::{ReencodeRequest, parse_profile_specifier, resolve_reencode};
use floxy_core::ytdlp::{self, YtDlpDownloader, YtDlpMetadataParser};
use floxy_core::{EnqueueOptions, MediaCacheService, SqliteEntryStore};
use tracing::{Level, error, info, warn};

use crate::logging::{LoggingConfig, LoggingError};

/// Top-level daemon failures.
#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Core(#[from] floxy_core::Error),

    #[error("Failed to wait for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Debug, Parser)]
#[command(name = "floxyd")]
#[command(about = "Floxy media cache daemon")]
#[command(version)]
struct CliArgs {
    /// Encode profile for enqueued URLs, e.g. `flac` or `mp3@192k`
    #[arg(long, value_parser = parse_profile)]
    profile: Option<ReencodeRequest>,

    /// TTL in seconds for enqueued URLs
    #[arg(long)]
    ttl: Option<u64>,

    /// Directory for log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Only print warnings and errors on the console
    #[arg(short, long)]
    quiet: bool,

    /// Media URLs to cache
    urls: Vec<String>,
}

/// Accept `name` or `name@bitrate`, rejecting unknown profiles and
/// out-of-range bitrates before anything touches the store.
fn parse_profile(spec: &str) -> Result<ReencodeRequest, String> {
    let request =
        parse_profile_specifier(spec).unwrap_or_else(|| ReencodeRequest::profile(spec.trim()));
    resolve_reencode(Some(&request)).map_err(|e| e.to_string())?;
    Ok(request)
}

impl CliArgs {
    fn logging_config(&self) -> LoggingConfig {
        let mut config = LoggingConfig::auto();
        if let Some(dir) = &self.log_dir {
            config = config.with_log_directory(dir.clone());
        }
        if self.quiet {
            config = config.with_console_level(Level::WARN);
        }
        config
    }

    fn enqueue_options(&self) -> EnqueueOptions {
        let mut options = EnqueueOptions::default().with_extra("source", "cli");
        if let Some(ttl) = self.ttl {
            options = options.with_ttl(ttl);
        }
        if let Some(reencode) = &self.profile {
            options = options.with_reencode(reencode.clone());
        }
        options
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("floxyd exited: {e}");
            eprintln!("floxyd: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CliArgs) -> Result<(), DaemonError> {
    let config = AppConfig::load()?;
    let _logging_guard = logging::init(&cli.logging_config())?;

    info!(
        cache_folder = %config.cache_folder.display(),
        database = %config.database_path.display(),
        max_concurrent = config.service.max_concurrent_processes,
        "Starting floxyd v{}",
        env!("CARGO_PKG_VERSION")
    );

    let store = Arc::new(SqliteEntryStore::open(&config.database_path)?);

    match ytdlp::version(&config.ytdlp).await {
        Ok(version) => info!("Using yt-dlp {version}"),
        Err(e) => warn!("yt-dlp probe failed, downloads will fail until it is installed: {e}"),
    }

    let service = MediaCacheService::new(
        &config,
        store,
        Arc::new(YtDlpDownloader::new(&config.ytdlp)),
        Arc::new(YtDlpMetadataParser::new(&config.ytdlp)),
    );

    let recovered = service.recover().await?;
    if recovered > 0 {
        info!("Requeued {recovered} interrupted entries");
    }

    let options = cli.enqueue_options();
    for url in &cli.urls {
        match service.enqueue(url, options.clone()).await {
            Ok(entry) => {
                let view = service.public_view(&entry);
                match serde_json::to_string(&view) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!("Failed to render entry {}: {e}", entry.id),
                }
            }
            Err(e) => error!("Failed to enqueue {url}: {e}"),
        }
    }

    service.start();
    info!("Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    service.stop();
    let stats = service.get_friendly_stats().await;
    info!(
        size = stats.size,
        active = stats.counts.active(),
        "floxyd stopped"
    );
    Ok(())
}

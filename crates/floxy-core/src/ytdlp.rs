//! yt-dlp backed implementations of [`MediaDownloader`] and [`MetadataParser`].
//!
//! yt-dlp does the fetching and hands transcoding to ffmpeg through its
//! post-processors. Progress is read from its `[download]` lines.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::YtDlpConfig;
use crate::downloader::{
    DownloadProgress, DownloadRequest, MediaDownloader, MediaMetadata, MetadataParser,
    ProgressCallback,
};
use crate::error::{Error, FileSystemError, Result};
use crate::profile::{EncodeParams, MediaKind};

const DEFAULT_BINARY: &str = "yt-dlp";

static PROGRESS_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*(\d+(?:\.\d+)?)\s*([KMG]i?B|B))?(?:\s+at\s+(\d+(?:\.\d+)?)\s*([KMG]i?B|B)/s)?(?:\s+ETA\s+(\d+(?::\d+){1,2}))?",
    )
    .ok()
});

/// Common invocation settings.
#[derive(Debug, Clone)]
struct YtDlpBinary {
    binary: PathBuf,
    ffmpeg: Option<PathBuf>,
}

impl YtDlpBinary {
    fn new(config: &YtDlpConfig) -> Self {
        Self {
            binary: config
                .binary_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY)),
            ffmpeg: config.ffmpeg_path.clone(),
        }
    }

    fn command(&self, cookies: Option<&Path>, extra_args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(ffmpeg) = &self.ffmpeg {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }
        if let Some(cookies) = cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.args(extra_args);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Report the installed yt-dlp version.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the binary cannot be run.
pub async fn version(config: &YtDlpConfig) -> Result<String> {
    let binary = YtDlpBinary::new(config);
    let output = Command::new(&binary.binary)
        .arg("--version")
        .output()
        .await
        .map_err(|e| {
            Error::Configuration(format!(
                "Failed to run {}: {e}",
                binary.binary.display()
            ))
        })?;

    if !output.status.success() {
        return Err(Error::Configuration(format!(
            "{} --version exited with {}",
            binary.binary.display(),
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Downloads and transcodes through yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: YtDlpBinary,
}

impl YtDlpDownloader {
    /// Create a downloader from tool settings.
    pub fn new(config: &YtDlpConfig) -> Self {
        Self {
            binary: YtDlpBinary::new(config),
        }
    }
}

/// yt-dlp arguments selecting output format for `encode`.
fn encode_args(encode: &EncodeParams) -> Vec<String> {
    match encode.kind {
        MediaKind::Audio => {
            let mut args = vec![
                "-f".to_string(),
                "bestaudio/best".to_string(),
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                audio_format(&encode.codec).to_string(),
            ];
            if let Some(bitrate) = encode.audio_bitrate {
                args.push("--audio-quality".to_string());
                args.push(format!("{}K", bitrate / 1000));
            }
            args
        }
        MediaKind::Video => {
            let mut postprocessor = format!("VideoConvertor:-c:v {}", encode.ffmpeg_codec);
            if let Some(crf) = encode.crf {
                postprocessor.push_str(&format!(" -crf {crf}"));
            }
            vec![
                "-f".to_string(),
                "bestvideo*+bestaudio/best".to_string(),
                "--recode-video".to_string(),
                encode.extension.clone(),
                "--postprocessor-args".to_string(),
                postprocessor,
            ]
        }
    }
}

fn audio_format(codec: &str) -> &str {
    match codec {
        "aac" => "m4a",
        other => other,
    }
}

/// Parse one `[download]` progress line.
pub fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
    let caps = PROGRESS_REGEX.as_ref()?.captures(line.trim())?;

    let percent: f64 = caps[1].parse().ok()?;
    let total_bytes = caps
        .get(2)
        .zip(caps.get(3))
        .and_then(|(value, unit)| to_bytes(value.as_str(), unit.as_str()));
    let speed_bps = caps
        .get(4)
        .zip(caps.get(5))
        .and_then(|(value, unit)| to_bytes(value.as_str(), unit.as_str()));
    let eta_secs = caps.get(6).and_then(|eta| {
        eta.as_str()
            .split(':')
            .try_fold(0u64, |acc, part| part.parse::<u64>().ok().map(|v| acc * 60 + v))
    });

    Some(DownloadProgress {
        percent,
        downloaded_bytes: total_bytes.map(|total| (total * percent / 100.0) as u64),
        total_bytes: total_bytes.map(|total| total as u64),
        speed_bps,
        eta_secs,
    })
}

fn to_bytes(value: &str, unit: &str) -> Option<f64> {
    let value: f64 = value.parse().ok()?;
    let multiplier = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        _ => return None,
    };
    Some(value * multiplier)
}

/// Move a produced `output.*` file to `expected` when yt-dlp picked another
/// extension (e.g. `.opus` for an ogg container). The newest candidate wins.
fn settle_output(expected: &Path) -> Result<()> {
    if expected.is_file() {
        return Ok(());
    }
    let Some(dir) = expected.parent() else {
        return Ok(());
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(());
    };

    let produced = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| {
            path.is_file()
                && path.file_stem().is_some_and(|stem| stem == "output")
                && path
                    .extension()
                    .is_some_and(|ext| ext != "part" && ext != "ytdl")
        })
        .max_by_key(|path| fs::metadata(path).and_then(|m| m.modified()).ok());

    if let Some(produced) = produced {
        debug!(
            "Renaming {} to {}",
            produced.display(),
            expected.display()
        );
        fs::rename(&produced, expected).map_err(|e| {
            Error::FileSystem(FileSystemError::RenameFailed {
                from: produced.clone(),
                to: expected.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
    }
    Ok(())
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    async fn download(
        &self,
        url: &str,
        request: DownloadRequest,
        on_progress: ProgressCallback,
    ) -> Result<String> {
        let expected = request.expected_output();
        let mut cmd = self
            .binary
            .command(request.cookies_path.as_deref(), &request.extra_args);
        cmd.arg("--newline")
            .arg("--no-playlist")
            .arg("-o")
            .arg(&request.output_template)
            .args(encode_args(&request.encode))
            .arg("--")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!("Starting yt-dlp for {}", url);
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Download(format!("Failed to start yt-dlp: {e}")))?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut log = String::new();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(progress) = parse_progress_line(&line) {
                    on_progress(progress);
                }
                log.push_str(&line);
                log.push('\n');
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        log.push_str(&stderr);

        if !status.success() {
            let last = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no output");
            warn!("yt-dlp exited with {} for {}", status, url);
            return Err(Error::Download(format!("yt-dlp exited with {status}: {last}")));
        }

        settle_output(&expected)?;
        Ok(log)
    }
}

/// Extracts metadata with `yt-dlp --dump-json`.
#[derive(Debug, Clone)]
pub struct YtDlpMetadataParser {
    binary: YtDlpBinary,
    cookies: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl YtDlpMetadataParser {
    /// Create a parser from tool settings.
    pub fn new(config: &YtDlpConfig) -> Self {
        Self {
            binary: YtDlpBinary::new(config),
            cookies: config.cookies_path.clone(),
            extra_args: config.extra_args.clone(),
        }
    }
}

#[async_trait]
impl MetadataParser for YtDlpMetadataParser {
    async fn parse_url(&self, url: &str) -> Result<MediaMetadata> {
        let output = self
            .binary
            .command(self.cookies.as_deref(), &self.extra_args)
            .arg("--dump-json")
            .arg("--no-download")
            .arg("--no-warnings")
            .arg("--")
            .arg(url)
            .output()
            .await
            .map_err(|e| Error::Metadata(format!("Failed to start yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Metadata(stderr.trim().to_string()));
        }

        parse_dump_json(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `--dump-json` output into [`MediaMetadata`].
///
/// Accepts one JSON document or JSON lines; playlists yield their first entry.
///
/// # Errors
///
/// Returns [`Error::Metadata`] when no JSON object can be read.
pub fn parse_dump_json(stdout: &str) -> Result<MediaMetadata> {
    let raw: Value = match serde_json::from_str(stdout.trim()) {
        Ok(value) => value,
        Err(_) => stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .find_map(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| Error::Metadata("No data returned from yt-dlp".to_string()))?,
    };

    let is_playlist = raw.get("_type").and_then(Value::as_str) == Some("playlist");
    let first_entry = raw
        .get("entries")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first());

    match first_entry {
        Some(entry) => Ok(normalize_entry(entry)),
        None if is_playlist => Err(Error::Metadata("Playlist has no entries".to_string())),
        None => Ok(normalize_entry(&raw)),
    }
}

fn normalize_entry(raw: &Value) -> MediaMetadata {
    let text = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let artist = text("artist").or_else(|| text("uploader"));
    let album_artist = match raw.get("album_artist") {
        Some(Value::Array(items)) => {
            let mut names: Vec<String> = Vec::new();
            for name in items.iter().filter_map(Value::as_str).map(str::trim) {
                if !name.is_empty() && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            Some(names)
        }
        Some(Value::String(joined)) => Some(
            joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => artist.clone().map(|a| vec![a]),
    };

    MediaMetadata {
        title: text("title")
            .or_else(|| text("track"))
            .unwrap_or_else(|| "Unknown Title".to_string()),
        artist,
        album: text("album"),
        album_artist,
        year: raw
            .get("release_year")
            .and_then(Value::as_i64)
            .and_then(|y| i32::try_from(y).ok()),
        genre: raw
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        duration: raw.get("duration").and_then(Value::as_f64),
        url: text("webpage_url").or_else(|| text("original_url")),
    }
}

/// A yt-dlp failure mapped to a stable code for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YtDlpFailure {
    /// HTTP-style status.
    pub status: u16,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable explanation for known failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    /// Raw message for unrecognised failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl YtDlpFailure {
    const fn known(status: u16, code: &'static str, message: &'static str) -> Self {
        Self {
            status,
            code,
            message: Some(message),
            error: None,
        }
    }

    /// Classify a raw yt-dlp error message.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();

        if lower.contains("youtube:truncated_id") {
            Self::known(
                400,
                "INVALID_ID",
                "The provided YouTube URL has an incomplete id (looks truncated).",
            )
        } else if lower.contains("youtube:truncated_url") {
            Self::known(400, "INVALID_URL", "The provided YouTube URL is invalid.")
        } else if lower.contains("account has been terminated") {
            Self::known(
                404,
                "VIDEO_TERMINATED",
                "The video is no longer available because the source account has been terminated.",
            )
        } else if lower.contains("sign in to confirm your age") {
            Self::known(
                403,
                "ACCESS_DENIED_AGE_RESTRICTED",
                "The requested content is age restricted and requires authentication.",
            )
        } else if lower.contains("private video") {
            Self::known(
                403,
                "ACCESS_DENIED_PRIVATE_VIDEO",
                "The requested video is private and cannot be accessed.",
            )
        } else {
            Self {
                status: 500,
                code: "UNKNOWN_YTDLP_ERROR",
                message: None,
                error: Some(raw.to_string()),
            }
        }
    }
}

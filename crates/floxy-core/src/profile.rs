//! Encode profile catalog.
//!
//! A static table of named presets (container, codec, bitrate bounds) used to
//! validate reencode requests and to derive the parameters handed to the
//! external transcoder.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Sentinel profile name selecting the default audio profile.
pub const AUDIO_SENTINEL: &str = "AUDIO";

/// Sentinel profile name selecting the default video profile.
pub const VIDEO_SENTINEL: &str = "VIDEO";

/// Profile used when a request names none, or names [`AUDIO_SENTINEL`].
pub const DEFAULT_AUDIO_PROFILE: &str = "mp3";

/// Profile used for [`VIDEO_SENTINEL`].
pub const DEFAULT_VIDEO_PROFILE: &str = "mp4-h264";

/// Upper bound applied by [`parse_bitrate`] (1 Gbit/s).
pub const MAX_BITRATE_BITS: u32 = 1_000_000_000;

/// Kind of media a profile produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio-only output.
    Audio,
    /// Video output.
    Video,
}

/// Accepted audio bitrate bounds, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitrateRange {
    /// Lowest accepted bitrate.
    pub min: u32,
    /// Highest accepted bitrate.
    pub max: u32,
    /// Bitrate used when the request does not name one.
    pub default: u32,
}

impl BitrateRange {
    const fn new(min: u32, max: u32, default: u32) -> Self {
        Self { min, max, default }
    }

    /// Whether `bitrate` falls inside `[min, max]`.
    pub const fn contains(&self, bitrate: u32) -> bool {
        bitrate >= self.min && bitrate <= self.max
    }
}

/// A named target encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncodingProfile {
    /// Catalog name, e.g. `mp3` or `webm-vp9`.
    pub name: &'static str,
    /// Output container; also the cached file's extension.
    pub format: &'static str,
    /// Codec short name.
    pub codec: &'static str,
    /// Audio or video.
    pub kind: MediaKind,
    /// Configurable bitrate bounds; `None` for lossless and video profiles.
    pub audio_bitrate: Option<BitrateRange>,
}

/// All known profiles.
pub static PROFILES: &[EncodingProfile] = &[
    EncodingProfile {
        name: "mp4-h264",
        format: "mp4",
        codec: "h264",
        kind: MediaKind::Video,
        audio_bitrate: None,
    },
    EncodingProfile {
        name: "mp4-hevc",
        format: "mp4",
        codec: "hevc",
        kind: MediaKind::Video,
        audio_bitrate: None,
    },
    EncodingProfile {
        name: "webm-vp9",
        format: "webm",
        codec: "vp9",
        kind: MediaKind::Video,
        audio_bitrate: None,
    },
    EncodingProfile {
        name: "webm-av1",
        format: "webm",
        codec: "av1",
        kind: MediaKind::Video,
        audio_bitrate: None,
    },
    EncodingProfile {
        name: "mp3",
        format: "mp3",
        codec: "mp3",
        kind: MediaKind::Audio,
        audio_bitrate: Some(BitrateRange::new(64_000, 320_000, 192_000)),
    },
    EncodingProfile {
        name: "ogg-vorbis",
        format: "ogg",
        codec: "vorbis",
        kind: MediaKind::Audio,
        audio_bitrate: Some(BitrateRange::new(48_000, 256_000, 128_000)),
    },
    EncodingProfile {
        name: "ogg-opus",
        format: "ogg",
        codec: "opus",
        kind: MediaKind::Audio,
        audio_bitrate: Some(BitrateRange::new(6_000, 510_000, 128_000)),
    },
    EncodingProfile {
        name: "m4a-aac",
        format: "m4a",
        codec: "aac",
        kind: MediaKind::Audio,
        audio_bitrate: Some(BitrateRange::new(64_000, 320_000, 192_000)),
    },
    EncodingProfile {
        name: "flac",
        format: "flac",
        codec: "flac",
        kind: MediaKind::Audio,
        audio_bitrate: None,
    },
];

impl EncodingProfile {
    /// ffmpeg encoder name for this profile's codec.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self.codec {
            "mp3" => "libmp3lame",
            "vorbis" => "libvorbis",
            "opus" => "libopus",
            "h264" => "libx264",
            "hevc" => "libx265",
            "vp9" => "libvpx-vp9",
            "av1" => "libaom-av1",
            // aac and flac use ffmpeg's native encoders of the same name
            _ => self.codec,
        }
    }

    /// Default constant rate factor for video codecs.
    pub fn default_crf(&self) -> Option<u8> {
        match self.codec {
            "h264" => Some(22),
            "hevc" => Some(26),
            "vp9" => Some(30),
            "av1" => Some(32),
            _ => None,
        }
    }

    /// Parameters for the external transcoder.
    pub fn encode_params(&self, bitrate: Option<u32>) -> EncodeParams {
        EncodeParams {
            kind: self.kind,
            extension: self.format.to_string(),
            codec: self.codec.to_string(),
            ffmpeg_codec: self.ffmpeg_codec().to_string(),
            audio_bitrate: self
                .audio_bitrate
                .map(|range| bitrate.unwrap_or(range.default)),
            crf: self.default_crf(),
        }
    }
}

/// Encode parameters derived from a resolved profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
    /// Audio or video.
    pub kind: MediaKind,
    /// Output container extension.
    pub extension: String,
    /// Codec short name.
    pub codec: String,
    /// ffmpeg encoder name.
    pub ffmpeg_codec: String,
    /// Audio bitrate in bits per second, when configurable.
    pub audio_bitrate: Option<u32>,
    /// Constant rate factor for video encodes.
    pub crf: Option<u8>,
}

/// Reencode parameters as requested by a caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReencodeRequest {
    /// Profile name or sentinel; `None` selects the default audio profile.
    pub profile: Option<String>,
    /// Requested bitrate in bits per second.
    pub bitrate: Option<u32>,
}

impl ReencodeRequest {
    /// Request a named profile with its default bitrate.
    pub fn profile(name: impl Into<String>) -> Self {
        Self {
            profile: Some(name.into()),
            bitrate: None,
        }
    }

    /// Set the bitrate.
    #[must_use]
    pub const fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }
}

/// Resolved reencode parameters stored on an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReencodeOptions {
    /// Canonical profile name.
    pub profile: String,
    /// Effective bitrate; `None` when the profile has no bitrate range.
    pub bitrate: Option<u32>,
}

impl Default for ReencodeOptions {
    fn default() -> Self {
        let range = get_profile(DEFAULT_AUDIO_PROFILE).and_then(|p| p.audio_bitrate);
        Self {
            profile: DEFAULT_AUDIO_PROFILE.to_string(),
            bitrate: range.map(|r| r.default),
        }
    }
}

impl ReencodeOptions {
    /// The catalog profile these options refer to.
    pub fn encoding_profile(&self) -> Result<&'static EncodingProfile, ProfileError> {
        get_profile(&self.profile).ok_or_else(|| ProfileError::NotFound(self.profile.clone()))
    }
}

/// Look up a profile by its exact catalog name.
pub fn get_profile(name: &str) -> Option<&'static EncodingProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

/// Resolve a profile name, honoring the default and the sentinel names.
pub fn resolve_profile(name: Option<&str>) -> Result<&'static EncodingProfile, ProfileError> {
    let canonical = match name {
        None | Some(AUDIO_SENTINEL) => DEFAULT_AUDIO_PROFILE,
        Some(VIDEO_SENTINEL) => DEFAULT_VIDEO_PROFILE,
        Some(other) => other,
    };
    get_profile(canonical).ok_or_else(|| ProfileError::NotFound(canonical.to_string()))
}

/// Check `bitrate` against a profile's range.
///
/// Returns `None` when the profile has no configurable bitrate, and
/// `Some(false)` for unknown profiles.
pub fn validate_bitrate(profile_name: &str, bitrate: u32) -> Option<bool> {
    let Ok(profile) = resolve_profile(Some(profile_name)) else {
        return Some(false);
    };
    profile.audio_bitrate.map(|range| range.contains(bitrate))
}

/// Validate a caller's reencode request and resolve it to stored options.
pub fn resolve_reencode(
    request: Option<&ReencodeRequest>,
) -> Result<ReencodeOptions, ProfileError> {
    let profile = resolve_profile(request.and_then(|r| r.profile.as_deref()))?;
    let requested = request.and_then(|r| r.bitrate);

    let bitrate = match (profile.audio_bitrate, requested) {
        (Some(range), Some(bitrate)) if !range.contains(bitrate) => {
            return Err(ProfileError::BitrateOutOfRange {
                profile: profile.name.to_string(),
                bitrate,
                min: range.min,
                max: range.max,
            });
        }
        (Some(_), Some(bitrate)) => Some(bitrate),
        (Some(range), None) => Some(range.default),
        // Lossless and video profiles ignore a requested bitrate.
        (None, _) => None,
    };

    Ok(ReencodeOptions {
        profile: profile.name.to_string(),
        bitrate,
    })
}

static BITRATE_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)([kmg])$").ok());

static PROFILE_SPECIFIER_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-z0-9-]+)@(\d+(?:\.\d+)?[kmg]?)$").ok());

/// Parse a bitrate such as `192k`, `1.5m` or `320000` into bits per second.
///
/// Unparsable input yields 0; results are clamped to [`MAX_BITRATE_BITS`].
pub fn parse_bitrate(input: &str) -> u32 {
    let lower = input.trim().to_lowercase();

    let captures = BITRATE_REGEX.as_ref().and_then(|re| re.captures(&lower));
    let bits = if let Some(caps) = captures {
        let value: f64 = caps[1].parse().unwrap_or(0.0);
        let multiplier = match &caps[2] {
            "k" => 1e3,
            "m" => 1e6,
            _ => 1e9,
        };
        value * multiplier
    } else {
        lower.parse::<f64>().unwrap_or(0.0)
    };

    if !bits.is_finite() || bits <= 0.0 {
        return 0;
    }
    bits.min(f64::from(MAX_BITRATE_BITS)) as u32
}

/// Parse a `profile@bitrate` specifier, e.g. `mp3@192k`.
pub fn parse_profile_specifier(spec: &str) -> Option<ReencodeRequest> {
    let caps = PROFILE_SPECIFIER_REGEX.as_ref()?.captures(spec.trim())?;
    Some(ReencodeRequest {
        profile: Some(caps[1].to_string()),
        bitrate: Some(parse_bitrate(&caps[2])),
    })
}

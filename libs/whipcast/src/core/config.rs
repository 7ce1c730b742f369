// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Negotiation parameters and the broadcast configuration file (`whipcast.toml`).

use crate::core::{Result, WhipcastError};
use crate::whip::WhipConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Caller-facing bitrates are kbps; the engine always receives bits/sec.
pub fn kbps_to_bps(kbps: u32) -> u32 {
    kbps.saturating_mul(1000)
}

// ============================================================================
// CODECS
// ============================================================================

/// Preferred video codec as the user names it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    #[default]
    #[serde(rename = "VP8")]
    Vp8,
    #[serde(rename = "VP9")]
    Vp9,
    #[serde(rename = "H264 Baseline")]
    H264Baseline,
    #[serde(rename = "H264 High")]
    H264High,
    #[serde(rename = "H265")]
    H265,
    #[serde(rename = "AV1")]
    Av1,
}

impl VideoCodec {
    /// Parses a user-facing codec name. Unknown names fall back to VP8.
    pub fn from_name(name: &str) -> Self {
        match name {
            "VP9" => Self::Vp9,
            "H264" | "H264 Baseline" => Self::H264Baseline,
            "H264 High" => Self::H264High,
            "H265" => Self::H265,
            "AV1" => Self::Av1,
            _ => Self::Vp8,
        }
    }

    /// Encoding name as it appears in `a=rtpmap` lines.
    pub fn sdp_name(self) -> &'static str {
        match self {
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::H264Baseline | Self::H264High => "H264",
            Self::H265 => "H265",
            Self::Av1 => "AV1",
        }
    }

    /// Prefix of the `profile-level-id` fmtp parameter that identifies the profile.
    pub fn profile_level_id_prefix(self) -> Option<&'static str> {
        match self {
            Self::H264Baseline => Some("42e0"),
            Self::H264High => Some("640c"),
            _ => None,
        }
    }

    pub fn mime_type(self) -> String {
        format!("video/{}", self.sdp_name())
    }
}

// ============================================================================
// SIMULCAST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulcastLayer {
    pub rid: String,
    pub scale_resolution_down_by: f64,
    pub min_bitrate_bps: u32,
    pub max_bitrate_bps: u32,
    pub max_framerate: u32,
}

impl SimulcastLayer {
    fn new(rid: &str, scale: f64, max_bitrate_bps: u32, max_framerate: u32) -> Self {
        Self {
            rid: rid.to_owned(),
            scale_resolution_down_by: scale,
            min_bitrate_bps: 100_000,
            max_bitrate_bps,
            max_framerate,
        }
    }

    /// low / mid / high, sent in that order.
    pub fn default_layers() -> Vec<Self> {
        vec![
            Self::new("low", 4.0, 500_000, 15),
            Self::new("mid", 2.0, 1_000_000, 15),
            Self::new("high", 1.0, 2_000_000, 30),
        ]
    }
}

// ============================================================================
// AUDIO PROCESSING
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProcessing {
    pub no_audio_processing: bool,
    pub disable_builtin_aec: bool,
    pub disable_builtin_agc: bool,
    pub disable_builtin_ns: bool,
    pub disable_webrtc_agc_and_hpf: bool,
}

impl AudioProcessing {
    /// Mandatory audio-source constraints.
    pub fn constraints(&self) -> Vec<(String, String)> {
        if !self.no_audio_processing {
            return Vec::new();
        }
        [
            "googEchoCancellation",
            "googAutoGainControl",
            "googHighpassFilter",
            "googNoiseSuppression",
        ]
        .iter()
        .map(|key| ((*key).to_owned(), "false".to_owned()))
        .collect()
    }
}

// ============================================================================
// NEGOTIATION PARAMETERS
// ============================================================================

/// Fallbacks applied when a parameter is left at zero, plus the fixed track ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u32,
    pub video_max_bitrate_kbps: u32,
    pub video_track_id: String,
    pub audio_track_id: String,
    pub stream_id: String,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            video_width: 1920,
            video_height: 1080,
            video_fps: 30,
            video_max_bitrate_kbps: 1000,
            video_track_id: "ARDAMSv0".to_owned(),
            audio_track_id: "ARDAMSa0".to_owned(),
            stream_id: "ARDAMS".to_owned(),
        }
    }
}

/// Resolution and frame rate the capture source is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Fixed for the lifetime of a session; the controller takes its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationParameters {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    /// 0 means "use the default resolution".
    pub video_width: u32,
    pub video_height: u32,
    /// 0 means "use the default frame rate".
    pub video_fps: u32,
    /// 0 means "use the default maximum".
    pub video_max_bitrate_kbps: u32,
    /// Start-bitrate hint written into the remote description. 0 disables it.
    pub video_start_bitrate_kbps: u32,
    pub video_codec: VideoCodec,
    pub video_codec_hw_acceleration: bool,
    pub video_flexfec_enabled: bool,
    pub simulcast_enabled: bool,
    pub simulcast_layers: Vec<SimulcastLayer>,
    /// Written as `maxaveragebitrate` into the remote description. 0 disables it.
    pub audio_start_bitrate_kbps: u32,
    pub audio_codec: String,
    pub audio_processing: AudioProcessing,
    pub enable_cpu_overuse_detection: bool,
    pub defaults: SessionDefaults,
}

impl Default for NegotiationParameters {
    fn default() -> Self {
        Self {
            video_enabled: true,
            audio_enabled: false,
            video_width: 0,
            video_height: 0,
            video_fps: 0,
            video_max_bitrate_kbps: 0,
            video_start_bitrate_kbps: 0,
            video_codec: VideoCodec::default(),
            video_codec_hw_acceleration: true,
            video_flexfec_enabled: false,
            simulcast_enabled: false,
            simulcast_layers: SimulcastLayer::default_layers(),
            audio_start_bitrate_kbps: 32,
            audio_codec: "opus".to_owned(),
            audio_processing: AudioProcessing::default(),
            enable_cpu_overuse_detection: false,
            defaults: SessionDefaults::default(),
        }
    }
}

impl NegotiationParameters {
    /// Resolution falls back as a pair: either dimension at zero selects the default.
    pub fn capture_format(&self) -> CaptureFormat {
        let (width, height) = if self.video_width == 0 || self.video_height == 0 {
            (self.defaults.video_width, self.defaults.video_height)
        } else {
            (self.video_width, self.video_height)
        };
        let fps = if self.video_fps == 0 {
            self.defaults.video_fps
        } else {
            self.video_fps
        };
        CaptureFormat { width, height, fps }
    }

    pub fn video_max_bitrate_bps(&self) -> u32 {
        let kbps = if self.video_max_bitrate_kbps == 0 {
            self.defaults.video_max_bitrate_kbps
        } else {
            self.video_max_bitrate_kbps
        };
        kbps_to_bps(kbps)
    }

    pub fn field_trials(&self) -> String {
        let mut trials = String::new();
        if self.video_flexfec_enabled {
            trials.push_str("WebRTC-FlexFEC-03-Advertised/Enabled/WebRTC-FlexFEC-03/Enabled/");
        }
        if self.audio_processing.disable_webrtc_agc_and_hpf {
            trials.push_str("WebRTC-Audio-MinimizeResamplingOnMobile/Enabled/");
        }
        trials
    }
}

// ============================================================================
// BROADCAST CONFIGURATION FILE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub whip: WhipConfig,
    /// JSON file holding persisted session state (relay credentials).
    pub state_path: Option<PathBuf>,
    /// Statistics polling period. Absent disables stats events.
    pub stats_interval_ms: Option<u64>,
    pub parameters: NegotiationParameters,
}

impl BroadcastConfig {
    pub const FILE_NAME: &'static str = "whipcast.toml";

    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WhipcastError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            WhipcastError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::info!("Loaded broadcast config from {}", path.display());
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No {} found, using defaults", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }
}

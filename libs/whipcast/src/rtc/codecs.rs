// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Codec table registered with the webrtc-rs media engine.

use crate::core::{Result, VideoCodec, WhipcastError};
use crate::sdp::{CodecCapability, MediaKind, PROFILE_LEVEL_ID};
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

struct CodecEntry {
    mime_type: &'static str,
    clock_rate: u32,
    channels: u16,
    fmtp: &'static str,
    payload_type: u8,
}

const VIDEO_CODECS: &[CodecEntry] = &[
    CodecEntry {
        mime_type: "video/VP8",
        clock_rate: 90000,
        channels: 0,
        fmtp: "",
        payload_type: 96,
    },
    CodecEntry {
        mime_type: "video/VP9",
        clock_rate: 90000,
        channels: 0,
        fmtp: "profile-id=0",
        payload_type: 98,
    },
    CodecEntry {
        mime_type: "video/H264",
        clock_rate: 90000,
        channels: 0,
        fmtp: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        payload_type: 102,
    },
    CodecEntry {
        mime_type: "video/H264",
        clock_rate: 90000,
        channels: 0,
        fmtp: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=640c1f",
        payload_type: 104,
    },
    CodecEntry {
        mime_type: "video/H265",
        clock_rate: 90000,
        channels: 0,
        fmtp: "",
        payload_type: 106,
    },
    CodecEntry {
        mime_type: "video/AV1",
        clock_rate: 90000,
        channels: 0,
        fmtp: "",
        payload_type: 45,
    },
];

const AUDIO_CODECS: &[CodecEntry] = &[CodecEntry {
    mime_type: "audio/opus",
    clock_rate: 48000,
    channels: 2,
    fmtp: "minptime=10;useinbandfec=1",
    payload_type: 111,
}];

fn table(kind: MediaKind) -> &'static [CodecEntry] {
    match kind {
        MediaKind::Audio => AUDIO_CODECS,
        MediaKind::Video => VIDEO_CODECS,
    }
}

pub(crate) fn rtp_codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

impl CodecEntry {
    fn name(&self) -> &'static str {
        self.mime_type
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(self.mime_type)
    }

    fn rtp_capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type.to_owned(),
            clock_rate: self.clock_rate,
            channels: self.channels,
            sdp_fmtp_line: self.fmtp.to_owned(),
            rtcp_feedback: vec![],
        }
    }

    fn rtp_parameters(&self) -> RTCRtpCodecParameters {
        RTCRtpCodecParameters {
            capability: self.rtp_capability(),
            payload_type: self.payload_type,
            ..Default::default()
        }
    }

    fn capability(&self, kind: MediaKind) -> CodecCapability {
        let mut capability = CodecCapability::new(self.name(), kind, self.clock_rate);
        for parameter in self.fmtp.split(';').filter(|p| !p.is_empty()) {
            if let Some((key, value)) = parameter.split_once('=') {
                capability = capability.with_parameter(key, value);
            }
        }
        capability
    }

    fn matches(&self, capability: &CodecCapability) -> bool {
        self.name().eq_ignore_ascii_case(&capability.name)
            && self.capability(capability.kind).profile_level_id() == capability.profile_level_id()
    }
}

pub(crate) fn register_codecs(media_engine: &mut RtcMediaEngine) -> Result<()> {
    for kind in [MediaKind::Video, MediaKind::Audio] {
        for entry in table(kind) {
            media_engine
                .register_codec(entry.rtp_parameters(), rtp_codec_type(kind))
                .map_err(|e| {
                    WhipcastError::Configuration(format!(
                        "Failed to register {} codec: {}",
                        entry.mime_type, e
                    ))
                })?;
        }
    }
    Ok(())
}

pub(crate) fn sender_capabilities(kind: MediaKind) -> Vec<CodecCapability> {
    table(kind).iter().map(|entry| entry.capability(kind)).collect()
}

/// Maps an ordered capability list back to registered codec parameters.
pub(crate) fn to_rtp_parameters(codecs: &[CodecCapability]) -> Vec<RTCRtpCodecParameters> {
    codecs
        .iter()
        .filter_map(|capability| {
            table(capability.kind)
                .iter()
                .find(|entry| entry.matches(capability))
                .map(CodecEntry::rtp_parameters)
        })
        .collect()
}

pub(crate) fn video_track_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    let prefix = codec.profile_level_id_prefix();
    VIDEO_CODECS
        .iter()
        .find(|entry| {
            entry.name() == codec.sdp_name()
                && match prefix {
                    Some(prefix) => entry.fmtp.contains(&format!("{}={}", PROFILE_LEVEL_ID, prefix)),
                    None => true,
                }
        })
        .unwrap_or(&VIDEO_CODECS[0])
        .rtp_capability()
}

pub(crate) fn audio_track_capability(codec: &str) -> RTCRtpCodecCapability {
    AUDIO_CODECS
        .iter()
        .find(|entry| entry.name().eq_ignore_ascii_case(codec))
        .unwrap_or(&AUDIO_CODECS[0])
        .rtp_capability()
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::MediaKind;
use super::lines::{SdpLine, SdpLines};
use crate::core::kbps_to_bps;

const VIDEO_START_BITRATE: &str = "x-google-start-bitrate";
const AUDIO_MAX_AVERAGE_BITRATE: &str = "maxaveragebitrate";

// ============================================================================
// CODEC ORDERING
// ============================================================================

/// Moves the first payload type bound to `codec`, by `a=rtpmap` line order, to
/// the front of the format list of every `kind` media section. Other payload
/// types of the same codec keep their place. Returns the input unchanged when
/// no section carries the codec or it already leads.
pub fn prefer_codec(sdp: &str, codec: &str, kind: MediaKind) -> String {
    let mut lines = SdpLines::parse(sdp);
    let mut changed = false;

    for (start, end) in lines.media_sections(kind.as_str()) {
        let SdpLine::Media(media) = &lines.parsed[start] else {
            continue;
        };
        let Some(preferred) = lines.parsed[start..end].iter().find_map(|line| match line {
            SdpLine::RtpMap(rtpmap) if rtpmap.encoding_name.eq_ignore_ascii_case(codec) => {
                let payload_type = rtpmap.payload_type.to_string();
                media.formats.contains(&payload_type).then_some(payload_type)
            }
            _ => None,
        }) else {
            continue;
        };

        let mut reordered = media.clone();
        reordered.formats = std::iter::once(preferred.clone())
            .chain(
                media
                    .formats
                    .iter()
                    .filter(|format| **format != preferred)
                    .cloned(),
            )
            .collect();

        if reordered.formats != media.formats {
            tracing::debug!(
                "[SdpTransform] Preferring {} in {} section: {:?}",
                codec,
                kind,
                reordered.formats
            );
            lines.replace(start, reordered.to_line());
            changed = true;
        }
    }

    if !changed {
        return sdp.to_owned();
    }
    lines.join()
}

// ============================================================================
// START BITRATE
// ============================================================================

/// Annotates the payload type bound to `codec` with a starting bitrate.
///
/// Video gets `x-google-start-bitrate=<kbps>`, audio gets
/// `maxaveragebitrate=<kbps * 1000>`. An existing `a=fmtp` line for the
/// payload type is extended, otherwise a new one is inserted right after the
/// `a=rtpmap` line.
pub fn set_start_bitrate(codec: &str, is_video: bool, sdp: &str, bitrate_kbps: u32) -> String {
    let mut lines = SdpLines::parse(sdp);

    let Some((rtpmap_index, payload_type)) =
        lines
            .parsed
            .iter()
            .enumerate()
            .find_map(|(index, line)| match line {
                SdpLine::RtpMap(rtpmap) if rtpmap.encoding_name.eq_ignore_ascii_case(codec) => {
                    Some((index, rtpmap.payload_type))
                }
                _ => None,
            })
    else {
        tracing::warn!("[SdpTransform] No rtpmap for {} codec", codec);
        return sdp.to_owned();
    };

    let parameter = if is_video {
        format!("{}={}", VIDEO_START_BITRATE, bitrate_kbps)
    } else {
        format!("{}={}", AUDIO_MAX_AVERAGE_BITRATE, kbps_to_bps(bitrate_kbps))
    };

    let fmtp_index = lines.parsed.iter().position(
        |line| matches!(line, SdpLine::Fmtp { payload_type: pt, .. } if *pt == payload_type),
    );

    match fmtp_index {
        Some(index) => {
            let extended = format!("{}; {}", lines.raw[index], parameter);
            tracing::debug!("[SdpTransform] Modified fmtp line: {}", extended);
            lines.replace(index, extended);
        }
        None => {
            let inserted = format!("a=fmtp:{} {}", payload_type, parameter);
            tracing::debug!("[SdpTransform] Added fmtp line: {}", inserted);
            lines.insert(rtpmap_index + 1, inserted);
        }
    }

    lines.join()
}

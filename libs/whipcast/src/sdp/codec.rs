// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::MediaKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PROFILE_LEVEL_ID: &str = "profile-level-id";

/// One sender codec as reported by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub name: String,
    pub kind: MediaKind,
    pub clock_rate: u32,
    pub parameters: BTreeMap<String, String>,
}

impl CodecCapability {
    pub fn new(name: impl Into<String>, kind: MediaKind, clock_rate: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            clock_rate,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn profile_level_id(&self) -> Option<&str> {
        self.parameters.get(PROFILE_LEVEL_ID).map(String::as_str)
    }
}

/// Promotes the first capability named `preferred_name` to the front.
///
/// When the hint and the capability's `profile-level-id` are both present the
/// profile must contain the hint; otherwise the name alone qualifies. Everything
/// else keeps its relative order.
pub fn select_codec_preference_list(
    capabilities: &[CodecCapability],
    preferred_name: &str,
    preferred_profile: Option<&str>,
) -> Vec<CodecCapability> {
    let mut ordered = capabilities.to_vec();

    let selected = ordered.iter().position(|codec| {
        if codec.name != preferred_name {
            return false;
        }
        match (codec.profile_level_id(), preferred_profile) {
            (Some(profile), Some(prefix)) => profile.contains(prefix),
            _ => true,
        }
    });

    match selected {
        Some(index) => {
            let codec = ordered.remove(index);
            tracing::debug!(
                "[SdpTransform] Preferred sender codec: {} {:?}",
                codec.name,
                codec.profile_level_id()
            );
            ordered.insert(0, codec);
        }
        None => {
            tracing::debug!(
                "[SdpTransform] {} not in sender capabilities, keeping engine order",
                preferred_name
            );
        }
    }

    ordered
}

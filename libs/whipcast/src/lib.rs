// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::type_complexity)] // Channel tuples are clear in context
#![allow(clippy::new_without_default)]

//! Outbound WebRTC publishing over WHIP.
//!
//! - [`sdp`]: codec reordering and bitrate annotation on session descriptions
//! - [`ice`]: relay server entries from `Link` headers or persisted state
//! - [`whip`]: create/delete of the remote ingest resource
//! - [`negotiation`]: the session controller tying it all together
//! - [`rtc`]: the webrtc-rs engine the controller drives in production

pub mod core;
pub mod ice;
pub mod negotiation;
pub mod rtc;
pub mod sdp;
pub mod whip;

pub use crate::core::{
    AudioProcessing, BroadcastConfig, CaptureFormat, NegotiationParameters, Result,
    SessionDefaults, SimulcastLayer, VideoCodec, WhipcastError,
};
pub use ice::{FileStateStore, IceServerDirectory, IceServerEntry, MemoryStateStore, StateStore};
pub use negotiation::{
    CaptureSource, MediaEngine, MediaSources, NegotiationState, PeerConnectionClient,
    PeerConnectionEvent, SessionOptions,
};
pub use rtc::{H264FileSource, WebRtcEngine};
pub use sdp::{SdpType, SessionDescription};
pub use whip::{RemoteSession, WhipClient, WhipConfig};

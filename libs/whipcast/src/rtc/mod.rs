// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! [`MediaEngine`](crate::negotiation::MediaEngine) implementation on webrtc-rs,
//! plus a file-backed capture source for publishing pre-encoded H.264.

mod codecs;
mod engine;
mod file_source;

pub use engine::WebRtcEngine;
pub use file_source::H264FileSource;

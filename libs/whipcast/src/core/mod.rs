// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod config;
pub mod error;

pub use config::{
    AudioProcessing, BroadcastConfig, CaptureFormat, NegotiationParameters, SessionDefaults,
    SimulcastLayer, VideoCodec, kbps_to_bps,
};
pub use error::{Result, WhipcastError};

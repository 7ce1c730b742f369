// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The media engine's public negotiation surface, as the controller drives it.

use super::media::SampleSink;
use crate::core::{CaptureFormat, Result, SimulcastLayer, VideoCodec};
use crate::ice::IceServerEntry;
use crate::sdp::{CodecCapability, MediaKind, SessionDescription};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// CONFIGURATION HANDED TO THE ENGINE
// ============================================================================

/// Options for the engine-wide factory, applied once before any connection exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactoryOptions {
    pub field_trials: String,
    pub video_codec_hw_acceleration: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

/// Connection settings. Bundling is always max-bundle and RTCP is always multiplexed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub ice_servers: Vec<IceServerEntry>,
    pub ice_transport_policy: IceTransportPolicy,
    /// TCP candidates are gathered only when relays are configured.
    pub tcp_candidates: bool,
    pub continual_gathering: bool,
    pub enable_cpu_overuse_detection: bool,
}

impl ConnectionConfig {
    /// Relay-only transport whenever any ICE server entry is present.
    pub fn new(ice_servers: Vec<IceServerEntry>, enable_cpu_overuse_detection: bool) -> Self {
        let has_servers = !ice_servers.is_empty();
        Self {
            ice_servers,
            ice_transport_policy: if has_servers {
                IceTransportPolicy::Relay
            } else {
                IceTransportPolicy::All
            },
            tcp_candidates: has_servers,
            continual_gathering: true,
            enable_cpu_overuse_detection,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackConfig {
    pub track_id: String,
    pub stream_id: String,
    pub codec: VideoCodec,
    pub format: CaptureFormat,
    /// Empty unless simulcast is enabled.
    pub simulcast_layers: Vec<SimulcastLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrackConfig {
    pub track_id: String,
    pub stream_id: String,
    pub codec: String,
    pub constraints: Vec<(String, String)>,
}

/// Send-only session: the offer never asks to receive media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferConstraints {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
}

// ============================================================================
// ENGINE OUTPUTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    pub candidate: String,
}

impl IceCandidate {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u16, candidate: impl Into<String>) -> Self {
        Self {
            sdp_mid: Some(sdp_mid.into()),
            sdp_mline_index: Some(sdp_mline_index),
            candidate: candidate.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Statistics snapshot; one JSON object per engine stats entry, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub timestamp_ms: u64,
    pub entries: serde_json::Map<String, serde_json::Value>,
}

/// Engine callbacks, redispatched onto the controller's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    IceCandidate(IceCandidate),
    IceCandidatesRemoved(Vec<IceCandidate>),
    IceConnectionState(IceConnectionState),
    PeerConnectionState(PeerConnectionState),
}

/// Handle the engine uses to report connection callbacks.
///
/// Clone freely into engine callback closures. Events sent after the
/// controller has stopped are dropped.
#[derive(Debug, Clone)]
pub struct EngineObserver {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineObserver {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("[PeerConnectionClient] Engine event after controller stopped");
        }
    }

    pub fn on_ice_candidate(&self, candidate: IceCandidate) {
        self.notify(EngineEvent::IceCandidate(candidate));
    }

    pub fn on_ice_candidates_removed(&self, candidates: Vec<IceCandidate>) {
        self.notify(EngineEvent::IceCandidatesRemoved(candidates));
    }

    pub fn on_ice_connection_state(&self, state: IceConnectionState) {
        self.notify(EngineEvent::IceConnectionState(state));
    }

    pub fn on_connection_state(&self, state: PeerConnectionState) {
        self.notify(EngineEvent::PeerConnectionState(state));
    }
}

// ============================================================================
// MEDIA ENGINE
// ============================================================================

/// Negotiation surface of a WebRTC engine.
///
/// Only the session controller calls into this, always from its own task,
/// so implementations need no internal locking for call ordering.
pub trait MediaEngine: Send + 'static {
    /// Creates the engine factory. Must precede every other call.
    fn initialize_factory(&mut self, options: FactoryOptions) -> impl Future<Output = Result<()>> + Send;

    fn create_connection(
        &mut self,
        config: ConnectionConfig,
        observer: EngineObserver,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Adds the outgoing video track and returns the sink capture frames are pushed into.
    fn add_video_track(
        &mut self,
        config: VideoTrackConfig,
    ) -> impl Future<Output = Result<Arc<dyn SampleSink>>> + Send;

    fn add_audio_track(
        &mut self,
        config: AudioTrackConfig,
    ) -> impl Future<Output = Result<Arc<dyn SampleSink>>> + Send;

    /// Sender codecs for `kind`, in the engine's default preference order.
    fn sender_codec_capabilities(&self, kind: MediaKind) -> Vec<CodecCapability>;

    fn set_codec_preferences(
        &mut self,
        kind: MediaKind,
        codecs: Vec<CodecCapability>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn create_offer(
        &mut self,
        constraints: OfferConstraints,
    ) -> impl Future<Output = Result<SessionDescription>> + Send;

    fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> impl Future<Output = Result<()>> + Send;

    fn remove_ice_candidates(
        &mut self,
        candidates: Vec<IceCandidate>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn stats(&mut self) -> impl Future<Output = Result<StatsReport>> + Send;

    /// Caps the outgoing video bitrate; `None` removes the limit.
    ///
    /// Implementations without sender encoding parameters may only record the
    /// cap. `WebRtcEngine` records it and does not enforce it.
    fn set_video_max_bitrate(&mut self, bitrate_bps: Option<u32>) -> impl Future<Output = Result<()>> + Send;

    fn set_track_enabled(&mut self, kind: MediaKind, enabled: bool) -> Result<()>;

    fn close_connection(&mut self) -> impl Future<Output = ()> + Send;

    fn dispose_audio_source(&mut self);

    fn dispose_video_source(&mut self);

    fn dispose_factory(&mut self);
}

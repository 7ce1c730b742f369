// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// webrtc-rs backed media engine
//
// Publishes pre-encoded samples: capture sources hand over encoded access
// units, which are paced onto TrackLocalStaticSample tracks.

use super::codecs;
use crate::core::{Result, WhipcastError};
use crate::ice::IceServerEntry;
use crate::negotiation::{
    AudioTrackConfig, ConnectionConfig, EngineObserver, FactoryOptions, IceCandidate,
    IceConnectionState, IceTransportPolicy, MediaEngine, MediaSample, OfferConstraints,
    PeerConnectionState, SampleSink, StatsReport, VideoTrackConfig,
};
use crate::sdp::{CodecCapability, MediaKind, SdpType, SessionDescription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Samples buffered per track before the capture side starts dropping.
const SAMPLE_QUEUE_DEPTH: usize = 120;

fn rtc_error(context: &str, e: impl std::fmt::Display) -> WhipcastError {
    WhipcastError::Negotiation(format!("{}: {}", context, e))
}

// ============================================================================
// TRACK SINK
// ============================================================================

/// Capture-facing end of an outgoing track; a writer task drains it in order.
struct TrackSink {
    kind: MediaKind,
    tx: mpsc::Sender<MediaSample>,
    enabled: Arc<AtomicBool>,
}

impl SampleSink for TrackSink {
    fn push_sample(&self, sample: MediaSample) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        if self.tx.try_send(sample).is_err() {
            tracing::trace!("[WebRtcEngine] {} sample dropped, writer behind", self.kind);
        }
    }
}

struct OutgoingTrack {
    enabled: Arc<AtomicBool>,
    writer: JoinHandle<()>,
}

impl OutgoingTrack {
    fn spawn(kind: MediaKind, track: Arc<TrackLocalStaticSample>) -> (Self, Arc<dyn SampleSink>) {
        let (tx, mut rx) = mpsc::channel::<MediaSample>(SAMPLE_QUEUE_DEPTH);
        let enabled = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            let mut written: u64 = 0;
            while let Some(sample) = rx.recv().await {
                let sample = webrtc::media::Sample {
                    data: sample.data,
                    duration: sample.duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::warn!("[WebRtcEngine] Failed to write {} sample: {}", kind, e);
                    continue;
                }
                written += 1;
                if written % 300 == 0 {
                    tracing::debug!("[WebRtcEngine] {} {} samples written", written, kind);
                }
            }
        });

        let sink = Arc::new(TrackSink {
            kind,
            tx,
            enabled: enabled.clone(),
        });
        (Self { enabled, writer }, sink)
    }

    fn dispose(self) {
        self.writer.abort();
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Default)]
pub struct WebRtcEngine {
    api: Option<API>,
    peer_connection: Option<Arc<RTCPeerConnection>>,
    video: Option<OutgoingTrack>,
    audio: Option<OutgoingTrack>,
    video_max_bitrate_bps: Option<u32>,
}

impl WebRtcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last requested cap. Samples arrive pre-encoded, so the encoder upstream enforces it.
    pub fn video_max_bitrate_bps(&self) -> Option<u32> {
        self.video_max_bitrate_bps
    }

    fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        self.peer_connection
            .clone()
            .ok_or_else(|| WhipcastError::Negotiation("Peer connection is not created".into()))
    }

    fn rtc_ice_server(entry: IceServerEntry) -> RTCIceServer {
        RTCIceServer {
            urls: vec![entry.url],
            username: entry.username,
            credential: entry.credential,
            ..Default::default()
        }
    }

    fn register_observer(peer_connection: &RTCPeerConnection, observer: EngineObserver) {
        let on_candidate = observer.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate_opt| {
            let observer = on_candidate.clone();
            Box::pin(async move {
                let Some(candidate) = candidate_opt else {
                    tracing::debug!("[WebRtcEngine] ICE candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => observer.on_ice_candidate(IceCandidate {
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        candidate: init.candidate,
                    }),
                    Err(e) => tracing::warn!("[WebRtcEngine] Unserializable ICE candidate: {}", e),
                }
            })
        }));

        let on_ice_state = observer.clone();
        peer_connection.on_ice_connection_state_change(Box::new(move |state| {
            let observer = on_ice_state.clone();
            Box::pin(async move {
                tracing::info!("[WebRtcEngine] ICE connection state: {:?}", state);
                let state = match state {
                    RTCIceConnectionState::New => IceConnectionState::New,
                    RTCIceConnectionState::Checking => IceConnectionState::Checking,
                    RTCIceConnectionState::Connected => IceConnectionState::Connected,
                    RTCIceConnectionState::Completed => IceConnectionState::Completed,
                    RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
                    RTCIceConnectionState::Failed => IceConnectionState::Failed,
                    RTCIceConnectionState::Closed => IceConnectionState::Closed,
                    _ => return,
                };
                observer.on_ice_connection_state(state);
            })
        }));

        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            let observer = observer.clone();
            Box::pin(async move {
                tracing::info!("[WebRtcEngine] Peer connection state: {:?}", state);
                let state = match state {
                    RTCPeerConnectionState::New => PeerConnectionState::New,
                    RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
                    RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
                    _ => return,
                };
                observer.on_connection_state(state);
            })
        }));
    }

    async fn add_track(
        &mut self,
        kind: MediaKind,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<Arc<dyn SampleSink>> {
        let peer_connection = self.peer_connection()?;

        peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| rtc_error(&format!("Failed to add {} track", kind), e))?;

        // WHIP is unidirectional publishing
        for transceiver in peer_connection.get_transceivers().await {
            if transceiver.kind() == codecs::rtp_codec_type(kind) {
                transceiver
                    .set_direction(RTCRtpTransceiverDirection::Sendonly)
                    .await;
            }
        }

        let (outgoing, sink) = OutgoingTrack::spawn(kind, track);
        match kind {
            MediaKind::Audio => self.audio = Some(outgoing),
            MediaKind::Video => self.video = Some(outgoing),
        }
        Ok(sink)
    }
}

impl MediaEngine for WebRtcEngine {
    async fn initialize_factory(&mut self, options: FactoryOptions) -> Result<()> {
        if !options.field_trials.is_empty() {
            tracing::debug!(
                "[WebRtcEngine] Field trials have no webrtc-rs equivalent: {}",
                options.field_trials
            );
        }

        let mut media_engine = webrtc::api::media_engine::MediaEngine::default();
        codecs::register_codecs(&mut media_engine)?;

        // RTCP feedback (NACK, reports, stats)
        let registry = webrtc::interceptor::registry::Registry::new();
        let registry =
            webrtc::api::interceptor_registry::register_default_interceptors(registry, &mut media_engine)
                .map_err(|e| {
                    WhipcastError::Configuration(format!("Failed to register interceptors: {}", e))
                })?;

        self.api = Some(
            webrtc::api::APIBuilder::new()
                .with_media_engine(media_engine)
                .with_interceptor_registry(registry)
                .build(),
        );
        tracing::info!("[WebRtcEngine] Factory created");
        Ok(())
    }

    async fn create_connection(
        &mut self,
        config: ConnectionConfig,
        observer: EngineObserver,
    ) -> Result<()> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| WhipcastError::Negotiation("Factory is not created".into()))?;

        if config.tcp_candidates || config.continual_gathering {
            tracing::debug!(
                "[WebRtcEngine] TCP candidates and continual gathering are not configurable in webrtc-rs"
            );
        }
        if config.enable_cpu_overuse_detection {
            tracing::debug!("[WebRtcEngine] CPU overuse detection has no effect on pre-encoded media");
        }

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .into_iter()
                .map(Self::rtc_ice_server)
                .collect(),
            ice_transport_policy: match config.ice_transport_policy {
                IceTransportPolicy::All => RTCIceTransportPolicy::All,
                IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
            },
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| rtc_error("Failed to create PeerConnection", e))?,
        );
        Self::register_observer(&peer_connection, observer);

        self.peer_connection = Some(peer_connection);
        tracing::debug!("[WebRtcEngine] RTCPeerConnection created");
        Ok(())
    }

    async fn add_video_track(&mut self, config: VideoTrackConfig) -> Result<Arc<dyn SampleSink>> {
        if !config.simulcast_layers.is_empty() {
            tracing::warn!(
                "[WebRtcEngine] Simulcast needs per-layer encoders, publishing a single layer"
            );
        }
        let track = Arc::new(TrackLocalStaticSample::new(
            codecs::video_track_capability(config.codec),
            config.track_id,
            config.stream_id,
        ));
        self.add_track(MediaKind::Video, track).await
    }

    async fn add_audio_track(&mut self, config: AudioTrackConfig) -> Result<Arc<dyn SampleSink>> {
        if !config.constraints.is_empty() {
            tracing::debug!(
                "[WebRtcEngine] Audio constraints left to the capture source: {:?}",
                config.constraints
            );
        }
        let track = Arc::new(TrackLocalStaticSample::new(
            codecs::audio_track_capability(&config.codec),
            config.track_id,
            config.stream_id,
        ));
        self.add_track(MediaKind::Audio, track).await
    }

    fn sender_codec_capabilities(&self, kind: MediaKind) -> Vec<CodecCapability> {
        codecs::sender_capabilities(kind)
    }

    async fn set_codec_preferences(
        &mut self,
        kind: MediaKind,
        codecs: Vec<CodecCapability>,
    ) -> Result<()> {
        let peer_connection = self.peer_connection()?;
        let parameters = codecs::to_rtp_parameters(&codecs);
        for transceiver in peer_connection.get_transceivers().await {
            if transceiver.kind() == codecs::rtp_codec_type(kind) {
                transceiver
                    .set_codec_preferences(parameters.clone())
                    .await
                    .map_err(|e| rtc_error("Failed to set codec preferences", e))?;
            }
        }
        Ok(())
    }

    async fn create_offer(&mut self, constraints: OfferConstraints) -> Result<SessionDescription> {
        if constraints.offer_to_receive_audio || constraints.offer_to_receive_video {
            tracing::debug!("[WebRtcEngine] Receive constraints ignored, transceivers are send-only");
        }
        let offer = self
            .peer_connection()?
            .create_offer(None)
            .await
            .map_err(|e| rtc_error("Failed to create offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(&description)?;
        self.peer_connection()?
            .set_local_description(description)
            .await
            .map_err(|e| rtc_error("Failed to set local description", e))
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(&description)?;
        self.peer_connection()?
            .set_remote_description(description)
            .await
            .map_err(|e| rtc_error("Failed to set remote description", e))
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection()?
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| rtc_error("Failed to add ICE candidate", e))
    }

    async fn remove_ice_candidates(&mut self, candidates: Vec<IceCandidate>) -> Result<()> {
        Err(WhipcastError::NotSupported(format!(
            "webrtc-rs cannot remove {} remote ICE candidates",
            candidates.len()
        )))
    }

    async fn stats(&mut self) -> Result<StatsReport> {
        let report = self.peer_connection()?.get_stats().await;

        let mut entries = serde_json::Map::new();
        for (id, entry) in report.reports {
            let value = match entry {
                StatsReportType::OutboundRTP(outbound) => serde_json::json!({
                    "type": "outbound-rtp",
                    "kind": outbound.kind,
                    "bytes_sent": outbound.bytes_sent,
                    "packets_sent": outbound.packets_sent,
                    "header_bytes_sent": outbound.header_bytes_sent,
                }),
                StatsReportType::RemoteInboundRTP(remote_inbound) => serde_json::json!({
                    "type": "remote-inbound-rtp",
                    "kind": remote_inbound.kind,
                    "packets_received": remote_inbound.packets_received,
                    "packets_lost": remote_inbound.packets_lost,
                }),
                other => serde_json::json!({ "type": "other", "detail": format!("{:?}", other) }),
            };
            entries.insert(id, value);
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Ok(StatsReport {
            timestamp_ms,
            entries,
        })
    }

    async fn set_video_max_bitrate(&mut self, bitrate_bps: Option<u32>) -> Result<()> {
        self.video_max_bitrate_bps = bitrate_bps;
        tracing::debug!("[WebRtcEngine] Video max bitrate: {:?} bps", bitrate_bps);
        Ok(())
    }

    fn set_track_enabled(&mut self, kind: MediaKind, enabled: bool) -> Result<()> {
        let track = match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        };
        let track = track.ok_or_else(|| {
            WhipcastError::Negotiation(format!("No {} track to toggle", kind))
        })?;
        track.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    async fn close_connection(&mut self) {
        if let Some(peer_connection) = self.peer_connection.take() {
            if let Err(e) = peer_connection.close().await {
                tracing::warn!("[WebRtcEngine] Failed to close peer connection: {}", e);
            }
        }
    }

    fn dispose_audio_source(&mut self) {
        if let Some(track) = self.audio.take() {
            track.dispose();
        }
    }

    fn dispose_video_source(&mut self) {
        if let Some(track) = self.video.take() {
            track.dispose();
        }
    }

    fn dispose_factory(&mut self) {
        self.api = None;
    }
}

fn to_rtc_description(description: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp().to_owned();
    match description.sdp_type() {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
    }
    .map_err(|e| WhipcastError::Sdp(format!("Failed to parse session description: {}", e)))
}

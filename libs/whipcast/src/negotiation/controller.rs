// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session controller task. Owns the engine, the capture sources and all
//! negotiation state; everything reaches it as a queued message.

use super::engine::{
    AudioTrackConfig, ConnectionConfig, EngineEvent, EngineObserver, FactoryOptions,
    IceCandidate, IceConnectionState, MediaEngine, OfferConstraints, PeerConnectionState,
    VideoTrackConfig,
};
use super::events::{NegotiationState, PeerConnectionEvent};
use super::media::{CaptureSource, MediaSources, SampleSink, TeeSink};
use crate::core::{CaptureFormat, NegotiationParameters, Result, kbps_to_bps};
use crate::ice::{IceServerDirectory, StateStore};
use crate::sdp::{
    MediaKind, SessionDescription, prefer_codec, select_codec_preference_list, set_start_bitrate,
};
use crate::whip::{RemoteSession, WhipClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Extra time granted to a teardown DELETE beyond the HTTP client's own timeout.
const DELETE_GRACE: Duration = Duration::from_secs(1);

pub(crate) enum Command {
    CreateFactory,
    CreateConnection {
        sources: MediaSources,
        ice_servers: Option<IceServerDirectory>,
    },
    CreateOffer,
    SetRemoteDescription(SessionDescription),
    AddRemoteIceCandidate(IceCandidate),
    RemoveRemoteIceCandidates(Vec<IceCandidate>),
    EnableStatsEvents(Option<Duration>),
    SetVideoMaxBitrate(Option<u32>),
    SetAudioEnabled(bool),
    SetVideoEnabled(bool),
    StopVideoSource,
    StartVideoSource,
    ChangeCaptureFormat(CaptureFormat),
    QueryState(oneshot::Sender<NegotiationState>),
    Close,
    Shutdown,
}

/// Remote candidate operations held back until both descriptions are applied.
enum QueuedCandidate {
    Add(IceCandidate),
    Remove(Vec<IceCandidate>),
}

pub(crate) struct Controller<E: MediaEngine> {
    engine: E,
    params: NegotiationParameters,
    whip: Option<Arc<WhipClient>>,
    state_store: Option<Arc<dyn StateStore>>,

    events: mpsc::UnboundedSender<PeerConnectionEvent>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    whip_tx: mpsc::UnboundedSender<Result<RemoteSession>>,

    state: NegotiationState,
    factory_ready: bool,
    connection_created: bool,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// `Some` until both descriptions are applied, then drained once.
    queued_remote_candidates: Option<Vec<QueuedCandidate>>,

    capture_format: CaptureFormat,
    video_sink: Option<Arc<TeeSink>>,
    audio_sink: Option<Arc<dyn SampleSink>>,
    video_capture: Option<Box<dyn CaptureSource>>,
    audio_capture: Option<Box<dyn CaptureSource>>,
    video_capture_stopped: bool,
    video_track_enabled: bool,
    audio_track_enabled: bool,

    stats_period: Option<Duration>,
    whip_in_flight: usize,
}

pub(crate) struct Channels {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub engine: mpsc::UnboundedReceiver<EngineEvent>,
    pub whip: mpsc::UnboundedReceiver<Result<RemoteSession>>,
}

async fn next_stats_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn stats_interval(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

impl<E: MediaEngine> Controller<E> {
    pub(crate) fn new(
        engine: E,
        params: NegotiationParameters,
        whip: Option<Arc<WhipClient>>,
        state_store: Option<Arc<dyn StateStore>>,
        events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>, mpsc::UnboundedReceiver<Result<RemoteSession>>) {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (whip_tx, whip_rx) = mpsc::unbounded_channel();
        let capture_format = params.capture_format();

        let controller = Self {
            engine,
            params,
            whip,
            state_store,
            events,
            engine_tx,
            whip_tx,
            state: NegotiationState::Idle,
            factory_ready: false,
            connection_created: false,
            local_description: None,
            remote_description: None,
            queued_remote_candidates: None,
            capture_format,
            video_sink: None,
            audio_sink: None,
            video_capture: None,
            audio_capture: None,
            video_capture_stopped: false,
            video_track_enabled: true,
            audio_track_enabled: true,
            stats_period: None,
            whip_in_flight: 0,
        };
        (controller, engine_rx, whip_rx)
    }

    /// Processes messages strictly in arrival order until shut down.
    ///
    /// After shutdown (or once every handle is gone) the task stays alive only
    /// to collect in-flight WHIP creates and delete what they produced.
    pub(crate) async fn run(mut self, mut channels: Channels) {
        let mut stats_timer: Option<Interval> = None;
        let mut stats_period: Option<Duration> = None;
        let mut accepting = true;

        loop {
            tokio::select! {
                command = channels.commands.recv(), if accepting => match command {
                    Some(Command::Shutdown) | None => {
                        accepting = false;
                        self.close().await;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = channels.engine.recv() => self.handle_engine_event(event),
                Some(result) = channels.whip.recv() => self.handle_whip_created(result).await,
                _ = next_stats_tick(&mut stats_timer) => self.poll_stats().await,
            }

            if stats_period != self.stats_period {
                stats_period = self.stats_period;
                stats_timer = stats_period.map(stats_interval);
            }

            if !accepting && self.whip_in_flight == 0 {
                break;
            }
        }

        tracing::debug!("[PeerConnectionClient] Controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateFactory => self.create_factory().await,
            Command::CreateConnection {
                sources,
                ice_servers,
            } => self.create_connection(sources, ice_servers).await,
            Command::CreateOffer => self.create_offer().await,
            Command::SetRemoteDescription(description) => {
                self.apply_remote_description(description).await
            }
            Command::AddRemoteIceCandidate(candidate) => {
                self.add_remote_ice_candidate(candidate).await
            }
            Command::RemoveRemoteIceCandidates(candidates) => {
                self.remove_remote_ice_candidates(candidates).await
            }
            Command::EnableStatsEvents(period) => self.enable_stats_events(period),
            Command::SetVideoMaxBitrate(kbps) => self.set_video_max_bitrate(kbps).await,
            Command::SetAudioEnabled(enabled) => self.set_track_enabled(MediaKind::Audio, enabled),
            Command::SetVideoEnabled(enabled) => self.set_track_enabled(MediaKind::Video, enabled),
            Command::StopVideoSource => self.stop_video_source(),
            Command::StartVideoSource => self.start_video_source(),
            Command::ChangeCaptureFormat(format) => self.change_capture_format(format),
            Command::QueryState(reply) => {
                let _ = reply.send(self.state);
            }
            Command::Close => self.close().await,
            // Intercepted by the run loop.
            Command::Shutdown => {}
        }
    }

    fn emit(&self, event: PeerConnectionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("[PeerConnectionClient] Event receiver dropped");
        }
    }

    /// Latches the session into `Errored` and tells the owner, once.
    fn report_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.state.is_terminal() {
            tracing::debug!(
                "[PeerConnectionClient] Suppressed error in {:?}: {}",
                self.state,
                message
            );
            return;
        }
        tracing::error!("[PeerConnectionClient] Peer connection error: {}", message);
        self.state = NegotiationState::Errored;
        self.emit(PeerConnectionEvent::PeerConnectionError(message));
    }

    fn accepts_negotiation(&self, operation: &str) -> bool {
        if self.state.is_terminal() {
            tracing::debug!(
                "[PeerConnectionClient] Ignoring {} in {:?}",
                operation,
                self.state
            );
            return false;
        }
        true
    }

    // ========================================================================
    // CONNECTION SETUP
    // ========================================================================

    async fn create_factory(&mut self) {
        if !self.accepts_negotiation("factory creation") {
            return;
        }
        if self.factory_ready {
            tracing::warn!("[PeerConnectionClient] Peer connection factory already created");
            return;
        }

        let options = FactoryOptions {
            field_trials: self.params.field_trials(),
            video_codec_hw_acceleration: self.params.video_codec_hw_acceleration,
        };
        tracing::debug!(
            "[PeerConnectionClient] Creating peer connection factory (field trials: '{}')",
            options.field_trials
        );

        match self.engine.initialize_factory(options).await {
            Ok(()) => {
                self.factory_ready = true;
                self.state = NegotiationState::FactoryReady;
                tracing::info!("[PeerConnectionClient] Peer connection factory created");
            }
            Err(e) => self.report_error(format!("Failed to create peer connection factory: {}", e)),
        }
    }

    fn load_persisted_ice_servers(&self) -> IceServerDirectory {
        let Some(store) = &self.state_store else {
            return IceServerDirectory::new();
        };
        match IceServerDirectory::load(store.as_ref()) {
            Ok(directory) => directory,
            Err(e) => {
                tracing::warn!("[PeerConnectionClient] Ignoring persisted ICE servers: {}", e);
                IceServerDirectory::new()
            }
        }
    }

    async fn create_connection(
        &mut self,
        sources: MediaSources,
        ice_servers: Option<IceServerDirectory>,
    ) {
        if !self.accepts_negotiation("connection creation") {
            return;
        }
        if !self.factory_ready {
            self.report_error("Peer connection factory is not created");
            return;
        }
        if self.connection_created {
            self.report_error("Peer connection already created");
            return;
        }

        let MediaSources {
            local_sink,
            video,
            audio,
        } = sources;

        if self.params.video_enabled && video.is_none() {
            self.report_error("Video capture source is missing");
            return;
        }

        let ice_servers = ice_servers.unwrap_or_else(|| self.load_persisted_ice_servers());
        let config = ConnectionConfig::new(
            ice_servers.into_iter().collect(),
            self.params.enable_cpu_overuse_detection,
        );
        tracing::info!(
            "[PeerConnectionClient] Creating peer connection ({} ICE servers, {:?} transport)",
            config.ice_servers.len(),
            config.ice_transport_policy
        );

        let observer = EngineObserver::new(self.engine_tx.clone());
        if let Err(e) = self.engine.create_connection(config, observer).await {
            self.report_error(format!("Failed to create peer connection: {}", e));
            return;
        }
        self.connection_created = true;
        self.queued_remote_candidates = Some(Vec::new());

        match video {
            Some(capture) if self.params.video_enabled => {
                if let Err(e) = self.attach_video(capture, local_sink).await {
                    self.report_error(format!("Failed to attach video: {}", e));
                    return;
                }
            }
            Some(mut unused) => unused.dispose(),
            None => {}
        }

        if self.params.audio_enabled {
            if let Err(e) = self.attach_audio(audio).await {
                self.report_error(format!("Failed to attach audio: {}", e));
                return;
            }
        } else if let Some(mut unused) = audio {
            unused.dispose();
        }

        tracing::debug!("[PeerConnectionClient] Peer connection created");
    }

    async fn attach_video(
        &mut self,
        capture: Box<dyn CaptureSource>,
        local_sink: Option<Arc<dyn SampleSink>>,
    ) -> Result<()> {
        let codec = self.params.video_codec;
        let simulcast_layers = if self.params.simulcast_enabled {
            self.params.simulcast_layers.clone()
        } else {
            Vec::new()
        };
        let track = VideoTrackConfig {
            track_id: self.params.defaults.video_track_id.clone(),
            stream_id: self.params.defaults.stream_id.clone(),
            codec,
            format: self.capture_format,
            simulcast_layers,
        };

        let engine_sink = self.engine.add_video_track(track).await?;
        let tee = Arc::new(TeeSink::new(engine_sink, local_sink));
        self.video_sink = Some(tee.clone());

        let capture = self.video_capture.insert(capture);
        capture.start_capture(self.capture_format, tee)?;
        self.video_capture_stopped = false;

        tracing::info!(
            "[PeerConnectionClient] Capturing {}x{}@{}fps",
            self.capture_format.width,
            self.capture_format.height,
            self.capture_format.fps
        );

        let capabilities = self.engine.sender_codec_capabilities(MediaKind::Video);
        let preferences = select_codec_preference_list(
            &capabilities,
            codec.sdp_name(),
            codec.profile_level_id_prefix(),
        );
        if let Err(e) = self
            .engine
            .set_codec_preferences(MediaKind::Video, preferences)
            .await
        {
            tracing::warn!("[PeerConnectionClient] Codec preferences not applied: {}", e);
        }

        self.engine
            .set_track_enabled(MediaKind::Video, self.video_track_enabled)
    }

    async fn attach_audio(&mut self, capture: Option<Box<dyn CaptureSource>>) -> Result<()> {
        let track = AudioTrackConfig {
            track_id: self.params.defaults.audio_track_id.clone(),
            stream_id: self.params.defaults.stream_id.clone(),
            codec: self.params.audio_codec.clone(),
            constraints: self.params.audio_processing.constraints(),
        };

        let sink = self.engine.add_audio_track(track).await?;
        self.audio_sink = Some(sink.clone());

        if let Some(capture) = capture {
            // Audio sources ignore the video capture format.
            self.audio_capture
                .insert(capture)
                .start_capture(self.capture_format, sink)?;
        }

        self.engine
            .set_track_enabled(MediaKind::Audio, self.audio_track_enabled)
    }

    // ========================================================================
    // OFFER / ANSWER
    // ========================================================================

    async fn create_offer(&mut self) {
        if !self.accepts_negotiation("offer creation") {
            return;
        }
        if self.local_description.is_some() || self.state == NegotiationState::Negotiating {
            self.report_error("Multiple SDP create.");
            return;
        }
        if !self.connection_created {
            self.report_error("Peer connection is not created");
            return;
        }

        self.state = NegotiationState::Negotiating;
        tracing::debug!("[PeerConnectionClient] Creating offer");

        let offer = match self.engine.create_offer(OfferConstraints::default()).await {
            Ok(offer) => offer,
            Err(e) => {
                self.report_error(format!("createSDP error: {}", e));
                return;
            }
        };

        let mut sdp = offer.sdp().to_owned();
        if self.params.video_enabled {
            sdp = prefer_codec(&sdp, self.params.video_codec.sdp_name(), MediaKind::Video);
        }
        if self.params.audio_enabled {
            sdp = prefer_codec(&sdp, &self.params.audio_codec, MediaKind::Audio);
        }
        let local = offer.with_sdp(sdp);

        if let Err(e) = self.engine.set_local_description(local.clone()).await {
            self.report_error(format!("setSDP error: {}", e));
            return;
        }

        tracing::debug!("[PeerConnectionClient] Local SDP set successfully");
        self.local_description = Some(local.clone());
        self.state = NegotiationState::LocalSet;
        self.emit(PeerConnectionEvent::LocalDescription(local.clone()));

        if self.params.video_enabled {
            let bitrate_bps = self.params.video_max_bitrate_bps();
            if let Err(e) = self.engine.set_video_max_bitrate(Some(bitrate_bps)).await {
                tracing::warn!("[PeerConnectionClient] Video max bitrate not applied: {}", e);
            }
        }

        if let Some(whip) = self.whip.clone() {
            self.start_whip_create(whip, local);
        }
    }

    /// Runs the POST off the queue; the outcome comes back as a queued message.
    fn start_whip_create(&mut self, whip: Arc<WhipClient>, local: SessionDescription) {
        self.state = NegotiationState::RemotePending;
        self.whip_in_flight += 1;

        let whip_tx = self.whip_tx.clone();
        tokio::spawn(async move {
            let result = whip.create(local.sdp()).await;
            if whip_tx.send(result).is_err() {
                tracing::warn!("[PeerConnectionClient] WHIP result arrived after controller stopped");
            }
        });
    }

    async fn handle_whip_created(&mut self, result: Result<RemoteSession>) {
        self.whip_in_flight = self.whip_in_flight.saturating_sub(1);

        match self.state {
            NegotiationState::Closed => {
                if result.is_ok() {
                    tracing::info!(
                        "[PeerConnectionClient] WHIP resource created after close, deleting it"
                    );
                    self.delete_whip_resource().await;
                }
                return;
            }
            NegotiationState::Errored => {
                tracing::debug!("[PeerConnectionClient] Ignoring WHIP result, session errored");
                return;
            }
            _ => {}
        }

        match result {
            Ok(session) => {
                if let Some(store) = &self.state_store {
                    if let Err(e) = session.ice_servers.persist(store.as_ref()) {
                        tracing::warn!("[PeerConnectionClient] Failed to persist ICE servers: {}", e);
                    }
                }
                self.apply_remote_description(session.answer).await;
            }
            Err(e) => self.report_error(format!("WHIP session create failed: {}", e)),
        }
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) {
        if !self.accepts_negotiation("remote description") {
            return;
        }
        if self.local_description.is_none() {
            self.report_error("Remote description received before local description");
            return;
        }
        if self.remote_description.is_some() {
            tracing::warn!("[PeerConnectionClient] Remote description already applied");
            return;
        }

        self.state = NegotiationState::RemotePending;

        let mut sdp = description.sdp().to_owned();
        if self.params.video_enabled {
            let codec = self.params.video_codec.sdp_name();
            sdp = prefer_codec(&sdp, codec, MediaKind::Video);
            if self.params.video_start_bitrate_kbps > 0 {
                sdp = set_start_bitrate(codec, true, &sdp, self.params.video_start_bitrate_kbps);
            }
        }
        if self.params.audio_enabled && self.params.audio_start_bitrate_kbps > 0 {
            sdp = set_start_bitrate(
                &self.params.audio_codec,
                false,
                &sdp,
                self.params.audio_start_bitrate_kbps,
            );
        }
        let remote = description.with_sdp(sdp);

        if let Err(e) = self.engine.set_remote_description(remote.clone()).await {
            self.report_error(format!("setSDP error: {}", e));
            return;
        }

        tracing::debug!("[PeerConnectionClient] Remote SDP set successfully");
        self.remote_description = Some(remote);
        self.state = NegotiationState::Connected;
        self.drain_remote_candidates().await;
    }

    // ========================================================================
    // REMOTE CANDIDATES
    // ========================================================================

    async fn drain_remote_candidates(&mut self) {
        let Some(queued) = self.queued_remote_candidates.take() else {
            return;
        };
        tracing::debug!(
            "[PeerConnectionClient] Applying {} queued remote ICE candidate operations",
            queued.len()
        );
        for operation in queued {
            match operation {
                QueuedCandidate::Add(candidate) => self.apply_remote_candidate(candidate).await,
                QueuedCandidate::Remove(candidates) => self.withdraw_remote_candidates(candidates).await,
            }
        }
    }

    async fn apply_remote_candidate(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.engine.add_ice_candidate(candidate).await {
            tracing::warn!("[PeerConnectionClient] Remote ICE candidate rejected: {}", e);
        }
    }

    async fn withdraw_remote_candidates(&mut self, candidates: Vec<IceCandidate>) {
        if let Err(e) = self.engine.remove_ice_candidates(candidates).await {
            tracing::warn!("[PeerConnectionClient] Failed to remove ICE candidates: {}", e);
        }
    }

    async fn add_remote_ice_candidate(&mut self, candidate: IceCandidate) {
        if !self.accepts_negotiation("remote ICE candidate") {
            return;
        }
        if !self.connection_created {
            tracing::warn!("[PeerConnectionClient] Remote ICE candidate before connection, dropped");
            return;
        }
        match &mut self.queued_remote_candidates {
            Some(queue) => queue.push(QueuedCandidate::Add(candidate)),
            None => self.apply_remote_candidate(candidate).await,
        }
    }

    async fn remove_remote_ice_candidates(&mut self, candidates: Vec<IceCandidate>) {
        if !self.accepts_negotiation("remote ICE candidate removal") || !self.connection_created {
            return;
        }
        match &mut self.queued_remote_candidates {
            Some(queue) => queue.push(QueuedCandidate::Remove(candidates)),
            None => self.withdraw_remote_candidates(candidates).await,
        }
    }

    // ========================================================================
    // ENGINE CALLBACKS
    // ========================================================================

    fn handle_engine_event(&mut self, event: EngineEvent) {
        if self.state == NegotiationState::Closed {
            return;
        }

        match event {
            EngineEvent::IceCandidate(candidate) => {
                self.emit(PeerConnectionEvent::IceCandidate(candidate));
            }
            EngineEvent::IceCandidatesRemoved(candidates) => {
                self.emit(PeerConnectionEvent::IceCandidatesRemoved(candidates));
            }
            EngineEvent::IceConnectionState(state) => {
                tracing::debug!("[PeerConnectionClient] ICE connection state: {:?}", state);
                match state {
                    IceConnectionState::Connected => self.emit(PeerConnectionEvent::IceConnected),
                    IceConnectionState::Disconnected => {
                        self.emit(PeerConnectionEvent::IceDisconnected)
                    }
                    IceConnectionState::Failed => self.report_error("ICE connection failed."),
                    _ => {}
                }
            }
            EngineEvent::PeerConnectionState(state) => {
                tracing::debug!("[PeerConnectionClient] Peer connection state: {:?}", state);
                match state {
                    PeerConnectionState::Connected => self.emit(PeerConnectionEvent::Connected),
                    PeerConnectionState::Disconnected => {
                        self.emit(PeerConnectionEvent::Disconnected)
                    }
                    PeerConnectionState::Failed => self.report_error("DTLS connection failed."),
                    _ => {}
                }
            }
        }
    }

    // ========================================================================
    // RUNTIME CONTROLS
    // ========================================================================

    fn enable_stats_events(&mut self, period: Option<Duration>) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.stats_period = period.filter(|period| !period.is_zero());
    }

    async fn poll_stats(&mut self) {
        if !self.connection_created || self.state == NegotiationState::Closed {
            return;
        }
        match self.engine.stats().await {
            Ok(report) => self.emit(PeerConnectionEvent::StatsReady(report)),
            Err(e) => tracing::warn!("[PeerConnectionClient] Stats unavailable: {}", e),
        }
    }

    async fn set_video_max_bitrate(&mut self, bitrate_kbps: Option<u32>) {
        if !self.accepts_negotiation("bitrate change") || !self.connection_created {
            return;
        }
        let bitrate_bps = bitrate_kbps.map(kbps_to_bps);
        tracing::debug!(
            "[PeerConnectionClient] Requested max video bitrate: {:?} bps",
            bitrate_bps
        );
        if let Err(e) = self.engine.set_video_max_bitrate(bitrate_bps).await {
            tracing::warn!("[PeerConnectionClient] Video max bitrate not applied: {}", e);
        }
    }

    fn set_track_enabled(&mut self, kind: MediaKind, enabled: bool) {
        if self.state == NegotiationState::Closed {
            return;
        }
        let has_track = match kind {
            MediaKind::Audio => {
                self.audio_track_enabled = enabled;
                self.audio_sink.is_some()
            }
            MediaKind::Video => {
                self.video_track_enabled = enabled;
                self.video_sink.is_some()
            }
        };
        if has_track {
            if let Err(e) = self.engine.set_track_enabled(kind, enabled) {
                tracing::warn!("[PeerConnectionClient] Failed to toggle {} track: {}", kind, e);
            }
        }
    }

    fn stop_video_source(&mut self) {
        let Some(capture) = self.video_capture.as_mut() else {
            return;
        };
        if self.video_capture_stopped || self.state == NegotiationState::Closed {
            return;
        }
        tracing::debug!("[PeerConnectionClient] Stop video source");
        match capture.stop_capture() {
            Ok(()) => self.video_capture_stopped = true,
            Err(e) => tracing::warn!("[PeerConnectionClient] Failed to stop video source: {}", e),
        }
    }

    fn start_video_source(&mut self) {
        let (Some(capture), Some(sink)) = (self.video_capture.as_mut(), self.video_sink.as_ref())
        else {
            return;
        };
        if !self.video_capture_stopped || self.state == NegotiationState::Closed {
            return;
        }
        tracing::debug!("[PeerConnectionClient] Restart video source");
        match capture.start_capture(self.capture_format, sink.clone()) {
            Ok(()) => self.video_capture_stopped = false,
            Err(e) => tracing::warn!("[PeerConnectionClient] Failed to restart video source: {}", e),
        }
    }

    fn change_capture_format(&mut self, format: CaptureFormat) {
        if !self.params.video_enabled || self.state.is_terminal() {
            tracing::error!(
                "[PeerConnectionClient] Failed to change capture format. Video: {}. Error: {}",
                self.params.video_enabled,
                self.state == NegotiationState::Errored
            );
            return;
        }
        let Some(capture) = self.video_capture.as_mut() else {
            tracing::error!("[PeerConnectionClient] Failed to change capture format, no capturer");
            return;
        };
        tracing::debug!(
            "[PeerConnectionClient] Changing format: {}x{}@{}",
            format.width,
            format.height,
            format.fps
        );
        match capture.change_format(format) {
            Ok(()) => self.capture_format = format,
            Err(e) => tracing::warn!("[PeerConnectionClient] Failed to change capture format: {}", e),
        }
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Releases everything in a fixed order, deletes the WHIP resource, then
    /// reports closure. Repeat calls do nothing.
    async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            tracing::debug!("[PeerConnectionClient] Already closed");
            return;
        }

        tracing::debug!("[PeerConnectionClient] Closing peer connection");
        self.stats_period = None;

        if self.connection_created {
            self.engine.close_connection().await;
        }

        tracing::debug!("[PeerConnectionClient] Closing audio source");
        if let Some(mut capture) = self.audio_capture.take() {
            if let Err(e) = capture.stop_capture() {
                tracing::warn!("[PeerConnectionClient] Failed to stop audio capture: {}", e);
            }
            capture.dispose();
        }
        if self.audio_sink.take().is_some() {
            self.engine.dispose_audio_source();
        }

        tracing::debug!("[PeerConnectionClient] Stopping capture");
        if let Some(mut capture) = self.video_capture.take() {
            if !self.video_capture_stopped {
                if let Err(e) = capture.stop_capture() {
                    tracing::warn!("[PeerConnectionClient] Failed to stop video capture: {}", e);
                }
            }
            capture.dispose();
        }

        tracing::debug!("[PeerConnectionClient] Closing video source");
        if let Some(tee) = self.video_sink.take() {
            self.engine.dispose_video_source();
            tee.detach_preview();
        }

        if self.factory_ready {
            tracing::debug!("[PeerConnectionClient] Closing peer connection factory");
            self.engine.dispose_factory();
            self.factory_ready = false;
        }

        self.queued_remote_candidates = None;
        self.state = NegotiationState::Closed;

        self.delete_whip_resource().await;

        tracing::info!("[PeerConnectionClient] Closing peer connection done");
        self.emit(PeerConnectionEvent::PeerConnectionClosed);
    }

    /// DELETE on its own task, awaited with a bound.
    async fn delete_whip_resource(&mut self) {
        let Some(whip) = self.whip.clone() else {
            return;
        };
        if whip.resource_url().is_none() {
            return;
        }

        let bound = Duration::from_millis(whip.config().timeout_ms) + DELETE_GRACE;
        let task = tokio::spawn(async move { whip.delete().await });
        match tokio::time::timeout(bound, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("[PeerConnectionClient] WHIP delete task failed: {}", e),
            Err(_) => tracing::warn!(
                "[PeerConnectionClient] WHIP delete did not finish within {}ms",
                bound.as_millis()
            ),
        }
    }
}

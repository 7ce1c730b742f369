// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::controller::{Channels, Command, Controller};
use super::engine::{IceCandidate, MediaEngine};
use super::events::{NegotiationState, PeerConnectionEvent};
use super::media::MediaSources;
use crate::core::{CaptureFormat, NegotiationParameters};
use crate::ice::{IceServerDirectory, StateStore};
use crate::sdp::SessionDescription;
use crate::whip::WhipClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Optional collaborators of a session.
#[derive(Default)]
pub struct SessionOptions {
    /// When set, the local description is POSTed here and the answer applied automatically.
    pub whip: Option<Arc<WhipClient>>,
    /// Source of persisted ICE servers and sink for those a WHIP answer returns.
    pub state_store: Option<Arc<dyn StateStore>>,
}

/// Handle to a session controller running on its own task.
///
/// Every method only enqueues; operations run one at a time, in call order,
/// on the controller task. Results surface on the event receiver returned by
/// [`PeerConnectionClient::spawn`].
pub struct PeerConnectionClient {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl PeerConnectionClient {
    /// Starts the controller. Must be called from within a Tokio runtime.
    pub fn spawn<E: MediaEngine>(
        engine: E,
        params: NegotiationParameters,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<PeerConnectionEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (controller, engine_rx, whip_rx) =
            Controller::new(engine, params, options.whip, options.state_store, events_tx);
        let channels = Channels {
            commands: commands_rx,
            engine: engine_rx,
            whip: whip_rx,
        };
        let task = tokio::spawn(controller.run(channels));

        tracing::debug!("[PeerConnectionClient] Controller started");
        (
            Self {
                commands: commands_tx,
                task,
            },
            events_rx,
        )
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("[PeerConnectionClient] Controller stopped, command dropped");
        }
    }

    pub fn create_peer_connection_factory(&self) {
        self.send(Command::CreateFactory);
    }

    /// `ice_servers: None` falls back to the entries persisted by the last session.
    pub fn create_peer_connection(
        &self,
        sources: MediaSources,
        ice_servers: Option<IceServerDirectory>,
    ) {
        self.send(Command::CreateConnection {
            sources,
            ice_servers,
        });
    }

    pub fn create_offer(&self) {
        self.send(Command::CreateOffer);
    }

    pub fn set_remote_description(&self, description: SessionDescription) {
        self.send(Command::SetRemoteDescription(description));
    }

    /// Queued until both descriptions are applied.
    pub fn add_remote_ice_candidate(&self, candidate: IceCandidate) {
        self.send(Command::AddRemoteIceCandidate(candidate));
    }

    pub fn remove_remote_ice_candidates(&self, candidates: Vec<IceCandidate>) {
        self.send(Command::RemoveRemoteIceCandidates(candidates));
    }

    pub fn enable_stats_events(&self, enable: bool, period: Duration) {
        self.send(Command::EnableStatsEvents(enable.then_some(period)));
    }

    /// `None` removes the limit.
    pub fn set_video_max_bitrate(&self, bitrate_kbps: Option<u32>) {
        self.send(Command::SetVideoMaxBitrate(bitrate_kbps));
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.send(Command::SetAudioEnabled(enabled));
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.send(Command::SetVideoEnabled(enabled));
    }

    pub fn stop_video_source(&self) {
        self.send(Command::StopVideoSource);
    }

    pub fn start_video_source(&self) {
        self.send(Command::StartVideoSource);
    }

    pub fn change_capture_format(&self, width: u32, height: u32, fps: u32) {
        self.send(Command::ChangeCaptureFormat(CaptureFormat { width, height, fps }));
    }

    /// Current state once every earlier command has run. `None` if the controller stopped.
    pub async fn state(&self) -> Option<NegotiationState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::QueryState(reply_tx));
        reply_rx.await.ok()
    }

    pub fn close(&self) {
        self.send(Command::Close);
    }

    /// Closes the session and waits for the controller to finish, including
    /// the teardown DELETE and any WHIP create still in flight.
    pub async fn shutdown(self) {
        self.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!("[PeerConnectionClient] Controller task failed: {}", e);
        }
    }
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::engine::{IceCandidate, StatsReport};
use crate::sdp::SessionDescription;
use serde::{Deserialize, Serialize};

/// Negotiation state owned by the controller task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    Idle,
    FactoryReady,
    /// Offer requested, local description pending.
    Negotiating,
    LocalSet,
    /// Waiting for, or applying, the remote description.
    RemotePending,
    /// Both descriptions applied. Transport progress is reported through events.
    Connected,
    Closed,
    /// Absorbing for negotiation; only `close` still has an effect.
    Errored,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// Events delivered to the owner of a [`super::PeerConnectionClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerConnectionEvent {
    /// Exactly once per successful offer, after codec reordering and local apply.
    LocalDescription(SessionDescription),
    IceCandidate(IceCandidate),
    IceCandidatesRemoved(Vec<IceCandidate>),
    IceConnected,
    IceDisconnected,
    Connected,
    Disconnected,
    /// Exactly once per session, after every resource is released.
    PeerConnectionClosed,
    StatsReady(StatsReport),
    /// At most once; the session is latched into [`NegotiationState::Errored`].
    PeerConnectionError(String),
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session negotiation controller.
//!
//! A single task owns the media engine and the negotiation state machine:
//!
//! ```text
//! Idle → FactoryReady → Negotiating → LocalSet → RemotePending → Connected → Closed
//!                       (any non-terminal state) → Errored
//! ```
//!
//! Callers talk to it through [`PeerConnectionClient`] and observe it through
//! a stream of [`PeerConnectionEvent`]s.

mod client;
mod controller;
mod engine;
mod events;
mod media;

pub use client::{PeerConnectionClient, SessionOptions};
pub use engine::{
    AudioTrackConfig, ConnectionConfig, EngineEvent, EngineObserver, FactoryOptions,
    IceCandidate, IceConnectionState, IceTransportPolicy, MediaEngine, OfferConstraints,
    PeerConnectionState, StatsReport, VideoTrackConfig,
};
pub use events::{NegotiationState, PeerConnectionEvent};
pub use media::{CaptureSource, MediaSample, MediaSources, SampleSink};

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WhipcastError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Malformed SDP: {0}")]
    Sdp(String),

    #[error("Malformed ICE server entry: {0}")]
    IceServer(String),

    /// Description creation/application failed inside the media engine.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// ICE or DTLS failure signaled by the media engine.
    #[error("Transport failed: {0}")]
    Transport(String),

    /// WHIP endpoint answered outside the protocol (bad status, missing Location).
    #[error("WHIP protocol error: {0}")]
    Whip(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WhipcastError>;

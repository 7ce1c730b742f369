// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// WHIP (WebRTC-HTTP Ingestion Protocol) session client
//
// POST the local offer to create the ingest resource, DELETE it on teardown.

mod client;

pub use client::WhipClient;

use crate::ice::IceServerDirectory;
use crate::sdp::SessionDescription;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// WHIP CONFIGURATION
// ============================================================================

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhipConfig {
    pub endpoint_url: String,
    /// Optional Bearer token. None for endpoints without authentication.
    pub auth_token: Option<String>,
    /// Bound on each HTTP exchange, including DELETE at teardown.
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for WhipConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            auth_token: None,
            timeout_ms: 10_000,
            user_agent: concat!("whipcast/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl WhipConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for WhipConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhipConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

// ============================================================================
// REMOTE SESSION
// ============================================================================

/// Everything a successful POST yields. Never produced partially.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub answer: SessionDescription,
    /// `Location` header as received.
    pub location: String,
    /// Absolute URL the resource is deleted at.
    pub resource_url: String,
    /// Raw `Link` header values, in response order.
    pub link_values: Vec<String>,
    pub ice_servers: IceServerDirectory,
    pub vary: Option<String>,
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::{Result, WhipcastError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ICE_SERVER_REL: &str = "ice-server";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsCertPolicy {
    #[default]
    Secure,
    InsecureNoCheck,
}

/// One relay/connectivity server, as carried in a WHIP `Link` header:
///
/// ```text
/// <turn:turn.example.net:3478>; rel="ice-server"; username="user"; credential="pass"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceServerEntry {
    pub url: String,
    pub username: String,
    pub credential: String,
    pub tls_cert_policy: TlsCertPolicy,
}

impl IceServerEntry {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            credential: credential.into(),
            tls_cert_policy: TlsCertPolicy::Secure,
        }
    }

    /// Link-header encoding, the inverse of [`FromStr`].
    pub fn to_link_value(&self) -> String {
        format!(
            "<{}>; rel=\"{}\"; username=\"{}\"; credential=\"{}\"",
            self.url, ICE_SERVER_REL, self.username, self.credential
        )
    }
}

impl fmt::Display for IceServerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials stay out of logs.
        write!(f, "{} (user {})", self.url, self.username)
    }
}

fn unquote(value: &str) -> String {
    value.trim().replace('"', "")
}

impl FromStr for IceServerEntry {
    type Err = WhipcastError;

    fn from_str(value: &str) -> Result<Self> {
        let mut tokens = value.split(';').map(str::trim);

        let url = tokens
            .next()
            .map(|token| token.replace(['<', '>'], ""))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| WhipcastError::IceServer(format!("missing url in '{}'", value)))?;

        let mut username = None;
        let mut credential = None;
        for token in tokens.filter(|token| !token.is_empty()) {
            let Some((key, field)) = token.split_once('=') else {
                return Err(WhipcastError::IceServer(format!(
                    "parameter '{}' has no value in '{}'",
                    token, value
                )));
            };
            match key.trim() {
                "rel" => {
                    let rel = unquote(field);
                    if rel != ICE_SERVER_REL {
                        return Err(WhipcastError::IceServer(format!(
                            "link relation '{}' is not {}",
                            rel, ICE_SERVER_REL
                        )));
                    }
                }
                "username" => username = Some(unquote(field)),
                "credential" => credential = Some(unquote(field)),
                _ => {}
            }
        }

        let username = username
            .ok_or_else(|| WhipcastError::IceServer(format!("missing username for {}", url)))?;
        let credential = credential
            .ok_or_else(|| WhipcastError::IceServer(format!("missing credential for {}", url)))?;

        Ok(Self::new(url, username, credential))
    }
}

/// Splits a header value holding several comma-joined links, ignoring commas
/// inside quotes or angle brackets.
pub(crate) fn split_link_header(value: &str) -> Vec<&str> {
    let mut links = Vec::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut start = 0;

    for (index, ch) in value.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_brackets = true,
            '>' if !in_quotes => in_brackets = false,
            ',' if !in_quotes && !in_brackets => {
                links.push(value[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    links.push(value[start..].trim());
    links.retain(|link| !link.is_empty());
    links
}

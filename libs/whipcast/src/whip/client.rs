// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{RemoteSession, WhipConfig};
use crate::core::{Result, WhipcastError};
use crate::ice::IceServerDirectory;
use crate::sdp::SessionDescription;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{HeaderMap, Method, Request, StatusCode, Uri, header};
use parking_lot::Mutex;
use std::time::Duration;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

type HttpClient = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    BoxBody,
>;

/// Lifecycle of the single remote resource an instance may own.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResourceState {
    Idle,
    Creating,
    Active(String),
    Deleted,
}

/// WHIP client owning at most one ingest resource.
///
/// Shared as `Arc<WhipClient>` between the negotiation actor and the task
/// running the POST; the resource slot is the only mutable state.
pub struct WhipClient {
    config: WhipConfig,
    http_client: HttpClient,
    resource: Mutex<ResourceState>,
}

impl WhipClient {
    pub fn new(config: WhipConfig) -> Result<Self> {
        if config.endpoint_url.parse::<Uri>().is_err() {
            return Err(WhipcastError::Configuration(format!(
                "Invalid WHIP endpoint URL: '{}'",
                config.endpoint_url
            )));
        }

        // Install rustls crypto provider if needed
        if rustls::crypto::CryptoProvider::get_default().is_none()
            && rustls::crypto::ring::default_provider()
                .install_default()
                .is_err()
        {
            tracing::debug!("[WhipClient] rustls crypto provider installed concurrently");
        }

        tracing::info!(
            "[WhipClient] Creating client for endpoint: {}",
            config.endpoint_url
        );

        let roots = hyper_rustls::HttpsConnectorBuilder::new().with_native_roots();
        let https = Self::tls_builder(roots)?
            .https_or_http() // Allow http:// for local ingest servers
            .enable_http1()
            .enable_http2()
            .build();

        let http_client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .pool_idle_timeout(Duration::from_secs(30))
                .build(https);

        Ok(Self {
            config,
            http_client,
            resource: Mutex::new(ResourceState::Idle),
        })
    }

    /// Native CA roots are required; without them every https handshake fails.
    fn tls_builder<B, E: std::fmt::Display>(roots: std::result::Result<B, E>) -> Result<B> {
        roots.map_err(|e| {
            tracing::error!("[WhipClient] Failed to load CA roots: {}", e);
            WhipcastError::Configuration(format!("Failed to load CA roots: {}", e))
        })
    }

    pub fn config(&self) -> &WhipConfig {
        &self.config
    }

    /// URL of the live resource, if one exists.
    pub fn resource_url(&self) -> Option<String> {
        match &*self.resource.lock() {
            ResourceState::Active(url) => Some(url.clone()),
            _ => None,
        }
    }

    /// POSTs the local offer and returns the complete remote session.
    ///
    /// Fails without side effects on any non-200/201 status, transport error,
    /// timeout, missing `Location` or empty answer. Only one resource can ever
    /// be created per instance.
    pub async fn create(&self, local_sdp: &str) -> Result<RemoteSession> {
        {
            let mut state = self.resource.lock();
            if *state != ResourceState::Idle {
                return Err(WhipcastError::Whip(
                    "WHIP resource already created for this session".into(),
                ));
            }
            *state = ResourceState::Creating;
        }

        match self.post_offer(local_sdp).await {
            Ok(session) => {
                *self.resource.lock() = ResourceState::Active(session.resource_url.clone());
                tracing::info!(
                    "[WhipClient] Session created: {} ({} ICE servers)",
                    session.resource_url,
                    session.ice_servers.len()
                );
                Ok(session)
            }
            Err(e) => {
                *self.resource.lock() = ResourceState::Idle;
                tracing::warn!("[WhipClient] Session create failed: {}", e);
                Err(e)
            }
        }
    }

    /// DELETEs the live resource. Best-effort: failures are logged, never returned.
    pub async fn delete(&self) {
        let resource_url = {
            let mut state = self.resource.lock();
            match std::mem::replace(&mut *state, ResourceState::Deleted) {
                ResourceState::Active(url) => url,
                previous => {
                    tracing::debug!("[WhipClient] No WHIP resource to delete ({:?})", previous);
                    *state = previous;
                    return;
                }
            }
        };

        match self.send(Method::DELETE, &resource_url, None).await {
            Ok((status, _, _)) if status == StatusCode::OK || status == StatusCode::CREATED => {
                tracing::info!("[WhipClient] Session deleted: {}", resource_url);
            }
            Ok((status, _, _)) => {
                tracing::warn!(
                    "[WhipClient] DELETE {} returned {}, resource may still exist server-side",
                    resource_url,
                    status
                );
            }
            Err(e) => {
                tracing::warn!("[WhipClient] DELETE {} failed: {}", resource_url, e);
            }
        }
    }

    async fn post_offer(&self, local_sdp: &str) -> Result<RemoteSession> {
        let mut endpoint = self.config.endpoint_url.clone();
        let mut redirected = false;

        loop {
            let (status, headers, body) = self.send(Method::POST, &endpoint, Some(local_sdp)).await?;

            match status {
                StatusCode::OK | StatusCode::CREATED => {
                    return parse_created(&endpoint, &headers, body);
                }
                StatusCode::TEMPORARY_REDIRECT if !redirected => {
                    let location = header_str(&headers, header::LOCATION).ok_or_else(|| {
                        WhipcastError::Whip("WHIP 307 redirect without Location header".into())
                    })?;
                    endpoint = resolve_location(&endpoint, location)?;
                    redirected = true;
                    tracing::info!("[WhipClient] Redirected to {}", endpoint);
                }
                _ => {
                    let detail = String::from_utf8(body.to_vec())
                        .ok()
                        .filter(|text| !text.trim().is_empty())
                        .unwrap_or_else(|| format!("HTTP {}", status));
                    return Err(WhipcastError::Whip(format!(
                        "WHIP POST failed ({}): {}",
                        status,
                        detail.trim()
                    )));
                }
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        sdp: Option<&str>,
    ) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let timeout_ms = self.config.timeout_ms;

        let body: BoxBody = match sdp {
            Some(sdp) => Full::new(Bytes::from(sdp.to_owned()))
                .map_err(|never| match never {})
                .boxed(),
            None => Empty::<Bytes>::new()
                .map_err(|never| match never {})
                .boxed(),
        };

        let mut req_builder = Request::builder()
            .method(method.clone())
            .uri(url)
            .header(header::ACCEPT, "*/*")
            .header(header::USER_AGENT, &self.config.user_agent);

        if sdp.is_some() {
            req_builder = req_builder.header(header::CONTENT_TYPE, "application/sdp");
        }

        // Add Authorization header only if token is provided
        if let Some(token) = &self.config.auth_token {
            req_builder = req_builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let req = req_builder.body(body).map_err(|e| {
            WhipcastError::Http(format!("Failed to build WHIP {} request: {}", method, e))
        })?;

        tracing::debug!("[WhipClient] {} {}", method, url);

        let response = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.http_client.request(req),
        )
        .await
        .map_err(|_| {
            WhipcastError::Http(format!("WHIP {} timed out after {}ms", method, timeout_ms))
        })?
        .map_err(|e| WhipcastError::Http(format!("WHIP {} request failed: {}", method, e)))?;

        let status = response.status();
        let headers = response.headers().clone();

        let body = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            response.into_body().collect(),
        )
        .await
        .map_err(|_| {
            WhipcastError::Http(format!(
                "WHIP {} response body timed out after {}ms",
                method, timeout_ms
            ))
        })?
        .map_err(|e| WhipcastError::Http(format!("Failed to read WHIP response body: {}", e)))?
        .to_bytes();

        Ok((status, headers, body))
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Absolute locations are used verbatim; paths are joined to the endpoint's scheme and authority.
fn resolve_location(endpoint: &str, location: &str) -> Result<String> {
    if let Ok(uri) = location.parse::<Uri>() {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(location.to_owned());
        }
    }

    let base = endpoint
        .parse::<Uri>()
        .map_err(|e| WhipcastError::Configuration(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
    let (Some(scheme), Some(authority)) = (base.scheme_str(), base.authority()) else {
        return Err(WhipcastError::Configuration(format!(
            "Endpoint '{}' has no scheme or authority",
            endpoint
        )));
    };

    let separator = if location.starts_with('/') { "" } else { "/" };
    Ok(format!("{}://{}{}{}", scheme, authority, separator, location))
}

fn parse_created(endpoint: &str, headers: &HeaderMap, body: Bytes) -> Result<RemoteSession> {
    let location = header_str(headers, header::LOCATION)
        .ok_or_else(|| WhipcastError::Whip("WHIP response without Location header".into()))?
        .to_owned();
    let resource_url = resolve_location(endpoint, &location)?;

    let link_values: Vec<String> = headers
        .get_all(header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_owned)
        .collect();

    let vary = header_str(headers, header::VARY).map(str::to_owned);

    let answer = String::from_utf8(body.to_vec())
        .map_err(|e| WhipcastError::Whip(format!("Invalid UTF-8 in SDP answer: {}", e)))?;
    if answer.trim().is_empty() {
        return Err(WhipcastError::Whip("WHIP response has an empty SDP answer".into()));
    }

    tracing::debug!(
        "[WhipClient] Location '{}' → resource '{}', {} Link values, Vary {:?}",
        location,
        resource_url,
        link_values.len(),
        vary
    );

    Ok(RemoteSession {
        answer: SessionDescription::answer(answer),
        ice_servers: IceServerDirectory::from_link_values(&link_values),
        location,
        resource_url,
        link_values,
        vary,
    })
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Test doubles shared by the integration tests: an in-process WHIP endpoint
//! and a scripted media engine.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{self, HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use axum::routing::{any, post};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use whipcast::negotiation::{
    AudioTrackConfig, ConnectionConfig, EngineObserver, FactoryOptions, IceCandidate,
    MediaEngine, MediaSample, OfferConstraints, PeerConnectionEvent, SampleSink, StatsReport,
    VideoTrackConfig,
};
use whipcast::sdp::{CodecCapability, MediaKind, PROFILE_LEVEL_ID, SessionDescription};
use whipcast::{CaptureFormat, CaptureSource, Result, WhipcastError};

pub const OFFER_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 98 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:98 VP9/90000\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=sendonly\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n";

pub const ANSWER_SDP: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:102 H264/90000\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=recvonly\r\n\
a=rtpmap:111 opus/48000/2\r\n";

pub const LINK_A: &str =
    "<turn:turn.example.com:3478>; rel=\"ice-server\"; username=\"user-a\"; credential=\"pass-a\"";
pub const LINK_B: &str = "<turns:turn.example.com:443?transport=tcp>; rel=\"ice-server\"; username=\"user-b\"; credential=\"pass-b\"";

// ============================================================================
// WHIP ENDPOINT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

/// How the endpoint answers POSTs.
#[derive(Clone)]
pub struct WhipBehavior {
    pub status: StatusCode,
    pub location: Option<String>,
    pub links: Vec<String>,
    pub answer: String,
    pub delay: Duration,
}

impl Default for WhipBehavior {
    fn default() -> Self {
        Self {
            status: StatusCode::CREATED,
            location: Some("/whip/resource/1".to_owned()),
            links: vec![LINK_A.to_owned(), LINK_B.to_owned()],
            answer: ANSWER_SDP.to_owned(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
struct ServerState {
    behavior: WhipBehavior,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct MockWhipServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockWhipServer {
    pub async fn start(behavior: WhipBehavior) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            behavior,
            requests: requests.clone(),
        };

        let router = Router::new()
            .route("/whip/endpoint", post(handle_post))
            .route("/redirect", post(handle_redirect))
            .route("/whip/resource/{id}", any(handle_resource))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn endpoint_url(&self) -> String {
        format!("{}/whip/endpoint", self.base_url)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }
}

fn record(state: &ServerState, method: Method, path: &str, headers: HeaderMap, body: String) {
    state.requests.lock().push(RecordedRequest {
        method,
        path: path.to_owned(),
        headers,
        body,
    });
}

async fn handle_post(State(state): State<ServerState>, headers: HeaderMap, body: String) -> Response {
    record(&state, Method::POST, "/whip/endpoint", headers, body);
    tokio::time::sleep(state.behavior.delay).await;

    let behavior = &state.behavior;
    let mut response = http::Response::builder().status(behavior.status);
    if behavior.status.is_success() {
        for link in &behavior.links {
            response = response.header(header::LINK, link);
        }
        if let Some(location) = &behavior.location {
            response = response.header(header::LOCATION, location);
        }
        response = response
            .header(header::VARY, "Accept")
            .header(header::CONTENT_TYPE, "application/sdp");
        response.body(Body::from(behavior.answer.clone())).unwrap()
    } else {
        response.body(Body::from("stream not found")).unwrap()
    }
}

async fn handle_redirect(State(state): State<ServerState>, headers: HeaderMap, body: String) -> Response {
    record(&state, Method::POST, "/redirect", headers, body);
    http::Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(header::LOCATION, "/whip/endpoint")
        .body(Body::empty())
        .unwrap()
}

async fn handle_resource(
    State(state): State<ServerState>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    record(&state, method, "/whip/resource", headers, body);
    StatusCode::OK
}

// ============================================================================
// MEDIA ENGINE
// ============================================================================

/// Everything the mock engine saw, shared with the test body.
#[derive(Default)]
pub struct Recorder {
    pub journal: Mutex<Vec<String>>,
    pub observer: Mutex<Option<EngineObserver>>,
    pub connection_config: Mutex<Option<ConnectionConfig>>,
    pub video_track: Mutex<Option<VideoTrackConfig>>,
    pub codec_preferences: Mutex<Vec<CodecCapability>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub added_candidates: Mutex<Vec<String>>,
    pub max_bitrates: Mutex<Vec<Option<u32>>>,
}

impl Recorder {
    pub fn log(&self, entry: impl Into<String>) {
        self.journal.lock().push(entry.into());
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn observer(&self) -> EngineObserver {
        self.observer.lock().clone().expect("connection not created")
    }
}

struct NullSink;

impl SampleSink for NullSink {
    fn push_sample(&self, _sample: MediaSample) {}
}

pub struct MockEngine {
    pub recorder: Arc<Recorder>,
    pub fail_factory: bool,
    pub fail_remote: bool,
}

impl MockEngine {
    pub fn new() -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            Self {
                recorder: recorder.clone(),
                fail_factory: false,
                fail_remote: false,
            },
            recorder,
        )
    }
}

impl MediaEngine for MockEngine {
    async fn initialize_factory(&mut self, _options: FactoryOptions) -> Result<()> {
        if self.fail_factory {
            return Err(WhipcastError::Negotiation("no codecs".into()));
        }
        self.recorder.log("initialize_factory");
        Ok(())
    }

    async fn create_connection(
        &mut self,
        config: ConnectionConfig,
        observer: EngineObserver,
    ) -> Result<()> {
        self.recorder.log("create_connection");
        *self.recorder.connection_config.lock() = Some(config);
        *self.recorder.observer.lock() = Some(observer);
        Ok(())
    }

    async fn add_video_track(&mut self, config: VideoTrackConfig) -> Result<Arc<dyn SampleSink>> {
        self.recorder.log("add_video_track");
        *self.recorder.video_track.lock() = Some(config);
        Ok(Arc::new(NullSink))
    }

    async fn add_audio_track(&mut self, _config: AudioTrackConfig) -> Result<Arc<dyn SampleSink>> {
        self.recorder.log("add_audio_track");
        Ok(Arc::new(NullSink))
    }

    fn sender_codec_capabilities(&self, kind: MediaKind) -> Vec<CodecCapability> {
        vec![
            CodecCapability::new("VP8", kind, 90000),
            CodecCapability::new("H264", kind, 90000).with_parameter(PROFILE_LEVEL_ID, "640c1f"),
            CodecCapability::new("H264", kind, 90000).with_parameter(PROFILE_LEVEL_ID, "42e01f"),
        ]
    }

    async fn set_codec_preferences(
        &mut self,
        _kind: MediaKind,
        codecs: Vec<CodecCapability>,
    ) -> Result<()> {
        self.recorder.log("set_codec_preferences");
        *self.recorder.codec_preferences.lock() = codecs;
        Ok(())
    }

    async fn create_offer(&mut self, constraints: OfferConstraints) -> Result<SessionDescription> {
        assert!(!constraints.offer_to_receive_audio && !constraints.offer_to_receive_video);
        self.recorder.log("create_offer");
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()> {
        self.recorder.log("set_local_description");
        *self.recorder.local.lock() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        if self.fail_remote {
            return Err(WhipcastError::Negotiation("bad answer".into()));
        }
        self.recorder.log("set_remote_description");
        *self.recorder.remote.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.recorder.log("add_ice_candidate");
        self.recorder.added_candidates.lock().push(candidate.candidate);
        Ok(())
    }

    async fn remove_ice_candidates(&mut self, candidates: Vec<IceCandidate>) -> Result<()> {
        self.recorder
            .log(format!("remove_ice_candidates:{}", candidates.len()));
        Ok(())
    }

    async fn stats(&mut self) -> Result<StatsReport> {
        Ok(StatsReport {
            timestamp_ms: 1,
            entries: serde_json::Map::new(),
        })
    }

    async fn set_video_max_bitrate(&mut self, bitrate_bps: Option<u32>) -> Result<()> {
        self.recorder.max_bitrates.lock().push(bitrate_bps);
        Ok(())
    }

    fn set_track_enabled(&mut self, kind: MediaKind, enabled: bool) -> Result<()> {
        self.recorder.log(format!("set_track_enabled:{}:{}", kind, enabled));
        Ok(())
    }

    async fn close_connection(&mut self) {
        self.recorder.log("close_connection");
    }

    fn dispose_audio_source(&mut self) {
        self.recorder.log("dispose_audio_source");
    }

    fn dispose_video_source(&mut self) {
        self.recorder.log("dispose_video_source");
    }

    fn dispose_factory(&mut self) {
        self.recorder.log("dispose_factory");
    }
}

/// Capture source that only journals what it is asked to do.
pub struct MockCapture {
    pub name: &'static str,
    pub recorder: Arc<Recorder>,
}

impl CaptureSource for MockCapture {
    fn start_capture(&mut self, format: CaptureFormat, _sink: Arc<dyn SampleSink>) -> Result<()> {
        self.recorder.log(format!(
            "{}.start:{}x{}@{}",
            self.name, format.width, format.height, format.fps
        ));
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        self.recorder.log(format!("{}.stop", self.name));
        Ok(())
    }

    fn change_format(&mut self, format: CaptureFormat) -> Result<()> {
        self.recorder.log(format!(
            "{}.format:{}x{}@{}",
            self.name, format.width, format.height, format.fps
        ));
        Ok(())
    }

    fn dispose(&mut self) {
        self.recorder.log(format!("{}.dispose", self.name));
    }
}

// ============================================================================
// EVENT HELPERS
// ============================================================================

pub async fn next_event(events: &mut UnboundedReceiver<PeerConnectionEvent>) -> PeerConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Waits for the first event matching `predicate`, discarding the others.
pub async fn wait_for<F>(
    events: &mut UnboundedReceiver<PeerConnectionEvent>,
    predicate: F,
) -> PeerConnectionEvent
where
    F: Fn(&PeerConnectionEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// Everything already queued, without waiting.
pub fn drain(events: &mut UnboundedReceiver<PeerConnectionEvent>) -> Vec<PeerConnectionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(
        "0",
        0,
        format!("candidate:{} 1 udp 2122260223 192.0.2.{} 5000{} typ host", n, n, n),
    )
}

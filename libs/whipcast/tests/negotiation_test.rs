// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session controller driven through its public handle with a scripted engine.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    ANSWER_SDP, MockCapture, MockEngine, MockWhipServer, Recorder, WhipBehavior, candidate, drain,
    next_event, wait_for,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use whipcast::ice::TURN_URLS_KEY;
use whipcast::negotiation::{IceConnectionState, IceTransportPolicy, PeerConnectionState};
use whipcast::{
    IceServerDirectory, IceServerEntry, MediaSources, MemoryStateStore, NegotiationParameters,
    NegotiationState, PeerConnectionClient, PeerConnectionEvent, SessionDescription,
    SessionOptions, StateStore, VideoCodec, WhipClient, WhipConfig,
};

fn h264_params() -> NegotiationParameters {
    NegotiationParameters {
        video_codec: VideoCodec::H264Baseline,
        video_start_bitrate_kbps: 1500,
        ..Default::default()
    }
}

fn video_sources(recorder: &Arc<Recorder>) -> MediaSources {
    MediaSources::video(MockCapture {
        name: "video_capture",
        recorder: recorder.clone(),
    })
}

/// Spawns a controller and drives it up to a created connection.
async fn connected_session(
    params: NegotiationParameters,
    options: SessionOptions,
) -> (
    PeerConnectionClient,
    UnboundedReceiver<PeerConnectionEvent>,
    Arc<Recorder>,
) {
    let (engine, recorder) = MockEngine::new();
    let (client, events) = PeerConnectionClient::spawn(engine, params, options);
    client.create_peer_connection_factory();
    client.create_peer_connection(video_sources(&recorder), Some(IceServerDirectory::new()));
    assert_eq!(client.state().await, Some(NegotiationState::FactoryReady));
    (client, events, recorder)
}

fn errors(events: &[PeerConnectionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            PeerConnectionEvent::PeerConnectionError(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_offer_emits_single_local_description_with_preferred_codec() {
    let (client, mut events, recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    client.create_offer();
    let event = next_event(&mut events).await;
    let PeerConnectionEvent::LocalDescription(local) = event else {
        panic!("expected local description, got {event:?}");
    };

    assert!(local.sdp().contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96 98\r\n"));
    assert_eq!(recorder.local.lock().as_ref(), Some(&local));
    assert_eq!(client.state().await, Some(NegotiationState::LocalSet));

    // Baseline profile requested, so the 42e0 H264 variant leads.
    let preferences = recorder.codec_preferences.lock().clone();
    assert_eq!(preferences[0].name, "H264");
    assert_eq!(preferences[0].profile_level_id(), Some("42e01f"));

    // Capture started at the configured format before the offer.
    let journal = recorder.journal();
    assert!(journal.contains(&"video_capture.start:1920x1080@30".to_owned()));
    assert_eq!(*recorder.max_bitrates.lock(), vec![Some(1_000_000)]);

    assert!(drain(&mut events).is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_repeated_offer_reports_one_error() {
    let (client, mut events, recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    client.create_offer();
    client.create_offer();
    client.create_offer();
    assert_eq!(client.state().await, Some(NegotiationState::Errored));

    let seen = drain(&mut events);
    let local_count = seen
        .iter()
        .filter(|e| matches!(e, PeerConnectionEvent::LocalDescription(_)))
        .count();
    assert_eq!(local_count, 1);
    assert_eq!(errors(&seen), vec!["Multiple SDP create.".to_owned()]);

    let offers = recorder
        .journal()
        .iter()
        .filter(|entry| *entry == "create_offer")
        .count();
    assert_eq!(offers, 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_remote_candidates_queued_until_remote_applied() {
    let (client, mut events, recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    client.add_remote_ice_candidate(candidate(1));
    client.create_offer();
    client.add_remote_ice_candidate(candidate(2));
    client.add_remote_ice_candidate(candidate(3));
    client.remove_remote_ice_candidates(vec![candidate(2)]);
    assert_eq!(client.state().await, Some(NegotiationState::LocalSet));
    assert!(recorder.added_candidates.lock().is_empty());

    client.set_remote_description(SessionDescription::answer(ANSWER_SDP));
    client.add_remote_ice_candidate(candidate(4));
    assert_eq!(client.state().await, Some(NegotiationState::Connected));

    let added = recorder.added_candidates.lock().clone();
    assert_eq!(
        added,
        vec![
            candidate(1).candidate,
            candidate(2).candidate,
            candidate(3).candidate,
            candidate(4).candidate
        ]
    );

    // The queued removal is replayed after the additions that preceded it.
    let operations: Vec<String> = recorder
        .journal()
        .into_iter()
        .filter(|entry| entry.contains("ice_candidate"))
        .collect();
    assert_eq!(
        operations,
        vec![
            "add_ice_candidate",
            "add_ice_candidate",
            "add_ice_candidate",
            "remove_ice_candidates:1",
            "add_ice_candidate",
        ]
    );

    // Answer reordered and annotated before apply.
    let remote = recorder.remote.lock().clone().unwrap();
    assert!(remote.sdp().contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96\r\n"));
    assert!(remote.sdp().contains("a=fmtp:102 x-google-start-bitrate=1500\r\n"));

    assert!(errors(&drain(&mut events)).is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_remote_before_local_is_an_error() {
    let (client, mut events, _recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    client.set_remote_description(SessionDescription::answer(ANSWER_SDP));
    assert_eq!(client.state().await, Some(NegotiationState::Errored));
    assert_eq!(errors(&drain(&mut events)).len(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_connection_before_factory_reports_error() {
    let (engine, recorder) = MockEngine::new();
    let (client, mut events) =
        PeerConnectionClient::spawn(engine, h264_params(), SessionOptions::default());

    client.create_peer_connection(video_sources(&recorder), None);
    assert_eq!(client.state().await, Some(NegotiationState::Errored));
    assert_eq!(
        errors(&drain(&mut events)),
        vec!["Peer connection factory is not created".to_owned()]
    );
    assert!(!recorder.journal().contains(&"create_connection".to_owned()));

    // Errored absorbs further negotiation.
    client.create_peer_connection_factory();
    client.create_offer();
    assert_eq!(client.state().await, Some(NegotiationState::Errored));
    assert!(drain(&mut events).is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_missing_video_source_reports_error() {
    let (engine, _recorder) = MockEngine::new();
    let (client, mut events) =
        PeerConnectionClient::spawn(engine, h264_params(), SessionOptions::default());

    client.create_peer_connection_factory();
    client.create_peer_connection(MediaSources::default(), None);
    assert_eq!(client.state().await, Some(NegotiationState::Errored));
    assert_eq!(errors(&drain(&mut events)).len(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_factory_failure_reports_error() {
    let (mut engine, _recorder) = MockEngine::new();
    engine.fail_factory = true;
    let (client, mut events) =
        PeerConnectionClient::spawn(engine, h264_params(), SessionOptions::default());

    client.create_peer_connection_factory();
    assert_eq!(client.state().await, Some(NegotiationState::Errored));
    let reported = errors(&drain(&mut events));
    assert_eq!(reported.len(), 1);
    assert!(reported[0].starts_with("Failed to create peer connection factory"));
    client.shutdown().await;
}

#[tokio::test]
async fn test_transport_failures_report_single_error() {
    let (client, mut events, recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    let observer = recorder.observer();
    observer.on_ice_connection_state(IceConnectionState::Failed);
    observer.on_connection_state(PeerConnectionState::Failed);

    let event = wait_for(&mut events, |e| {
        matches!(e, PeerConnectionEvent::PeerConnectionError(_))
    })
    .await;
    assert_eq!(
        event,
        PeerConnectionEvent::PeerConnectionError("ICE connection failed.".to_owned())
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(errors(&drain(&mut events)).is_empty());
    assert_eq!(client.state().await, Some(NegotiationState::Errored));

    // Close still works from Errored.
    client.close();
    wait_for(&mut events, |e| *e == PeerConnectionEvent::PeerConnectionClosed).await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_engine_callbacks_forwarded() {
    let (client, mut events, recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    let observer = recorder.observer();
    observer.on_ice_candidate(candidate(7));
    observer.on_ice_connection_state(IceConnectionState::Connected);
    observer.on_connection_state(PeerConnectionState::Connected);

    assert_eq!(
        next_event(&mut events).await,
        PeerConnectionEvent::IceCandidate(candidate(7))
    );
    assert_eq!(next_event(&mut events).await, PeerConnectionEvent::IceConnected);
    assert_eq!(next_event(&mut events).await, PeerConnectionEvent::Connected);
    client.shutdown().await;
}

#[tokio::test]
async fn test_close_twice_releases_in_order_and_reports_once() {
    let params = NegotiationParameters {
        audio_enabled: true,
        ..h264_params()
    };
    let (engine, recorder) = MockEngine::new();
    let (client, mut events) = PeerConnectionClient::spawn(engine, params, SessionOptions::default());
    client.create_peer_connection_factory();
    client.create_peer_connection(
        video_sources(&recorder).with_audio(MockCapture {
            name: "audio_capture",
            recorder: recorder.clone(),
        }),
        None,
    );
    client.create_offer();

    client.close();
    client.close();
    assert_eq!(client.state().await, Some(NegotiationState::Closed));

    let closed = drain(&mut events)
        .into_iter()
        .filter(|e| *e == PeerConnectionEvent::PeerConnectionClosed)
        .count();
    assert_eq!(closed, 1);

    let journal = recorder.journal();
    let start = journal
        .iter()
        .position(|entry| entry == "close_connection")
        .unwrap();
    assert_eq!(
        journal[start..],
        [
            "close_connection",
            "audio_capture.stop",
            "audio_capture.dispose",
            "dispose_audio_source",
            "video_capture.stop",
            "video_capture.dispose",
            "dispose_video_source",
            "dispose_factory",
        ]
    );

    // Closed ignores everything.
    client.create_offer();
    client.add_remote_ice_candidate(candidate(1));
    assert_eq!(client.state().await, Some(NegotiationState::Closed));
    assert!(drain(&mut events).is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_stopped_capture_not_stopped_again_on_close() {
    let (client, _events, recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    client.stop_video_source();
    client.stop_video_source();
    client.start_video_source();
    client.change_capture_format(1280, 720, 15);
    client.stop_video_source();
    client.close();
    assert_eq!(client.state().await, Some(NegotiationState::Closed));

    let capture: Vec<String> = recorder
        .journal()
        .into_iter()
        .filter(|entry| entry.starts_with("video_capture."))
        .collect();
    assert_eq!(
        capture,
        vec![
            "video_capture.start:1920x1080@30",
            "video_capture.stop",
            "video_capture.start:1920x1080@30",
            "video_capture.format:1280x720@15",
            "video_capture.stop",
            "video_capture.dispose",
        ]
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_track_toggle_and_bitrate_forwarded() {
    let (client, _events, recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    client.set_video_enabled(false);
    client.set_audio_enabled(false);
    client.set_video_max_bitrate(Some(2500));
    client.set_video_max_bitrate(None);
    client.state().await;

    let journal = recorder.journal();
    assert!(journal.contains(&"set_track_enabled:video:false".to_owned()));
    // No audio track without audio enabled.
    assert!(!journal.contains(&"set_track_enabled:audio:false".to_owned()));
    assert_eq!(*recorder.max_bitrates.lock(), vec![Some(2_500_000), None]);
    client.shutdown().await;
}

#[tokio::test]
async fn test_stats_events_while_enabled() {
    let (client, mut events, _recorder) =
        connected_session(h264_params(), SessionOptions::default()).await;

    client.enable_stats_events(true, Duration::from_millis(20));
    let event = wait_for(&mut events, |e| matches!(e, PeerConnectionEvent::StatsReady(_))).await;
    let PeerConnectionEvent::StatsReady(report) = event else {
        unreachable!();
    };
    assert_eq!(report.timestamp_ms, 1);

    client.enable_stats_events(false, Duration::from_millis(20));
    client.state().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    drain(&mut events);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(drain(&mut events).is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_persisted_ice_servers_used_when_none_given() {
    let store = Arc::new(MemoryStateStore::new());
    let mut directory = IceServerDirectory::new();
    directory.insert(IceServerEntry::new("turn:relay.example.com:3478", "u", "p"));
    directory.persist(store.as_ref()).unwrap();

    let (engine, recorder) = MockEngine::new();
    let options = SessionOptions {
        whip: None,
        state_store: Some(store),
    };
    let (client, _events) = PeerConnectionClient::spawn(engine, h264_params(), options);
    client.create_peer_connection_factory();
    client.create_peer_connection(video_sources(&recorder), None);
    assert_eq!(client.state().await, Some(NegotiationState::FactoryReady));

    let config = recorder.connection_config.lock().clone().unwrap();
    assert_eq!(config.ice_servers.len(), 1);
    assert_eq!(config.ice_servers[0].url, "turn:relay.example.com:3478");
    assert_eq!(config.ice_transport_policy, IceTransportPolicy::Relay);
    client.shutdown().await;
}

// ============================================================================
// WHIP-DRIVEN SESSIONS
// ============================================================================

fn whip_options(server: &MockWhipServer, store: Arc<MemoryStateStore>) -> SessionOptions {
    let mut config = WhipConfig::new(server.endpoint_url());
    config.timeout_ms = 2_000;
    SessionOptions {
        whip: Some(Arc::new(WhipClient::new(config).unwrap())),
        state_store: Some(store),
    }
}

async fn wait_for_state(client: &PeerConnectionClient, expected: NegotiationState) {
    for _ in 0..200 {
        if client.state().await == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state never reached {expected:?}");
}

#[tokio::test]
async fn test_whip_answer_applied_and_resource_deleted_on_shutdown() {
    let server = MockWhipServer::start(WhipBehavior::default()).await;
    let store = Arc::new(MemoryStateStore::new());
    let (client, mut events, recorder) =
        connected_session(h264_params(), whip_options(&server, store.clone())).await;

    client.create_offer();
    wait_for_state(&client, NegotiationState::Connected).await;

    let posted = &server.requests()[0];
    let local = recorder.local.lock().clone().unwrap();
    assert_eq!(posted.body, local.sdp());

    let remote = recorder.remote.lock().clone().unwrap();
    assert!(remote.sdp().contains("a=fmtp:102 x-google-start-bitrate=1500"));

    let persisted = store.get(TURN_URLS_KEY).unwrap().unwrap();
    assert_eq!(IceServerDirectory::from_persisted(&persisted).len(), 2);

    client.shutdown().await;
    assert_eq!(server.count(Method::DELETE), 1);

    let seen = drain(&mut events);
    assert!(errors(&seen).is_empty());
    assert_eq!(seen.last(), Some(&PeerConnectionEvent::PeerConnectionClosed));
}

#[tokio::test]
async fn test_whip_failure_reports_error() {
    let server = MockWhipServer::start(WhipBehavior {
        status: StatusCode::UNAUTHORIZED,
        ..Default::default()
    })
    .await;
    let store = Arc::new(MemoryStateStore::new());
    let (client, mut events, recorder) =
        connected_session(h264_params(), whip_options(&server, store.clone())).await;

    client.create_offer();
    let event = wait_for(&mut events, |e| {
        matches!(e, PeerConnectionEvent::PeerConnectionError(_))
    })
    .await;
    let PeerConnectionEvent::PeerConnectionError(message) = event else {
        unreachable!();
    };
    assert!(message.starts_with("WHIP session create failed"));
    assert!(recorder.remote.lock().is_none());
    assert_eq!(store.get(TURN_URLS_KEY).unwrap(), None);

    client.shutdown().await;
    assert_eq!(server.count(Method::DELETE), 0);
}

#[tokio::test]
async fn test_resource_created_after_close_is_deleted() {
    let server = MockWhipServer::start(WhipBehavior {
        delay: Duration::from_millis(300),
        ..Default::default()
    })
    .await;
    let store = Arc::new(MemoryStateStore::new());
    let (client, mut events, recorder) =
        connected_session(h264_params(), whip_options(&server, store)).await;

    client.create_offer();
    assert_eq!(client.state().await, Some(NegotiationState::RemotePending));
    client.close();
    assert_eq!(client.state().await, Some(NegotiationState::Closed));
    assert_eq!(server.count(Method::DELETE), 0);

    // Shutdown waits for the in-flight create, then deletes what it made.
    client.shutdown().await;
    assert_eq!(server.count(Method::DELETE), 1);
    assert!(recorder.remote.lock().is_none());

    let seen = drain(&mut events);
    assert!(errors(&seen).is_empty());
    let closed = seen
        .iter()
        .filter(|e| **e == PeerConnectionEvent::PeerConnectionClosed)
        .count();
    assert_eq!(closed, 1);
}

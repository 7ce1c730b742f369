// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use whipcast::{
    BroadcastConfig, FileStateStore, H264FileSource, MediaSources, PeerConnectionClient,
    PeerConnectionEvent, SessionOptions, StateStore, VideoCodec, WebRtcEngine, WhipClient,
};

#[derive(Args)]
pub struct PublishArgs {
    /// Annex-B H.264 file to stream
    #[arg(long, short = 'i', value_name = "FILE")]
    input: PathBuf,

    /// Configuration file
    #[arg(long, short = 'c', default_value = BroadcastConfig::FILE_NAME)]
    config: PathBuf,

    /// WHIP endpoint (overrides whip.endpoint_url)
    #[arg(long)]
    url: Option<String>,

    /// Bearer token (overrides whip.auth_token)
    #[arg(long)]
    token: Option<String>,

    /// Frames per second the file is paced at
    #[arg(long)]
    fps: Option<u32>,

    /// Print a stats report every N milliseconds
    #[arg(long, value_name = "MS")]
    stats: Option<u64>,
}

fn resolve_config(args: &PublishArgs) -> Result<BroadcastConfig> {
    let mut config = BroadcastConfig::load_or_default(&args.config);

    if let Some(url) = &args.url {
        config.whip.endpoint_url = url.clone();
    }
    if args.token.is_some() {
        config.whip.auth_token = args.token.clone();
    }
    if let Some(fps) = args.fps {
        config.parameters.video_fps = fps;
    }
    if args.stats.is_some() {
        config.stats_interval_ms = args.stats;
    }

    if config.whip.endpoint_url.is_empty() {
        bail!(
            "No WHIP endpoint: pass --url or set whip.endpoint_url in {}",
            args.config.display()
        );
    }

    // The file is already H.264; only the profile is negotiable.
    let codec = config.parameters.video_codec;
    if !matches!(codec, VideoCodec::H264Baseline | VideoCodec::H264High) {
        tracing::warn!(
            "[publish] {:?} configured but input is H.264, negotiating H264 Baseline",
            codec
        );
        config.parameters.video_codec = VideoCodec::H264Baseline;
    }
    config.parameters.video_enabled = true;
    config.parameters.audio_enabled = false;

    Ok(config)
}

pub async fn run(args: PublishArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let source = H264FileSource::new(&args.input)
        .with_context(|| format!("Cannot stream {}", args.input.display()))?;

    let whip = Arc::new(WhipClient::new(config.whip.clone())?);
    let state_store = config
        .state_path
        .clone()
        .map(|path| Arc::new(FileStateStore::new(path)) as Arc<dyn StateStore>);

    let options = SessionOptions {
        whip: Some(whip),
        state_store,
    };
    let (client, mut events) =
        PeerConnectionClient::spawn(WebRtcEngine::new(), config.parameters.clone(), options);

    client.create_peer_connection_factory();
    client.create_peer_connection(MediaSources::video(source), None);
    if let Some(period_ms) = config.stats_interval_ms {
        client.enable_stats_events(true, Duration::from_millis(period_ms));
    }
    client.create_offer();

    println!("Publishing {} to {}", args.input.display(), config.whip.endpoint_url);
    println!("Press Ctrl+C to stop");

    let mut failure: Option<String> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[publish] Interrupted, closing session");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    PeerConnectionEvent::LocalDescription(_) => {
                        tracing::info!("[publish] Offer ready, contacting WHIP endpoint");
                    }
                    PeerConnectionEvent::IceConnected => {
                        tracing::info!("[publish] ICE connected");
                    }
                    PeerConnectionEvent::Connected => println!("Connected"),
                    PeerConnectionEvent::Disconnected => println!("Disconnected"),
                    PeerConnectionEvent::StatsReady(report) => {
                        println!("{}", serde_json::to_string(&report)?);
                    }
                    PeerConnectionEvent::PeerConnectionError(message) => {
                        failure = Some(message);
                        break;
                    }
                    PeerConnectionEvent::PeerConnectionClosed => break,
                    other => tracing::debug!("[publish] {:?}", other),
                }
            }
        }
    }

    client.shutdown().await;
    println!("Session closed");

    match failure {
        Some(message) => bail!("Session failed: {}", message),
        None => Ok(()),
    }
}

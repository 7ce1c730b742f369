// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! whipcast CLI
//!
//! Publishes a pre-encoded H.264 stream to a WHIP ingest endpoint.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "whipcast")]
#[command(author, version, about = "WHIP publisher", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an H.264 elementary stream (looped) to a WHIP endpoint
    Publish(commands::publish::PublishArgs),

    /// Write a default configuration file
    Init {
        /// Destination (default: ./whipcast.toml)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Publish(args) => commands::publish::run(args).await,
        Commands::Init { path, force } => commands::init::run(path, force),
    }
}

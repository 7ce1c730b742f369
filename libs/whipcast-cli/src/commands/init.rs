// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use whipcast::BroadcastConfig;

pub fn run(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(BroadcastConfig::FILE_NAME));
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let content = toml::to_string_pretty(&BroadcastConfig::default())
        .context("Failed to serialize default configuration")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {}", path.display());
    println!();
    println!("Next steps:");
    println!("  set whip.endpoint_url in {}", path.display());
    println!("  whipcast publish --input stream.h264");
    Ok(())
}

//! Fingerprint command - prints engine fingerprints as JSON.

use anyhow::{Context, Result};
use std::path::PathBuf;

use oracle_image::config::Config;
use oracle_image::engine::fingerprint_engines;

/// Execute the fingerprint command.
pub fn cmd_fingerprint(config: &Config, rootfs: Option<PathBuf>) -> Result<()> {
    let rootfs = super::rootfs_or_default(config, rootfs)?;
    let fingerprints = fingerprint_engines(&rootfs)?;
    let json = serde_json::to_string_pretty(&fingerprints)
        .context("Failed to serialize engine fingerprints")?;
    println!("{}", json);
    Ok(())
}

//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build or replay an image
//! - `dump` - Render an HTML file with one engine
//! - `fingerprint` - Fingerprint the installed engines
//! - `lock` - Inspect the lock
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod build;
mod dump;
mod fingerprint;
pub mod lock;
mod preflight;
pub mod show;

use anyhow::Result;
use std::path::PathBuf;

use oracle_image::config::Config;
use oracle_image::rootfs::ROOTFS_DIR;

pub use build::cmd_build;
pub use dump::cmd_dump;
pub use fingerprint::cmd_fingerprint;
pub use lock::cmd_lock;
pub use preflight::cmd_preflight;
pub use show::cmd_show;

/// `--rootfs` if given, otherwise the rootfs inside the configured image root.
fn rootfs_or_default(config: &Config, rootfs: Option<PathBuf>) -> Result<PathBuf> {
    match rootfs {
        Some(path) => Ok(path),
        None => Ok(config.image_root()?.join(ROOTFS_DIR)),
    }
}

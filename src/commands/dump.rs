//! Dump command - renders an HTML file with one engine.

use anyhow::Result;
use std::path::{Path, PathBuf};

use oracle_image::config::Config;
use oracle_image::engine::{run_dump, Engine};

/// Execute the dump command. The rendered lines are the only output.
pub fn cmd_dump(
    config: &Config,
    engine: Engine,
    width: u32,
    file: &Path,
    rootfs: Option<PathBuf>,
) -> Result<()> {
    let rootfs = super::rootfs_or_default(config, rootfs)?;
    for line in run_dump(&rootfs, engine, width, file)? {
        println!("{}", line);
    }
    Ok(())
}

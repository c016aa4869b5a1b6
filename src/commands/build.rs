//! Build command - builds or replays an image.

use anyhow::Result;
use std::path::PathBuf;

use oracle_image::config::{Config, DEFAULT_ROOT_PACKAGES};
use oracle_image::image::ImageBuilder;

/// Options of the build command.
pub struct BuildArgs {
    pub rebuild_lock: bool,
    pub image_root: Option<PathBuf>,
    pub lock: Option<PathBuf>,
    pub root_packages: Vec<String>,
}

/// Execute the build command.
pub async fn cmd_build(mut config: Config, args: BuildArgs) -> Result<()> {
    if let Some(root) = args.image_root {
        config.image_root = Some(root);
    }
    if let Some(lock) = args.lock {
        config.lock_path = Some(lock);
    }
    let image_root = config.image_root()?.to_path_buf();
    let lock_path = config.lock_path()?;

    // A replay without explicit roots takes whatever the lock was built for.
    let roots = if args.rebuild_lock && args.root_packages.is_empty() {
        DEFAULT_ROOT_PACKAGES.iter().map(|s| s.to_string()).collect()
    } else {
        args.root_packages
    };

    let builder = ImageBuilder::new(config)?;
    let state = builder
        .ensure_image(args.rebuild_lock, &image_root, &lock_path, &roots)
        .await?;

    println!();
    println!("  rootfs:      {}", state.rootfs_path.display());
    println!("  lock:        {}", state.lock_path.display());
    println!("  fingerprint: {}", state.fingerprint);
    println!("  packages:    {}", state.package_count);
    Ok(())
}

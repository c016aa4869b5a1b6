//! oracle-image - builds and runs hermetic reference-engine images.
//!
//! - `build` resolves, verifies and locks the engines' packages from a Debian
//!   snapshot (with `--rebuild-lock`), or replays an existing lock
//! - `dump` / `fingerprint` run the engines from the built rootfs

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use oracle_image::config::Config;
use oracle_image::engine::Engine;

#[derive(Parser)]
#[command(name = "oracle-image")]
#[command(about = "Hermetic reference-engine image builder")]
#[command(
    after_help = "QUICK START:\n  oracle-image preflight                Check tools and configuration\n  oracle-image build --rebuild-lock     Resolve, verify and lock from the snapshot\n  oracle-image build                    Replay the existing lock\n  oracle-image dump --engine lynx --width 80 page.html"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the image (replays the lock unless --rebuild-lock)
    Build {
        /// Regenerate the lock from the snapshot instead of replaying it
        #[arg(long)]
        rebuild_lock: bool,
        /// Image root (overrides ORACLE_IMAGE_ROOT)
        #[arg(long)]
        image_root: Option<PathBuf>,
        /// Lock file (overrides ORACLE_LOCK_PATH)
        #[arg(long)]
        lock: Option<PathBuf>,
        /// Root package (repeatable; default: links2, lynx, w3m)
        #[arg(long = "root-package")]
        root_packages: Vec<String>,
    },

    /// Render an HTML file with one engine
    Dump {
        /// lynx, w3m or links2
        #[arg(long)]
        engine: Engine,
        /// Output width in columns
        #[arg(long)]
        width: u32,
        /// HTML file to render
        file: PathBuf,
        /// Rootfs to run from (default: <image root>/rootfs)
        #[arg(long)]
        rootfs: Option<PathBuf>,
    },

    /// Print engine fingerprints as JSON
    Fingerprint {
        /// Rootfs to inspect (default: <image root>/rootfs)
        #[arg(long)]
        rootfs: Option<PathBuf>,
    },

    /// Inspect the lock
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify tools and configuration before build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Load and validate the lock, then print a summary
    Verify {
        /// Lock file (overrides ORACLE_LOCK_PATH)
        #[arg(long)]
        lock: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the last build's image state
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    match cli.command {
        Commands::Build {
            rebuild_lock,
            image_root,
            lock,
            root_packages,
        } => {
            commands::cmd_build(
                config,
                commands::build::BuildArgs {
                    rebuild_lock,
                    image_root,
                    lock,
                    root_packages,
                },
            )
            .await?;
        }

        Commands::Dump {
            engine,
            width,
            file,
            rootfs,
        } => {
            commands::cmd_dump(&config, engine, width, &file, rootfs)?;
        }

        Commands::Fingerprint { rootfs } => {
            commands::cmd_fingerprint(&config, rootfs)?;
        }

        Commands::Lock { action } => {
            let action = match action {
                LockAction::Verify { lock } => commands::lock::LockAction::Verify { lock },
            };
            commands::cmd_lock(&config, action)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::State => commands::show::ShowTarget::State,
            };
            commands::cmd_show(&config, show_target)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }
    }

    Ok(())
}

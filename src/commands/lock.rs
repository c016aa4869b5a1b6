//! Lock command - inspects the lock document.

use anyhow::Result;
use std::path::PathBuf;

use oracle_image::config::Config;
use oracle_image::lock::OracleLock;

/// Lock subcommands.
pub enum LockAction {
    /// Load, validate and summarize.
    Verify { lock: Option<PathBuf> },
}

/// Execute the lock command.
pub fn cmd_lock(config: &Config, action: LockAction) -> Result<()> {
    match action {
        LockAction::Verify { lock } => {
            let path = match lock {
                Some(path) => path,
                None => config.lock_path()?,
            };
            let lock = OracleLock::load(&path, config.require_provenance)?;

            println!("Lock {} is valid", path.display());
            println!("  formatVersion: {}", lock.format_version);
            println!("  generatedAt:   {}", lock.generated_at);
            println!("  snapshot:      {}", lock.source_policy.snapshot_base_url());
            println!("  roots:         {}", lock.root_packages.join(", "));
            println!("  packages:      {}", lock.packages.len());
            println!("  fingerprint:   {}", lock.fingerprint);
            for release in &lock.release_records {
                println!(
                    "  {} signed by {} ({} index(es))",
                    release.suite,
                    release.signature_key_id,
                    release.package_indexes.len()
                );
            }
        }
    }
    Ok(())
}

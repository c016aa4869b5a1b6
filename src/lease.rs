//! Exclusive build lease on an image root.
//!
//! A marker file created with create-new semantics. Whoever creates it owns
//! the image root until the lease is dropped; anyone else fails immediately.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::OracleError;

/// Marker file name inside the image root.
pub const LEASE_FILE: &str = ".oracle-build.lock";

/// Held for the duration of one build. Removes its marker on drop, on success
/// and on error alike.
#[derive(Debug)]
pub struct BuildLease {
    marker: PathBuf,
}

impl BuildLease {
    /// Take the lease on `image_root`, creating the directory if needed.
    pub fn acquire(image_root: &Path) -> Result<Self> {
        fs::create_dir_all(image_root)
            .with_context(|| format!("Failed to create image root {}", image_root.display()))?;

        let marker = image_root.join(LEASE_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(OracleError::AlreadyBuilding { marker }.into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", marker.display()));
            }
        };

        // Owner pid, for whoever finds a stale marker. A failed write drops
        // the lease, which removes the marker again.
        let lease = Self { marker };
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("Failed to write {}", lease.marker.display()))?;
        Ok(lease)
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }
}

impl Drop for BuildLease {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.marker);
    }
}

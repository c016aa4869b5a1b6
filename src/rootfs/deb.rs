//! Debian archive extraction.
//!
//! Only the data payload is unpacked; maintainer scripts never run. The
//! reference engines need their files, not a configured system.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::process::{self, Cmd};

/// Unpacks an archive's payload into a directory.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// [`ArchiveExtractor`] using `dpkg-deb -x`.
pub struct DpkgDeb {
    program: PathBuf,
}

impl DpkgDeb {
    pub fn new() -> Result<Self> {
        Ok(Self {
            program: process::require_tool("dpkg-deb", "dpkg")?,
        })
    }
}

impl ArchiveExtractor for DpkgDeb {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        if !dest.is_dir() {
            bail!("Extraction target {} is not a directory", dest.display());
        }
        Cmd::new(&self.program)
            .arg("-x")
            .arg_path(archive)
            .arg_path(dest)
            .error_msg(format!("dpkg-deb -x failed for {}", archive.display()))
            .run()?;
        Ok(())
    }
}

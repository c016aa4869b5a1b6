//! Content hashing and the local archive cache.
//!
//! Archives are stored under the names apt itself uses
//! (`{name}_{version}_{arch}.deb`, `:` in the version escaped as `%3a`), so a
//! directory populated by `apt-get download` works as a cache too. Nothing in
//! the cache is trusted: callers hash whatever they find before using it.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// SHA256 of a byte slice, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA256 of a file, streamed, lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {} for hashing", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// True for a 64-character lowercase hex string.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Escape a Debian version the way apt names downloaded archives.
pub fn escape_version(version: &str) -> String {
    version.replace(':', "%3a")
}

/// Directory of previously downloaded `.deb` archives.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    dir: PathBuf,
}

impl ArchiveCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The cached archive stored as `file_name`, if any.
    ///
    /// Only the exact apt name matches, so an archive of the same version for
    /// another architecture never stands in for the locked one.
    pub fn lookup(&self, file_name: &str) -> Option<PathBuf> {
        let path = self.dir.join(file_name);
        path.is_file().then_some(path)
    }

    /// Store verified archive bytes under the archive's own file name.
    ///
    /// Writes to a temporary name and renames, so a concurrent reader never
    /// sees a truncated archive.
    pub fn store(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory {}", self.dir.display()))?;
        let dest = self.dir.join(file_name);
        let partial = self.dir.join(format!(".{}.partial", file_name));
        fs::write(&partial, bytes)
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        fs::rename(&partial, &dest).with_context(|| {
            format!(
                "Failed to move {} to {}",
                partial.display(),
                dest.display()
            )
        })?;
        Ok(dest)
    }
}

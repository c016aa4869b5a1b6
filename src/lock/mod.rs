//! The oracle lock document.
//!
//! The lock is the only authoritative artifact of a build: it names every
//! package in the rootfs, where it came from, and what it must hash to. Image
//! state, engine fingerprints and the rootfs itself are all derived from it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let lock = OracleLock::load(&lock_path, true)?; // validated or Err
//! println!("{} packages, fingerprint {}", lock.packages.len(), lock.fingerprint);
//! ```

mod builder;
mod validate;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::OracleError;

pub use builder::{build_lock, fingerprint, generated_at_for_snapshot, join_url};
pub use validate::{is_snapshot_id, is_unknown_signer, validate, LockViolation};

/// Format written by this build.
pub const FORMAT_VERSION: u32 = 2;

/// Oldest format this build will load. Older documents lack `sourceIndexUrl`
/// and per-index hashes, so they are rejected instead of being half-trusted.
pub const MIN_SUPPORTED_FORMAT_VERSION: u32 = 2;

/// The only supported acquisition mode.
pub const SOURCE_MODE: &str = "snapshot-replay";

/// Signer sentinel recorded when gpgv verified a manifest but no key id could
/// be parsed from its status output.
pub const UNKNOWN_SIGNER: &str = "unknown";

/// One pinned package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub suite: String,
    pub component: String,
    /// Verified Packages index this record's hash was checked against.
    pub source_index_url: String,
    /// Archive-relative path, e.g. pool/main/l/lynx/lynx_2.9.0-1_amd64.deb
    pub filename: String,
    pub download_url: String,
    pub content_sha256: String,
}

impl PackageRecord {
    /// The `(name, version)` identity used for ordering and uniqueness.
    pub fn identity(&self) -> (&str, &str) {
        (&self.name, &self.version)
    }
}

/// A Packages index listed in a signed release manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIndexRecord {
    pub component: String,
    /// Path relative to `dists/<suite>/`, e.g. main/binary-amd64/Packages.xz
    pub index_path: String,
    pub index_url: String,
    pub index_sha256: String,
}

/// Provenance of one suite's release manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRecord {
    pub suite: String,
    pub release_url: String,
    pub release_sha256: String,
    pub signature_key_id: String,
    pub package_indexes: Vec<PackageIndexRecord>,
}

/// Where packages come from and which anchors verified them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePolicy {
    pub mode: String,
    pub mirrors: Vec<String>,
    pub snapshot_root: String,
    pub snapshot_id: String,
    pub keyring_path: PathBuf,
}

impl SourcePolicy {
    /// Build a snapshot-replay policy. Trailing slashes are dropped from the
    /// snapshot root and mirrors so URL joining is uniform.
    pub fn new(
        snapshot_root: &str,
        snapshot_id: &str,
        keyring_path: &Path,
        mirrors: Vec<String>,
    ) -> Result<Self> {
        let snapshot_root = snapshot_root.trim().trim_end_matches('/');
        if snapshot_root.is_empty() {
            bail!("Snapshot root URL is empty");
        }
        if !is_snapshot_id(snapshot_id) {
            bail!(
                "Snapshot id '{}' does not have the shape YYYYMMDDTHHMMSSZ",
                snapshot_id
            );
        }
        Ok(Self {
            mode: SOURCE_MODE.to_string(),
            mirrors: mirrors
                .into_iter()
                .map(|m| m.trim_end_matches('/').to_string())
                .collect(),
            snapshot_root: snapshot_root.to_string(),
            snapshot_id: snapshot_id.to_string(),
            keyring_path: keyring_path.to_path_buf(),
        })
    }

    /// `{snapshot_root}/{snapshot_id}/`, the prefix of every snapshot URL.
    pub fn snapshot_base_url(&self) -> String {
        format!(
            "{}/{}/",
            self.snapshot_root.trim_end_matches('/'),
            self.snapshot_id
        )
    }
}

/// The lock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleLock {
    pub format_version: u32,
    pub generated_at: String,
    pub root_packages: Vec<String>,
    pub source_policy: SourcePolicy,
    pub release_records: Vec<ReleaseRecord>,
    pub packages: Vec<PackageRecord>,
    pub fingerprint: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormatProbe {
    format_version: Option<u32>,
}

impl OracleLock {
    /// Structural violations of this lock (empty when valid).
    pub fn violations(&self, require_provenance: bool) -> Vec<LockViolation> {
        validate(self, require_provenance)
    }

    /// Fail with every violation listed if the lock is not valid.
    pub fn ensure_valid(&self, path: &Path, require_provenance: bool) -> Result<()> {
        let violations = self.violations(require_provenance);
        if violations.is_empty() {
            return Ok(());
        }
        Err(OracleError::LockInvalid {
            path: path.to_path_buf(),
            violations,
        }
        .into())
    }

    /// Parse a lock document without validating it.
    ///
    /// The format version is checked before anything else, so a stale lock is
    /// reported as stale rather than as a pile of missing fields.
    pub fn parse(json: &str, path: &Path) -> Result<Self> {
        let probe: FormatProbe = serde_json::from_str(json)
            .with_context(|| format!("{} is not a JSON lock document", path.display()))?;
        let found = probe.format_version.unwrap_or(0);
        if found < MIN_SUPPORTED_FORMAT_VERSION {
            return Err(OracleError::UnsupportedFormat {
                path: path.to_path_buf(),
                found,
                minimum: MIN_SUPPORTED_FORMAT_VERSION,
            }
            .into());
        }
        if found > FORMAT_VERSION {
            bail!(
                "{} has formatVersion {}, newer than this build understands ({})",
                path.display(),
                found,
                FORMAT_VERSION
            );
        }

        serde_json::from_str(json)
            .with_context(|| format!("Failed to parse lock document {}", path.display()))
    }

    /// Load and validate a lock from disk.
    pub fn load(path: &Path, require_provenance: bool) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read lock {}", path.display()))?;
        let lock = Self::parse(&json, path)?;
        lock.ensure_valid(path, require_provenance)?;
        Ok(lock)
    }

    /// Canonical JSON rendering (pretty, trailing newline).
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self).context("Failed to serialize lock")?;
        json.push('\n');
        Ok(json)
    }

    /// Write the lock atomically (temporary file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_json()?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

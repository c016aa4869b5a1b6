//! Configuration management for oracle-image.
//!
//! Reads configuration from environment variables (a `.env` file is loaded
//! into the environment by `main` before this runs). The trust anchors, the
//! snapshot mirror root and the keyring, have no default: a build that needs
//! them and does not get them fails instead of silently picking something
//! environment-dependent.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lock::SourcePolicy;

/// Architecture assumed when `ORACLE_ARCH` is unset.
pub const DEFAULT_ARCH: &str = "amd64";

/// The three reference engines every image carries.
pub const DEFAULT_ROOT_PACKAGES: &[&str] = &["links2", "lynx", "w3m"];

/// oracle-image configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the rootfs, the lease marker and image-state.json.
    pub image_root: Option<PathBuf>,
    /// Lock file path (default: <image root>/oracle.lock.json)
    pub lock_path: Option<PathBuf>,
    /// Snapshot mirror root URL, e.g. https://snapshot.debian.org/archive/debian
    pub snapshot_root: Option<String>,
    /// Snapshot timestamp token, e.g. 20260101T000000Z
    pub snapshot_id: Option<String>,
    /// Trusted keyring for release signatures.
    pub keyring: Option<PathBuf>,
    /// Fallback mirror roots for archive downloads, tried in order.
    pub mirrors: Vec<String>,
    /// Debian architecture of the package indexes.
    pub arch: String,
    /// Extra arguments passed to every apt-cache invocation.
    pub apt_options: Vec<String>,
    /// Archive cache directory (default: <image root>/cache/archives)
    pub package_cache: Option<PathBuf>,
    /// Reject release manifests whose signer cannot be identified.
    pub require_provenance: bool,
    /// Total time allowed for a single fetch.
    pub fetch_timeout: Duration,
    /// Connect timeout for a single fetch.
    pub connect_timeout: Duration,
    /// Parallel archive downloads.
    pub download_jobs: usize,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let require_provenance = match get("ORACLE_REQUIRE_PROVENANCE").as_deref() {
            None => true,
            Some("1" | "true" | "yes") => true,
            Some("0" | "false" | "no") => false,
            Some(other) => bail!(
                "ORACLE_REQUIRE_PROVENANCE must be true or false, got '{}'",
                other
            ),
        };

        let parse_u64 = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(v) => v
                    .parse::<u64>()
                    .with_context(|| format!("{} must be a whole number, got '{}'", key, v)),
                None => Ok(default),
            }
        };

        let download_jobs = parse_u64("ORACLE_DOWNLOAD_JOBS", 4)?;
        if download_jobs == 0 {
            bail!("ORACLE_DOWNLOAD_JOBS must be at least 1");
        }

        Ok(Self {
            image_root: get("ORACLE_IMAGE_ROOT").map(PathBuf::from),
            lock_path: get("ORACLE_LOCK_PATH").map(PathBuf::from),
            snapshot_root: get("ORACLE_SNAPSHOT_ROOT"),
            snapshot_id: get("ORACLE_SNAPSHOT_ID"),
            keyring: get("ORACLE_KEYRING").map(PathBuf::from),
            mirrors: get("ORACLE_MIRRORS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            arch: get("ORACLE_ARCH").unwrap_or_else(|| DEFAULT_ARCH.to_string()),
            apt_options: get("ORACLE_APT_OPTIONS")
                .map(|v| v.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            package_cache: get("ORACLE_PACKAGE_CACHE").map(PathBuf::from),
            require_provenance,
            fetch_timeout: Duration::from_secs(parse_u64("ORACLE_FETCH_TIMEOUT_SECS", 300)?),
            connect_timeout: Duration::from_secs(parse_u64("ORACLE_CONNECT_TIMEOUT_SECS", 20)?),
            download_jobs: download_jobs as usize,
        })
    }

    /// The image root, or an error explaining how to set it.
    pub fn image_root(&self) -> Result<&Path> {
        self.image_root
            .as_deref()
            .context("No image root configured. Set ORACLE_IMAGE_ROOT or pass --image-root.")
    }

    /// Lock path, defaulting to a file inside the image root.
    pub fn lock_path(&self) -> Result<PathBuf> {
        match &self.lock_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.image_root()?.join("oracle.lock.json")),
        }
    }

    /// Archive cache, defaulting to a directory inside the image root.
    pub fn package_cache(&self) -> Result<PathBuf> {
        match &self.package_cache {
            Some(path) => Ok(path.clone()),
            None => Ok(self.package_cache_under(self.image_root()?)),
        }
    }

    /// Archive cache for a build into `image_root`.
    pub fn package_cache_under(&self, image_root: &Path) -> PathBuf {
        match &self.package_cache {
            Some(path) => path.clone(),
            None => image_root.join("cache/archives"),
        }
    }

    /// Source policy for a rebuild. Fails if any trust anchor is missing.
    pub fn source_policy(&self) -> Result<SourcePolicy> {
        match (&self.snapshot_root, &self.snapshot_id, &self.keyring) {
            (Some(snapshot_root), Some(snapshot_id), Some(keyring)) => SourcePolicy::new(
                snapshot_root,
                snapshot_id,
                keyring,
                self.mirrors.clone(),
            ),
            _ => {
                let missing: Vec<&str> = [
                    ("ORACLE_SNAPSHOT_ROOT", self.snapshot_root.is_none()),
                    ("ORACLE_SNAPSHOT_ID", self.snapshot_id.is_none()),
                    ("ORACLE_KEYRING", self.keyring.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(key, _)| key)
                .collect();
                bail!(
                    "Rebuilding the lock requires explicit trust anchors; missing: {}",
                    missing.join(", ")
                );
            }
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        let show = |v: Option<String>| v.unwrap_or_else(|| "(unset)".to_string());
        println!("Configuration:");
        println!(
            "  ORACLE_IMAGE_ROOT: {}",
            show(self.image_root.as_ref().map(|p| p.display().to_string()))
        );
        println!(
            "  ORACLE_LOCK_PATH: {}",
            show(self.lock_path().ok().map(|p| p.display().to_string()))
        );
        println!("  ORACLE_SNAPSHOT_ROOT: {}", show(self.snapshot_root.clone()));
        println!("  ORACLE_SNAPSHOT_ID: {}", show(self.snapshot_id.clone()));
        println!(
            "  ORACLE_KEYRING: {}",
            show(self.keyring.as_ref().map(|p| p.display().to_string()))
        );
        println!("  ORACLE_MIRRORS: {}", self.mirrors.join(", "));
        println!("  ORACLE_ARCH: {}", self.arch);
        println!("  ORACLE_APT_OPTIONS: {}", self.apt_options.join(" "));
        println!(
            "  ORACLE_PACKAGE_CACHE: {}",
            show(self.package_cache().ok().map(|p| p.display().to_string()))
        );
        println!("  ORACLE_REQUIRE_PROVENANCE: {}", self.require_provenance);
        println!(
            "  ORACLE_FETCH_TIMEOUT_SECS: {}",
            self.fetch_timeout.as_secs()
        );
        println!(
            "  ORACLE_CONNECT_TIMEOUT_SECS: {}",
            self.connect_timeout.as_secs()
        );
        println!("  ORACLE_DOWNLOAD_JOBS: {}", self.download_jobs);
    }
}

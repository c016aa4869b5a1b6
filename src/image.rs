//! Image build coordination.
//!
//! One entry point, two paths:
//!
//! - **Rebuild**: resolve -> verify snapshot -> build lock -> validate -> save
//!   lock -> materialize
//! - **Replay**: load + validate the existing lock -> materialize
//!
//! Both run under the image root's [`BuildLease`] and finish by writing
//! `image-state.json`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::ArchiveCache;
use crate::config::Config;
use crate::download::{DownloadOptions, Fetcher, HttpFetcher};
use crate::lease::BuildLease;
use crate::lock::{build_lock, OracleLock};
use crate::resolve::{AptCache, AptQuery, Resolver};
use crate::rootfs::{ArchiveExtractor, DpkgDeb, MaterializedRootfs, Materializer};
use crate::snapshot::{Gpgv, SignatureVerifier, SnapshotVerifier};
use crate::timing::Timer;

/// File name of the state summary inside the image root.
pub const STATE_FILE: &str = "image-state.json";

/// Summary of the last build. Derived from the lock; never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageState {
    pub rootfs_path: PathBuf,
    pub lock_path: PathBuf,
    pub fingerprint: String,
    pub package_count: usize,
    pub root_packages: Vec<String>,
    pub os_release_text: String,
}

impl ImageState {
    pub fn load(image_root: &Path) -> Result<Self> {
        let path = image_root.join(STATE_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn save(&self, image_root: &Path) -> Result<()> {
        let path = image_root.join(STATE_FILE);
        let tmp = image_root.join(format!("{}.tmp", STATE_FILE));
        let mut json = serde_json::to_string_pretty(self).context("Failed to serialize image state")?;
        json.push('\n');
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

/// `etc/os-release`, falling back to `usr/lib/os-release`, or empty.
pub fn read_os_release(rootfs: &Path) -> String {
    ["etc/os-release", "usr/lib/os-release"]
        .iter()
        .find_map(|rel| fs::read_to_string(rootfs.join(rel)).ok())
        .unwrap_or_default()
}

fn normalize_roots(roots: &[String]) -> Vec<String> {
    let mut roots: Vec<String> = roots
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    roots.sort();
    roots.dedup();
    roots
}

/// Builds and replays images.
///
/// Collaborators default to the real host tools and HTTP; each can be
/// replaced, which is how the test suite runs builds without a network.
pub struct ImageBuilder {
    config: Config,
    fetcher: Box<dyn Fetcher>,
    apt: Option<Box<dyn AptQuery>>,
    signatures: Option<Box<dyn SignatureVerifier>>,
    extractor: Option<Box<dyn ArchiveExtractor>>,
}

impl ImageBuilder {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(DownloadOptions {
            timeout: config.fetch_timeout,
            connect_timeout: config.connect_timeout,
            ..Default::default()
        })?;
        Ok(Self {
            config,
            fetcher: Box::new(fetcher),
            apt: None,
            signatures: None,
            extractor: None,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_apt(mut self, apt: Box<dyn AptQuery>) -> Self {
        self.apt = Some(apt);
        self
    }

    pub fn with_signature_verifier(mut self, signatures: Box<dyn SignatureVerifier>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn ArchiveExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Produce a materialized image in `image_root`.
    ///
    /// With `rebuild_lock` the lock at `lock_path` is regenerated from the
    /// snapshot; otherwise it is loaded and replayed, and `root_packages` (if
    /// non-empty) must match the roots it was built for.
    pub async fn ensure_image(
        &self,
        rebuild_lock: bool,
        image_root: &Path,
        lock_path: &Path,
        root_packages: &[String],
    ) -> Result<ImageState> {
        let _lease = BuildLease::acquire(image_root)?;

        let lock = if rebuild_lock {
            println!("Rebuilding lock {}", lock_path.display());
            self.rebuild(image_root, lock_path, root_packages).await?
        } else {
            println!("Replaying lock {}", lock_path.display());
            self.replay(lock_path, root_packages)?
        };

        let timer = Timer::start("Materialize rootfs");
        let rootfs = self.materialize(&lock, image_root).await?;
        timer.finish();
        println!(
            "  {} packages, {} from cache, {} bytes",
            rootfs.entries.len(),
            rootfs.cached_count(),
            rootfs.total_bytes()
        );

        let state = ImageState {
            os_release_text: read_os_release(&rootfs.path),
            rootfs_path: rootfs.path,
            lock_path: lock_path.to_path_buf(),
            fingerprint: lock.fingerprint.clone(),
            package_count: lock.packages.len(),
            root_packages: lock.root_packages.clone(),
        };
        state.save(image_root)?;
        println!("Image ready: {} (fingerprint {})", state.rootfs_path.display(), state.fingerprint);
        Ok(state)
    }

    async fn rebuild(
        &self,
        image_root: &Path,
        lock_path: &Path,
        root_packages: &[String],
    ) -> Result<OracleLock> {
        let roots = normalize_roots(root_packages);
        if roots.is_empty() {
            bail!("Rebuilding a lock needs at least one root package");
        }
        let policy = self.config.source_policy()?;

        let default_apt;
        let apt: &dyn AptQuery = match &self.apt {
            Some(apt) => apt.as_ref(),
            None => {
                default_apt = AptCache::new(self.config.apt_options.clone())?;
                &default_apt
            }
        };
        let default_gpgv;
        let signatures: &dyn SignatureVerifier = match &self.signatures {
            Some(signatures) => signatures.as_ref(),
            None => {
                default_gpgv = Gpgv::new()?;
                &default_gpgv
            }
        };

        let timer = Timer::start("Resolve dependency closure");
        let resolved = Resolver::new(apt).resolve(&roots)?;
        timer.finish();

        let pairs: BTreeSet<(String, String)> = resolved
            .iter()
            .map(|p| (p.suite.clone(), p.component.clone()))
            .collect();
        let work_dir = image_root.join("cache/metadata").join(&policy.snapshot_id);

        let timer = Timer::start("Verify snapshot metadata");
        let snapshot = SnapshotVerifier::new(
            self.fetcher.as_ref(),
            signatures,
            &policy,
            &self.config.arch,
            self.config.require_provenance,
            &work_dir,
        )
        .verify(&pairs)
        .await?;
        timer.finish();

        let lock = build_lock(&roots, policy, &resolved, &snapshot)?;
        lock.ensure_valid(lock_path, self.config.require_provenance)?;
        lock.save(lock_path)?;
        println!(
            "  Wrote {} ({} packages, fingerprint {})",
            lock_path.display(),
            lock.packages.len(),
            lock.fingerprint
        );
        Ok(lock)
    }

    fn replay(&self, lock_path: &Path, root_packages: &[String]) -> Result<OracleLock> {
        let lock = OracleLock::load(lock_path, self.config.require_provenance)?;
        let requested = normalize_roots(root_packages);
        if !requested.is_empty() && requested != lock.root_packages {
            bail!(
                "Lock {} was built for roots [{}], not [{}]. Rebuild the lock to change roots.",
                lock_path.display(),
                lock.root_packages.join(", "),
                requested.join(", ")
            );
        }
        Ok(lock)
    }

    async fn materialize(&self, lock: &OracleLock, image_root: &Path) -> Result<MaterializedRootfs> {
        let default_dpkg;
        let extractor: &dyn ArchiveExtractor = match &self.extractor {
            Some(extractor) => extractor.as_ref(),
            None => {
                default_dpkg = DpkgDeb::new()?;
                &default_dpkg
            }
        };
        Materializer::new(
            self.fetcher.as_ref(),
            extractor,
            ArchiveCache::new(self.config.package_cache_under(image_root)),
            self.config.mirrors.clone(),
            self.config.download_jobs,
        )
        .materialize(lock, image_root)
        .await
    }
}

//! Rootfs materialization.
//!
//! Turns a validated lock into a directory tree:
//!
//! 1. Acquire every archive (cache, then `downloadUrl`, then each mirror),
//!    with bounded parallel downloads.
//! 2. Hash every archive against the lock. A mismatch aborts before anything
//!    is extracted.
//! 3. Extract in lock order into `rootfs.partial`, then rename it to `rootfs`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let materializer = Materializer::new(&fetcher, &DpkgDeb::new()?, cache, mirrors, 4);
//! let rootfs = materializer.materialize(&lock, image_root).await?;
//! ```

mod deb;

use anyhow::{Context, Result};
use futures::{stream, StreamExt, TryStreamExt};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{escape_version, sha256_file, sha256_hex, ArchiveCache};
use crate::download::Fetcher;
use crate::error::OracleError;
use crate::lock::{join_url, OracleLock, PackageRecord};

pub use deb::{ArchiveExtractor, DpkgDeb};

/// Directory name of the finished rootfs inside the image root.
pub const ROOTFS_DIR: &str = "rootfs";

/// Staging directory extraction writes into.
const PARTIAL_DIR: &str = "rootfs.partial";

/// One package as realized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedEntry {
    pub name: String,
    pub version: String,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub from_cache: bool,
}

/// A finished rootfs.
#[derive(Debug, Clone)]
pub struct MaterializedRootfs {
    pub path: PathBuf,
    /// In lock order.
    pub entries: Vec<MaterializedEntry>,
}

impl MaterializedRootfs {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn cached_count(&self) -> usize {
        self.entries.iter().filter(|e| e.from_cache).count()
    }
}

/// File name an archive is cached under: apt's own naming, so the cache can be
/// seeded with `apt-get download` output.
pub fn cache_file_name(record: &PackageRecord) -> String {
    let base = record.filename.rsplit('/').next().unwrap_or_default();
    let arch_suffix = base
        .rsplit_once('_')
        .map(|(_, tail)| tail)
        .filter(|tail| tail.ends_with(".deb"))
        .unwrap_or("all.deb");
    format!(
        "{}_{}_{}",
        record.name,
        escape_version(&record.version),
        arch_suffix
    )
}

/// Materializes rootfs directories from locks.
pub struct Materializer<'a> {
    fetcher: &'a dyn Fetcher,
    extractor: &'a dyn ArchiveExtractor,
    cache: ArchiveCache,
    mirrors: Vec<String>,
    download_jobs: usize,
}

impl<'a> Materializer<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        extractor: &'a dyn ArchiveExtractor,
        cache: ArchiveCache,
        mirrors: Vec<String>,
        download_jobs: usize,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            cache,
            mirrors,
            download_jobs: download_jobs.max(1),
        }
    }

    /// URLs to try for a record, in order, without duplicates.
    pub fn candidate_urls(&self, record: &PackageRecord) -> Vec<String> {
        let mut urls = vec![record.download_url.clone()];
        for mirror in &self.mirrors {
            let url = join_url(mirror, &record.filename);
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    /// Acquire, verify and extract every package of `lock` into
    /// `{image_root}/rootfs`.
    pub async fn materialize(&self, lock: &OracleLock, image_root: &Path) -> Result<MaterializedRootfs> {
        println!(
            "  Acquiring {} archives ({} parallel)...",
            lock.packages.len(),
            self.download_jobs
        );

        let mut acquired: Vec<(usize, MaterializedEntry)> =
            stream::iter(lock.packages.iter().enumerate())
                .map(|(i, record)| async move { self.acquire(record).await.map(|e| (i, e)) })
                .buffer_unordered(self.download_jobs)
                .try_collect()
                .await?;
        acquired.sort_by_key(|(i, _)| *i);
        let entries: Vec<MaterializedEntry> = acquired.into_iter().map(|(_, e)| e).collect();

        let partial = image_root.join(PARTIAL_DIR);
        if partial.exists() {
            fs::remove_dir_all(&partial)
                .with_context(|| format!("Failed to clear stale {}", partial.display()))?;
        }
        fs::create_dir_all(&partial)
            .with_context(|| format!("Failed to create {}", partial.display()))?;

        println!("  Extracting {} archives...", entries.len());
        for entry in &entries {
            self.extractor
                .extract(&entry.archive_path, &partial)
                .with_context(|| format!("Failed to extract {}={}", entry.name, entry.version))?;
        }

        let rootfs = image_root.join(ROOTFS_DIR);
        if rootfs.exists() {
            fs::remove_dir_all(&rootfs)
                .with_context(|| format!("Failed to remove previous {}", rootfs.display()))?;
        }
        fs::rename(&partial, &rootfs).with_context(|| {
            format!("Failed to move {} to {}", partial.display(), rootfs.display())
        })?;

        Ok(MaterializedRootfs {
            path: rootfs,
            entries,
        })
    }

    /// Get one verified archive on disk.
    async fn acquire(&self, record: &PackageRecord) -> Result<MaterializedEntry> {
        if let Some(path) = self.cache.lookup(&cache_file_name(record)) {
            let actual = sha256_file(&path)?;
            if actual != record.content_sha256 {
                return Err(OracleError::ArchiveHashMismatch {
                    name: record.name.clone(),
                    version: record.version.clone(),
                    source_desc: format!("cached {}", path.display()),
                    expected: record.content_sha256.clone(),
                    actual,
                }
                .into());
            }
            let size_bytes = fs::metadata(&path)
                .with_context(|| format!("Failed to stat {}", path.display()))?
                .len();
            return Ok(MaterializedEntry {
                name: record.name.clone(),
                version: record.version.clone(),
                archive_path: path,
                size_bytes,
                from_cache: true,
            });
        }

        let mut attempts = Vec::new();
        for url in self.candidate_urls(record) {
            let bytes = match self.fetcher.fetch(&url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("    [WARN] {}: {}", record.name, e);
                    attempts.push(format!("  {}: {:#}", url, e));
                    continue;
                }
            };

            let actual = sha256_hex(&bytes);
            if actual != record.content_sha256 {
                return Err(OracleError::ArchiveHashMismatch {
                    name: record.name.clone(),
                    version: record.version.clone(),
                    source_desc: url,
                    expected: record.content_sha256.clone(),
                    actual,
                }
                .into());
            }

            let archive_path = self.cache.store(&cache_file_name(record), &bytes)?;
            println!("    Fetched {} {} ({} bytes)", record.name, record.version, bytes.len());
            return Ok(MaterializedEntry {
                name: record.name.clone(),
                version: record.version.clone(),
                archive_path,
                size_bytes: bytes.len() as u64,
                from_cache: false,
            });
        }

        Err(OracleError::AcquisitionFailed {
            name: record.name.clone(),
            version: record.version.clone(),
            attempts: attempts.join("\n"),
        }
        .into())
    }
}

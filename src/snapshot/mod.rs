//! Snapshot chain of trust.
//!
//! ```text
//! keyring --gpgv--> dists/<suite>/Release --SHA256--> <component>/binary-<arch>/Packages.*
//!                                                       --SHA256--> pool/.../<pkg>.deb
//! ```
//!
//! [`SnapshotVerifier`] establishes the first two links for every `(suite,
//! component)` pair a resolution uses. The last link is checked twice: once by
//! the lock builder against package metadata, and again by the materializer
//! against the archive bytes.

mod index;
mod release;
mod signature;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::sha256_hex;
use crate::download::Fetcher;
use crate::error::OracleError;
use crate::lock::{is_unknown_signer, join_url, PackageIndexRecord, ReleaseRecord, SourcePolicy};

pub use index::{decompress, parse_packages, select_index, Compression, IndexChoice, IndexKey};
pub use release::{ManifestEntry, ReleaseManifest};
pub use signature::{
    is_plausible_key_id, parse_gpg_status, GpgStatus, Gpgv, SignatureStatus, SignatureVerifier,
};

/// A Packages index whose bytes matched the signed manifest.
#[derive(Debug, Clone)]
pub struct VerifiedIndex {
    pub suite: String,
    pub component: String,
    pub url: String,
    entries: HashMap<IndexKey, String>,
}

impl VerifiedIndex {
    pub fn new(
        suite: &str,
        component: &str,
        url: &str,
        entries: HashMap<IndexKey, String>,
    ) -> Self {
        Self {
            suite: suite.to_string(),
            component: component.to_string(),
            url: url.to_string(),
            entries,
        }
    }

    /// Index SHA256 of the exact `(name, version, filename)`.
    pub fn lookup(&self, name: &str, version: &str, filename: &str) -> Option<&str> {
        self.entries
            .get(&(name.to_string(), version.to_string(), filename.to_string()))
            .map(String::as_str)
    }

}

/// Everything verified for one build.
#[derive(Debug, Clone, Default)]
pub struct VerifiedSnapshot {
    /// `{snapshot_root}/{snapshot_id}/`
    pub base_url: String,
    pub releases: Vec<ReleaseRecord>,
    pub indexes: BTreeMap<(String, String), VerifiedIndex>,
}

impl VerifiedSnapshot {
    pub fn index_for(&self, suite: &str, component: &str) -> Option<&VerifiedIndex> {
        self.indexes.get(&(suite.to_string(), component.to_string()))
    }
}

/// Verifies release manifests and indexes of a snapshot.
pub struct SnapshotVerifier<'a> {
    fetcher: &'a dyn Fetcher,
    signatures: &'a dyn SignatureVerifier,
    policy: &'a SourcePolicy,
    arch: String,
    require_provenance: bool,
    /// Fetched Release files are kept here for gpgv and for inspection.
    work_dir: PathBuf,
}

impl<'a> SnapshotVerifier<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        signatures: &'a dyn SignatureVerifier,
        policy: &'a SourcePolicy,
        arch: &str,
        require_provenance: bool,
        work_dir: &Path,
    ) -> Self {
        Self {
            fetcher,
            signatures,
            policy,
            arch: arch.to_string(),
            require_provenance,
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Verify each suite's manifest, then each listed component index.
    ///
    /// Nothing from a suite is used until its signature has verified, and no
    /// index is parsed until its hash matched the signed manifest.
    pub async fn verify(&self, pairs: &BTreeSet<(String, String)>) -> Result<VerifiedSnapshot> {
        let base_url = self.policy.snapshot_base_url();
        let mut by_suite: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (suite, component) in pairs {
            by_suite.entry(suite.as_str()).or_default().push(component.as_str());
        }

        let mut snapshot = VerifiedSnapshot {
            base_url: base_url.clone(),
            ..Default::default()
        };

        for (suite, components) in by_suite {
            let suite_dir = self.work_dir.join(suite.replace('/', "_"));
            fs::create_dir_all(&suite_dir)
                .with_context(|| format!("Failed to create {}", suite_dir.display()))?;

            let dists_url = join_url(&base_url, &format!("dists/{}", suite));
            let (manifest, mut record) = self.verify_release(suite, &dists_url, &suite_dir).await?;

            for component in components {
                let (index, choice) = self
                    .verify_index(suite, component, &dists_url, &manifest, &suite_dir)
                    .await?;
                record.package_indexes.push(PackageIndexRecord {
                    component: component.to_string(),
                    index_path: choice.path,
                    index_url: index.url.clone(),
                    index_sha256: choice.entry.sha256,
                });
                snapshot
                    .indexes
                    .insert((suite.to_string(), component.to_string()), index);
            }

            snapshot.releases.push(record);
        }

        Ok(snapshot)
    }

    async fn verify_release(
        &self,
        suite: &str,
        dists_url: &str,
        suite_dir: &Path,
    ) -> Result<(ReleaseManifest, ReleaseRecord)> {
        let release_url = join_url(dists_url, "Release");
        let signature_url = join_url(dists_url, "Release.gpg");
        println!("  Verifying {}", release_url);

        let release_bytes = self.fetcher.fetch(&release_url).await?;
        let signature_bytes = self.fetcher.fetch(&signature_url).await?;

        let release_path = suite_dir.join("Release");
        let signature_path = suite_dir.join("Release.gpg");
        fs::write(&release_path, &release_bytes)
            .with_context(|| format!("Failed to write {}", release_path.display()))?;
        fs::write(&signature_path, &signature_bytes)
            .with_context(|| format!("Failed to write {}", signature_path.display()))?;

        let status = self.signatures.verify(
            &release_path,
            &signature_path,
            &self.policy.keyring_path,
            &release_url,
        )?;
        if is_unknown_signer(&status.key_id) {
            if self.require_provenance {
                return Err(OracleError::UntrustedSigner {
                    suite: suite.to_string(),
                }
                .into());
            }
            eprintln!("  [WARN] Signer of {} could not be identified", release_url);
        }

        let text = String::from_utf8_lossy(&release_bytes);
        let manifest = ReleaseManifest::parse(&text)
            .with_context(|| format!("Failed to parse {}", release_url))?;
        if !manifest.describes_suite(suite) {
            return Err(OracleError::SignatureRejected {
                url: release_url,
                detail: format!(
                    "manifest is for suite {:?} / codename {:?}, not '{}'",
                    manifest.suite, manifest.codename, suite
                ),
            }
            .into());
        }

        let record = ReleaseRecord {
            suite: suite.to_string(),
            release_sha256: sha256_hex(&release_bytes),
            release_url,
            signature_key_id: status.key_id,
            package_indexes: Vec::new(),
        };
        Ok((manifest, record))
    }

    async fn verify_index(
        &self,
        suite: &str,
        component: &str,
        dists_url: &str,
        manifest: &ReleaseManifest,
        suite_dir: &Path,
    ) -> Result<(VerifiedIndex, IndexChoice)> {
        let choice = select_index(manifest, component, &self.arch).ok_or_else(|| {
            OracleError::MissingIndex {
                suite: suite.to_string(),
                component: component.to_string(),
                arch: self.arch.clone(),
            }
        })?;
        let url = join_url(dists_url, &choice.path);

        let bytes = self.fetcher.fetch(&url).await?;
        let actual = sha256_hex(&bytes);
        if actual != choice.entry.sha256 {
            return Err(OracleError::IndexHashMismatch {
                url,
                expected: choice.entry.sha256.clone(),
                actual,
            }
            .into());
        }
        if bytes.len() as u64 != choice.entry.size {
            return Err(OracleError::IndexHashMismatch {
                url,
                expected: format!("{} bytes", choice.entry.size),
                actual: format!("{} bytes", bytes.len()),
            }
            .into());
        }

        let scratch = suite_dir.join(format!("{}.index", component.replace('/', "_")));
        let plain = decompress(&bytes, choice.compression, &scratch)
            .with_context(|| format!("Failed to decode {}", url))?;
        let entries = parse_packages(&String::from_utf8_lossy(&plain))
            .with_context(|| format!("Failed to parse {}", url))?;
        println!("    {} {}: {} packages", suite, component, entries.len());

        Ok((VerifiedIndex::new(suite, component, &url, entries), choice))
    }
}

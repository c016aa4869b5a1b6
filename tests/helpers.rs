//! Shared test utilities for oracle-image tests.
//!
//! Builds never touch the network or host tools here: a [`FakeSnapshot`]
//! renders a consistent Release / Packages / pool tree into a [`MapFetcher`],
//! and the matching [`FakeApt`], [`FakeVerifier`] and [`FakeExtractor`] stand
//! in for apt-cache, gpgv and dpkg-deb.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use oracle_image::cache::sha256_hex;
use oracle_image::config::Config;
use oracle_image::download::Fetcher;
use oracle_image::error::OracleError;
use oracle_image::image::ImageBuilder;
use oracle_image::resolve::AptQuery;
use oracle_image::rootfs::ArchiveExtractor;
use oracle_image::snapshot::{SignatureStatus, SignatureVerifier};

pub const SNAPSHOT_ROOT: &str = "https://snap.test/archive/debian";
pub const SNAPSHOT_ID: &str = "20260101T000000Z";
pub const SUITE: &str = "bookworm";
pub const COMPONENT: &str = "main";
pub const KEY_ID: &str = "4CB50190207B4758A3F73A796ED0E7B82643E131";

/// `{SNAPSHOT_ROOT}/{SNAPSHOT_ID}/`
pub fn base_url() -> String {
    format!("{}/{}/", SNAPSHOT_ROOT, SNAPSHOT_ID)
}

/// Test environment with a temporary image root and keyring.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub image_root: PathBuf,
    pub lock_path: PathBuf,
    pub keyring: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let image_root = base.join("image");
        let lock_path = base.join("oracle.lock.json");
        let keyring = base.join("debian-archive-keyring.gpg");
        fs::write(&keyring, b"keyring").expect("Failed to create keyring");

        Self {
            _temp_dir: temp_dir,
            image_root,
            lock_path,
            keyring,
        }
    }

    /// Configuration with every trust anchor set and one fallback mirror.
    pub fn config(&self) -> Config {
        let vars: HashMap<String, String> = [
            ("ORACLE_IMAGE_ROOT", self.image_root.to_string_lossy().into_owned()),
            ("ORACLE_LOCK_PATH", self.lock_path.to_string_lossy().into_owned()),
            ("ORACLE_SNAPSHOT_ROOT", SNAPSHOT_ROOT.to_string()),
            ("ORACLE_SNAPSHOT_ID", SNAPSHOT_ID.to_string()),
            ("ORACLE_KEYRING", self.keyring.to_string_lossy().into_owned()),
            ("ORACLE_MIRRORS", "https://mirror.test/debian".to_string()),
            ("ORACLE_DOWNLOAD_JOBS", "2".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Config::from_vars(&vars).expect("Failed to build config")
    }

    /// An image builder wired to fakes for `snapshot`.
    pub fn builder(&self, snapshot: &FakeSnapshot, fetcher: &MapFetcher) -> ImageBuilder {
        ImageBuilder::new(self.config())
            .expect("Failed to create builder")
            .with_fetcher(Box::new(fetcher.clone()))
            .with_apt(Box::new(snapshot.apt()))
            .with_signature_verifier(Box::new(FakeVerifier::trusting(KEY_ID)))
            .with_extractor(Box::new(FakeExtractor))
    }

    pub fn rootfs(&self) -> PathBuf {
        self.image_root.join("rootfs")
    }
}

// =============================================================================
// Fetcher
// =============================================================================

#[derive(Default)]
struct FetchState {
    responses: HashMap<String, Vec<u8>>,
    requests: Vec<String>,
}

/// In-memory [`Fetcher`]. Unknown URLs fail like an HTTP 404. Clones share
/// state, so a test can keep one handle and give another to the builder.
#[derive(Clone, Default)]
pub struct MapFetcher {
    state: Arc<Mutex<FetchState>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), body.into());
    }

    pub fn remove(&self, url: &str) {
        self.state.lock().unwrap().responses.remove(url);
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn deb_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|u| u.ends_with(".deb"))
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(url.to_string());
        state
            .responses
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 for {}: Not Found", url))
    }
}

// =============================================================================
// Signature verifier
// =============================================================================

/// [`SignatureVerifier`] that accepts or rejects everything.
pub struct FakeVerifier {
    key_id: String,
    reject: bool,
}

impl FakeVerifier {
    pub fn trusting(key_id: &str) -> Self {
        Self {
            key_id: key_id.to_string(),
            reject: false,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            key_id: String::new(),
            reject: true,
        }
    }
}

impl SignatureVerifier for FakeVerifier {
    fn verify(
        &self,
        data: &Path,
        signature: &Path,
        _keyring: &Path,
        url: &str,
    ) -> Result<SignatureStatus> {
        assert!(data.is_file() && signature.is_file());
        if self.reject {
            return Err(OracleError::SignatureRejected {
                url: url.to_string(),
                detail: "BADSIG 6ED0E7B82643E131".to_string(),
            }
            .into());
        }
        Ok(SignatureStatus {
            key_id: self.key_id.clone(),
        })
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// [`ArchiveExtractor`] for fake archives: a JSON object of path -> contents.
/// Paths ending in `bin/...` are made executable.
pub struct FakeExtractor;

impl ArchiveExtractor for FakeExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let files: BTreeMap<String, String> = serde_json::from_slice(&fs::read(archive)?)?;
        for (rel, contents) in files {
            if rel.starts_with('/') || rel.contains("..") {
                bail!("unsafe path {} in {}", rel, archive.display());
            }
            let path = dest.join(&rel);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(&path, contents)?;
            if rel.contains("bin/") {
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Snapshot and apt
// =============================================================================

/// A package of the fake archive.
#[derive(Clone)]
pub struct FakePackage {
    pub name: String,
    pub version: String,
    pub files: BTreeMap<String, String>,
}

impl FakePackage {
    pub fn new(name: &str, version: &str) -> Self {
        let mut files = BTreeMap::new();
        files.insert(
            format!("usr/share/doc/{}/copyright", name),
            format!("{} {}\n", name, version),
        );
        Self {
            name: name.to_string(),
            version: version.to_string(),
            files,
        }
    }

    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.to_string());
        self
    }

    pub fn filename(&self) -> String {
        let first = &self.name[..1];
        format!(
            "pool/main/{}/{}/{}_{}_amd64.deb",
            first, self.name, self.name, self.version
        )
    }

    pub fn download_url(&self) -> String {
        format!("{}{}", base_url(), self.filename())
    }

    pub fn deb_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.files).unwrap()
    }

    pub fn sha256(&self) -> String {
        sha256_hex(&self.deb_bytes())
    }
}

/// A one-suite, one-component archive.
pub struct FakeSnapshot {
    pub packages: Vec<FakePackage>,
    /// Packages absent from the index (but still reported by apt).
    pub unindexed: Vec<String>,
}

impl FakeSnapshot {
    pub fn new(packages: Vec<FakePackage>) -> Self {
        Self {
            packages,
            unindexed: Vec::new(),
        }
    }

    /// The three engines, their libraries and a base-files package.
    pub fn engines() -> Self {
        Self::new(vec![
            FakePackage::new("base-files", "12.4").file(
                "etc/os-release",
                "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\n",
            ),
            FakePackage::new("libc6", "2.36-9").file(
                "etc/ld.so.conf.d/x86_64-linux-gnu.conf",
                "/usr/local/lib/x86_64-linux-gnu\n",
            ),
            FakePackage::new("links2", "2.28-1").file(
                "usr/bin/links2",
                "#!/bin/sh\necho \"Links 2.28\"\n",
            ),
            FakePackage::new("lynx", "2.9.0-1").file(
                "usr/bin/lynx",
                "#!/bin/sh\necho \"Lynx Version 2.9.0dev.12\"\n",
            ),
            FakePackage::new("w3m", "0.5.3+git20230121-2").file(
                "usr/bin/w3m",
                "#!/bin/sh\necho \"w3m version w3m/0.5.3+git20230121\"\n",
            ),
        ])
    }

    pub fn dists_url(&self) -> String {
        format!("{}dists/{}", base_url(), SUITE)
    }

    pub fn index_url(&self) -> String {
        format!("{}/{}/binary-amd64/Packages", self.dists_url(), COMPONENT)
    }

    pub fn packages_index(&self) -> String {
        self.packages
            .iter()
            .filter(|p| !self.unindexed.contains(&p.name))
            .map(|p| {
                format!(
                    "Package: {}\nVersion: {}\nArchitecture: amd64\nFilename: {}\nSize: {}\nSHA256: {}\n",
                    p.name,
                    p.version,
                    p.filename(),
                    p.deb_bytes().len(),
                    p.sha256()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn release(&self, index: &[u8]) -> String {
        format!(
            "Origin: Debian\nLabel: Debian\nSuite: stable\nCodename: {}\nArchitectures: amd64\nComponents: {}\nSHA256:\n {} {} {}/binary-amd64/Packages\n",
            SUITE,
            COMPONENT,
            sha256_hex(index),
            index.len(),
            COMPONENT
        )
    }

    /// Register Release, signature, index and every archive.
    pub fn install(&self, fetcher: &MapFetcher) {
        let index = self.packages_index().into_bytes();
        fetcher.insert(&format!("{}/Release", self.dists_url()), self.release(&index));
        fetcher.insert(&format!("{}/Release.gpg", self.dists_url()), "signature");
        fetcher.insert(&self.index_url(), index);
        for p in &self.packages {
            fetcher.insert(&p.download_url(), p.deb_bytes());
        }
    }

    pub fn apt(&self) -> FakeApt {
        let depends = self
            .packages
            .iter()
            .map(|p| format!("{}\n  Depends: libc6\n", p.name))
            .collect::<String>();
        let policy = self
            .packages
            .iter()
            .map(|p| {
                format!(
                    "{}:\n  Installed: (none)\n  Candidate: {}\n  Version table:\n     {} 500\n        500 http://deb.debian.org/debian {}/{} amd64 Packages\n",
                    p.name, p.version, p.version, SUITE, COMPONENT
                )
            })
            .collect::<String>();
        let show = self
            .packages
            .iter()
            .map(|p| {
                format!(
                    "Package: {}\nVersion: {}\nFilename: {}\nSHA256: {}\n\n",
                    p.name,
                    p.version,
                    p.filename(),
                    p.sha256()
                )
            })
            .collect::<String>();
        FakeApt {
            depends,
            policy,
            show,
        }
    }
}

/// [`AptQuery`] returning canned output.
#[derive(Clone)]
pub struct FakeApt {
    pub depends: String,
    pub policy: String,
    pub show: String,
}

impl AptQuery for FakeApt {
    fn depends(&self, _roots: &[String]) -> Result<String> {
        Ok(self.depends.clone())
    }

    fn policy(&self, _names: &[String]) -> Result<String> {
        Ok(self.policy.clone())
    }

    fn show(&self, _pins: &[(String, String)]) -> Result<String> {
        Ok(self.show.clone())
    }
}

pub fn roots() -> Vec<String> {
    ["lynx", "w3m", "links2"].iter().map(|s| s.to_string()).collect()
}

/// Write an executable shell script.
pub fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

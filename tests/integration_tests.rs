//! Integration tests for image builds.
//!
//! Every build here runs end to end (resolve, verify, lock, materialize)
//! against an in-memory snapshot, so each test states what a whole build does
//! when one link of the chain is broken.

mod helpers;

use helpers::{
    base_url, roots, FakeExtractor, FakePackage, FakeSnapshot, FakeVerifier, MapFetcher, TestEnv,
    COMPONENT, KEY_ID, SNAPSHOT_ID, SNAPSHOT_ROOT, SUITE,
};
use oracle_image::cache::{sha256_hex, ArchiveCache};
use oracle_image::error::OracleError;
use oracle_image::image::{ImageState, STATE_FILE};
use oracle_image::lease::LEASE_FILE;
use oracle_image::lock::{build_lock, OracleLock, PackageIndexRecord, ReleaseRecord, SourcePolicy};
use oracle_image::resolve::ResolvedPackage;
use oracle_image::rootfs::Materializer;
use oracle_image::snapshot::{VerifiedIndex, VerifiedSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

fn oracle_error(err: &anyhow::Error) -> &OracleError {
    err.downcast_ref::<OracleError>()
        .unwrap_or_else(|| panic!("expected an OracleError, got: {:#}", err))
}

// =============================================================================
// Rebuild and replay
// =============================================================================

#[tokio::test]
async fn test_rebuild_produces_locked_rootfs() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    let state = env
        .builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap();

    assert_eq!(state.package_count, 5);
    assert_eq!(state.root_packages, vec!["links2", "lynx", "w3m"]);
    assert!(state.os_release_text.contains("ID=debian"));
    assert!(env.rootfs().join("usr/bin/lynx").is_file());
    assert!(!env.image_root.join("rootfs.partial").exists());
    assert!(!env.image_root.join(LEASE_FILE).exists());

    let lock = OracleLock::load(&env.lock_path, true).unwrap();
    assert_eq!(lock.fingerprint, state.fingerprint);
    assert_eq!(lock.generated_at, "2026-01-01T00:00:00Z");
    assert_eq!(lock.release_records.len(), 1);
    assert_eq!(lock.release_records[0].signature_key_id, KEY_ID);
    assert_eq!(lock.release_records[0].package_indexes[0].index_url, snapshot.index_url());
    for pkg in &lock.packages {
        assert!(pkg.download_url.starts_with(&base_url()));
        assert_eq!(pkg.source_index_url, snapshot.index_url());
    }

    let saved = ImageState::load(&env.image_root).unwrap();
    assert_eq!(saved, state);
    assert!(env.image_root.join(STATE_FILE).is_file());
}

#[tokio::test]
async fn test_replay_needs_no_metadata_or_network() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);
    let first = env
        .builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap();

    fetcher.clear_requests();
    let replayed = env
        .builder(&snapshot, &fetcher)
        .ensure_image(false, &env.image_root, &env.lock_path, &[])
        .await
        .unwrap();

    assert_eq!(replayed, first);
    assert!(
        fetcher.requests().is_empty(),
        "replay fetched {:?}",
        fetcher.requests()
    );
}

#[tokio::test]
async fn test_identical_configuration_gives_identical_lock_bytes() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    env.builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap();
    let first = fs::read(&env.lock_path).unwrap();

    // Root order on the command line must not matter either.
    let reversed: Vec<String> = roots().into_iter().rev().collect();
    env.builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &reversed)
        .await
        .unwrap();
    let second = fs::read(&env.lock_path).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_replay_rejects_stale_format() {
    let env = TestEnv::new();
    fs::write(&env.lock_path, r#"{"formatVersion": 1, "packages": []}"#).unwrap();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();

    let err = env
        .builder(&snapshot, &fetcher)
        .ensure_image(false, &env.image_root, &env.lock_path, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        oracle_error(&err),
        OracleError::UnsupportedFormat { found: 1, .. }
    ));
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn test_replay_rejects_different_roots() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);
    env.builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap();

    let err = env
        .builder(&snapshot, &fetcher)
        .ensure_image(false, &env.image_root, &env.lock_path, &["lynx".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Rebuild the lock"));
}

// =============================================================================
// Chain of trust
// =============================================================================

#[tokio::test]
async fn test_tampered_index_aborts_before_any_archive_fetch() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);
    let mut tampered = snapshot.packages_index();
    tampered.push_str("\nPackage: evil\nVersion: 1\nFilename: pool/evil.deb\n");
    fetcher.insert(&snapshot.index_url(), tampered);

    let err = env
        .builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();

    match oracle_error(&err) {
        OracleError::IndexHashMismatch { url, .. } => assert_eq!(url, &snapshot.index_url()),
        other => panic!("expected IndexHashMismatch, got {:?}", other),
    }
    assert!(fetcher.deb_requests().is_empty());
    assert!(!env.lock_path.exists());
    assert!(!env.rootfs().exists());
    assert!(!env.image_root.join(LEASE_FILE).exists());
}

#[tokio::test]
async fn test_rejected_signature_stops_before_index() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    let err = env
        .builder(&snapshot, &fetcher)
        .with_signature_verifier(Box::new(FakeVerifier::rejecting()))
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();

    assert!(matches!(oracle_error(&err), OracleError::SignatureRejected { .. }));
    assert!(!fetcher.requests().contains(&snapshot.index_url()));
}

#[tokio::test]
async fn test_unknown_signer_rejected_when_provenance_required() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    let err = env
        .builder(&snapshot, &fetcher)
        .with_signature_verifier(Box::new(FakeVerifier::trusting("unknown")))
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();

    match oracle_error(&err) {
        OracleError::UntrustedSigner { suite } => assert_eq!(suite, SUITE),
        other => panic!("expected UntrustedSigner, got {:?}", other),
    }
}

#[tokio::test]
async fn test_blank_signer_rejected_before_index_fetch() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    let err = env
        .builder(&snapshot, &fetcher)
        .with_signature_verifier(Box::new(FakeVerifier::trusting("  ")))
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();

    match oracle_error(&err) {
        OracleError::UntrustedSigner { suite } => assert_eq!(suite, SUITE),
        other => panic!("expected UntrustedSigner, got {:?}", other),
    }
    assert!(!fetcher.requests().contains(&snapshot.index_url()));
    assert!(!env.lock_path.exists());
}

#[tokio::test]
async fn test_metadata_hash_disagreeing_with_index_is_tampering() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    let mut apt = snapshot.apt();
    let lynx_sha = snapshot.packages[3].sha256();
    apt.show = apt.show.replace(&lynx_sha, &"0".repeat(64));

    let err = env
        .builder(&snapshot, &fetcher)
        .with_apt(Box::new(apt))
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();

    match oracle_error(&err) {
        OracleError::PackageHashMismatch { name, index_sha256, .. } => {
            assert_eq!(name, "lynx");
            assert_eq!(index_sha256, &lynx_sha);
        }
        other => panic!("expected PackageHashMismatch, got {:?}", other),
    }
    assert!(fetcher.deb_requests().is_empty());
}

#[tokio::test]
async fn test_package_missing_from_index_fails() {
    let env = TestEnv::new();
    let mut snapshot = FakeSnapshot::engines();
    snapshot.unindexed.push("w3m".to_string());
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    let err = env
        .builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();
    assert!(matches!(
        oracle_error(&err),
        OracleError::PackageNotInIndex { name, .. } if name == "w3m"
    ));
}

// =============================================================================
// Acquisition
// =============================================================================

#[tokio::test]
async fn test_mirror_fallback_after_snapshot_miss() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    let lynx = &snapshot.packages[3];
    let mirror_url = format!("https://mirror.test/debian/{}", lynx.filename());
    fetcher.remove(&lynx.download_url());
    fetcher.insert(&mirror_url, lynx.deb_bytes());

    env.builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap();

    let requests = fetcher.deb_requests();
    let snapshot_pos = requests.iter().position(|u| u == &lynx.download_url()).unwrap();
    let mirror_pos = requests.iter().position(|u| u == &mirror_url).unwrap();
    assert!(snapshot_pos < mirror_pos);
    assert!(env.rootfs().join("usr/bin/lynx").is_file());
}

#[tokio::test]
async fn test_all_sources_failing_names_package_and_urls() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);
    let w3m = &snapshot.packages[4];
    fetcher.remove(&w3m.download_url());

    let err = env
        .builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();

    match oracle_error(&err) {
        OracleError::AcquisitionFailed { name, attempts, .. } => {
            assert_eq!(name, "w3m");
            assert!(attempts.contains(&w3m.download_url()));
            assert!(attempts.contains("mirror.test"));
        }
        other => panic!("expected AcquisitionFailed, got {:?}", other),
    }
    assert!(!env.rootfs().exists());
}

#[tokio::test]
async fn test_corrupted_cache_entry_aborts() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);
    env.builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap();

    let cached = env.image_root.join("cache/archives/lynx_2.9.0-1_amd64.deb");
    fs::write(&cached, b"bit rot").unwrap();

    let err = env
        .builder(&snapshot, &fetcher)
        .ensure_image(false, &env.image_root, &env.lock_path, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        oracle_error(&err),
        OracleError::ArchiveHashMismatch { name, .. } if name == "lynx"
    ));
}

#[tokio::test]
async fn test_other_arch_in_shared_cache_is_ignored() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    // A multiarch apt cache: same name and version, different architecture.
    let cache_dir = env.image_root.join("cache/archives");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(cache_dir.join("libc6_2.36-9_arm64.deb"), b"arm64 build").unwrap();
    fs::write(cache_dir.join("libc6_2.36-9_all.deb"), b"not this either").unwrap();

    env.builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap();

    let libc = &snapshot.packages[1];
    assert!(fetcher.deb_requests().contains(&libc.download_url()));
    assert_eq!(
        fs::read(cache_dir.join("libc6_2.36-9_amd64.deb")).unwrap(),
        libc.deb_bytes()
    );
    assert_eq!(fs::read(cache_dir.join("libc6_2.36-9_arm64.deb")).unwrap(), b"arm64 build");
}

// =============================================================================
// Mutual exclusion
// =============================================================================

#[tokio::test]
async fn test_second_build_fails_and_leaves_rootfs_alone() {
    let env = TestEnv::new();
    let snapshot = FakeSnapshot::engines();
    let fetcher = MapFetcher::new();
    snapshot.install(&fetcher);

    // An in-flight build: its lease and its half-written rootfs.
    fs::create_dir_all(env.rootfs()).unwrap();
    fs::write(env.rootfs().join("in-flight"), b"partial").unwrap();
    fs::write(env.image_root.join(LEASE_FILE), b"4242\n").unwrap();

    let err = env
        .builder(&snapshot, &fetcher)
        .ensure_image(true, &env.image_root, &env.lock_path, &roots())
        .await
        .unwrap_err();

    assert!(matches!(oracle_error(&err), OracleError::AlreadyBuilding { .. }));
    assert!(err.to_string().contains("already building"));
    assert!(fetcher.requests().is_empty());
    assert_eq!(fs::read(env.rootfs().join("in-flight")).unwrap(), b"partial");
    assert!(env.image_root.join(LEASE_FILE).exists());
}

// =============================================================================
// Single-package scenario
// =============================================================================

fn sam_cli_lock(pkg: &FakePackage) -> OracleLock {
    let policy = SourcePolicy::new(SNAPSHOT_ROOT, SNAPSHOT_ID, Path::new("/keys/debian.gpg"), Vec::new())
        .unwrap();
    let index_url = format!("{}dists/{}/{}/binary-amd64/Packages", base_url(), SUITE, COMPONENT);

    let mut entries = HashMap::new();
    entries.insert(
        (pkg.name.clone(), pkg.version.clone(), pkg.filename()),
        pkg.sha256(),
    );
    let mut indexes = BTreeMap::new();
    indexes.insert(
        (SUITE.to_string(), COMPONENT.to_string()),
        VerifiedIndex::new(SUITE, COMPONENT, &index_url, entries),
    );
    let snapshot = VerifiedSnapshot {
        base_url: base_url(),
        releases: vec![ReleaseRecord {
            suite: SUITE.to_string(),
            release_url: format!("{}dists/{}/Release", base_url(), SUITE),
            release_sha256: "b".repeat(64),
            signature_key_id: KEY_ID.to_string(),
            package_indexes: vec![PackageIndexRecord {
                component: COMPONENT.to_string(),
                index_path: "main/binary-amd64/Packages".to_string(),
                index_url,
                index_sha256: "c".repeat(64),
            }],
        }],
        indexes,
    };

    let resolved = ResolvedPackage {
        name: pkg.name.clone(),
        version: pkg.version.clone(),
        suite: SUITE.to_string(),
        component: COMPONENT.to_string(),
        origin_url: "http://deb.debian.org/debian".to_string(),
        filename: pkg.filename(),
        advertised_sha256: pkg.sha256(),
    };
    build_lock(&roots(), policy, &[resolved], &snapshot).unwrap()
}

#[test]
fn test_sam_cli_fingerprint_is_hash_of_its_line() {
    let pkg = FakePackage::new("sam-cli", "1.0-1");
    let lock = sam_cli_lock(&pkg);

    let url = lock.packages[0].download_url.clone();
    assert_eq!(
        url,
        "https://snap.test/archive/debian/20260101T000000Z/pool/main/s/sam-cli/sam-cli_1.0-1_amd64.deb"
    );
    let line = format!("sam-cli@1.0-1:{}:{}", pkg.sha256(), url);
    assert_eq!(lock.fingerprint, sha256_hex(line.as_bytes()));
    assert_eq!(lock.root_packages, vec!["links2", "lynx", "w3m"]);
    lock.ensure_valid(Path::new("sam-cli.lock.json"), true).unwrap();
}

#[tokio::test]
async fn test_sam_cli_corrupted_archive_fails_naming_package() {
    let pkg = FakePackage::new("sam-cli", "1.0-1");
    let lock = sam_cli_lock(&pkg);
    let fetcher = MapFetcher::new();
    fetcher.insert(&pkg.download_url(), b"corrupted bytes".to_vec());

    let dir = tempfile::tempdir().unwrap();
    let materializer = Materializer::new(
        &fetcher,
        &FakeExtractor,
        ArchiveCache::new(dir.path().join("cache")),
        Vec::new(),
        1,
    );
    let err = materializer.materialize(&lock, dir.path()).await.unwrap_err();

    match oracle_error(&err) {
        OracleError::ArchiveHashMismatch { name, expected, actual, .. } => {
            assert_eq!(name, "sam-cli");
            assert_eq!(expected, &pkg.sha256());
            assert_eq!(actual, &sha256_hex(b"corrupted bytes"));
        }
        other => panic!("expected ArchiveHashMismatch, got {:?}", other),
    }
    assert!(err.to_string().contains("sam-cli"));
    assert!(!dir.path().join("rootfs").exists());
    assert!(!dir.path().join("cache/sam-cli_1.0-1_amd64.deb").exists());
}

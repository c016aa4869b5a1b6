//! Lock construction and fingerprinting.

use anyhow::Result;

use super::{OracleLock, PackageRecord, SourcePolicy, FORMAT_VERSION};
use crate::cache::sha256_hex;
use crate::error::OracleError;
use crate::resolve::ResolvedPackage;
use crate::snapshot::VerifiedSnapshot;

/// Join a base URL and an archive-relative path with exactly one slash.
pub fn join_url(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Content fingerprint of a package set.
///
/// `SHA256(join("\n", "{name}@{version}:{contentSha256}:{downloadUrl}"))` over
/// the records sorted by `(name, version)`. Input order does not matter.
pub fn fingerprint(packages: &[PackageRecord]) -> String {
    let mut sorted: Vec<&PackageRecord> = packages.iter().collect();
    sorted.sort_by(|a, b| a.identity().cmp(&b.identity()));
    let lines: Vec<String> = sorted
        .iter()
        .map(|r| {
            format!(
                "{}@{}:{}:{}",
                r.name, r.version, r.content_sha256, r.download_url
            )
        })
        .collect();
    sha256_hex(lines.join("\n").as_bytes())
}

/// RFC 3339 rendering of a snapshot id (`20260101T000000Z` ->
/// `2026-01-01T00:00:00Z`).
///
/// Used as the lock's `generatedAt`, so rebuilding against the same snapshot
/// produces a byte-identical document.
pub fn generated_at_for_snapshot(snapshot_id: &str) -> String {
    if !super::is_snapshot_id(snapshot_id) {
        return snapshot_id.to_string();
    }
    let s = snapshot_id;
    format!(
        "{}-{}-{}T{}:{}:{}Z",
        &s[0..4],
        &s[4..6],
        &s[6..8],
        &s[9..11],
        &s[11..13],
        &s[13..15]
    )
}

/// Cross-check resolved packages against the verified snapshot and assemble
/// the lock.
///
/// Every package must appear in the verified index of its `(suite,
/// component)` under the same `(name, version, filename)`, and the hash
/// advertised by the package metadata must equal the index hash. Either
/// failure is treated as tampering.
pub fn build_lock(
    root_packages: &[String],
    policy: SourcePolicy,
    resolved: &[ResolvedPackage],
    snapshot: &VerifiedSnapshot,
) -> Result<OracleLock> {
    let mut packages = Vec::with_capacity(resolved.len());

    for pkg in resolved {
        let index = snapshot.index_for(&pkg.suite, &pkg.component).ok_or_else(|| {
            OracleError::PackageNotInIndex {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                filename: pkg.filename.clone(),
                index_url: format!(
                    "(no verified index for {}/{})",
                    pkg.suite, pkg.component
                ),
            }
        })?;

        let index_sha256 = index
            .lookup(&pkg.name, &pkg.version, &pkg.filename)
            .ok_or_else(|| OracleError::PackageNotInIndex {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                filename: pkg.filename.clone(),
                index_url: index.url.clone(),
            })?;

        if !index_sha256.eq_ignore_ascii_case(&pkg.advertised_sha256) {
            return Err(OracleError::PackageHashMismatch {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                index_sha256: index_sha256.to_string(),
                advertised_sha256: pkg.advertised_sha256.clone(),
            }
            .into());
        }

        packages.push(PackageRecord {
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            suite: pkg.suite.clone(),
            component: pkg.component.clone(),
            source_index_url: index.url.clone(),
            filename: pkg.filename.clone(),
            download_url: join_url(&snapshot.base_url, &pkg.filename),
            content_sha256: index_sha256.to_ascii_lowercase(),
        });
    }

    packages.sort_by(|a, b| a.identity().cmp(&b.identity()));

    let mut release_records = snapshot.releases.clone();
    release_records.sort_by(|a, b| a.suite.cmp(&b.suite));
    for release in &mut release_records {
        release
            .package_indexes
            .sort_by(|a, b| a.component.cmp(&b.component));
    }

    let mut root_packages = root_packages.to_vec();
    root_packages.sort();
    root_packages.dedup();

    Ok(OracleLock {
        format_version: FORMAT_VERSION,
        generated_at: generated_at_for_snapshot(&policy.snapshot_id),
        root_packages,
        source_policy: policy,
        release_records,
        fingerprint: fingerprint(&packages),
        packages,
    })
}

//! Structural validation of lock documents.
//!
//! Validation never stops at the first problem. A lock that is wrong in five
//! places reports five violations, each naming the offending index, so a
//! hand-edited or corrupted lock can be fixed in one pass.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::{fingerprint, OracleLock, SOURCE_MODE, UNKNOWN_SIGNER};
use crate::cache::is_sha256_hex;

/// One structural problem in a lock document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockViolation {
    EmptyPackageList,
    MalformedContentHash {
        index: usize,
        name: String,
        value: String,
    },
    EmptyDownloadUrl {
        index: usize,
        name: String,
    },
    /// `packages[index]` sorts before `packages[index - 1]`.
    OutOfOrder {
        index: usize,
        previous: String,
        current: String,
    },
    DuplicateIdentity {
        first: usize,
        second: usize,
        name: String,
        version: String,
    },
    FingerprintMismatch {
        stored: String,
        computed: String,
    },
    UnsupportedMode {
        found: String,
    },
    MalformedSnapshotId {
        found: String,
    },
    MissingReleaseRecord {
        index: usize,
        name: String,
        suite: String,
    },
    UnknownSigner {
        suite: String,
    },
    MalformedReleaseHash {
        suite: String,
        field: String,
        value: String,
    },
}

impl fmt::Display for LockViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPackageList => write!(f, "package list is empty"),
            Self::MalformedContentHash { index, name, value } => write!(
                f,
                "packages[{}] ({}): contentSha256 '{}' is not 64 lowercase hex digits",
                index, name, value
            ),
            Self::EmptyDownloadUrl { index, name } => {
                write!(f, "packages[{}] ({}): downloadUrl is empty", index, name)
            }
            Self::OutOfOrder {
                index,
                previous,
                current,
            } => write!(
                f,
                "packages[{}] out of order: '{}' sorts before previous entry '{}'",
                index, current, previous
            ),
            Self::DuplicateIdentity {
                first,
                second,
                name,
                version,
            } => write!(
                f,
                "packages[{}] and packages[{}] share identity {}@{}",
                first, second, name, version
            ),
            Self::FingerprintMismatch { stored, computed } => write!(
                f,
                "fingerprint {} does not match package set (computed {})",
                stored, computed
            ),
            Self::UnsupportedMode { found } => write!(
                f,
                "sourcePolicy.mode is '{}', expected '{}'",
                found, SOURCE_MODE
            ),
            Self::MalformedSnapshotId { found } => write!(
                f,
                "sourcePolicy.snapshotId '{}' does not have the shape YYYYMMDDTHHMMSSZ",
                found
            ),
            Self::MissingReleaseRecord { index, name, suite } => write!(
                f,
                "packages[{}] ({}) references suite '{}' with no release record",
                index, name, suite
            ),
            Self::UnknownSigner { suite } => write!(
                f,
                "release record for suite '{}' has no identified signer",
                suite
            ),
            Self::MalformedReleaseHash {
                suite,
                field,
                value,
            } => write!(
                f,
                "release record for suite '{}': {} '{}' is not 64 lowercase hex digits",
                suite, field, value
            ),
        }
    }
}

/// True for a timestamp token shaped `YYYYMMDDTHHMMSSZ`.
pub fn is_snapshot_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 16
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'T'
        && bytes[9..15].iter().all(u8::is_ascii_digit)
        && bytes[15] == b'Z'
}

/// Collect every structural violation of `lock`.
pub fn validate(lock: &OracleLock, require_provenance: bool) -> Vec<LockViolation> {
    let mut violations = Vec::new();
    let packages = &lock.packages;

    if packages.is_empty() {
        violations.push(LockViolation::EmptyPackageList);
    }

    let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
    for (index, pkg) in packages.iter().enumerate() {
        if !is_sha256_hex(&pkg.content_sha256) {
            violations.push(LockViolation::MalformedContentHash {
                index,
                name: pkg.name.clone(),
                value: pkg.content_sha256.clone(),
            });
        }
        if pkg.download_url.trim().is_empty() {
            violations.push(LockViolation::EmptyDownloadUrl {
                index,
                name: pkg.name.clone(),
            });
        }

        if index > 0 {
            let prev = &packages[index - 1];
            // Equal neighbours are reported as duplicates below.
            if pkg.identity() < prev.identity() {
                violations.push(LockViolation::OutOfOrder {
                    index,
                    previous: format!("{}@{}", prev.name, prev.version),
                    current: format!("{}@{}", pkg.name, pkg.version),
                });
            }
        }

        match seen.get(&pkg.identity()) {
            Some(&first) => violations.push(LockViolation::DuplicateIdentity {
                first,
                second: index,
                name: pkg.name.clone(),
                version: pkg.version.clone(),
            }),
            None => {
                seen.insert(pkg.identity(), index);
            }
        }
    }

    if !packages.is_empty() {
        let computed = fingerprint(packages);
        if computed != lock.fingerprint {
            violations.push(LockViolation::FingerprintMismatch {
                stored: lock.fingerprint.clone(),
                computed,
            });
        }
    }

    let policy = &lock.source_policy;
    if policy.mode != SOURCE_MODE {
        violations.push(LockViolation::UnsupportedMode {
            found: policy.mode.clone(),
        });
    }
    if !is_snapshot_id(&policy.snapshot_id) {
        violations.push(LockViolation::MalformedSnapshotId {
            found: policy.snapshot_id.clone(),
        });
    }

    let suites: BTreeSet<&str> = lock
        .release_records
        .iter()
        .map(|r| r.suite.as_str())
        .collect();
    for (index, pkg) in packages.iter().enumerate() {
        if !suites.contains(pkg.suite.as_str()) {
            violations.push(LockViolation::MissingReleaseRecord {
                index,
                name: pkg.name.clone(),
                suite: pkg.suite.clone(),
            });
        }
    }

    for release in &lock.release_records {
        if require_provenance && is_unknown_signer(&release.signature_key_id) {
            violations.push(LockViolation::UnknownSigner {
                suite: release.suite.clone(),
            });
        }
        if !is_sha256_hex(&release.release_sha256) {
            violations.push(LockViolation::MalformedReleaseHash {
                suite: release.suite.clone(),
                field: "releaseSha256".to_string(),
                value: release.release_sha256.clone(),
            });
        }
        for index in &release.package_indexes {
            if !is_sha256_hex(&index.index_sha256) {
                violations.push(LockViolation::MalformedReleaseHash {
                    suite: release.suite.clone(),
                    field: format!("indexSha256 ({})", index.index_path),
                    value: index.index_sha256.clone(),
                });
            }
        }
    }

    violations
}

/// True when `key_id` does not identify a signer (blank or `unknown`).
pub fn is_unknown_signer(key_id: &str) -> bool {
    let key_id = key_id.trim();
    key_id.is_empty() || key_id.eq_ignore_ascii_case(UNKNOWN_SIGNER)
}

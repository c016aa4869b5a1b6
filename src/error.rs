//! Failure taxonomy for image builds.
//!
//! Every variant is fatal. Callers receive these wrapped in `anyhow::Error`
//! (usually with extra context) and can recover the category with
//! `err.downcast_ref::<OracleError>()`.

use std::path::PathBuf;

use thiserror::Error;

use crate::lock::LockViolation;

/// Fatal build, verification, or lock errors.
#[derive(Debug, Error)]
pub enum OracleError {
    // === Resolution ===
    /// A package has a candidate version but no origin could be found for it.
    #[error("no source record for {name}={version}: candidate version is not published by any configured origin")]
    NoSourceRecord { name: String, version: String },

    /// `apt-cache show` returned no usable paragraph for a resolved package.
    #[error("package metadata for {name}={version} is missing field '{field}'")]
    MissingPackageMetadata {
        name: String,
        version: String,
        field: &'static str,
    },

    // === Verification ===
    /// gpgv rejected the detached signature of a release manifest.
    #[error("signature verification failed for {url}: {detail}")]
    SignatureRejected { url: String, detail: String },

    /// The manifest verified, but the signer could not be identified.
    #[error("release manifest for suite '{suite}' has no identifiable signer and provenance is required")]
    UntrustedSigner { suite: String },

    /// The signed manifest does not list any usable index for a component.
    #[error("release manifest for suite '{suite}' lists no Packages index for {component}/binary-{arch}")]
    MissingIndex {
        suite: String,
        component: String,
        arch: String,
    },

    /// A fetched index does not match the hash recorded in the signed manifest.
    #[error("index hash mismatch for {url}\n  Expected (signed Release): {expected}\n  Got: {actual}")]
    IndexHashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// A resolved package is not listed in the verified index of its suite.
    #[error("{name}={version} ({filename}) is not listed in the verified index {index_url}")]
    PackageNotInIndex {
        name: String,
        version: String,
        filename: String,
        index_url: String,
    },

    /// Package metadata and the verified index disagree on the content hash.
    #[error("hash mismatch for {name}={version} between package metadata and verified index\n  Index: {index_sha256}\n  Metadata: {advertised_sha256}")]
    PackageHashMismatch {
        name: String,
        version: String,
        index_sha256: String,
        advertised_sha256: String,
    },

    /// An acquired archive does not hash to the locked value.
    #[error("archive hash mismatch for {name}={version} ({source_desc})\n  Expected: {expected}\n  Got: {actual}")]
    ArchiveHashMismatch {
        name: String,
        version: String,
        source_desc: String,
        expected: String,
        actual: String,
    },

    // === Acquisition ===
    /// Every candidate URL for an archive failed.
    #[error("could not download {name}={version}; tried:\n{attempts}")]
    AcquisitionFailed {
        name: String,
        version: String,
        attempts: String,
    },

    // === Lock shape ===
    /// The lock document has structural problems; all of them are listed.
    #[error("lock {path} is invalid ({} violation(s)):\n{}", .violations.len(), render_violations(.violations))]
    LockInvalid {
        path: PathBuf,
        violations: Vec<LockViolation>,
    },

    /// The lock document predates the oldest format this build understands.
    #[error("lock {path} has formatVersion {found}; minimum supported is {minimum}. Rebuild the lock.")]
    UnsupportedFormat {
        path: PathBuf,
        found: u32,
        minimum: u32,
    },

    // === Concurrency ===
    /// Another build holds the lease on this image root.
    #[error("already building: lease {marker} exists (held by another build)")]
    AlreadyBuilding { marker: PathBuf },
}

fn render_violations(violations: &[LockViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

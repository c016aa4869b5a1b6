//! Dependency closure resolution.
//!
//! Turns the root engine names into the full set of `(name, version)` pairs
//! the rootfs needs, each with the origin (mirror, suite, component) that
//! publishes it and the archive path and hash its metadata advertises. The
//! advertised hash is not trusted here; the lock builder checks it against the
//! verified snapshot index.

mod apt;
pub mod parse;

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::OracleError;

pub use apt::{AptCache, AptQuery};
use parse::{parse_depends_closure, parse_policy, parse_show, PolicyOrigin, PolicyTable};

/// A package pinned to its candidate version and origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub suite: String,
    pub component: String,
    /// Mirror URL from the policy table.
    pub origin_url: String,
    /// Archive-relative path from the package metadata.
    pub filename: String,
    /// SHA256 from the package metadata (unverified).
    pub advertised_sha256: String,
}

/// Pick the source record for `version` from a policy table.
///
/// Highest pin priority wins; ties are broken by the byte-order smallest
/// `(suite, component, url)`. A package present in both a stable and a
/// security suite at the same version therefore always resolves the same way,
/// independent of the order apt happens to print origins in.
pub fn select_origin<'a>(table: &'a PolicyTable, version: &str) -> Option<&'a PolicyOrigin> {
    table.origins_of(version).iter().min_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.suite.cmp(&b.suite))
            .then_with(|| a.component.cmp(&b.component))
            .then_with(|| a.url.cmp(&b.url))
    })
}

/// Resolves root packages to pinned packages through an [`AptQuery`].
pub struct Resolver<'a> {
    apt: &'a dyn AptQuery,
}

impl<'a> Resolver<'a> {
    pub fn new(apt: &'a dyn AptQuery) -> Self {
        Self { apt }
    }

    /// Sorted, deduplicated closure names, always including the roots.
    pub fn closure(&self, roots: &[String]) -> Result<BTreeSet<String>> {
        if roots.is_empty() {
            bail!("No root packages given");
        }
        let mut names = parse_depends_closure(&self.apt.depends(roots)?);
        names.extend(roots.iter().cloned());
        Ok(names)
    }

    /// Resolve the closure of `roots` to pinned packages sorted by name.
    ///
    /// Non-root names without an installation candidate are dropped (they are
    /// usually virtual or meta packages). A root without a candidate, or any
    /// candidate without a source record or metadata, fails the resolution.
    pub fn resolve(&self, roots: &[String]) -> Result<Vec<ResolvedPackage>> {
        let names: Vec<String> = self.closure(roots)?.into_iter().collect();
        println!("  Dependency closure: {} names", names.len());

        let tables = parse_policy(&self.apt.policy(&names)?);

        let mut pinned: Vec<(String, String, PolicyOrigin)> = Vec::new();
        let mut dropped = Vec::new();
        for name in &names {
            let candidate = tables.get(name).and_then(|t| t.candidate.as_ref());
            let Some(version) = candidate else {
                if roots.contains(name) {
                    bail!("Root package '{}' has no installation candidate", name);
                }
                dropped.push(name.as_str());
                continue;
            };
            let origin = tables
                .get(name)
                .and_then(|t| select_origin(t, version))
                .ok_or_else(|| OracleError::NoSourceRecord {
                    name: name.clone(),
                    version: version.clone(),
                })?;
            pinned.push((name.clone(), version.clone(), origin.clone()));
        }
        if !dropped.is_empty() {
            println!(
                "  Skipped {} name(s) without candidate: {}",
                dropped.len(),
                dropped.join(", ")
            );
        }

        let pins: Vec<(String, String)> = pinned
            .iter()
            .map(|(name, version, _)| (name.clone(), version.clone()))
            .collect();
        let mut metadata = BTreeMap::new();
        for record in parse_show(&self.apt.show(&pins)?) {
            // First paragraph per identity wins; apt prints one per origin and
            // they carry the same Filename and SHA256.
            metadata
                .entry((record.package.clone(), record.version.clone()))
                .or_insert(record);
        }

        let mut resolved = Vec::with_capacity(pinned.len());
        for (name, version, origin) in pinned {
            let Some(record) = metadata.get(&(name.clone(), version.clone())) else {
                return Err(OracleError::MissingPackageMetadata {
                    name,
                    version,
                    field: "Package",
                }
                .into());
            };
            let Some(filename) = record.filename.clone() else {
                return Err(OracleError::MissingPackageMetadata {
                    name,
                    version,
                    field: "Filename",
                }
                .into());
            };
            let Some(sha256) = record.sha256.clone() else {
                return Err(OracleError::MissingPackageMetadata {
                    name,
                    version,
                    field: "SHA256",
                }
                .into());
            };

            resolved.push(ResolvedPackage {
                name,
                version,
                suite: origin.suite,
                component: origin.component,
                origin_url: origin.url,
                filename,
                advertised_sha256: sha256,
            });
        }

        Ok(resolved)
    }
}

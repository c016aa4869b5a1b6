//! Release manifest parsing.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

use crate::cache::is_sha256_hex;
use crate::deb822::parse_paragraphs;

/// A file entry of the manifest's SHA256 table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub sha256: String,
    pub size: u64,
}

/// The parts of a Release file the verifier relies on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReleaseManifest {
    pub suite: Option<String>,
    pub codename: Option<String>,
    /// Path relative to `dists/<suite>/` -> hash and size.
    pub sha256: BTreeMap<String, ManifestEntry>,
}

impl ReleaseManifest {
    /// Parse a Release file. Fails if it has no SHA256 table or a row in it is
    /// malformed; a manifest we cannot fully read is not a trust anchor.
    pub fn parse(text: &str) -> Result<Self> {
        let paragraphs = parse_paragraphs(text);
        let Some(head) = paragraphs.first() else {
            bail!("Release manifest is empty");
        };

        let table = head
            .get("SHA256")
            .context("Release manifest has no SHA256 section")?;

        let mut sha256 = BTreeMap::new();
        for (row, line) in table.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [hash, size, path] = fields.as_slice() else {
                bail!("Malformed SHA256 row {} in Release manifest: '{}'", row, line);
            };
            let hash = hash.to_ascii_lowercase();
            if !is_sha256_hex(&hash) {
                bail!("Malformed SHA256 digest in Release manifest row {}: '{}'", row, line);
            }
            let size = size
                .parse::<u64>()
                .with_context(|| format!("Malformed size in Release manifest row {}: '{}'", row, line))?;
            sha256.insert(path.to_string(), ManifestEntry { sha256: hash, size });
        }

        Ok(Self {
            suite: head.get_trimmed("Suite").map(String::from),
            codename: head.get_trimmed("Codename").map(String::from),
            sha256,
        })
    }

    /// True when the manifest names `suite` as its Suite or Codename, or names
    /// neither (some flat archives omit both).
    pub fn describes_suite(&self, suite: &str) -> bool {
        match (&self.suite, &self.codename) {
            (None, None) => true,
            (s, c) => s.as_deref() == Some(suite) || c.as_deref() == Some(suite),
        }
    }
}

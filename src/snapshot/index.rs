//! Packages index selection, decoding and parsing.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::release::{ManifestEntry, ReleaseManifest};
use crate::cache::is_sha256_hex;
use crate::deb822::parse_paragraphs;
use crate::process::{self, Cmd};

/// How an index file is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Xz,
    Gzip,
    None,
}

impl Compression {
    /// Host tool that decodes this encoding, with the package providing it.
    fn tool(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Xz => Some(("xz", "xz-utils")),
            Self::Gzip => Some(("gzip", "gzip")),
            Self::None => None,
        }
    }
}

/// Encodings in order of preference.
const ENCODINGS: [(&str, Compression); 3] = [
    ("Packages.xz", Compression::Xz),
    ("Packages.gz", Compression::Gzip),
    ("Packages", Compression::None),
];

/// The index chosen for one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChoice {
    /// Path relative to `dists/<suite>/`.
    pub path: String,
    pub entry: ManifestEntry,
    pub compression: Compression,
}

/// Pick the best encoding of `{component}/binary-{arch}/Packages` the manifest
/// lists (xz, then gz, then plain).
///
/// The choice depends on the signed manifest alone, never on the host, because
/// it is recorded in the lock. A missing decoder fails in [`decompress`].
pub fn select_index(manifest: &ReleaseManifest, component: &str, arch: &str) -> Option<IndexChoice> {
    ENCODINGS.iter().find_map(|(file, compression)| {
        let path = format!("{}/binary-{}/{}", component, arch, file);
        manifest.sha256.get(&path).map(|entry| IndexChoice {
            path,
            entry: entry.clone(),
            compression: *compression,
        })
    })
}

/// Decode a fetched index. `scratch` is a file path the compressed bytes may be
/// written to for the decoder.
pub fn decompress(bytes: &[u8], compression: Compression, scratch: &Path) -> Result<Vec<u8>> {
    let Some((tool, package)) = compression.tool() else {
        return Ok(bytes.to_vec());
    };
    let program = process::require_tool(tool, package)?;

    fs::write(scratch, bytes).with_context(|| format!("Failed to write {}", scratch.display()))?;
    let result = Cmd::new(program)
        .args(["-d", "-c"])
        .arg_path(scratch)
        .error_msg(format!("Failed to decompress {}", scratch.display()))
        .run();
    let _ = fs::remove_file(scratch);
    Ok(result?.stdout_bytes)
}

/// `(name, version, filename)`, the key a package is looked up by.
pub type IndexKey = (String, String, String);

/// Parse a plain Packages index into `(name, version, filename) -> sha256`.
///
/// Paragraphs missing any of the four fields are skipped; a SHA256 field that
/// is present but malformed fails the whole index.
pub fn parse_packages(text: &str) -> Result<HashMap<IndexKey, String>> {
    let mut entries = HashMap::new();
    for paragraph in parse_paragraphs(text) {
        let (Some(name), Some(version), Some(filename), Some(sha256)) = (
            paragraph.get_trimmed("Package"),
            paragraph.get_trimmed("Version"),
            paragraph.get_trimmed("Filename"),
            paragraph.get_trimmed("SHA256"),
        ) else {
            continue;
        };
        let sha256 = sha256.to_ascii_lowercase();
        if !is_sha256_hex(&sha256) {
            bail!("Malformed SHA256 for {}={} in Packages index", name, version);
        }
        entries.insert(
            (name.to_string(), version.to_string(), filename.to_string()),
            sha256,
        );
    }
    Ok(entries)
}

//! Parsers for apt-cache output.
//!
//! These only turn text into typed records. Choosing between records, and
//! deciding what is an error, happens in the resolver.

use std::collections::{BTreeMap, BTreeSet};

use crate::deb822::parse_paragraphs;

/// One origin line of an `apt-cache policy` version table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOrigin {
    pub priority: i32,
    pub url: String,
    pub suite: String,
    pub component: String,
    pub arch: String,
}

/// A version entry of the version table with the origins publishing it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyVersion {
    pub version: String,
    pub priority: i32,
    /// Archive origins only; the dpkg status pseudo-origin is dropped.
    pub origins: Vec<PolicyOrigin>,
}

/// Parsed `apt-cache policy` block for one package.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyTable {
    /// `None` when apt reports `Candidate: (none)`.
    pub candidate: Option<String>,
    pub versions: Vec<PolicyVersion>,
}

impl PolicyTable {
    /// Origins of a specific version in the table.
    pub fn origins_of(&self, version: &str) -> &[PolicyOrigin] {
        self.versions
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.origins.as_slice())
            .unwrap_or(&[])
    }
}

/// Package metadata from `apt-cache show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowRecord {
    pub package: String,
    pub version: String,
    pub filename: Option<String>,
    pub sha256: Option<String>,
}

/// Strip a multiarch qualifier (`libc6:amd64` -> `libc6`).
fn bare_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

/// Package names in `apt-cache depends --recurse` output.
///
/// Package lines start at column 0; dependency lines are indented. Virtual
/// packages are printed as `<name>` and are skipped since they have nothing to
/// download.
pub fn parse_depends_closure(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with(char::is_whitespace))
        .map(str::trim)
        .filter(|line| !line.starts_with('<'))
        .map(|line| bare_name(line).to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parse (possibly multi-package) `apt-cache policy` output.
pub fn parse_policy(output: &str) -> BTreeMap<String, PolicyTable> {
    let mut tables = BTreeMap::new();
    let mut current: Option<(String, PolicyTable)> = None;
    let mut in_version_table = false;

    for raw in output.lines() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            if let Some(name) = line.strip_suffix(':') {
                if let Some((prev, table)) = current.take() {
                    tables.insert(prev, table);
                }
                current = Some((bare_name(name).to_string(), PolicyTable::default()));
                in_version_table = false;
            }
            continue;
        }

        let Some((_, table)) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim();

        if let Some(candidate) = trimmed.strip_prefix("Candidate:") {
            let candidate = candidate.trim();
            table.candidate = (candidate != "(none)" && !candidate.is_empty())
                .then(|| candidate.to_string());
            continue;
        }
        if trimmed.starts_with("Version table:") {
            in_version_table = true;
            continue;
        }
        if !in_version_table {
            continue;
        }

        let mut tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.first() == Some(&"***") {
            tokens.remove(0);
        }
        if tokens.len() < 2 {
            continue;
        }

        // "<version> <priority>" vs "<priority> <url> <suite>/<component> <arch> Packages"
        if let Ok(priority) = tokens[1].parse::<i32>() {
            table.versions.push(PolicyVersion {
                version: tokens[0].to_string(),
                priority,
                origins: Vec::new(),
            });
        } else if let Ok(priority) = tokens[0].parse::<i32>() {
            let Some(version) = table.versions.last_mut() else {
                continue;
            };
            if tokens.len() < 4 {
                // "100 /var/lib/dpkg/status"
                continue;
            }
            let Some((suite, component)) = tokens[2].split_once('/') else {
                // flat repository, no suite/component
                continue;
            };
            version.origins.push(PolicyOrigin {
                priority,
                url: tokens[1].to_string(),
                suite: suite.to_string(),
                component: component.to_string(),
                arch: tokens[3].to_string(),
            });
        }
    }

    if let Some((name, table)) = current {
        tables.insert(name, table);
    }
    tables
}

/// Parse `apt-cache show` output into one record per paragraph.
pub fn parse_show(output: &str) -> Vec<ShowRecord> {
    parse_paragraphs(output)
        .into_iter()
        .filter_map(|p| {
            Some(ShowRecord {
                package: p.get_trimmed("Package")?.to_string(),
                version: p.get_trimmed("Version")?.to_string(),
                filename: p.get_trimmed("Filename").map(String::from),
                sha256: p.get_trimmed("SHA256").map(String::from),
            })
        })
        .collect()
}

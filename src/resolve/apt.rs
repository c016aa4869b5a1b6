//! apt-cache invocation.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::process::{self, Cmd};

/// Source of raw apt metadata. Implementations return tool output verbatim;
/// parsing lives in [`super::parse`].
pub trait AptQuery {
    /// Recursive hard-dependency closure of `roots`.
    fn depends(&self, roots: &[String]) -> Result<String>;
    /// Policy tables for `names`.
    fn policy(&self, names: &[String]) -> Result<String>;
    /// Package metadata paragraphs for exact `(name, version)` pins.
    fn show(&self, pins: &[(String, String)]) -> Result<String>;
}

/// [`AptQuery`] backed by the host's `apt-cache`.
///
/// `options` go before the subcommand, so a dedicated apt configuration
/// (`-o Dir::Etc::SourceList=...`, `-o Dir::State::Lists=...`) can point the
/// query at the snapshot without touching the host's apt setup.
pub struct AptCache {
    program: PathBuf,
    options: Vec<String>,
}

impl AptCache {
    pub fn new(options: Vec<String>) -> Result<Self> {
        Ok(Self {
            program: process::require_tool("apt-cache", "apt")?,
            options,
        })
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.program).args(&self.options)
    }
}

impl AptQuery for AptCache {
    fn depends(&self, roots: &[String]) -> Result<String> {
        let result = self
            .cmd()
            .args([
                "depends",
                "--recurse",
                "--no-recommends",
                "--no-suggests",
                "--no-conflicts",
                "--no-breaks",
                "--no-replaces",
                "--no-enhances",
            ])
            .args(roots)
            .error_msg("apt-cache depends failed")
            .run()?;
        Ok(result.stdout)
    }

    fn policy(&self, names: &[String]) -> Result<String> {
        let result = self
            .cmd()
            .arg("policy")
            .args(names)
            .error_msg("apt-cache policy failed")
            .run()?;
        Ok(result.stdout)
    }

    fn show(&self, pins: &[(String, String)]) -> Result<String> {
        let result = self
            .cmd()
            .arg("show")
            .args(pins.iter().map(|(name, version)| format!("{}={}", name, version)))
            .error_msg("apt-cache show failed")
            .run()
            .with_context(|| format!("Failed to read metadata for {} package(s)", pins.len()))?;
        Ok(result.stdout)
    }
}

//! Detached signature verification of release manifests.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::error::OracleError;
use crate::lock::UNKNOWN_SIGNER;
use crate::process::{self, Cmd};

/// Outcome of a successful signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// Fingerprint or long key id of the signer, or [`UNKNOWN_SIGNER`].
    pub key_id: String,
}

/// Verifies a detached signature over a file against a keyring.
///
/// Implementations return `Err` for any signature that does not verify.
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        data: &Path,
        signature: &Path,
        keyring: &Path,
        url: &str,
    ) -> Result<SignatureStatus>;
}

/// Parsed `gpgv --status-fd` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpgStatus {
    pub good: bool,
    pub valid_fingerprint: Option<String>,
    pub good_key_id: Option<String>,
    /// BADSIG / ERRSIG / NO_PUBKEY / EXPKEYSIG / REVKEYSIG lines.
    pub problems: Vec<String>,
}

impl GpgStatus {
    /// Signer identity, preferring the full fingerprint. Anything that does
    /// not look like a key id is reported as unknown.
    pub fn key_id(&self) -> String {
        self.valid_fingerprint
            .iter()
            .chain(self.good_key_id.iter())
            .find(|id| is_plausible_key_id(id))
            .map(|id| id.to_ascii_uppercase())
            .unwrap_or_else(|| UNKNOWN_SIGNER.to_string())
    }
}

/// 16 (long key id) or 40/64 (fingerprint) hex digits.
pub fn is_plausible_key_id(id: &str) -> bool {
    matches!(id.len(), 16 | 40 | 64) && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse the machine-readable status lines gpgv writes to `--status-fd`.
pub fn parse_gpg_status(output: &str) -> GpgStatus {
    let mut status = GpgStatus::default();
    for line in output.lines() {
        let Some(rest) = line.trim().strip_prefix("[GNUPG:] ") else {
            continue;
        };
        let mut tokens = rest.split_whitespace();
        let keyword = tokens.next().unwrap_or_default();
        match keyword {
            "GOODSIG" => {
                status.good = true;
                status.good_key_id = tokens.next().map(String::from);
            }
            "VALIDSIG" => {
                status.valid_fingerprint = tokens.next().map(String::from);
            }
            "BADSIG" | "ERRSIG" | "NO_PUBKEY" | "EXPKEYSIG" | "REVKEYSIG" | "EXPSIG" => {
                status.problems.push(rest.to_string());
            }
            _ => {}
        }
    }
    status
}

/// [`SignatureVerifier`] using `gpgv` and an explicit keyring.
pub struct Gpgv {
    program: PathBuf,
}

impl Gpgv {
    pub fn new() -> Result<Self> {
        Ok(Self {
            program: process::require_tool("gpgv", "gpgv")?,
        })
    }
}

impl SignatureVerifier for Gpgv {
    fn verify(
        &self,
        data: &Path,
        signature: &Path,
        keyring: &Path,
        url: &str,
    ) -> Result<SignatureStatus> {
        if !keyring.is_file() {
            return Err(OracleError::SignatureRejected {
                url: url.to_string(),
                detail: format!("keyring {} does not exist", keyring.display()),
            }
            .into());
        }

        let result = Cmd::new(&self.program)
            .args(["--status-fd", "1", "--keyring"])
            .arg_path(keyring)
            .arg_path(signature)
            .arg_path(data)
            .allow_fail()
            .run()?;

        let status = parse_gpg_status(&result.stdout);
        if !result.success() || !status.good || !status.problems.is_empty() {
            let mut detail = status.problems.join("; ");
            if detail.is_empty() {
                detail = result.stderr_trimmed().to_string();
            }
            if detail.is_empty() {
                detail = format!("gpgv exit code {}", result.code());
            }
            return Err(OracleError::SignatureRejected {
                url: url.to_string(),
                detail,
            }
            .into());
        }

        Ok(SignatureStatus {
            key_id: status.key_id(),
        })
    }
}

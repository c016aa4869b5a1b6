//! Running reference engines from a materialized rootfs.
//!
//! Each call gets a fresh scratch HOME and an environment built only from the
//! rootfs, so two calls with the same inputs produce the same lines.

mod env;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cache::sha256_file;
use crate::process::{CommandResult, Cmd};

pub use env::{bin_dirs, find_loader, hermetic_env, library_dirs, library_path};

/// A reference text browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Lynx,
    W3m,
    Links2,
}

impl Engine {
    /// Every engine, in fingerprint order.
    pub const ALL: [Engine; 3] = [Engine::Lynx, Engine::W3m, Engine::Links2];

    pub fn name(self) -> &'static str {
        match self {
            Self::Lynx => "lynx",
            Self::W3m => "w3m",
            Self::Links2 => "links2",
        }
    }

    /// Binary path relative to the rootfs.
    pub fn binary(self) -> &'static str {
        match self {
            Self::Lynx => "usr/bin/lynx",
            Self::W3m => "usr/bin/w3m",
            Self::Links2 => "usr/bin/links2",
        }
    }

    /// Arguments for a UTF-8 plain-text dump of `file` at `width` columns.
    pub fn dump_args(self, width: u32, file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = match self {
            Self::Lynx => vec![
                "-dump".into(),
                "-nolist".into(),
                format!("-width={}", width).into(),
                "-display_charset=utf-8".into(),
            ],
            Self::W3m => vec![
                "-dump".into(),
                "-cols".into(),
                width.to_string().into(),
                "-T".into(),
                "text/html".into(),
                "-O".into(),
                "UTF-8".into(),
            ],
            Self::Links2 => vec![
                "-dump".into(),
                "-width".into(),
                width.to_string().into(),
                "-codepage".into(),
                "utf-8".into(),
            ],
        };
        args.push(file.as_os_str().to_os_string());
        args
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Engine {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lynx" => Ok(Self::Lynx),
            "w3m" => Ok(Self::W3m),
            "links2" | "links" => Ok(Self::Links2),
            other => bail!("Unknown engine '{}' (expected lynx, w3m or links2)", other),
        }
    }
}

/// Identity of an installed engine binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineFingerprint {
    pub engine: Engine,
    pub binary_path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub version_string: String,
}

/// Split engine output into lines: CRLF and lone CR become LF, and a single
/// trailing empty line (from the final newline) is dropped.
pub fn normalize_output(raw: &str) -> Vec<String> {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = text.split('\n').map(String::from).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Per-call HOME, removed on drop.
struct ScratchHome {
    path: PathBuf,
}

impl ScratchHome {
    fn create(engine: Engine) -> Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "oracle-{}-{}-{}",
            engine,
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if path.exists() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to clear {}", path.display()))?;
        }
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for ScratchHome {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn engine_binary(rootfs: &Path, engine: Engine) -> Result<PathBuf> {
    let binary = rootfs.join(engine.binary());
    if !binary.is_file() {
        bail!(
            "{} is not installed in {} (expected {})",
            engine,
            rootfs.display(),
            binary.display()
        );
    }
    Ok(binary)
}

/// Run `engine` with `args` inside the hermetic environment.
fn invoke(rootfs: &Path, engine: Engine, args: Vec<OsString>) -> Result<CommandResult> {
    let binary = engine_binary(rootfs, engine)?;
    let home = ScratchHome::create(engine)?;

    let cmd = match find_loader(rootfs) {
        Some(loader) => Cmd::new(loader)
            .arg("--library-path")
            .arg(library_path(rootfs))
            .arg_path(&binary),
        None => Cmd::new(&binary),
    };

    cmd.args(args)
        .env_clear()
        .envs(hermetic_env(rootfs, engine, &home.path))
        .dir(&home.path)
        .error_msg(format!("{} exited with an error", engine))
        .run()
}

/// Render `html` with `engine` at `width` columns and return the dump lines.
pub fn run_dump(rootfs: &Path, engine: Engine, width: u32, html: &Path) -> Result<Vec<String>> {
    if width == 0 {
        bail!("Render width must be at least 1 column");
    }
    let html = fs::canonicalize(html)
        .with_context(|| format!("HTML input {} does not exist", html.display()))?;
    if !html.is_file() {
        bail!("HTML input {} is not a file", html.display());
    }

    let result = invoke(rootfs, engine, engine.dump_args(width, &html))?;
    Ok(normalize_output(&result.stdout))
}

/// Size, hash and reported version of one engine.
pub fn fingerprint_engine(rootfs: &Path, engine: Engine) -> Result<EngineFingerprint> {
    let binary = engine_binary(rootfs, engine)?;
    let size_bytes = fs::metadata(&binary)
        .with_context(|| format!("Failed to stat {}", binary.display()))?
        .len();
    let sha256 = sha256_file(&binary)?;

    let result = invoke(rootfs, engine, vec!["-version".into()])?;
    let version_string = normalize_output(&result.stdout)
        .into_iter()
        .map(|l| l.trim().to_string())
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    Ok(EngineFingerprint {
        engine,
        binary_path: engine.binary().to_string(),
        size_bytes,
        sha256,
        version_string,
    })
}

/// Fingerprints of all engines, in [`Engine::ALL`] order.
pub fn fingerprint_engines(rootfs: &Path) -> Result<Vec<EngineFingerprint>> {
    Engine::ALL
        .iter()
        .map(|&engine| fingerprint_engine(rootfs, engine))
        .collect()
}

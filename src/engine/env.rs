//! The environment an engine runs in.
//!
//! Nothing from the host environment leaks through: the child starts from an
//! empty environment and only sees paths inside the rootfs, a fixed locale,
//! and its own scratch HOME.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::Engine;

/// Library directories searched inside a rootfs, multiarch triplets first.
pub fn library_dirs(rootfs: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for base in ["lib", "usr/lib"] {
        let base = rootfs.join(base);
        let Ok(entries) = fs::read_dir(&base) else {
            continue;
        };
        let mut triplets: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("-linux-"))
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        triplets.sort();
        dirs.extend(triplets);
    }
    for plain in ["lib", "usr/lib", "lib64", "usr/lib64"] {
        let dir = rootfs.join(plain);
        if dir.is_dir() {
            dirs.push(dir);
        }
    }
    dirs
}

/// Binary directories inside a rootfs, for `PATH`.
pub fn bin_dirs(rootfs: &Path) -> Vec<PathBuf> {
    ["usr/bin", "bin", "usr/sbin", "sbin"]
        .iter()
        .map(|d| rootfs.join(d))
        .filter(|d| d.is_dir())
        .collect()
}

/// The rootfs's own dynamic loader (`ld-linux*.so*`), if it ships one.
///
/// When present the engine runs through it, so the host loader and host
/// libraries never take part.
pub fn find_loader(rootfs: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = ["lib64", "lib", "usr/lib64", "usr/lib"]
        .iter()
        .map(|d| rootfs.join(d))
        .filter(|d| d.is_dir())
        .flat_map(|d| {
            WalkDir::new(d)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name().to_string_lossy();
                    name.starts_with("ld-linux") && name.contains(".so")
                })
                // Absolute symlinks would resolve against the host.
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .collect();
    found.sort();
    found.into_iter().next()
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// `LD_LIBRARY_PATH` value for a rootfs.
pub fn library_path(rootfs: &Path) -> String {
    join_paths(&library_dirs(rootfs))
}

/// Complete environment for running `engine` from `rootfs`.
pub fn hermetic_env(rootfs: &Path, engine: Engine, home: &Path) -> Vec<(String, String)> {
    let mut vars = vec![
        ("LD_LIBRARY_PATH".to_string(), library_path(rootfs)),
        ("PATH".to_string(), join_paths(&bin_dirs(rootfs))),
        ("HOME".to_string(), home.to_string_lossy().into_owned()),
        ("LANG".to_string(), "C.UTF-8".to_string()),
        ("LC_ALL".to_string(), "C.UTF-8".to_string()),
        ("TERM".to_string(), "dumb".to_string()),
        ("TZ".to_string(), "UTC".to_string()),
    ];
    if engine == Engine::Lynx {
        vars.push((
            "LYNX_CFG".to_string(),
            rootfs.join("etc/lynx/lynx.cfg").to_string_lossy().into_owned(),
        ));
        vars.push((
            "LYNX_LSS".to_string(),
            rootfs.join("etc/lynx/lynx.lss").to_string_lossy().into_owned(),
        ));
    }
    vars
}

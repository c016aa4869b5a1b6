//! Configuration and image root checks.

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::lock::OracleLock;

use super::types::CheckResult;

/// Check the image root, the lock, and the trust anchors a rebuild needs.
pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match config.image_root() {
        Ok(root) => results.push(check_writable(root)),
        Err(e) => results.push(CheckResult::fail("image root", &e.to_string())),
    }

    match config.lock_path() {
        Ok(path) if path.exists() => {
            match OracleLock::load(&path, config.require_provenance) {
                Ok(lock) => results.push(CheckResult::pass_with(
                    "lock",
                    &format!("{} packages, fingerprint {}", lock.packages.len(), lock.fingerprint),
                )),
                Err(e) => results.push(CheckResult::fail("lock", &format!("{:#}", e))),
            }
        }
        Ok(path) => results.push(CheckResult::warn(
            "lock",
            &format!("{} does not exist; only --rebuild-lock can build", path.display()),
        )),
        Err(_) => results.push(CheckResult::skip("lock")),
    }

    match config.source_policy() {
        Ok(policy) if policy.keyring_path.is_file() => results.push(CheckResult::pass_with(
            "trust anchors",
            &format!("{} with {}", policy.snapshot_base_url(), policy.keyring_path.display()),
        )),
        Ok(policy) => results.push(CheckResult::fail(
            "trust anchors",
            &format!("keyring {} does not exist", policy.keyring_path.display()),
        )),
        // Replay does not need them.
        Err(e) => results.push(CheckResult::warn("trust anchors", &e.to_string())),
    }

    results
}

fn check_writable(root: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(root) {
        return CheckResult::fail(
            "image root writable",
            &format!("Cannot create {}: {}", root.display(), e),
        );
    }
    let probe = root.join(".preflight-test");
    match fs::write(&probe, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with("image root writable", &root.display().to_string())
        }
        Err(e) => CheckResult::fail(
            "image root writable",
            &format!("Cannot write to {}: {}", root.display(), e),
        ),
    }
}

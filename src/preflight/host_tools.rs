//! Host tool availability checks.

use crate::process;

use super::types::CheckResult;

/// Tools a build needs. A replay only runs `dpkg-deb`, but the index decoders
/// are still required: the lock records whichever encoding the signed manifest
/// prefers, so a host that cannot decode it cannot rebuild.
const TOOLS: [(&str, &str, &str); 5] = [
    ("apt-cache", "apt", "Resolves the dependency closure when rebuilding the lock"),
    ("gpgv", "gpgv", "Verifies release manifest signatures when rebuilding the lock"),
    ("dpkg-deb", "dpkg", "Extracts archives into the rootfs"),
    ("xz", "xz-utils", "Decodes Packages.xz indexes"),
    ("gzip", "gzip", "Decodes Packages.gz indexes"),
];

/// Check host tools are installed. Every one is required.
pub fn check_host_tools() -> Vec<CheckResult> {
    TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose))
        .collect()
}

fn check_tool_exists(tool: &str, package: &str, purpose: &str) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => CheckResult::fail(
            tool,
            &format!("Not found. Install '{}' package. {}", package, purpose),
        ),
    }
}

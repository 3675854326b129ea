//! Checks against a mounted OS filesystem.
//!
//! NTFS mounted through a userspace driver is case-preserving but the
//! paths the installer writes vary in case between releases, so every
//! lookup resolves components case-insensitively.

use crate::core::CheckReport;
use std::fs;
use std::path::{Path, PathBuf};

/// Written by sysprep once generalization completed.
pub const SYSPREP_MARKER: &str = "Windows/System32/Sysprep/Sysprep_succeeded.tag";

/// Registry hives that must be present.
pub const REQUIRED_HIVES: &[&str] = &[
    "Windows/System32/config/SYSTEM",
    "Windows/System32/config/SOFTWARE",
];

/// Driver store root.
pub const DRIVER_STORE: &str = "Windows/System32/DriverStore/FileRepository";

/// Answer file that must not survive into the image.
pub const UNATTEND_FILE: &str = "Windows/Panther/unattend.xml";

/// Driver descriptors that must be staged: network, then storage.
pub const REQUIRED_DRIVERS: &[&str] = &["netkvm.inf", "viostor.inf"];

/// Cloud provisioning agent.
pub const CLOUD_AGENT: &str =
    "Program Files/Cloudbase Solutions/Cloudbase-Init/Python/Scripts/cloudbase-init.exe";

/// Known install locations of the SSH server.
pub const SSHD_LOCATIONS: &[&str] = &[
    "Windows/System32/OpenSSH/sshd.exe",
    "Program Files/OpenSSH/sshd.exe",
];

/// Resolves `relative` under `root`, matching each component without
/// regard to ASCII case. Returns `None` if any component is missing.
#[must_use]
pub fn resolve_case_insensitive(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for component in relative.split('/').filter(|c| !c.is_empty()) {
        let exact = current.join(component);
        if exact.exists() {
            current = exact;
            continue;
        }
        let mut matches: Vec<PathBuf> = fs::read_dir(&current)
            .ok()?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case(component))
            .map(|entry| entry.path())
            .collect();
        matches.sort();
        current = matches.into_iter().next()?;
    }
    Some(current)
}

/// Finds the first file named `file_name` (any case) under `dir`, walking
/// entries in sorted order so the result is stable.
#[must_use]
pub fn find_file(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for path in &entries {
        let name_matches = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(file_name));
        if name_matches && path.is_file() {
            return Some(path.clone());
        }
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|p| find_file(p, file_name))
}

fn is_file(root: &Path, relative: &str) -> bool {
    resolve_case_insensitive(root, relative).is_some_and(|p| p.is_file())
}

fn dir_has_entries(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}

/// Runs every OS filesystem check against the tree mounted at `root`.
pub fn check_os_filesystem(root: &Path, report: &mut CheckReport) {
    report.assert(
        is_file(root, SYSPREP_MARKER),
        "sysprep completion marker present",
        format!("sysprep completion marker {SYSPREP_MARKER} missing"),
    );

    for hive in REQUIRED_HIVES {
        report.assert(
            is_file(root, hive),
            format!("registry hive {hive} present"),
            format!("registry hive {hive} missing"),
        );
    }

    let store = resolve_case_insensitive(root, DRIVER_STORE).filter(|p| p.is_dir());
    report.assert(
        store.as_deref().is_some_and(dir_has_entries),
        "driver store present and not empty",
        format!("driver store {DRIVER_STORE} missing or empty"),
    );

    if resolve_case_insensitive(root, UNATTEND_FILE).is_some() {
        report.warn(format!("leftover answer file {UNATTEND_FILE} present"));
    } else {
        report.pass("no leftover answer file");
    }

    for driver in REQUIRED_DRIVERS {
        match store.as_deref().and_then(|s| find_file(s, driver)) {
            Some(path) => {
                let shown = path.strip_prefix(root).unwrap_or(&path);
                report.pass(format!("driver {driver} staged at {}", shown.display()));
            }
            None => report.fail(format!("driver {driver} not found in driver store")),
        }
    }

    report.assert(
        is_file(root, CLOUD_AGENT),
        "cloud provisioning agent installed",
        format!("cloud provisioning agent {CLOUD_AGENT} missing"),
    );

    report.assert(
        SSHD_LOCATIONS.iter().any(|p| is_file(root, p)),
        "SSH server installed",
        format!("SSH server not found at {}", SSHD_LOCATIONS.join(" or ")),
    );
}

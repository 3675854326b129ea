//! Work items.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One target version carried through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Version tag, e.g. `2022`.
    pub version: String,
    /// Installation media for this version.
    pub iso: PathBuf,
    /// Image the build produces and later stages consume.
    pub output: PathBuf,
    /// Per-item directory for logs and snapshots.
    pub work_dir: PathBuf,
}

impl WorkItem {
    /// Creates an item whose artifacts live under `<work_root>/<version>/`.
    pub fn new(version: impl Into<String>, iso: impl Into<PathBuf>, work_root: &Path) -> Self {
        let version = version.into();
        let work_dir = work_root.join(&version);
        let output = work_dir.join(format!("windows-{version}.img"));
        Self {
            version,
            iso: iso.into(),
            output,
            work_dir,
        }
    }

    /// Overrides the output artifact path.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    /// Whether the output artifact exists on disk.
    #[must_use]
    pub fn artifact_exists(&self) -> bool {
        self.output.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_paths_derive_from_version() {
        let item = WorkItem::new("2022", "/iso/2022.iso", Path::new("/work"));
        assert_eq!(item.work_dir, PathBuf::from("/work/2022"));
        assert_eq!(item.output, PathBuf::from("/work/2022/windows-2022.img"));
        assert_eq!(item.iso, PathBuf::from("/iso/2022.iso"));
    }

    #[test]
    fn test_artifact_exists() {
        let dir = tempfile::tempdir().unwrap();
        let item = WorkItem::new("2019", "x.iso", dir.path());
        assert!(!item.artifact_exists());

        std::fs::create_dir_all(&item.work_dir).unwrap();
        std::fs::write(&item.output, b"").unwrap();
        assert!(item.artifact_exists());
    }
}

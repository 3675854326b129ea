//! Pipeline configuration.
//!
//! A run is described by one JSON document. Every section is optional and
//! falls back to its defaults; command-line flags are applied on top with
//! the `with_*` setters.

use crate::boot::BootConfig;
use crate::build::BuildConfig;
use crate::core::WorkItem;
use crate::errors::{ImagegateError, Result};
use crate::pipeline::StageConfig;
use crate::platform::PlatformConfig;
use crate::validate::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_iso_dir() -> PathBuf {
    PathBuf::from("isos")
}

/// Everything a pipeline run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Version tags to process, in order.
    #[serde(default)]
    pub versions: Vec<String>,
    /// Root of per-item output directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Directory holding `<version>.iso` installation media.
    #[serde(default = "default_iso_dir")]
    pub iso_dir: PathBuf,
    /// How the build tool is invoked.
    #[serde(default)]
    pub build: BuildConfig,
    /// Remote platform settings.
    #[serde(default)]
    pub platform: PlatformConfig,
    /// Boot verification polling and markers.
    #[serde(default)]
    pub boot: BootConfig,
    /// Which stages are turned off.
    #[serde(default)]
    pub stages: StageConfig,
    /// Structural validator settings.
    #[serde(default)]
    pub validator: ValidatorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            versions: Vec::new(),
            work_dir: default_work_dir(),
            iso_dir: default_iso_dir(),
            build: BuildConfig::default(),
            platform: PlatformConfig::default(),
            boot: BootConfig::default(),
            stages: StageConfig::default(),
            validator: ValidatorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ImagegateError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this shape.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ImagegateError::config(e.to_string()))
    }

    /// Replaces the version list.
    #[must_use]
    pub fn with_versions(mut self, versions: Vec<String>) -> Self {
        self.versions = versions;
        self
    }

    /// Sets the output root.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Sets the installation media directory.
    #[must_use]
    pub fn with_iso_dir(mut self, iso_dir: impl Into<PathBuf>) -> Self {
        self.iso_dir = iso_dir.into();
        self
    }

    /// Replaces the stage switches.
    #[must_use]
    pub fn with_stages(mut self, stages: StageConfig) -> Self {
        self.stages = stages;
        self
    }

    /// Replaces the boot verification settings.
    #[must_use]
    pub fn with_boot(mut self, boot: BootConfig) -> Self {
        self.boot = boot;
        self
    }

    /// Checks the values no run can proceed without.
    ///
    /// # Errors
    ///
    /// Returns `ImagegateError::Config` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(ImagegateError::config("no versions to process"));
        }
        if let Some(v) = self.versions.iter().find(|v| v.trim().is_empty()) {
            return Err(ImagegateError::config(format!("invalid version tag '{v}'")));
        }
        if !self.stages.skip_build && self.build.program.trim().is_empty() {
            return Err(ImagegateError::config("build program is empty"));
        }
        if self.boot.rounds == 0 || self.boot.watcher_rounds == 0 {
            return Err(ImagegateError::config("polling rounds must be positive"));
        }
        if self.boot.interval().is_zero() || self.boot.watcher_interval().is_zero() {
            return Err(ImagegateError::config("polling interval must be positive"));
        }
        if self.platform.resource_prefix.is_empty() {
            return Err(ImagegateError::config("resource prefix is empty"));
        }
        Ok(())
    }

    /// One work item per version, in configuration order.
    #[must_use]
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.versions
            .iter()
            .map(|v| WorkItem::new(v.as_str(), self.iso_dir.join(format!("{v}.iso")), &self.work_dir))
            .collect()
    }
}

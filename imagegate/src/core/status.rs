//! Stage kind, stage status and check severity enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Run the image-build tool.
    Build,
    /// Run the structural validator over the built image.
    Validate,
    /// Import the image to the remote platform and boot it.
    RemoteTest,
    /// Remove every remote resource the item created.
    Cleanup,
}

impl StageKind {
    /// All stages in the fixed order they run.
    pub const ALL: [Self; 4] = [Self::Build, Self::Validate, Self::RemoteTest, Self::Cleanup];

    /// Returns true if this stage contributes to the pass/fail verdict.
    #[must_use]
    pub fn counts_toward_verdict(&self) -> bool {
        !matches!(self, Self::Cleanup)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Validate => write!(f, "validate"),
            Self::RemoteTest => write!(f, "remote_test"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// The terminal status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage ran and its delegate reported success.
    Pass,
    /// Stage ran and its delegate reported failure.
    Fail,
    /// Stage did not run.
    Skip,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

impl StageStatus {
    /// Maps a delegate exit code to a status.
    #[must_use]
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Self::Pass
        } else {
            Self::Fail
        }
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Severity of a single validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The invariant holds.
    Pass,
    /// The invariant does not hold.
    Fail,
    /// Something looks wrong, or a check could not run at full strength.
    Warn,
    /// Informational only.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Warn => write!(f, "WARN"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

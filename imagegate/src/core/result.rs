//! Per-stage result type.

use super::{StageKind, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one pipeline stage for one work item.
///
/// `Pass` and `Fail` always carry the exit code of the delegate that ran;
/// `Skip` never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Which stage this is.
    pub stage: StageKind,
    /// Terminal status.
    pub status: StageStatus,
    /// Exit code of the delegate, absent for skipped stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Why the stage was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Why the delegate could not report an exit code, when it errored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Operator-facing warnings (cleanup failures land here).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    /// Creates a result for a stage whose delegate ran and exited with `exit_code`.
    #[must_use]
    pub fn ran(stage: StageKind, exit_code: i32, started_at: DateTime<Utc>) -> Self {
        Self {
            stage,
            status: StageStatus::from_exit_code(exit_code),
            exit_code: Some(exit_code),
            skip_reason: None,
            error: None,
            warnings: Vec::new(),
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Creates a failed result for a delegate that errored before producing
    /// an exit code. Recorded with exit code 1.
    #[must_use]
    pub fn errored(stage: StageKind, error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::ran(stage, 1, started_at)
        }
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skipped(stage: StageKind, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            stage,
            status: StageStatus::Skip,
            exit_code: None,
            skip_reason: Some(reason.into()),
            error: None,
            warnings: Vec::new(),
            started_at: now,
            ended_at: now,
        }
    }

    /// Attaches warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Returns true if the stage passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errored_is_fail_with_code_one() {
        let result = StageResult::errored(StageKind::Validate, "losetup failed", Utc::now());
        assert_eq!(result.status, StageStatus::Fail);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.error.as_deref(), Some("losetup failed"));
    }

    #[test]
    fn test_ran_carries_exit_code() {
        let result = StageResult::ran(StageKind::Build, 0, Utc::now());
        assert_eq!(result.status, StageStatus::Pass);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.is_success());

        let result = StageResult::ran(StageKind::Build, 3, Utc::now());
        assert_eq!(result.status, StageStatus::Fail);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.is_failure());
    }

    #[test]
    fn test_skipped_has_no_exit_code() {
        let result = StageResult::skipped(StageKind::Validate, "build failed");
        assert_eq!(result.status, StageStatus::Skip);
        assert!(result.exit_code.is_none());
        assert_eq!(result.skip_reason.as_deref(), Some("build failed"));
        assert_eq!(result.duration_ms(), 0);
    }

    #[test]
    fn test_stage_result_duration() {
        let started = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let result = StageResult::ran(StageKind::Build, 0, started);

        assert!(result.duration_ms() >= 10);
    }

    #[test]
    fn test_stage_result_serialization() {
        let result = StageResult::skipped(StageKind::RemoteTest, "disabled");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["stage"], "remote_test");
        assert_eq!(json["status"], "skip");
        assert!(json.get("exit_code").is_none());
    }
}

//! Check records and the report that accumulates them.

use super::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// One atomic assertion produced by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    /// How the check came out.
    pub severity: Severity,
    /// Human-readable description of what was checked.
    pub message: String,
}

impl CheckRecord {
    /// Creates a new check record.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for CheckRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Tallies by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCounts {
    /// Number of passing checks.
    pub pass: usize,
    /// Number of failing checks.
    pub fail: usize,
    /// Number of warnings.
    pub warn: usize,
}

impl fmt::Display for CheckCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} passed, {} failed, {} warnings", self.pass, self.fail, self.warn)
    }
}

/// Append-only accumulator of check records.
///
/// Check functions take `&mut CheckReport` and push into it; nothing is
/// ever removed, so the final status is decided by whether any `Fail`
/// record was pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    records: Vec<CheckRecord>,
}

impl CheckReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and logs it.
    pub fn record(&mut self, severity: Severity, message: impl Into<String>) {
        let record = CheckRecord::new(severity, message);
        match severity {
            Severity::Fail | Severity::Warn => warn!(severity = %severity, "{}", record.message),
            Severity::Pass | Severity::Info => info!(severity = %severity, "{}", record.message),
        }
        self.records.push(record);
    }

    /// Records a pass.
    pub fn pass(&mut self, message: impl Into<String>) {
        self.record(Severity::Pass, message);
    }

    /// Records a failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.record(Severity::Fail, message);
    }

    /// Records a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(Severity::Warn, message);
    }

    /// Records an informational line.
    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Severity::Info, message);
    }

    /// Records a pass if `ok`, otherwise a failure.
    pub fn assert(&mut self, ok: bool, pass_message: impl Into<String>, fail_message: impl Into<String>) {
        if ok {
            self.pass(pass_message);
        } else {
            self.fail(fail_message);
        }
    }

    /// Returns all records in the order they were produced.
    #[must_use]
    pub fn records(&self) -> &[CheckRecord] {
        &self.records
    }

    /// Returns the per-severity tallies.
    #[must_use]
    pub fn counts(&self) -> CheckCounts {
        self.records
            .iter()
            .fold(CheckCounts::default(), |mut counts, record| {
                match record.severity {
                    Severity::Pass => counts.pass += 1,
                    Severity::Fail => counts.fail += 1,
                    Severity::Warn => counts.warn += 1,
                    Severity::Info => {}
                }
                counts
            })
    }

    /// Returns true if at least one record failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.records.iter().any(|r| r.severity == Severity::Fail)
    }

    /// Process exit status: 1 if anything failed, else 0. Warnings never fail.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failures())
    }
}

//! The per-item, per-stage status matrix a run produces.

use crate::core::{StageKind, StageResult, StageStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

/// Every stage result of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// The item's version tag.
    pub version: String,
    /// Stage results in execution order.
    pub results: Vec<StageResult>,
}

impl ItemReport {
    /// The result of `stage`, if it was recorded.
    #[must_use]
    pub fn result(&self, stage: StageKind) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    /// The status of `stage`, if it was recorded.
    #[must_use]
    pub fn status(&self, stage: StageKind) -> Option<StageStatus> {
        self.result(stage).map(|r| r.status)
    }

    /// True when any verdict-bearing stage failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.stage.counts_toward_verdict() && r.is_failure())
    }

    /// Warnings from every stage.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .flat_map(|r| r.warnings.iter().map(String::as_str))
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    /// Items in the order they were processed.
    pub items: Vec<ItemReport>,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub ended_at: DateTime<Utc>,
}

impl PipelineSummary {
    /// True unless some item has a failed verdict-bearing stage. Skips never
    /// fail a run.
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.items.iter().any(ItemReport::failed)
    }

    /// Process exit code for the run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.passed())
    }

    /// Looks up an item by version.
    #[must_use]
    pub fn item(&self, version: &str) -> Option<&ItemReport> {
        self.items.iter().find(|i| i.version == version)
    }

    /// Renders the status table.
    #[must_use]
    pub fn render_table(&self) -> String {
        let version_width = self
            .items
            .iter()
            .map(|i| i.version.len())
            .chain(std::iter::once("VERSION".len()))
            .max()
            .unwrap_or(7);

        let mut lines = Vec::with_capacity(self.items.len() + 1);
        let mut header = format!("{:<version_width$}", "VERSION");
        for stage in StageKind::ALL {
            let _ = write!(header, "  {:<11}", stage.to_string().to_uppercase());
        }
        lines.push(header);

        for item in &self.items {
            let mut row = format!("{:<version_width$}", item.version);
            for stage in StageKind::ALL {
                let cell = item
                    .status(stage)
                    .map_or_else(|| "-".to_string(), |s| s.to_string());
                let _ = write!(row, "  {cell:<11}");
            }
            let warnings = item.warnings().count();
            if warnings > 0 {
                let _ = write!(row, "  ({warnings} warning(s))");
            }
            lines.push(row);
        }

        let mut out = String::new();
        for line in lines {
            out.push_str(line.trim_end());
            out.push('\n');
        }
        let _ = write!(
            out,
            "\nOverall: {}",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        out
    }
}

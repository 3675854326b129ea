//! The stage state machine.
//!
//! Items run strictly one after another, and within an item the stages run
//! in their fixed order. Each stage's eligibility depends only on the
//! terminal statuses of the stages before it.

use super::delegates::StageDelegates;
use super::summary::{ItemReport, PipelineSummary};
use crate::core::{StageKind, StageResult, StageStatus, WorkItem};
use crate::events::{
    EventSink, NoOpEventSink, ITEM_COMPLETED, PIPELINE_COMPLETED, PIPELINE_STARTED,
    STAGE_COMPLETED, STAGE_SKIPPED, STAGE_STARTED,
};
use crate::observability::SpanTimer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which stages the operator turned off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Do not build; validate an existing artifact if there is one.
    #[serde(default)]
    pub skip_build: bool,
    /// Do not boot-test on the remote platform.
    #[serde(default)]
    pub skip_remote_test: bool,
    /// Leave remote resources in place.
    #[serde(default)]
    pub no_cleanup: bool,
}

impl StageConfig {
    /// Turns the build stage off.
    #[must_use]
    pub fn with_skip_build(mut self, skip: bool) -> Self {
        self.skip_build = skip;
        self
    }

    /// Turns the remote test stage off.
    #[must_use]
    pub fn with_skip_remote_test(mut self, skip: bool) -> Self {
        self.skip_remote_test = skip;
        self
    }

    /// Turns cleanup off.
    #[must_use]
    pub fn with_no_cleanup(mut self, no_cleanup: bool) -> Self {
        self.no_cleanup = no_cleanup;
        self
    }
}

/// Runs the pipeline over a list of work items.
pub struct PipelineRunner {
    delegates: Arc<dyn StageDelegates>,
    stages: StageConfig,
    sink: Arc<dyn EventSink>,
}

impl PipelineRunner {
    /// Creates a runner that reports to no event sink.
    pub fn new(delegates: Arc<dyn StageDelegates>, stages: StageConfig) -> Self {
        Self {
            delegates,
            stages,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Reports lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs every item and returns the status matrix.
    pub async fn run(&self, items: &[WorkItem]) -> PipelineSummary {
        let started_at = Utc::now();
        let versions: Vec<&str> = items.iter().map(|i| i.version.as_str()).collect();
        info!(items = ?versions, stages = ?self.stages, "Pipeline started");
        self.sink
            .emit(
                PIPELINE_STARTED,
                Some(json!({"items": versions, "stages": self.stages})),
            )
            .await;

        let mut reports = Vec::with_capacity(items.len());
        for item in items {
            reports.push(self.run_item(item).await);
        }

        let summary = PipelineSummary {
            items: reports,
            started_at,
            ended_at: Utc::now(),
        };
        info!(passed = summary.passed(), "Pipeline completed");
        self.sink
            .emit(
                PIPELINE_COMPLETED,
                Some(json!({"passed": summary.passed(), "exit_code": summary.exit_code()})),
            )
            .await;
        summary
    }

    async fn run_item(&self, item: &WorkItem) -> ItemReport {
        info!(version = %item.version, "Processing item");
        let mut results: Vec<StageResult> = Vec::with_capacity(StageKind::ALL.len());

        let build = if self.stages.skip_build {
            self.skip(item, StageKind::Build, "build disabled").await
        } else {
            self.run_stage(item, StageKind::Build).await
        };
        let build_status = build.status;
        results.push(build);

        let validate = match build_status {
            StageStatus::Fail => self.skip(item, StageKind::Validate, "build failed").await,
            StageStatus::Skip if !item.artifact_exists() => {
                let reason = format!("no artifact at {}", item.output.display());
                self.skip(item, StageKind::Validate, &reason).await
            }
            _ => self.run_stage(item, StageKind::Validate).await,
        };
        let validate_status = validate.status;
        results.push(validate);

        let remote = if self.stages.skip_remote_test {
            self.skip(item, StageKind::RemoteTest, "remote test disabled").await
        } else if validate_status != StageStatus::Pass {
            self.skip(item, StageKind::RemoteTest, "validation did not pass").await
        } else {
            self.run_stage(item, StageKind::RemoteTest).await
        };
        results.push(remote);

        let cleanup = if self.stages.no_cleanup {
            self.skip(item, StageKind::Cleanup, "cleanup disabled").await
        } else {
            self.run_stage(item, StageKind::Cleanup).await
        };
        results.push(cleanup);

        let report = ItemReport {
            version: item.version.clone(),
            results,
        };
        let status = if report.failed() { "fail" } else { "pass" };
        info!(version = %item.version, status, "Item completed");
        self.sink
            .emit(
                ITEM_COMPLETED,
                Some(json!({"version": item.version, "status": status})),
            )
            .await;
        report
    }

    async fn skip(&self, item: &WorkItem, stage: StageKind, reason: &str) -> StageResult {
        info!(version = %item.version, stage = %stage, reason, "Stage skipped");
        self.sink
            .emit(
                STAGE_SKIPPED,
                Some(json!({"version": item.version, "stage": stage, "reason": reason})),
            )
            .await;
        StageResult::skipped(stage, reason)
    }

    async fn run_stage(&self, item: &WorkItem, stage: StageKind) -> StageResult {
        info!(version = %item.version, stage = %stage, "Stage started");
        self.sink
            .emit(
                STAGE_STARTED,
                Some(json!({"version": item.version, "stage": stage})),
            )
            .await;

        let timer = SpanTimer::start(format!("{}:{stage}", item.version));
        let started_at = Utc::now();
        let result = match stage {
            StageKind::Build => Self::from_exit(stage, self.delegates.build(item).await, started_at),
            StageKind::Validate => match self.delegates.validate(item).await {
                Ok(report) => {
                    info!(version = %item.version, counts = %report.counts(), "Validation tally");
                    StageResult::ran(stage, report.exit_code(), started_at)
                }
                Err(e) => StageResult::errored(stage, e.to_string(), started_at),
            },
            StageKind::RemoteTest => {
                Self::from_exit(stage, self.delegates.remote_test(item).await, started_at)
            }
            StageKind::Cleanup => {
                let warnings = self.delegates.cleanup(item).await;
                for warning in &warnings {
                    warn!(version = %item.version, "Cleanup: {}", warning);
                }
                StageResult::ran(stage, 0, started_at).with_warnings(warnings)
            }
        };
        let duration_ms = timer.finish();

        if let Some(e) = &result.error {
            error!(version = %item.version, stage = %stage, "Stage errored: {}", e);
        }
        info!(
            version = %item.version,
            stage = %stage,
            status = %result.status,
            exit_code = ?result.exit_code,
            duration_ms,
            "Stage completed"
        );
        self.sink
            .emit(
                STAGE_COMPLETED,
                Some(json!({
                    "version": item.version,
                    "stage": stage,
                    "status": result.status,
                    "exit_code": result.exit_code,
                    "warnings": result.warnings.len(),
                    "duration_ms": duration_ms,
                })),
            )
            .await;
        result
    }

    fn from_exit(
        stage: StageKind,
        outcome: crate::errors::Result<i32>,
        started_at: chrono::DateTime<Utc>,
    ) -> StageResult {
        match outcome {
            Ok(code) => StageResult::ran(stage, code, started_at),
            Err(e) => StageResult::errored(stage, e.to_string(), started_at),
        }
    }
}

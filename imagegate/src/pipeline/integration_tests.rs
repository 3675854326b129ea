//! End-to-end tests for the stage state machine.

#[cfg(test)]
mod tests {
    use crate::core::{CheckReport, StageKind, StageStatus, WorkItem};
    use crate::errors::{ImagegateError, Result};
    use crate::events::{
        CollectingEventSink, ITEM_COMPLETED, PIPELINE_COMPLETED, PIPELINE_STARTED,
        STAGE_COMPLETED, STAGE_SKIPPED, STAGE_STARTED,
    };
    use crate::pipeline::{PipelineRunner, StageConfig, StageDelegates};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    /// Scripted delegates that record every call as `<stage>:<version>`.
    #[derive(Default)]
    struct FakeDelegates {
        build_codes: HashMap<String, i32>,
        validate_fails: Vec<String>,
        validate_errors: Vec<String>,
        remote_codes: HashMap<String, i32>,
        cleanup_warnings: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDelegates {
        fn record(&self, stage: &str, item: &WorkItem) {
            self.calls.lock().push(format!("{stage}:{}", item.version));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl StageDelegates for FakeDelegates {
        async fn build(&self, item: &WorkItem) -> Result<i32> {
            self.record("build", item);
            Ok(self.build_codes.get(&item.version).copied().unwrap_or(0))
        }

        async fn validate(&self, item: &WorkItem) -> Result<CheckReport> {
            self.record("validate", item);
            if self.validate_errors.contains(&item.version) {
                return Err(ImagegateError::precondition("losetup unavailable"));
            }
            let mut report = CheckReport::new();
            report.pass("partition table verifies cleanly");
            if self.validate_fails.contains(&item.version) {
                report.fail("sysprep marker missing");
            }
            Ok(report)
        }

        async fn remote_test(&self, item: &WorkItem) -> Result<i32> {
            self.record("remote_test", item);
            Ok(self.remote_codes.get(&item.version).copied().unwrap_or(0))
        }

        async fn cleanup(&self, item: &WorkItem) -> Vec<String> {
            self.record("cleanup", item);
            self.cleanup_warnings.clone()
        }
    }

    fn items(root: &Path, versions: &[&str]) -> Vec<WorkItem> {
        versions
            .iter()
            .map(|v| WorkItem::new(*v, root.join(format!("{v}.iso")), root))
            .collect()
    }

    fn runner(
        delegates: Arc<FakeDelegates>,
        stages: StageConfig,
    ) -> (PipelineRunner, Arc<CollectingEventSink>) {
        let sink = Arc::new(CollectingEventSink::new());
        let runner = PipelineRunner::new(delegates, stages).with_event_sink(sink.clone());
        (runner, sink)
    }

    fn statuses(summary: &crate::pipeline::PipelineSummary, version: &str) -> Vec<StageStatus> {
        let item = summary.item(version).unwrap();
        StageKind::ALL
            .iter()
            .map(|s| item.status(*s).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_all_stages_pass() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates::default());
        let (runner, _sink) = runner(delegates.clone(), StageConfig::default());

        let summary = runner.run(&items(dir.path(), &["2022"])).await;

        assert!(summary.passed());
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(
            statuses(&summary, "2022"),
            vec![StageStatus::Pass; 4]
        );
        assert_eq!(
            delegates.calls(),
            vec!["build:2022", "validate:2022", "remote_test:2022", "cleanup:2022"]
        );
    }

    #[tokio::test]
    async fn test_build_failure_skips_downstream_but_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates {
            build_codes: HashMap::from([("2019".to_string(), 2)]),
            ..Default::default()
        });
        let (runner, _sink) = runner(delegates.clone(), StageConfig::default());

        let summary = runner.run(&items(dir.path(), &["2019"])).await;

        assert_eq!(
            statuses(&summary, "2019"),
            vec![
                StageStatus::Fail,
                StageStatus::Skip,
                StageStatus::Skip,
                StageStatus::Pass
            ]
        );
        let item = summary.item("2019").unwrap();
        assert_eq!(item.result(StageKind::Build).unwrap().exit_code, Some(2));
        assert_eq!(
            item.result(StageKind::Validate).unwrap().skip_reason.as_deref(),
            Some("build failed")
        );
        assert!(!summary.passed());
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(delegates.calls(), vec!["build:2019", "cleanup:2019"]);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_remote_test() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates {
            validate_fails: vec!["2022".to_string()],
            ..Default::default()
        });
        let (runner, _sink) = runner(delegates.clone(), StageConfig::default());

        let summary = runner.run(&items(dir.path(), &["2022"])).await;

        let item = summary.item("2022").unwrap();
        assert_eq!(item.status(StageKind::Validate), Some(StageStatus::Fail));
        assert_eq!(item.result(StageKind::Validate).unwrap().exit_code, Some(1));
        assert_eq!(item.status(StageKind::RemoteTest), Some(StageStatus::Skip));
        assert!(!summary.passed());
    }

    #[tokio::test]
    async fn test_validator_error_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates {
            validate_errors: vec!["2025".to_string()],
            ..Default::default()
        });
        let (runner, _sink) = runner(delegates, StageConfig::default());

        let summary = runner.run(&items(dir.path(), &["2025"])).await;

        let validate = summary
            .item("2025")
            .unwrap()
            .result(StageKind::Validate)
            .unwrap()
            .clone();
        assert_eq!(validate.status, StageStatus::Fail);
        assert_eq!(validate.exit_code, Some(1));
        assert!(validate.error.unwrap().contains("losetup unavailable"));
    }

    #[tokio::test]
    async fn test_skip_remote_test_always_skips() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates::default());
        let stages = StageConfig::default().with_skip_remote_test(true);
        let (runner, _sink) = runner(delegates.clone(), stages);

        let summary = runner.run(&items(dir.path(), &["2019", "2022"])).await;

        for version in ["2019", "2022"] {
            let item = summary.item(version).unwrap();
            assert_eq!(item.status(StageKind::RemoteTest), Some(StageStatus::Skip));
        }
        assert!(summary.passed());
        assert!(!delegates.calls().iter().any(|c| c.starts_with("remote_test")));
    }

    #[tokio::test]
    async fn test_skip_remote_test_keeps_validate_failure() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates {
            validate_fails: vec!["2022".into()],
            ..Default::default()
        });
        let stages = StageConfig::default().with_skip_remote_test(true);
        let (runner, _sink) = runner(delegates.clone(), stages);

        let summary = runner.run(&items(dir.path(), &["2022"])).await;

        let item = summary.item("2022").unwrap();
        assert_eq!(item.status(StageKind::Validate), Some(StageStatus::Fail));
        assert_eq!(item.status(StageKind::RemoteTest), Some(StageStatus::Skip));
        assert!(item.failed());
        assert!(!summary.passed());
        assert_eq!(summary.exit_code(), 1);
        assert!(!delegates.calls().iter().any(|c| c.starts_with("remote_test")));
    }

    #[tokio::test]
    async fn test_skip_build_without_artifact_skips_validate() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates::default());
        let stages = StageConfig::default().with_skip_build(true);
        let (runner, _sink) = runner(delegates.clone(), stages);

        let summary = runner.run(&items(dir.path(), &["2022"])).await;

        assert_eq!(
            statuses(&summary, "2022"),
            vec![
                StageStatus::Skip,
                StageStatus::Skip,
                StageStatus::Skip,
                StageStatus::Pass
            ]
        );
        assert!(summary.passed());
        assert_eq!(delegates.calls(), vec!["cleanup:2022"]);
    }

    #[tokio::test]
    async fn test_skip_build_with_existing_artifact_validates() {
        let dir = tempfile::tempdir().unwrap();
        let work = items(dir.path(), &["2022"]);
        std::fs::create_dir_all(&work[0].work_dir).unwrap();
        std::fs::write(&work[0].output, b"image").unwrap();

        let delegates = Arc::new(FakeDelegates::default());
        let stages = StageConfig::default().with_skip_build(true);
        let (runner, _sink) = runner(delegates.clone(), stages);

        let summary = runner.run(&work).await;

        assert_eq!(
            statuses(&summary, "2022"),
            vec![
                StageStatus::Skip,
                StageStatus::Pass,
                StageStatus::Pass,
                StageStatus::Pass
            ]
        );
    }

    #[tokio::test]
    async fn test_no_cleanup_skips_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates::default());
        let stages = StageConfig::default().with_no_cleanup(true);
        let (runner, _sink) = runner(delegates.clone(), stages);

        let summary = runner.run(&items(dir.path(), &["2019"])).await;

        let item = summary.item("2019").unwrap();
        assert_eq!(item.status(StageKind::Cleanup), Some(StageStatus::Skip));
        assert!(!delegates.calls().iter().any(|c| c.starts_with("cleanup")));
    }

    #[tokio::test]
    async fn test_cleanup_warnings_do_not_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates {
            cleanup_warnings: vec!["failed to delete disk 'imagegate-2022-disk'".to_string()],
            ..Default::default()
        });
        let (runner, _sink) = runner(delegates, StageConfig::default());

        let summary = runner.run(&items(dir.path(), &["2022"])).await;

        let item = summary.item("2022").unwrap();
        assert_eq!(item.status(StageKind::Cleanup), Some(StageStatus::Pass));
        assert_eq!(item.warnings().count(), 1);
        assert!(summary.passed());
    }

    #[tokio::test]
    async fn test_remote_failure_fails_only_its_item() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates {
            remote_codes: HashMap::from([("2019".to_string(), 1)]),
            ..Default::default()
        });
        let (runner, _sink) = runner(delegates.clone(), StageConfig::default());

        let summary = runner.run(&items(dir.path(), &["2019", "2022"])).await;

        assert!(summary.item("2019").unwrap().failed());
        assert!(!summary.item("2022").unwrap().failed());
        assert!(!summary.passed());
        assert_eq!(
            delegates.calls(),
            vec![
                "build:2019",
                "validate:2019",
                "remote_test:2019",
                "cleanup:2019",
                "build:2022",
                "validate:2022",
                "remote_test:2022",
                "cleanup:2022",
            ]
        );
    }

    #[tokio::test]
    async fn test_event_order() {
        let dir = tempfile::tempdir().unwrap();
        let delegates = Arc::new(FakeDelegates {
            build_codes: HashMap::from([("2019".to_string(), 1)]),
            ..Default::default()
        });
        let (runner, sink) = runner(delegates, StageConfig::default());

        runner.run(&items(dir.path(), &["2019"])).await;

        assert_eq!(
            sink.names(),
            vec![
                PIPELINE_STARTED,
                STAGE_STARTED,
                STAGE_COMPLETED,
                STAGE_SKIPPED,
                STAGE_SKIPPED,
                STAGE_STARTED,
                STAGE_COMPLETED,
                ITEM_COMPLETED,
                PIPELINE_COMPLETED,
            ]
        );

        let completed = sink.payloads(STAGE_COMPLETED);
        assert_eq!(completed[0]["stage"], "build");
        assert_eq!(completed[0]["status"], "fail");
        assert_eq!(completed[0]["exit_code"], 1);
        assert!(completed[0]["duration_ms"].is_number());

        let skipped = sink.payloads(STAGE_SKIPPED);
        assert_eq!(skipped[0]["stage"], "validate");
        assert_eq!(skipped[1]["stage"], "remote_test");

        let done = sink.payloads(PIPELINE_COMPLETED);
        assert_eq!(done[0]["passed"], false);
        assert_eq!(done[0]["exit_code"], 1);
    }

    #[tokio::test]
    async fn test_empty_run_passes() {
        let delegates = Arc::new(FakeDelegates::default());
        let (runner, sink) = runner(delegates, StageConfig::default());

        let summary = runner.run(&[]).await;

        assert!(summary.passed());
        assert_eq!(sink.names(), vec![PIPELINE_STARTED, PIPELINE_COMPLETED]);
    }
}

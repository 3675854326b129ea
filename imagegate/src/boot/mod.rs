//! Boot verification by serial-console polling.
//!
//! [`BootVerifier::verify`] polls the instance's console transcript on a fixed
//! interval, looking for the success marker (the management console prompt)
//! or one of the known boot-failure markers. A lifecycle watcher runs beside
//! the primary loop for operator visibility and is always shut down before
//! `verify` returns.

mod watcher;

use crate::cancellation::StructuredTaskGroup;
use crate::errors::Result;
use crate::platform::{InstanceState, Platform};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Marker printed once the special administration console is up.
pub const DEFAULT_SUCCESS_MARKER: &str = "SAC>";

/// Markers that mean the guest will not finish booting.
pub const DEFAULT_FAILURE_MARKERS: &[&str] = &[
    "Windows failed to start",
    "INACCESSIBLE_BOOT_DEVICE",
    "A fatal error occurred",
    "STOP:",
];

fn default_rounds() -> u32 {
    40
}

fn default_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_watcher_rounds() -> u32 {
    60
}

fn default_watcher_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_success_marker() -> String {
    DEFAULT_SUCCESS_MARKER.to_string()
}

fn default_failure_markers() -> Vec<String> {
    DEFAULT_FAILURE_MARKERS.iter().map(|m| (*m).to_string()).collect()
}

/// Intervals are written as (possibly fractional) seconds.
mod secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid interval {secs}: {e}")))
    }
}

/// Polling parameters and markers for boot verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootConfig {
    /// Maximum number of primary polling rounds.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Time between primary rounds, `interval_secs` in configuration files.
    #[serde(rename = "interval_secs", with = "secs", default = "default_interval")]
    pub interval: Duration,
    /// Maximum number of watcher rounds.
    #[serde(default = "default_watcher_rounds")]
    pub watcher_rounds: u32,
    /// Time between watcher rounds, `watcher_interval_secs` in configuration files.
    #[serde(
        rename = "watcher_interval_secs",
        with = "secs",
        default = "default_watcher_interval"
    )]
    pub watcher_interval: Duration,
    /// Substring that means the guest booted.
    #[serde(default = "default_success_marker")]
    pub success_marker: String,
    /// Substrings that mean the guest failed to boot.
    #[serde(default = "default_failure_markers")]
    pub failure_markers: Vec<String>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            interval: default_interval(),
            watcher_rounds: default_watcher_rounds(),
            watcher_interval: default_watcher_interval(),
            success_marker: default_success_marker(),
            failure_markers: default_failure_markers(),
        }
    }
}

impl BootConfig {
    /// Sets the primary polling budget.
    #[must_use]
    pub fn with_rounds(mut self, rounds: u32, interval: Duration) -> Self {
        self.rounds = rounds;
        self.interval = interval;
        self
    }

    /// Sets the watcher polling budget.
    #[must_use]
    pub fn with_watcher(mut self, rounds: u32, interval: Duration) -> Self {
        self.watcher_rounds = rounds;
        self.watcher_interval = interval;
        self
    }

    /// Interval between primary rounds.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Interval between watcher rounds.
    #[must_use]
    pub fn watcher_interval(&self) -> Duration {
        self.watcher_interval
    }

    /// Wall-clock deadline shared by every primary round, slow platform
    /// calls included.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.rounds)
    }
}

/// A marker found in a console transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// The success marker.
    Success,
    /// The failure marker that matched.
    Failure(String),
}

/// Scans a transcript for markers. The success marker wins when both appear.
#[must_use]
pub fn scan_transcript(transcript: &str, config: &BootConfig) -> Option<Marker> {
    if transcript.contains(&config.success_marker) {
        return Some(Marker::Success);
    }
    config
        .failure_markers
        .iter()
        .find(|marker| transcript.contains(marker.as_str()))
        .map(|marker| Marker::Failure(marker.clone()))
}

/// Result of a boot verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootOutcome {
    /// The success marker appeared on the given (1-based) round.
    Passed {
        /// Round the marker was seen on.
        rounds: u32,
    },
    /// A failure marker appeared or the instance stopped running.
    Failed {
        /// What went wrong.
        reason: String,
    },
    /// Neither marker appeared within the polling budget.
    TimedOut {
        /// Rounds polled.
        rounds: u32,
    },
}

impl BootOutcome {
    /// True only for [`BootOutcome::Passed`].
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

impl fmt::Display for BootOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed { rounds } => write!(f, "passed after {rounds} round(s)"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::TimedOut { rounds } => write!(f, "timed out after {rounds} round(s)"),
        }
    }
}

/// Outcome plus what was observed along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    /// The verdict.
    pub outcome: BootOutcome,
    /// Wall-clock time spent polling.
    pub elapsed: Duration,
    /// Last instance state the watcher published, if any.
    pub last_watched_state: Option<InstanceState>,
}

/// Polls an instance's console until it boots, fails, or the budget runs out.
pub struct BootVerifier {
    platform: Arc<dyn Platform>,
    config: BootConfig,
}

impl BootVerifier {
    /// Creates a verifier.
    pub fn new(platform: Arc<dyn Platform>, config: BootConfig) -> Self {
        Self { platform, config }
    }

    /// The polling configuration.
    #[must_use]
    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Verifies that `instance` boots, writing its console transcript to
    /// `transcript_path` on every successful fetch.
    ///
    /// Fetch and state-query failures are not fatal: the loop keeps polling.
    /// Only failing to write the final transcript is an error.
    pub async fn verify(&self, instance: &str, transcript_path: &Path) -> Result<BootReport> {
        if let Some(parent) = transcript_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let started = Instant::now();
        let (state_tx, state_rx) = watch::channel(None);

        let group = StructuredTaskGroup::new();
        {
            let platform = Arc::clone(&self.platform);
            let instance = instance.to_string();
            let rounds = self.config.watcher_rounds;
            let interval = self.config.watcher_interval();
            group.spawn("instance-state-watcher", move |token| {
                watcher::watch_instance_state(platform, instance, rounds, interval, state_tx, token)
            });
        }

        info!(
            instance,
            rounds = self.config.rounds,
            interval = ?self.config.interval(),
            budget = ?self.config.budget(),
            "Waiting for boot"
        );
        let deadline = started + self.config.budget();
        let (outcome, transcript) = self
            .poll(instance, transcript_path, &state_rx, deadline)
            .await;

        if let Err(e) = group.shutdown("boot verification finished").await {
            warn!(instance, "State watcher ended with error: {}", e);
        }

        tokio::fs::write(transcript_path, transcript.as_bytes()).await?;

        let last_watched_state = state_rx.borrow().clone();
        let elapsed = started.elapsed();
        info!(instance, outcome = %outcome, elapsed_secs = elapsed.as_secs(), "Boot verification finished");

        Ok(BootReport {
            outcome,
            elapsed,
            last_watched_state,
        })
    }

    /// Runs the primary rounds. Each platform call is bounded by `deadline`;
    /// once it passes, the verdict is `TimedOut` no matter which call was in
    /// flight.
    async fn poll(
        &self,
        instance: &str,
        transcript_path: &Path,
        watched: &watch::Receiver<Option<InstanceState>>,
        deadline: Instant,
    ) -> (BootOutcome, String) {
        let mut transcript = String::new();
        let mut polled = 0;

        for round in 1..=self.config.rounds {
            if Instant::now() >= deadline {
                break;
            }
            polled = round;

            let Ok(fetched) = timeout_at(deadline, self.platform.fetch_console(instance)).await
            else {
                warn!(instance, round, "Console fetch still running at the deadline");
                break;
            };
            match fetched {
                Ok(text) => {
                    transcript = text;
                    if let Err(e) = tokio::fs::write(transcript_path, transcript.as_bytes()).await {
                        debug!(path = %transcript_path.display(), "Could not write transcript: {}", e);
                    }
                    match scan_transcript(&transcript, &self.config) {
                        Some(Marker::Success) => {
                            info!(instance, round, "Boot marker found");
                            return (BootOutcome::Passed { rounds: round }, transcript);
                        }
                        Some(Marker::Failure(marker)) => {
                            warn!(instance, round, marker = %marker, "Boot failure marker found");
                            return (
                                BootOutcome::Failed {
                                    reason: format!("console reported '{marker}'"),
                                },
                                transcript,
                            );
                        }
                        None => {}
                    }
                }
                Err(e) => debug!(instance, round, "Console fetch failed: {}", e),
            }

            let Ok(state) = timeout_at(deadline, self.platform.instance_state(instance)).await
            else {
                warn!(instance, round, "State query still running at the deadline");
                break;
            };
            match state {
                Ok(state) if state.is_terminal_non_running() => {
                    warn!(instance, round, state = %state, "Instance stopped before booting");
                    return (
                        BootOutcome::Failed {
                            reason: format!("instance entered state '{state}'"),
                        },
                        transcript,
                    );
                }
                Ok(state) => debug!(instance, round, state = %state, "Still booting"),
                Err(e) => debug!(instance, round, "State query failed: {}", e),
            }

            if let Some(state) = watched.borrow().as_ref() {
                debug!(instance, round, watched = %state, "Watcher state");
            }

            if round < self.config.rounds {
                tokio::time::sleep_until(deadline.min(Instant::now() + self.config.interval())).await;
            }
        }

        warn!(instance, rounds = polled, "Boot deadline reached without a marker");
        (BootOutcome::TimedOut { rounds: polled }, transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ImagegateError;
    use crate::platform::MockPlatform;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_config(rounds: u32) -> BootConfig {
        BootConfig::default()
            .with_rounds(rounds, Duration::from_secs(15))
            .with_watcher(60, Duration::from_secs(10))
    }

    fn console_sequence(mock: &mut MockPlatform, frames: Vec<&'static str>) -> Arc<AtomicU32> {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        mock.expect_fetch_console().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let frame = frames.get(n).or(frames.last()).copied().unwrap_or("");
            Ok(frame.to_string())
        });
        calls
    }

    #[test]
    fn test_scan_success_wins_over_failure() {
        let config = BootConfig::default();
        let text = "STOP: 0x0000007B\r\n...\r\nSAC>";
        assert_eq!(scan_transcript(text, &config), Some(Marker::Success));
    }

    #[test]
    fn test_scan_failure_and_nothing() {
        let config = BootConfig::default();
        assert_eq!(
            scan_transcript("*** INACCESSIBLE_BOOT_DEVICE", &config),
            Some(Marker::Failure("INACCESSIBLE_BOOT_DEVICE".to_string()))
        );
        assert_eq!(scan_transcript("Loading files...", &config), None);
    }

    #[test]
    fn test_default_budget() {
        let config = BootConfig::default();
        assert_eq!(config.rounds, 40);
        assert_eq!(config.interval(), Duration::from_secs(15));
        assert_eq!(config.watcher_rounds, 60);
        assert_eq!(config.watcher_interval(), Duration::from_secs(10));
        assert_eq!(config.budget(), Duration::from_secs(600));
    }

    #[test]
    fn test_sub_second_intervals_are_kept() {
        let config = BootConfig::default()
            .with_rounds(5, Duration::from_millis(500))
            .with_watcher(3, Duration::from_millis(250));
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.watcher_interval(), Duration::from_millis(250));
        assert_eq!(config.budget(), Duration::from_millis(2500));
    }

    #[test]
    fn test_interval_seconds_in_json() {
        let config: BootConfig =
            serde_json::from_str(r#"{"interval_secs": 0.5, "watcher_interval_secs": 20}"#).unwrap();
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.watcher_interval(), Duration::from_secs(20));

        let json = serde_json::to_value(BootConfig::default()).unwrap();
        assert_eq!(json["interval_secs"], 15);
        assert_eq!(json["watcher_interval_secs"], 10);

        assert!(serde_json::from_str::<BootConfig>(r#"{"interval_secs": -1}"#).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passes_on_round_three_and_writes_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.txt");

        let mut mock = MockPlatform::new();
        let calls = console_sequence(&mut mock, vec!["BdsDxe", "Loading", "EMS ready\r\nSAC>"]);
        mock.expect_instance_state()
            .returning(|_| Ok(InstanceState::Running));

        let verifier = BootVerifier::new(Arc::new(mock), quick_config(10));
        let report = verifier.verify("vm", &path).await.unwrap();

        assert_eq!(report.outcome, BootOutcome::Passed { rounds: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("SAC>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_on_first_round() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockPlatform::new();
        console_sequence(&mut mock, vec!["SAC>"]);
        mock.expect_instance_state()
            .returning(|_| Ok(InstanceState::Starting));

        let verifier = BootVerifier::new(Arc::new(mock), quick_config(40));
        let report = verifier.verify("vm", &dir.path().join("t.txt")).await.unwrap();

        assert_eq!(report.outcome, BootOutcome::Passed { rounds: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockPlatform::new();
        console_sequence(&mut mock, vec!["", "Windows failed to start. A recent change"]);
        mock.expect_instance_state()
            .returning(|_| Ok(InstanceState::Running));

        let verifier = BootVerifier::new(Arc::new(mock), quick_config(40));
        let report = verifier.verify("vm", &dir.path().join("t.txt")).await.unwrap();

        match report.outcome {
            BootOutcome::Failed { reason } => assert!(reason.contains("Windows failed to start")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_instance_fails_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockPlatform::new();
        console_sequence(&mut mock, vec!["Booting"]);
        mock.expect_instance_state()
            .returning(|_| Ok(InstanceState::Stopped));

        let verifier = BootVerifier::new(Arc::new(mock), quick_config(40));
        let report = verifier.verify("vm", &dir.path().join("t.txt")).await.unwrap();

        assert_eq!(
            report.outcome,
            BootOutcome::Failed {
                reason: "instance entered state 'stopped'".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_keep_polling_until_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut mock = MockPlatform::new();
        mock.expect_fetch_console().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ImagegateError::platform("serial console not ready"))
        });
        mock.expect_instance_state()
            .returning(|_| Err(ImagegateError::platform("timeout")));

        let verifier = BootVerifier::new(Arc::new(mock), quick_config(5));
        let report = verifier.verify("vm", &path).await.unwrap();

        assert_eq!(report.outcome, BootOutcome::TimedOut { rounds: 5 });
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_is_stopped_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let state_calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&state_calls);

        let mut mock = MockPlatform::new();
        console_sequence(&mut mock, vec!["SAC>"]);
        mock.expect_instance_state().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(InstanceState::Starting)
        });

        let verifier = BootVerifier::new(Arc::new(mock), quick_config(40));
        verifier.verify("vm", &dir.path().join("t.txt")).await.unwrap();

        let after_return = state_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(state_calls.load(Ordering::SeqCst), after_return);
    }

    /// Console fetches take `console_delay`, or never finish when it is `None`.
    struct SlowConsole {
        console_delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl Platform for SlowConsole {
        async fn list_disks(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn disk_state(&self, _disk: &str) -> Result<crate::platform::DiskState> {
            Err(ImagegateError::platform("unused"))
        }
        async fn stop_disk_import(&self, _disk: &str) -> Result<()> {
            Ok(())
        }
        async fn finalize_disk_import(&self, _disk: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_disk(&self, _disk: &str) -> Result<()> {
            Ok(())
        }
        async fn import_disk(&self, _import: &crate::platform::DiskImport) -> Result<()> {
            Ok(())
        }
        async fn list_snapshots(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn delete_snapshot(&self, _snapshot: &str) -> Result<()> {
            Ok(())
        }
        async fn list_images(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn delete_image(&self, _image: &str) -> Result<()> {
            Ok(())
        }
        async fn list_instances(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn create_instance(&self, _spec: &crate::platform::InstanceSpec) -> Result<()> {
            Ok(())
        }
        async fn view_instance(&self, _instance: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn instance_state(&self, _instance: &str) -> Result<InstanceState> {
            Ok(InstanceState::Starting)
        }
        async fn stop_instance(&self, _instance: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_instance(&self, _instance: &str) -> Result<()> {
            Ok(())
        }
        async fn fetch_console(&self, _instance: &str) -> Result<String> {
            match self.console_delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    Err(ImagegateError::platform("serial console not ready"))
                }
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_console_fetches_respect_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(SlowConsole {
            console_delay: Some(Duration::from_secs(300)),
        });
        let config = BootConfig::default();
        let budget = config.budget();

        let verifier = BootVerifier::new(platform, config);
        let report = verifier.verify("vm", &dir.path().join("t.txt")).await.unwrap();

        // Round 1 fetch ends at 300 s, round 2 is cut off at 600 s.
        assert_eq!(report.outcome, BootOutcome::TimedOut { rounds: 2 });
        assert!(report.elapsed <= budget, "elapsed {:?}", report.elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_console_fetch_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(SlowConsole {
            console_delay: None,
        });
        let config = quick_config(4);
        let budget = config.budget();

        let verifier = BootVerifier::new(platform, config);
        let report = verifier.verify("vm", &dir.path().join("t.txt")).await.unwrap();

        assert_eq!(report.outcome, BootOutcome::TimedOut { rounds: 1 });
        assert!(report.elapsed <= budget, "elapsed {:?}", report.elapsed);
        assert!(dir.path().join("t.txt").exists());
    }
}

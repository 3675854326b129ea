//! Structural validation of a built disk image.
//!
//! The validator never touches the image it is given: it works on a sparse
//! copy, attached read-only through a loop device. Every resource it acquires
//! (the copy, the loop device, each mount) is registered on a
//! [`CleanupGuard`] as soon as it exists, so it is released on every exit
//! path including a dropped future.

mod bcd;
mod fs_checks;
mod gpt;

pub use bcd::{check_boot_config, ems_enabled, HiveReader, HivexShell, BCD_PATH, EMS_ENABLED_ELEMENT};
pub use fs_checks::{check_os_filesystem, find_file, resolve_case_insensitive};
pub use gpt::{
    check_partition_layout, check_shrunk_size, expected_max_size, integrity_ok, Partition,
    PartitionTable, EXPECTED_LAYOUT,
};

use crate::cancellation::CleanupGuard;
use crate::core::CheckReport;
use crate::errors::{ImagegateError, Result};
use crate::process::{find_tool, Cmd};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Partition number of the EFI system partition.
pub const ESP_PARTITION: u32 = 2;
/// Partition number of the OS data partition.
pub const OS_PARTITION: u32 = 4;

/// How long to wait for udev to create a partition's device node.
const NODE_WAIT_ATTEMPTS: u32 = 20;
const NODE_WAIT_INTERVAL: Duration = Duration::from_millis(250);

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Validator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Where the working copy and mount points are created.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// `hivexsh` binary; looked up on `PATH` when unset.
    #[serde(default)]
    pub hive_tool: Option<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            hive_tool: None,
        }
    }
}

/// Device node of partition `number` on loop device `device`.
#[must_use]
pub fn partition_node(device: &str, number: u32) -> PathBuf {
    PathBuf::from(format!("{device}p{number}"))
}

/// Runs the structural checks on an image file.
#[derive(Debug, Clone, Default)]
pub struct ImageValidator {
    config: ValidatorConfig,
}

impl ImageValidator {
    /// Creates a validator.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    fn hive_reader(&self) -> Option<HivexShell> {
        let tool = self.config.hive_tool.as_deref().unwrap_or("hivexsh");
        find_tool(tool).map(|path| HivexShell::new(path.to_string_lossy()))
    }

    /// Validates `image` and returns the accumulated check records.
    ///
    /// Returns an error only when a hard precondition fails: the image is
    /// missing, it cannot be copied, or the copy cannot be attached.
    pub async fn validate(&self, image: &Path) -> Result<CheckReport> {
        let metadata = tokio::fs::metadata(image).await.map_err(|e| {
            ImagegateError::precondition(format!("image {} not readable: {e}", image.display()))
        })?;

        let run_id = Uuid::new_v4().simple().to_string();
        let guard = CleanupGuard::new();
        let cleanup = guard.registry();
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;

        let copy = self.config.scratch_dir.join(format!("validate-{run_id}.img"));
        {
            let copy = copy.clone();
            cleanup.register("remove-copy", move || {
                match std::fs::remove_file(&copy) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                        Err(format!("failed to remove {}: {e}", copy.display()))
                    }
                    _ => Ok(()),
                }
            });
        }
        Cmd::new("cp")
            .arg("--sparse=always")
            .arg(image)
            .arg(&copy)
            .run_checked()
            .await
            .map_err(|e| ImagegateError::precondition(format!("failed to copy image: {e}")))?;
        info!(image = %image.display(), copy = %copy.display(), "Working on sparse copy");

        let attach = Cmd::new("losetup")
            .args(["--find", "--show", "--read-only", "--partscan"])
            .arg(&copy)
            .run_checked()
            .await
            .map_err(|e| ImagegateError::precondition(format!("failed to attach image: {e}")))?;
        let device = attach.stdout.trim().to_string();
        if device.is_empty() {
            return Err(ImagegateError::precondition("losetup did not report a device"));
        }
        {
            let device = device.clone();
            cleanup.register("detach-loop", move || {
                Cmd::new("losetup").args(["-d", device.as_str()]).run_blocking()
            });
        }
        info!(device = %device, "Attached read-only");

        // Partition nodes appear asynchronously after --partscan.
        if let Err(e) = Cmd::new("udevadm").args(["settle", "--timeout=10"]).run().await {
            debug!("udevadm settle unavailable: {}", e);
        }

        let mut report = CheckReport::new();
        self.check_partitions(&device, metadata.len(), &mut report).await;

        let os_root = self.config.scratch_dir.join(format!("validate-{run_id}-os"));
        match self
            .mount(&guard, "os", &partition_node(&device, OS_PARTITION), &os_root)
            .await
        {
            Ok(()) => {
                check_os_filesystem(&os_root, &mut report);
                release(&guard, "umount-os");
            }
            Err(reason) => report.fail(format!("OS filesystem checks skipped: {reason}")),
        }

        let esp_root = self.config.scratch_dir.join(format!("validate-{run_id}-esp"));
        match self
            .mount(&guard, "esp", &partition_node(&device, ESP_PARTITION), &esp_root)
            .await
        {
            Ok(()) => {
                let reader = self.hive_reader();
                let reader = reader.as_ref().map(|r| r as &dyn HiveReader);
                check_boot_config(&esp_root, reader, &mut report).await;
                release(&guard, "umount-esp");
            }
            Err(reason) => report.fail(format!("boot configuration checks skipped: {reason}")),
        }

        for (name, error) in guard.finish() {
            warn!(cleanup = %name, "Cleanup failed: {}", error);
        }

        info!(image = %image.display(), counts = %report.counts(), "Validation finished");
        Ok(report)
    }

    async fn check_partitions(&self, device: &str, image_size: u64, report: &mut CheckReport) {
        match Cmd::new("sgdisk").args(["-v", device]).run().await {
            Ok(output) => report.assert(
                output.success() && integrity_ok(&output.stdout),
                "partition table integrity verified",
                format!("partition table integrity problems: {}", output.stdout.trim()),
            ),
            Err(e) => report.fail(format!("could not verify partition table: {e}")),
        }

        let table = match Cmd::new("sgdisk").args(["-p", device]).run_checked().await {
            Ok(output) => PartitionTable::parse(&output.stdout),
            Err(e) => Err(e),
        };
        match table {
            Ok(table) => {
                check_partition_layout(&table, report);
                check_shrunk_size(&table, image_size, report);
            }
            Err(e) => report.fail(format!("could not read partition table: {e}")),
        }
    }

    /// Mounts `node` read-only at `target`, registering its unmount.
    ///
    /// The returned reason names only the partition so repeated runs record
    /// identical messages whatever loop device was assigned.
    async fn mount(
        &self,
        guard: &CleanupGuard,
        label: &str,
        node: &Path,
        target: &Path,
    ) -> std::result::Result<(), String> {
        if !wait_for_node(node, NODE_WAIT_ATTEMPTS, NODE_WAIT_INTERVAL).await {
            warn!(node = %node.display(), "Partition device node missing");
            return Err(format!("{label} partition device node not found"));
        }
        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| format!("cannot create {label} mount point: {e}"))?;

        let name = format!("umount-{label}");
        {
            let target = target.to_path_buf();
            guard.registry().register(name.clone(), move || {
                let _ = std::fs::remove_dir(&target);
                Ok(())
            });
        }

        Cmd::new("mount")
            .args(["-o", "ro"])
            .arg(node)
            .arg(target)
            .run_checked()
            .await
            .map_err(|e| {
                warn!(node = %node.display(), "Mount failed: {}", e);
                format!("read-only mount of {label} partition failed")
            })?;

        let target = target.to_path_buf();
        guard.registry().unregister_by_name(&name);
        guard.registry().register(name, move || {
            let unmounted = Cmd::new("umount").arg(&target).run_blocking();
            let _ = std::fs::remove_dir(&target);
            unmounted
        });
        Ok(())
    }
}

/// Polls for `node` up to `attempts` times, `interval` apart.
async fn wait_for_node(node: &Path, attempts: u32, interval: Duration) -> bool {
    for attempt in 1..=attempts {
        if node.exists() {
            return true;
        }
        if attempt < attempts {
            debug!(node = %node.display(), attempt, "Waiting for device node");
            tokio::time::sleep(interval).await;
        }
    }
    false
}

fn release(guard: &CleanupGuard, name: &str) {
    if let Some(Err(e)) = guard.registry().run_named(name) {
        warn!(cleanup = name, "Cleanup failed: {}", e);
    }
}

//! The remote-test and cleanup collaborators.
//!
//! Every remote resource a work item creates is named from the item's
//! version, so an item owns exactly the resources in its [`ResourceNames`]
//! and cleanup never touches another item's.

use crate::boot::{BootConfig, BootVerifier};
use crate::core::WorkItem;
use crate::errors::Result;
use crate::platform::{DiskImport, InstanceSpec, InstanceState, Platform, PlatformConfig};
use crate::reconcile::reconcile_and_delete;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Transcript file name under the item's work directory.
pub const TRANSCRIPT_FILE: &str = "serial-console.log";
/// Final instance snapshot file name under the item's work directory.
pub const INSTANCE_SNAPSHOT_FILE: &str = "instance.json";
/// Image OS label.
pub const IMAGE_OS: &str = "windows";

const STOP_WAIT_ROUNDS: u32 = 30;
const STOP_WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Names of the remote resources owned by one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNames {
    /// Imported disk.
    pub disk: String,
    /// Snapshot taken of the imported disk.
    pub snapshot: String,
    /// Image created from the snapshot.
    pub image: String,
    /// Test instance.
    pub instance: String,
    /// Boot disk created alongside the instance.
    pub boot_disk: String,
}

impl ResourceNames {
    /// Names for `version` under `prefix`.
    #[must_use]
    pub fn new(prefix: &str, version: &str) -> Self {
        let base = format!("{prefix}-{version}");
        Self {
            disk: format!("{base}-disk"),
            snapshot: format!("{base}-snap"),
            image: format!("{base}-image"),
            instance: format!("{base}-vm"),
            boot_disk: format!("{base}-vm-boot"),
        }
    }

    fn disks(&self) -> [&str; 2] {
        [self.boot_disk.as_str(), self.disk.as_str()]
    }
}

/// What cleanup did, and what it could not do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Resources that were deleted.
    pub removed: Vec<String>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}

impl CleanupReport {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn removed(&mut self, name: &str) {
        info!(resource = name, "Removed");
        self.removed.push(name.to_string());
    }
}

/// Imports a built image, boots it, and tears everything down again.
pub struct RemoteTester {
    platform: Arc<dyn Platform>,
    config: PlatformConfig,
    boot: BootConfig,
    stop_wait: (u32, Duration),
}

impl RemoteTester {
    /// Creates a tester.
    pub fn new(platform: Arc<dyn Platform>, config: PlatformConfig, boot: BootConfig) -> Self {
        Self {
            platform,
            config,
            boot,
            stop_wait: (STOP_WAIT_ROUNDS, STOP_WAIT_INTERVAL),
        }
    }

    /// Resource names for `item`.
    #[must_use]
    pub fn names(&self, item: &WorkItem) -> ResourceNames {
        ResourceNames::new(&self.config.resource_prefix, &item.version)
    }

    /// Boot-tests `item`'s artifact and returns an exit code: 0 iff it booted.
    ///
    /// Leftovers from an earlier run are removed first. Errors creating
    /// resources are returned; the caller decides how they count.
    pub async fn test(&self, item: &WorkItem) -> Result<i32> {
        let names = self.names(item);

        let leftovers = self.cleanup(item).await;
        if !leftovers.removed.is_empty() {
            info!(version = %item.version, removed = ?leftovers.removed, "Removed leftovers from an earlier run");
        }

        self.platform
            .import_disk(&DiskImport {
                path: item.output.clone(),
                disk: names.disk.clone(),
                snapshot: names.snapshot.clone(),
                image: names.image.clone(),
                os: IMAGE_OS.to_string(),
                version: item.version.clone(),
            })
            .await?;
        info!(image = %names.image, "Imported image");

        self.platform
            .create_instance(&InstanceSpec {
                name: names.instance.clone(),
                image: names.image.clone(),
                boot_disk: names.boot_disk.clone(),
                boot_disk_gib: self.config.boot_disk_gib,
                ncpus: self.config.instance_ncpus,
                memory_gib: self.config.instance_memory,
            })
            .await?;
        info!(instance = %names.instance, "Created instance");

        let verifier = BootVerifier::new(Arc::clone(&self.platform), self.boot.clone());
        let report = verifier
            .verify(&names.instance, &item.work_dir.join(TRANSCRIPT_FILE))
            .await?;

        self.save_instance_snapshot(item, &names.instance).await;

        Ok(if report.outcome.is_passed() { 0 } else { 1 })
    }

    async fn save_instance_snapshot(&self, item: &WorkItem, instance: &str) {
        let path = item.work_dir.join(INSTANCE_SNAPSHOT_FILE);
        let written = match self.platform.view_instance(instance).await {
            Ok(view) => match serde_json::to_vec_pretty(&view) {
                Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = written {
            warn!(instance, path = %path.display(), "Could not save instance snapshot: {}", e);
        }
    }

    /// Deletes every remote resource `item` owns. Never fails; problems are
    /// collected as warnings.
    pub async fn cleanup(&self, item: &WorkItem) -> CleanupReport {
        let names = self.names(item);
        let mut report = CleanupReport::default();

        match self.platform.list_instances().await {
            Ok(instances) if instances.contains(&names.instance) => {
                self.remove_instance(&names.instance, &mut report).await;
            }
            Ok(_) => {}
            Err(e) => report.warn(format!("could not list instances: {e}")),
        }

        match self.platform.list_images().await {
            Ok(images) if images.contains(&names.image) => {
                match self.platform.delete_image(&names.image).await {
                    Ok(()) => report.removed(&names.image),
                    Err(e) => report.warn(format!("failed to delete image {}: {e}", names.image)),
                }
            }
            Ok(_) => {}
            Err(e) => report.warn(format!("could not list images: {e}")),
        }

        match self.platform.list_snapshots().await {
            Ok(snapshots) if snapshots.contains(&names.snapshot) => {
                match self.platform.delete_snapshot(&names.snapshot).await {
                    Ok(()) => report.removed(&names.snapshot),
                    Err(e) => report.warn(format!(
                        "failed to delete snapshot {}: {e}",
                        names.snapshot
                    )),
                }
            }
            Ok(_) => {}
            Err(e) => report.warn(format!("could not list snapshots: {e}")),
        }

        match self.platform.list_disks().await {
            Ok(disks) => {
                for disk in names.disks() {
                    if !disks.iter().any(|d| d == disk) {
                        continue;
                    }
                    let reconciled = reconcile_and_delete(self.platform.as_ref(), disk).await;
                    report.warnings.extend(reconciled.warnings);
                    if reconciled.deleted {
                        report.removed(disk);
                    }
                }
            }
            Err(e) => report.warn(format!("could not list disks: {e}")),
        }

        report
    }

    async fn remove_instance(&self, instance: &str, report: &mut CleanupReport) {
        if let Err(e) = self.platform.stop_instance(instance).await {
            report.warn(format!("failed to stop instance {instance}: {e}"));
        }

        let (rounds, interval) = self.stop_wait;
        let mut stopped = false;
        for round in 1..=rounds {
            match self.platform.instance_state(instance).await {
                Ok(InstanceState::Stopped | InstanceState::Failed | InstanceState::Destroyed) => {
                    stopped = true;
                    break;
                }
                Ok(state) => info!(instance, round, state = %state, "Waiting for instance to stop"),
                Err(e) => info!(instance, round, "State query failed: {}", e),
            }
            if round < rounds {
                tokio::time::sleep(interval).await;
            }
        }
        if !stopped {
            report.warn(format!("instance {instance} did not stop in time"));
        }

        match self.platform.delete_instance(instance).await {
            Ok(()) => report.removed(instance),
            Err(e) => report.warn(format!("failed to delete instance {instance}: {e}")),
        }
    }
}

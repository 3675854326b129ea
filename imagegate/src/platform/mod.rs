//! Remote platform client.
//!
//! The platform is reached through its CLI; [`Platform`] is the typed seam
//! the rest of the crate programs against, and [`OxideCli`] is the
//! subprocess-backed implementation. Every lookup returns a closed enum
//! (with an explicit `Unknown` variant) rather than a raw string.

mod cli;
mod types;

pub use cli::OxideCli;
pub use types::{decode_console, parse_names, DiskState, InstanceState};

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_cli() -> String {
    "oxide".to_string()
}

fn default_project() -> String {
    "images".to_string()
}

fn default_resource_prefix() -> String {
    "imagegate".to_string()
}

fn default_ncpus() -> u16 {
    2
}

fn default_memory_gib() -> u64 {
    4
}

fn default_boot_disk_gib() -> u64 {
    40
}

/// Where and how remote resources are created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform CLI binary.
    #[serde(default = "default_cli")]
    pub cli: String,
    /// Project every resource lives in.
    #[serde(default = "default_project")]
    pub project: String,
    /// Prefix of every resource name.
    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,
    /// Test instance CPU count.
    #[serde(default = "default_ncpus")]
    pub instance_ncpus: u16,
    /// Test instance memory in GiB.
    #[serde(default = "default_memory_gib")]
    pub instance_memory: u64,
    /// Test instance boot disk size in GiB.
    #[serde(default = "default_boot_disk_gib")]
    pub boot_disk_gib: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            project: default_project(),
            resource_prefix: default_resource_prefix(),
            instance_ncpus: default_ncpus(),
            instance_memory: default_memory_gib(),
            boot_disk_gib: default_boot_disk_gib(),
        }
    }
}

/// Parameters for importing a local image file as a disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskImport {
    /// Local raw image to upload.
    pub path: PathBuf,
    /// Name of the disk to create.
    pub disk: String,
    /// Name of the snapshot taken when the import is finalized.
    pub snapshot: String,
    /// Name of the image created from that snapshot.
    pub image: String,
    /// Image OS label.
    pub os: String,
    /// Image version label.
    pub version: String,
}

/// Parameters for creating an instance that boots from an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Instance name, also used as its hostname.
    pub name: String,
    /// Image the boot disk is created from.
    pub image: String,
    /// Name of the boot disk.
    pub boot_disk: String,
    /// Boot disk size in GiB.
    pub boot_disk_gib: u64,
    /// Virtual CPU count.
    pub ncpus: u16,
    /// Memory in GiB.
    pub memory_gib: u64,
}

/// Operations the pipeline needs from the remote platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Names of all disks in the project.
    async fn list_disks(&self) -> Result<Vec<String>>;
    /// Current lifecycle state of a disk.
    async fn disk_state(&self, disk: &str) -> Result<DiskState>;
    /// Stops bulk writes on an importing disk.
    async fn stop_disk_import(&self, disk: &str) -> Result<()>;
    /// Finalizes an import without taking a snapshot.
    async fn finalize_disk_import(&self, disk: &str) -> Result<()>;
    /// Deletes a disk.
    async fn delete_disk(&self, disk: &str) -> Result<()>;
    /// Imports a local image as a disk, snapshot and image.
    async fn import_disk(&self, import: &DiskImport) -> Result<()>;

    /// Names of all snapshots in the project.
    async fn list_snapshots(&self) -> Result<Vec<String>>;
    /// Deletes a snapshot.
    async fn delete_snapshot(&self, snapshot: &str) -> Result<()>;
    /// Names of all images in the project.
    async fn list_images(&self) -> Result<Vec<String>>;
    /// Deletes an image.
    async fn delete_image(&self, image: &str) -> Result<()>;

    /// Names of all instances in the project.
    async fn list_instances(&self) -> Result<Vec<String>>;
    /// Creates and starts an instance.
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<()>;
    /// Full instance view as returned by the platform.
    async fn view_instance(&self, instance: &str) -> Result<serde_json::Value>;
    /// Current run state of an instance.
    async fn instance_state(&self, instance: &str) -> Result<InstanceState>;
    /// Requests an instance stop.
    async fn stop_instance(&self, instance: &str) -> Result<()>;
    /// Deletes an instance.
    async fn delete_instance(&self, instance: &str) -> Result<()>;
    /// Serial console output since the instance started.
    async fn fetch_console(&self, instance: &str) -> Result<String>;
}

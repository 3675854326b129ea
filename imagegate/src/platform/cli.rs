//! Subprocess-backed platform client.

use super::types::{decode_console, parse_names};
use super::{DiskImport, DiskState, InstanceSpec, InstanceState, Platform, PlatformConfig};
use crate::errors::{ImagegateError, Result};
use crate::process::Cmd;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};

/// Upper bound on console history fetched per poll.
const CONSOLE_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Platform client that shells out to the `oxide` CLI.
#[derive(Debug, Clone)]
pub struct OxideCli {
    program: String,
    project: String,
    scratch_dir: PathBuf,
}

impl OxideCli {
    /// Creates a client for `project` using the CLI binary `program`.
    pub fn new(program: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            project: project.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Creates a client from the platform settings.
    #[must_use]
    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(&config.cli, &config.project)
    }

    /// Sets where request bodies are staged.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// The project every call is scoped to.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    fn cmd<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Cmd {
        Cmd::new(&self.program)
            .args(args)
            .args(["--project", self.project.as_str()])
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        self.cmd(args.iter().copied()).run_checked().await.map(|_| ())
    }

    async fn run_json(&self, args: &[&str]) -> Result<Value> {
        let output = self.cmd(args.iter().copied()).run_checked().await?;
        serde_json::from_str(&output.stdout).map_err(|e| {
            ImagegateError::platform(format!(
                "'{} {}' did not return JSON: {e}",
                self.program,
                args.join(" ")
            ))
        })
    }

    async fn list(&self, resource: &str) -> Result<Vec<String>> {
        let list = self.run_json(&[resource, "list"]).await?;
        parse_names(&list)
    }
}

/// Request body for creating an instance with a boot disk cloned from an image.
fn instance_body(spec: &InstanceSpec) -> Value {
    const GIB: u64 = 1024 * 1024 * 1024;
    json!({
        "name": spec.name,
        "hostname": spec.name,
        "description": format!("boot test for image {}", spec.image),
        "ncpus": spec.ncpus,
        "memory": spec.memory_gib * GIB,
        "start": true,
        "disks": [{
            "type": "create",
            "name": spec.boot_disk,
            "description": format!("boot disk for {}", spec.name),
            "size": spec.boot_disk_gib * GIB,
            "disk_source": {
                "type": "image",
                "image_id": spec.image,
            },
        }],
        "network_interfaces": {"type": "default"},
        "external_ips": [{"type": "ephemeral"}],
    })
}

#[async_trait]
impl Platform for OxideCli {
    async fn list_disks(&self) -> Result<Vec<String>> {
        self.list("disk").await
    }

    async fn disk_state(&self, disk: &str) -> Result<DiskState> {
        let view = self.run_json(&["disk", "view", "--disk", disk]).await?;
        DiskState::from_view(&view)
    }

    async fn stop_disk_import(&self, disk: &str) -> Result<()> {
        self.run(&["disk", "bulk-write-stop", "--disk", disk]).await
    }

    async fn finalize_disk_import(&self, disk: &str) -> Result<()> {
        self.run(&["disk", "finalize", "--disk", disk]).await
    }

    async fn delete_disk(&self, disk: &str) -> Result<()> {
        self.run(&["disk", "delete", "--disk", disk]).await
    }

    async fn import_disk(&self, import: &DiskImport) -> Result<()> {
        let path = import.path.to_string_lossy();
        let description = format!("imported from {path}");
        info!(disk = %import.disk, path = %path, "Importing disk");
        self.run(&[
            "disk",
            "import",
            "--path",
            &path,
            "--disk",
            &import.disk,
            "--description",
            &description,
            "--snapshot",
            &import.snapshot,
            "--image",
            &import.image,
            "--image-description",
            &description,
            "--image-os",
            &import.os,
            "--image-version",
            &import.version,
        ])
        .await
    }

    async fn list_snapshots(&self) -> Result<Vec<String>> {
        self.list("snapshot").await
    }

    async fn delete_snapshot(&self, snapshot: &str) -> Result<()> {
        self.run(&["snapshot", "delete", "--snapshot", snapshot]).await
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        self.list("image").await
    }

    async fn delete_image(&self, image: &str) -> Result<()> {
        self.run(&["image", "delete", "--image", image]).await
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        self.list("instance").await
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<()> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let body_path = self.scratch_dir.join(format!("{}-create.json", spec.name));
        tokio::fs::write(&body_path, serde_json::to_vec_pretty(&instance_body(spec))?).await?;
        debug!(body = %body_path.display(), "Staged instance create body");

        let body = body_path.to_string_lossy().into_owned();
        let result = self
            .run(&["instance", "create", "--json-body", body.as_str()])
            .await;
        let _ = tokio::fs::remove_file(&body_path).await;
        result
    }

    async fn view_instance(&self, instance: &str) -> Result<Value> {
        self.run_json(&["instance", "view", "--instance", instance]).await
    }

    async fn instance_state(&self, instance: &str) -> Result<InstanceState> {
        let view = self.view_instance(instance).await?;
        InstanceState::from_view(&view)
    }

    async fn stop_instance(&self, instance: &str) -> Result<()> {
        self.run(&["instance", "stop", "--instance", instance]).await
    }

    async fn delete_instance(&self, instance: &str) -> Result<()> {
        self.run(&["instance", "delete", "--instance", instance]).await
    }

    async fn fetch_console(&self, instance: &str) -> Result<String> {
        let max_bytes = CONSOLE_MAX_BYTES.to_string();
        let response = self
            .run_json(&[
                "instance",
                "serial",
                "history",
                "--instance",
                instance,
                "--byte-offset",
                "0",
                "--max-bytes",
                &max_bytes,
                "--json",
            ])
            .await?;
        decode_console(&response)
    }
}

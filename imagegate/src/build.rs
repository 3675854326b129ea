//! The image-build collaborator.
//!
//! The build tool is opaque: it gets a command line with the item's paths
//! substituted in, and only its exit code is consumed.

use crate::core::WorkItem;
use crate::errors::Result;
use crate::process::Cmd;
use crate::shrink::create_output_image;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_program() -> String {
    "windows-image-builder".to_string()
}

fn default_args() -> Vec<String> {
    [
        "create",
        "--iso",
        "{iso}",
        "--output",
        "{output}",
        "--work-dir",
        "{work_dir}",
    ]
    .iter()
    .map(|a| (*a).to_string())
    .collect()
}

/// How to invoke the build tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Program to run.
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments; `{version}`, `{iso}`, `{output}` and `{work_dir}` are
    /// replaced per item.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// When set, a blank raw image of this size (e.g. `30G`) is created at
    /// the output path before the tool runs.
    #[serde(default)]
    pub image_size: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            image_size: None,
        }
    }
}

/// Substitutes the item placeholders into `template`.
#[must_use]
pub fn expand_placeholders(template: &str, item: &WorkItem) -> String {
    template
        .replace("{version}", &item.version)
        .replace("{iso}", &item.iso.to_string_lossy())
        .replace("{output}", &item.output.to_string_lossy())
        .replace("{work_dir}", &item.work_dir.to_string_lossy())
}

/// Runs the configured build command for one item.
#[derive(Debug, Clone)]
pub struct BuildTool {
    config: BuildConfig,
}

impl BuildTool {
    /// Creates a build tool.
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// The command that would build `item`.
    #[must_use]
    pub fn command(&self, item: &WorkItem) -> Cmd {
        Cmd::new(&self.config.program).args(
            self.config
                .args
                .iter()
                .map(|a| expand_placeholders(a, item)),
        )
    }

    /// Builds `item` and returns the tool's exit code.
    ///
    /// Failing to start the tool or to create the blank output image is an
    /// error; a non-zero exit of the tool is not.
    pub async fn build(&self, item: &WorkItem) -> Result<i32> {
        tokio::fs::create_dir_all(&item.work_dir).await?;
        if let Some(size) = self.config.image_size.as_deref() {
            create_output_image(&item.output, size).await?;
        }
        info!(version = %item.version, output = %item.output.display(), "Building image");

        let output = self.command(item).run().await?;
        let code = output.exit_code();
        if output.success() {
            info!(version = %item.version, "Build finished");
        } else {
            let tail: String = output.stderr.lines().last().unwrap_or_default().to_string();
            warn!(version = %item.version, code, stderr = %tail, "Build failed");
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn item(root: &Path) -> WorkItem {
        WorkItem::new("2022", "/iso/2022.iso", root)
    }

    #[test]
    fn test_placeholders() {
        let item = item(Path::new("/work"));
        assert_eq!(
            expand_placeholders("--out={output} v{version}", &item),
            "--out=/work/2022/windows-2022.img v2022"
        );
        assert_eq!(expand_placeholders("{nothing}", &item), "{nothing}");
    }

    #[test]
    fn test_default_command_line() {
        let tool = BuildTool::new(BuildConfig::default());
        let cmd = tool.command(&item(Path::new("/w")));
        assert_eq!(cmd.program(), "windows-image-builder");
        assert_eq!(
            cmd.arg_list(),
            &[
                "create",
                "--iso",
                "/iso/2022.iso",
                "--output",
                "/w/2022/windows-2022.img",
                "--work-dir",
                "/w/2022"
            ]
        );
    }

    #[test]
    fn test_image_size_from_json() {
        let config: BuildConfig = serde_json::from_str(r#"{"image_size": "40G"}"#).unwrap();
        assert_eq!(config.image_size.as_deref(), Some("40G"));
        assert_eq!(config.program, "windows-image-builder");
    }

    #[tokio::test]
    async fn test_exit_codes_are_returned() {
        let dir = tempfile::tempdir().unwrap();
        let ok = BuildTool::new(BuildConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "touch '{output}'".to_string()],
            image_size: None,
        });
        let it = item(dir.path());
        assert_eq!(ok.build(&it).await.unwrap(), 0);
        assert!(it.artifact_exists());

        let failing = BuildTool::new(BuildConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 3".to_string()],
            image_size: None,
        });
        assert_eq!(failing.build(&it).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_blank_image_failure_stops_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("builder-ran");
        let tool = BuildTool::new(BuildConfig {
            program: "touch".to_string(),
            args: vec![marker.to_string_lossy().into_owned()],
            image_size: Some("1M".to_string()),
        });
        let it = item(dir.path()).with_output(dir.path().join("absent").join("out.img"));

        assert!(tool.build(&it).await.is_err());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = BuildTool::new(BuildConfig {
            program: "/nonexistent/builder".to_string(),
            args: Vec::new(),
            image_size: None,
        });
        assert!(tool.build(&item(dir.path())).await.is_err());
    }
}

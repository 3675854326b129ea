//! Boot configuration store checks.
//!
//! The store is a registry hive on the EFI system partition. Reading it needs
//! `hivexsh`; without it only the presence check runs and the serial-console
//! check degrades to a warning.

use super::fs_checks::resolve_case_insensitive;
use crate::core::CheckReport;
use crate::errors::Result;
use crate::process::Cmd;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Boot configuration store location on the ESP.
pub const BCD_PATH: &str = "EFI/Microsoft/Boot/BCD";

/// Element holding the "emergency management services enabled" boolean.
pub const EMS_ENABLED_ELEMENT: &str = "16000020";

/// Read access to a registry hive.
#[async_trait]
pub trait HiveReader: Send + Sync {
    /// Names of the boot configuration objects in the store.
    async fn objects(&self, hive: &Path) -> Result<Vec<String>>;

    /// Raw value of `element` on `object`, or `None` if the object does not
    /// carry it.
    async fn element(&self, hive: &Path, object: &str, element: &str) -> Result<Option<String>>;
}

/// [`HiveReader`] backed by the `hivexsh` shell, driven over stdin.
#[derive(Debug, Clone)]
pub struct HivexShell {
    program: String,
}

impl HivexShell {
    /// Uses the `hivexsh` binary at `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn script(&self, hive: &Path, script: String) -> Result<String> {
        let output = Cmd::new(&self.program)
            .arg(hive)
            .stdin(script)
            .run_checked()
            .await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl HiveReader for HivexShell {
    async fn objects(&self, hive: &Path) -> Result<Vec<String>> {
        let listing = self.script(hive, "cd \\Objects\nls\n".to_string()).await?;
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn element(&self, hive: &Path, object: &str, element: &str) -> Result<Option<String>> {
        let script = format!("cd \\Objects\\{object}\\Elements\\{element}\nlsval\n");
        match self.script(hive, script).await {
            Ok(listing) => Ok(listing
                .lines()
                .find_map(|l| l.trim().strip_prefix("\"Element\"="))
                .map(str::to_string)),
            Err(e) => {
                debug!(object, element, "Element not readable: {}", e);
                Ok(None)
            }
        }
    }
}

/// True when a raw boolean element value encodes "enabled".
///
/// Accepts the encodings the hive tools print: bare hex bytes (`01`, `1`),
/// typed hex (`hex:01`, `hex(3):01,00`) and `dword:00000001`.
#[must_use]
pub fn ems_enabled(raw: &str) -> bool {
    let value = raw.trim();
    if let Some(dword) = value.strip_prefix("dword:") {
        return u32::from_str_radix(dword.trim(), 16) == Ok(1);
    }
    let bytes = if let Some(rest) = value.strip_prefix("hex:") {
        rest
    } else if let Some(rest) = value.strip_prefix("hex(") {
        rest.split_once("):").map_or("", |(_, bytes)| bytes)
    } else {
        value
    };
    bytes
        .split(',')
        .next()
        .map(str::trim)
        .and_then(|first| u8::from_str_radix(first, 16).ok())
        == Some(1)
}

/// Records the boot configuration checks for the ESP mounted at `esp_root`.
pub async fn check_boot_config(
    esp_root: &Path,
    reader: Option<&dyn HiveReader>,
    report: &mut CheckReport,
) {
    let Some(store) = resolve_case_insensitive(esp_root, BCD_PATH).filter(|p| p.is_file()) else {
        report.fail(format!("boot configuration store {BCD_PATH} missing"));
        return;
    };
    report.pass("boot configuration store present");

    let Some(reader) = reader else {
        report.warn("hive reader not available; serial console setting not checked");
        return;
    };

    let objects = match reader.objects(&store).await {
        Ok(objects) => objects,
        Err(e) => {
            report.fail(format!("could not list boot configuration objects: {e}"));
            return;
        }
    };

    let mut enabled_on = None;
    for object in &objects {
        if let Ok(Some(raw)) = reader.element(&store, object, EMS_ENABLED_ELEMENT).await {
            if ems_enabled(&raw) {
                enabled_on = Some(object.clone());
                break;
            }
        }
    }

    match enabled_on {
        Some(object) => report.pass(format!("serial console enabled on boot object {object}")),
        None => report.fail(format!(
            "no boot object among {} enables the serial console",
            objects.len()
        )),
    }
}

//! Typed views of remote platform responses.

use crate::errors::{ImagegateError, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of a disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiskState {
    /// Accepting bulk writes from an import.
    ImportingFromBulkWrites,
    /// Bulk writes stopped; waiting to be finalized.
    ImportReady,
    /// Not attached to anything; deletable.
    Detached,
    /// Attached to an instance.
    Attached,
    /// Any other state the platform reports.
    Unknown(String),
}

impl DiskState {
    /// Maps a raw state string onto the enum.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "importing_from_bulk_writes" => Self::ImportingFromBulkWrites,
            "import_ready" => Self::ImportReady,
            "detached" => Self::Detached,
            "attached" => Self::Attached,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Parses a disk view response.
    ///
    /// The state is either a string under `state`, or an object under
    /// `state` with its own nested `state` string.
    pub fn from_view(view: &Value) -> Result<Self> {
        let state = view
            .get("state")
            .ok_or_else(|| ImagegateError::parse("disk view has no 'state' field"))?;
        let raw = match state {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => obj
                .get("state")
                .and_then(Value::as_str)
                .ok_or_else(|| ImagegateError::parse("disk state object has no 'state' string"))?,
            other => {
                return Err(ImagegateError::parse(format!(
                    "unexpected disk state value: {other}"
                )))
            }
        };
        Ok(Self::from_raw(raw))
    }
}

impl fmt::Display for DiskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImportingFromBulkWrites => write!(f, "importing_from_bulk_writes"),
            Self::ImportReady => write!(f, "import_ready"),
            Self::Detached => write!(f, "detached"),
            Self::Attached => write!(f, "attached"),
            Self::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

/// Run state of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Being created.
    Creating,
    /// Booting.
    Starting,
    /// Running.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped.
    Stopped,
    /// Rebooting.
    Rebooting,
    /// Moving between hosts.
    Migrating,
    /// Being repaired.
    Repairing,
    /// Failed.
    Failed,
    /// Destroyed.
    Destroyed,
    /// Any other state the platform reports.
    Unknown(String),
}

impl InstanceState {
    /// Maps a raw `run_state` string onto the enum.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "creating" => Self::Creating,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "rebooting" => Self::Rebooting,
            "migrating" => Self::Migrating,
            "repairing" => Self::Repairing,
            "failed" => Self::Failed,
            "destroyed" => Self::Destroyed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Parses an instance view response.
    pub fn from_view(view: &Value) -> Result<Self> {
        view.get("run_state")
            .and_then(Value::as_str)
            .map(Self::from_raw)
            .ok_or_else(|| ImagegateError::parse("instance view has no 'run_state' string"))
    }

    /// The instance has stopped running and will not produce a boot marker.
    #[must_use]
    pub fn is_terminal_non_running(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Destroyed)
    }

    /// The background watcher stops once it sees one of these.
    #[must_use]
    pub fn ends_watch(&self) -> bool {
        matches!(self, Self::Running | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Rebooting => "rebooting",
            Self::Migrating => "migrating",
            Self::Repairing => "repairing",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
            Self::Unknown(raw) => raw,
        };
        write!(f, "{s}")
    }
}

/// Extracts the `name` of every object in a list response.
///
/// Accepts a bare array or an object carrying the array under `items`.
pub fn parse_names(list: &Value) -> Result<Vec<String>> {
    let items = match list {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ImagegateError::parse("list response has no 'items' array"))?,
        other => {
            return Err(ImagegateError::parse(format!(
                "unexpected list response: {other}"
            )))
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| item.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

/// Decodes the `data` field of a console-history response into text.
///
/// `data` is either an array of byte values or a string; strings are
/// base64-decoded when they decode cleanly and used verbatim otherwise.
pub fn decode_console(response: &Value) -> Result<String> {
    let data = response
        .get("data")
        .ok_or_else(|| ImagegateError::parse("console response has no 'data' field"))?;

    let bytes: Vec<u8> = match data {
        Value::Array(values) => values
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| ImagegateError::parse(format!("console byte out of range: {v}")))
            })
            .collect::<Result<_>>()?,
        Value::String(s) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .unwrap_or_else(|_| s.clone().into_bytes()),
        Value::Null => Vec::new(),
        other => {
            return Err(ImagegateError::parse(format!(
                "unexpected console data: {other}"
            )))
        }
    };

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

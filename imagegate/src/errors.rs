//! Error types for imagegate.
//!
//! Failures that abort an operation are `ImagegateError`s. Failures that only
//! describe the thing being checked (a missing file inside an image, a boot
//! that never reached its prompt) are not errors: they are recorded as
//! `Fail` check records or stage results and reported in aggregate.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ImagegateError>;

/// The main error type for imagegate operations.
#[derive(Debug, Error)]
pub enum ImagegateError {
    /// An external command ran and exited unsuccessfully.
    #[error("{0}")]
    Command(#[from] CommandError),

    /// An external command could not be started at all.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The remote platform CLI returned something we could not use.
    #[error("platform error: {0}")]
    Platform(String),

    /// Output from an external tool did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required tool, device or mount is unavailable.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImagegateError {
    /// Creates a platform error.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform(message.into())
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Returns true for errors that mean "the remote resource does not exist".
    ///
    /// Lookups that fail this way are a transient inconsistency for polling
    /// loops rather than a hard failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Command(err) => {
                let stderr = err.stderr.to_ascii_lowercase();
                stderr.contains("not found") || stderr.contains("objectnotfound")
            }
            Self::Platform(msg) => msg.to_ascii_lowercase().contains("not found"),
            _ => false,
        }
    }
}

/// An external command that exited with a non-zero status.
#[derive(Debug, Clone)]
pub struct CommandError {
    /// The program that was run.
    pub program: String,
    /// Its arguments.
    pub args: Vec<String>,
    /// The exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// The tail of the captured standard error.
    pub stderr: String,
}

impl CommandError {
    /// Creates a new command error.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            code,
            stderr: stderr.into(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self
            .code
            .map_or_else(|| "signal".to_string(), |c| format!("exit code {c}"));
        write!(
            f,
            "command '{} {}' failed with {}: {}",
            self.program,
            self.args.join(" "),
            status,
            self.stderr.trim()
        )
    }
}

impl std::error::Error for CommandError {}

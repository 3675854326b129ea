//! `tracing-subscriber` setup for the binary.

use crate::errors::{ImagegateError, Result};
use tracing_subscriber::EnvFilter;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Installs the global subscriber.
///
/// `filter` takes precedence over `RUST_LOG`; with neither set, `info` is
/// used. Logs go to stderr so stdout stays free for reports.
pub fn init_logging(filter: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| ImagegateError::config(format!("invalid log filter '{directives}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| ImagegateError::config(format!("could not install logger: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_filter_is_config_error() {
        let err = init_logging(Some("imagegate=notalevel"), LogFormat::Text).unwrap_err();
        assert!(matches!(err, ImagegateError::Config(_)));
    }
}

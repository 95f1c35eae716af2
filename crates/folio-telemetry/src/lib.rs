//! Tracing setup for folio.
//!
//! Library crates only emit `tracing` events; the embedding application calls
//! [`init`] once to install a subscriber. Output goes to stderr and, when a
//! log directory is configured, to a daily rolling file.
//!
//! # Filtering
//!
//! `RUST_LOG` wins over the configured filter:
//!
//! ```bash
//! RUST_LOG=folio_document=trace,folio_glyphs=debug,warn my-app
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when neither `RUST_LOG` nor config provide one.
pub const DEFAULT_FILTER: &str = "folio_document=info,folio_assets=info,folio_glyphs=info,warn";

/// Log file name prefix inside the log directory.
pub const LOG_FILE_PREFIX: &str = "folio.log";

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid filter directive: {0}")]
    Filter(String),
    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// `[telemetry]` section of the folio config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for rolling log files. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    /// Emit ANSI colour codes on stderr.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            log_dir: None,
            ansi: true,
        }
    }
}

/// Keeps the non-blocking file writer alive. Drop it at shutdown to flush.
#[must_use = "dropping the guard stops file logging"]
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
}

/// Build the filter: `RUST_LOG` first, then the configured directives.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| TelemetryError::Filter(e.to_string()))
}

/// Install the global subscriber.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = build_filter(config)?;

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .with(fmt::layer().with_writer(std::io::stderr).with_ansi(config.ansi))
                .try_init()
                .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;
            tracing::info!(log_dir = %dir.display(), "folio logging to file");
            Ok(TelemetryGuard { _file: Some(guard) })
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_ansi(config.ansi))
                .try_init()
                .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;
            Ok(TelemetryGuard { _file: None })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_as_filter() {
        let config = TelemetryConfig::default();
        assert!(EnvFilter::try_new(&config.filter).is_ok());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn bad_directive_is_rejected() {
        let err = EnvFilter::try_new("folio=notalevel").map_err(|e| TelemetryError::Filter(e.to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn second_init_reports_already_installed() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            log_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let first = init(&config);
        let second = init(&TelemetryConfig::default());
        // Another test binary may have installed one already; either way the
        // second call must not succeed.
        assert!(first.is_ok() || matches!(first, Err(TelemetryError::AlreadyInstalled(_))));
        assert!(matches!(second, Err(TelemetryError::AlreadyInstalled(_))));
    }
}

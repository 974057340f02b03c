//! Tracing setup for the improver binary.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics on stderr (and optionally a log
//!   file). Controlled by `RUST_LOG`, `[logging]` and `--verbose`.
//!
//! - **Engine memory (`io/snapshot_store`, `io/learning_log`)**: durable
//!   per-attempt artifacts. Always written, unaffected by log filters.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::io::config::{LogFormat, LoggingConfig};

/// Pick the filter: `--verbose` forces `debug`, then `RUST_LOG`, then the configured level.
fn build_filter(cfg: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    if verbose {
        return Ok(EnvFilter::new("debug"));
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&cfg.level).with_context(|| format!("invalid logging.level '{}'", cfg.level))
}

/// Install the global tracing subscriber.
///
/// Output goes to stderr in compact or JSON form; when `log_file` is set the
/// same events are appended there without ANSI colors.
pub fn init(cfg: &LoggingConfig, log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let filter = build_filter(cfg, verbose)?;

    let stderr_layer = match cfg.format {
        LogFormat::Plain => fmt::layer().with_writer(std::io::stderr).compact().boxed(),
        LogFormat::Json => fmt::layer().with_writer(std::io::stderr).json().boxed(),
    };

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            let layer = fmt::layer().with_writer(Mutex::new(file)).with_ansi(false);
            Some(match cfg.format {
                LogFormat::Plain => layer.boxed(),
                LogFormat::Json => layer.json().boxed(),
            })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_overrides_configured_level() {
        let cfg = LoggingConfig {
            level: "error".to_string(),
            ..LoggingConfig::default()
        };
        let filter = build_filter(&cfg, true).expect("filter");
        assert!(filter.to_string().contains("debug"));
    }

    #[test]
    fn rejects_unparseable_level() {
        let cfg = LoggingConfig {
            level: "improver=notalevel".to_string(),
            ..LoggingConfig::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(build_filter(&cfg, false).is_err());
        }
    }
}

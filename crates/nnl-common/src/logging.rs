//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Shared primitives and utilities for the lifecycle controller."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "NNL_LOG";

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Keeps the background log writers alive; dropping it flushes them.
#[must_use = "logs are lost unless the guard is held until exit"]
#[derive(Default)]
pub struct LogGuard {
    _writers: Vec<WorkerGuard>,
}

/// Console log encoding. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Where a filter directive was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    NnlLog,
    RustLog,
    Config,
}

/// Pick the filter directive: `NNL_LOG`, then `RUST_LOG`, then `logging.level`.
///
/// Blank variables count as unset so an exported-but-empty `NNL_LOG` does not
/// silence the controller.
pub fn filter_directive(
    nnl_log: Option<String>,
    rust_log: Option<String>,
    config: &LoggingConfig,
) -> (String, FilterSource) {
    let present = |value: Option<String>| value.filter(|raw| !raw.trim().is_empty());
    if let Some(directive) = present(nnl_log) {
        return (directive, FilterSource::NnlLog);
    }
    if let Some(directive) = present(rust_log) {
        return (directive, FilterSource::RustLog);
    }
    (config.level.clone(), FilterSource::Config)
}

/// Daily file path stem, `<directory>/<prefix>.log`.
pub fn log_file_stem(service_name: &str, config: &LoggingConfig) -> PathBuf {
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    config.directory.join(format!("{}.log", prefix))
}

/// Install the global subscriber for `nnlctl`.
///
/// Every event lands in a daily rolling JSON file under
/// [`LoggingConfig::directory`]. When `console` is on, events are mirrored to
/// stderr in the configured format; stdout is reserved for the action report.
/// A directive that fails to parse falls back to `info` with a warning.
/// Hold the returned guard for the life of the process.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<LogGuard> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;

    let stem = log_file_stem(service_name, config);
    let file_name = stem
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("log file prefix for {} is empty", service_name))?;

    let (directive, source) = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        config,
    );
    let (filter, rejected) = match EnvFilter::try_new(&directive) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new("info"), Some(err.to_string())),
    };

    let mut guards = Vec::with_capacity(2);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, &file_name));
    guards.push(file_guard);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    let console_layer = if config.console {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        guards.push(guard);
        let layer = match config.format {
            LogFormat::StructuredJson => fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(writer)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed(),
        };
        Some(layer)
    } else {
        None
    };

    // A second call keeps the first subscriber.
    if INSTALLED.set(()).is_err() {
        return Ok(LogGuard::default());
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .ok();

    if let Some(err) = rejected {
        warn!(directive = %directive, source = ?source, error = %err, "invalid log filter; using info");
    }
    info!(
        service = %service_name,
        log_file = %stem.display(),
        console = config.console,
        format = ?config.format,
        filter_source = ?source,
        "tracing initialised"
    );
    Ok(LogGuard { _writers: guards })
}

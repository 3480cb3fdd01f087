//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing subscriber setup for processes embedding the timing registry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override taking precedence over the configured filter.
pub const ENV_LOG_FILTER: &str = "TALLY_LOG";
const DEFAULT_FILTER: &str = "info";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Stdout event format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Pick the filter directive: `TALLY_LOG`, then `logging.filter`, then
/// `RUST_LOG`, then `info`. Blank values are skipped.
pub fn filter_directive<F>(config: &LoggingConfig, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |value: String| (!value.trim().is_empty()).then_some(value);
    lookup(ENV_LOG_FILTER)
        .and_then(non_blank)
        .or_else(|| config.filter.clone())
        .or_else(|| lookup(EnvFilter::DEFAULT_ENV).and_then(non_blank))
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

/// Install the global subscriber for `service_name`.
///
/// Stdout always receives events in `config.format`. When `config.directory`
/// is set, a daily rolling JSON file `<prefix>-<service>.log` is written there
/// as well. Only the first call installs a subscriber; later calls still create
/// the log directory and return `Ok`.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let directive = filter_directive(config, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter {directive:?} ({err}); using {DEFAULT_FILTER}");
        EnvFilter::new(DEFAULT_FILTER)
    });

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed(),
    };

    let file_layer = match &config.directory {
        Some(directory) => {
            fs::create_dir_all(directory).with_context(|| {
                format!("unable to create log directory {}", directory.display())
            })?;
            let prefix = config.file_prefix.as_deref().unwrap_or("tally");
            let appender = daily(directory, format!("{prefix}-{service_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .json()
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        info!(
            service = %service_name,
            filter = %directive,
            format = ?config.format,
            log_dir = ?config.directory,
            "tracing initialised"
        );
    }
    Ok(())
}

//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Process start-up: configuration, tracing and the timing registry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use tally_common::{init_tracing, AppConfig, LoadedAppConfig};
use tracing::info;

use crate::registry::StatsRegistry;

/// Validate `loaded`, install tracing for `service_name` and build the
/// registry. Registry events (publication, slow timings) go through the
/// subscriber installed here.
pub fn bootstrap(service_name: &str, loaded: &LoadedAppConfig) -> Result<StatsRegistry> {
    let config = &loaded.config;
    config
        .validate()
        .with_context(|| format!("invalid configuration from {}", loaded.source))?;
    init_tracing(service_name, &config.logging)?;

    let stats = &config.stats;
    info!(
        service = %service_name,
        config_source = %loaded.source,
        namespace = %stats.namespace,
        combined = ?stats.combine_dimensions,
        dropped = ?stats.drop_variables,
        slow_threshold_ms = ?stats.slow_timing_threshold.map(|t| t.as_millis()),
        "timing registry ready"
    );
    Ok(StatsRegistry::new(stats.clone()))
}

/// [`bootstrap`] with configuration resolved from the environment, see
/// [`AppConfig::resolve`].
pub fn bootstrap_from_env(service_name: &str, explicit: Option<&Path>) -> Result<StatsRegistry> {
    let loaded = AppConfig::resolve(explicit)?;
    bootstrap(service_name, &loaded)
}

//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration model for the timing registry and its host process."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Environment variable naming the configuration file.
pub const ENV_CONFIG_PATH: &str = "TALLY_CONFIG";
/// Comma-separated dimension names appended to `stats.combine_dimensions`.
pub const ENV_COMBINE_DIMENSIONS: &str = "TALLY_COMBINE_DIMENSIONS";
/// Comma-separated variable names appended to `stats.drop_variables`.
pub const ENV_DROP_VARIABLES: &str = "TALLY_DROP_VARIABLES";

fn default_namespace() -> String {
    "tally".to_owned()
}

/// Configuration for a process embedding the timing registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// File named by [`ENV_CONFIG_PATH`].
    Environment(PathBuf),
    /// File passed by the caller.
    Explicit(PathBuf),
    /// No file; built-in defaults.
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Environment(path) | ConfigSource::Explicit(path) => Some(path),
            ConfigSource::Defaults => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Environment(path) => write!(f, "{} ({})", path.display(), ENV_CONFIG_PATH),
            ConfigSource::Explicit(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults => f.write_str("built-in defaults"),
        }
    }
}

/// An [`AppConfig`] together with its [`ConfigSource`].
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: ConfigSource,
}

impl AppConfig {
    /// Resolve configuration from the process environment.
    ///
    /// `TALLY_CONFIG` wins over `explicit`; with neither, defaults are used.
    /// List overrides from [`ENV_COMBINE_DIMENSIONS`] and [`ENV_DROP_VARIABLES`]
    /// are applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<LoadedAppConfig> {
        Self::resolve_with(explicit, |key| std::env::var(key).ok())
    }

    /// [`AppConfig::resolve`] with an injected environment lookup.
    pub fn resolve_with<F>(explicit: Option<&Path>, lookup: F) -> Result<LoadedAppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_path = lookup(ENV_CONFIG_PATH)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let source = match (env_path, explicit) {
            (Some(path), _) => ConfigSource::Environment(path),
            (None, Some(path)) => ConfigSource::Explicit(path.to_path_buf()),
            (None, None) => ConfigSource::Defaults,
        };

        let mut config = match source.path() {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        config
            .validate()
            .with_context(|| format!("invalid configuration from {source}"))?;
        Ok(LoadedAppConfig { config, source })
    }

    /// Read and parse a TOML file. The result is not validated.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Append comma-separated list entries taken from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_COMBINE_DIMENSIONS) {
            extend_unique(&mut self.stats.combine_dimensions, &value);
        }
        if let Some(value) = lookup(ENV_DROP_VARIABLES) {
            extend_unique(&mut self.stats.drop_variables, &value);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.logging.validate()?;
        self.stats.validate()
    }
}

fn extend_unique(target: &mut Vec<String>, list: &str) {
    for item in list.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        if !target.iter().any(|existing| existing == item) {
            target.push(item.to_owned());
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Where and how tracing events are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive used when `TALLY_LOG` is unset, e.g. `tally_stats=debug`.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for a daily rolling JSON log. Stdout only when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(filter) = &self.filter {
            if filter.trim().is_empty() {
                bail!("logging.filter must not be blank; omit it to use the default");
            }
        }
        if let Some(prefix) = &self.file_prefix {
            if prefix.contains(['/', '\\']) {
                bail!("logging.file_prefix '{prefix}' must not contain path separators");
            }
        }
        Ok(())
    }
}

/// Knobs controlling category cardinality and publication of timing variables.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsConfig {
    /// Dimension names whose values collapse onto a single sentinel category.
    #[serde(default)]
    pub combine_dimensions: Vec<String>,
    /// Variable names that are built but never published.
    #[serde(default)]
    pub drop_variables: Vec<String>,
    /// Observations at or above this duration are logged by the slow timing hook.
    #[serde(default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub slow_timing_threshold: Option<Duration>,
    /// Prefix applied to exported prometheus metric names.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            combine_dimensions: Vec::new(),
            drop_variables: Vec::new(),
            slow_timing_threshold: None,
            namespace: default_namespace(),
        }
    }
}

impl StatsConfig {
    /// Returns true when a variable called `name` must not be published.
    pub fn is_variable_dropped(&self, name: &str) -> bool {
        self.drop_variables.iter().any(|d| d == name)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(blank) = self
            .combine_dimensions
            .iter()
            .chain(self.drop_variables.iter())
            .find(|name| name.trim().is_empty())
        {
            bail!("stats name lists must not contain blank entries (found {blank:?})");
        }
        if self.slow_timing_threshold == Some(Duration::ZERO) {
            bail!("stats.slow_timing_threshold must be positive; omit it to disable slow timing logs");
        }
        let valid_namespace = !self.namespace.is_empty()
            && self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !self.namespace.starts_with(|c: char| c.is_ascii_digit());
        if !valid_namespace {
            bail!(
                "stats namespace '{}' must contain only ASCII letters, digits or underscores and not start with a digit",
                self.namespace
            );
        }
        Ok(())
    }
}

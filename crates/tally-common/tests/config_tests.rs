//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration resolution and tracing tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::time::Duration;

use tally_common::config::{ENV_COMBINE_DIMENSIONS, ENV_CONFIG_PATH};
use tally_common::{init_tracing, AppConfig, ConfigSource, LogFormat, LoggingConfig};
use tempfile::tempdir;

const SAMPLE: &str = r#"
[logging]
format = "pretty"
filter = "tally_stats=debug"

[stats]
combine_dimensions = ["User", "Table"]
drop_variables = ["DebugTimings"]
slow_timing_threshold = 250
namespace = "vtgate"
"#;

#[test]
fn explicit_file_is_loaded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tally.toml");
    fs::write(&path, SAMPLE).unwrap();

    let loaded = AppConfig::resolve_with(Some(path.as_path()), |_| None).unwrap();
    assert_eq!(loaded.source, ConfigSource::Explicit(path));

    let stats = &loaded.config.stats;
    assert_eq!(stats.combine_dimensions, vec!["User", "Table"]);
    assert!(stats.is_variable_dropped("DebugTimings"));
    assert_eq!(stats.slow_timing_threshold, Some(Duration::from_millis(250)));
    assert_eq!(stats.namespace, "vtgate");
    assert_eq!(loaded.config.logging.format, LogFormat::Pretty);
    assert_eq!(loaded.config.logging.filter.as_deref(), Some("tally_stats=debug"));
}

#[test]
fn environment_path_wins_and_lists_merge() {
    let dir = tempdir().unwrap();
    let from_env = dir.path().join("env.toml");
    let explicit = dir.path().join("explicit.toml");
    fs::write(&from_env, SAMPLE).unwrap();
    fs::write(&explicit, "[stats]\nnamespace = \"other\"\n").unwrap();

    let env_value = from_env.display().to_string();
    let loaded = AppConfig::resolve_with(Some(explicit.as_path()), |key| match key {
        ENV_CONFIG_PATH => Some(env_value.clone()),
        ENV_COMBINE_DIMENSIONS => Some("Keyspace".to_owned()),
        _ => None,
    })
    .unwrap();

    assert_eq!(loaded.source, ConfigSource::Environment(from_env));
    assert_eq!(loaded.config.stats.namespace, "vtgate");
    assert_eq!(
        loaded.config.stats.combine_dimensions,
        vec!["User", "Table", "Keyspace"]
    );
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = AppConfig::resolve_with(Some(missing.as_path()), |_| None).unwrap_err();
    assert!(format!("{err:#}").contains("nope.toml"));
}

#[test]
fn invalid_file_is_rejected_with_source_context() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[stats]\nnamespace = \"has-dash\"\n").unwrap();
    let err = AppConfig::resolve_with(Some(path.as_path()), |_| None).unwrap_err();
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn tracing_writes_into_configured_directory() {
    let dir = tempdir().unwrap();
    let config = LoggingConfig {
        directory: Some(dir.path().join("logs")),
        format: LogFormat::Pretty,
        file_prefix: Some("test".into()),
        filter: Some("debug".into()),
    };
    init_tracing("tally-test", &config).unwrap();
    assert!(dir.path().join("logs").is_dir());
    // Second call keeps the first subscriber and still succeeds.
    init_tracing("tally-test", &config).unwrap();
}

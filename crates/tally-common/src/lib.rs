//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and logging primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for processes embedding the tally timing registry.
//! This crate exposes configuration loading and tracing initialisation.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigSource, LoadedAppConfig, LoggingConfig, StatsConfig};
pub use logging::{filter_directive, init_tracing, LogFormat};

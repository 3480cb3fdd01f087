//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error type for the timing registry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

/// Result alias used throughout the stats crate.
pub type Result<T> = std::result::Result<T, StatsError>;

/// Error type for publication and export of timing variables.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// A variable with the same name is already published.
    #[error("reuse of published variable name: {0}")]
    DuplicateName(String),
    /// The name cannot be turned into an exportable metric name.
    #[error("invalid variable name: {0:?}")]
    InvalidName(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

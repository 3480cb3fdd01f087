//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Timing histograms keyed by category, with publication and export."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Concurrent timing registry.
//!
//! [`Timings`] records elapsed times into one histogram per category and keeps
//! aggregate totals; [`MultiTimings`] builds compound categories out of several
//! dimensions. Both are usually created through a [`StatsRegistry`], which
//! publishes them by name for exporters such as [`export::TimingsCollector`].

pub mod bootstrap;
pub mod dimensions;
pub mod error;
pub mod export;
pub mod histogram;
pub mod hook;
pub mod multi_timings;
pub mod registry;
pub mod timings;

pub use bootstrap::{bootstrap, bootstrap_from_env};
pub use dimensions::{CombinePolicy, STATS_ALL};
pub use error::{Result, StatsError};
pub use export::{register_published, TimingsCollector};
pub use histogram::{BucketLayout, Histogram, TIMING_CUTOFFS};
pub use hook::{SharedTimerHook, SlowTimingLogger, TimerHook};
pub use multi_timings::MultiTimings;
pub use registry::{StatsRegistry, Variable};
pub use timings::{Timings, ALL_CATEGORIES};

pub use prometheus;

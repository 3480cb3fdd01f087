//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Named publication table consulted by exporters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tally_common::StatsConfig;
use tracing::{debug, info, warn};

use crate::dimensions::CombinePolicy;
use crate::hook::{SharedTimerHook, SlowTimingLogger, TimerHook};
use crate::multi_timings::MultiTimings;
use crate::timings::{encode_snapshot, Timings};
use crate::{Result, StatsError};

/// A published timing variable.
#[derive(Debug, Clone)]
pub enum Variable {
    Timings(Arc<Timings>),
    MultiTimings(Arc<MultiTimings>),
}

impl Variable {
    /// The underlying category map, compound for [`Variable::MultiTimings`].
    pub fn timings(&self) -> &Timings {
        match self {
            Variable::Timings(timings) => timings,
            Variable::MultiTimings(multi) => multi.timings(),
        }
    }

    /// Names of the parts of each category key.
    pub fn dimensions(&self) -> Vec<String> {
        match self {
            Variable::Timings(timings) => vec![timings.label().to_owned()],
            Variable::MultiTimings(multi) => multi.labels().to_vec(),
        }
    }

    pub fn help(&self) -> &str {
        self.timings().help()
    }

    pub fn to_json(&self) -> String {
        self.timings().to_json()
    }
}

impl Serialize for Variable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.timings().serialize(serializer)
    }
}

/// Process-wide table of named timing variables.
///
/// Build one at start-up, hand it to whatever constructs timings and to the
/// exporters, and [`StatsRegistry::clear`] it on shutdown.
pub struct StatsRegistry {
    config: StatsConfig,
    policy: CombinePolicy,
    hook: Option<SharedTimerHook>,
    variables: RwLock<BTreeMap<String, Variable>>,
}

impl StatsRegistry {
    /// Registry honouring `config`. A slow timing threshold installs a
    /// [`SlowTimingLogger`] as the timer hook.
    pub fn new(config: StatsConfig) -> Self {
        let hook = config
            .slow_timing_threshold
            .map(|threshold| Arc::new(SlowTimingLogger::new(threshold)) as SharedTimerHook);
        Self {
            policy: CombinePolicy::from_config(&config),
            config,
            hook,
            variables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replace the timer hook handed to timings built from now on.
    pub fn with_hook(mut self, hook: impl TimerHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn policy(&self) -> &CombinePolicy {
        &self.policy
    }

    /// Build a [`Timings`] and publish it under `name` unless the name is empty
    /// or dropped. `categories` are created up front.
    pub fn new_timings<S: AsRef<str>>(
        &self,
        name: &str,
        help: &str,
        label: &str,
        categories: &[S],
    ) -> Result<Arc<Timings>> {
        let timings = Timings::named(
            name,
            help,
            label,
            self.policy.is_combined(label),
            self.hook.clone(),
        )
        .with_categories(categories.iter().map(|c| c.as_ref().to_owned()));
        let timings = Arc::new(timings);
        self.register(name, Variable::Timings(Arc::clone(&timings)))?;
        Ok(timings)
    }

    /// Build a [`MultiTimings`] over `labels` and publish it under `name`
    /// unless the name is empty or dropped.
    pub fn new_multi_timings<S: AsRef<str>>(
        &self,
        name: &str,
        help: &str,
        labels: &[S],
    ) -> Result<Arc<MultiTimings>> {
        let multi = Arc::new(MultiTimings::named(
            name,
            help,
            labels,
            &self.policy,
            self.hook.clone(),
        ));
        self.register(name, Variable::MultiTimings(Arc::clone(&multi)))?;
        Ok(multi)
    }

    /// Publish `variable` under `name`.
    ///
    /// Empty and dropped names are silently skipped; reusing a published name fails.
    pub fn register(&self, name: &str, variable: Variable) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        if self.config.is_variable_dropped(name) {
            debug!(variable = name, "variable is on the drop list, not publishing");
            return Ok(());
        }

        let mut variables = self.variables.write();
        if variables.contains_key(name) {
            warn!(variable = name, "reuse of published variable name");
            return Err(StatsError::DuplicateName(name.to_owned()));
        }
        variables.insert(name.to_owned(), variable);
        info!(variable = name, "published timing variable");
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Variable> {
        self.variables.read().get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Variable> {
        self.variables.write().remove(name)
    }

    /// Published names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.variables.read().keys().cloned().collect()
    }

    /// Published variables in name order.
    pub fn variables(&self) -> Vec<(String, Variable)> {
        self.variables
            .read()
            .iter()
            .map(|(name, variable)| (name.clone(), variable.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.variables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.read().is_empty()
    }

    /// Unpublish everything. Instances still held by callers keep recording.
    pub fn clear(&self) {
        self.variables.write().clear();
    }

    /// JSON object mapping every published name to its snapshot.
    pub fn snapshot(&self) -> String {
        let variables = self.variables();
        let by_name: BTreeMap<&str, &Variable> = variables
            .iter()
            .map(|(name, variable)| (name.as_str(), variable))
            .collect();
        encode_snapshot(&by_name)
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new(StatsConfig::default())
    }
}

impl std::fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsRegistry")
            .field("variables", &self.names())
            .finish_non_exhaustive()
    }
}

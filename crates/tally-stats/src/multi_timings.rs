//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Timings keyed by compound categories built from several dimensions."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};

use crate::dimensions::{safe_join_labels, CombinePolicy};
use crate::histogram::Histogram;
use crate::hook::SharedTimerHook;
use crate::timings::Timings;

/// [`Timings`] whose categories are compound keys: one value per declared
/// dimension, joined with `.`.
///
/// Dimensions listed in the [`CombinePolicy`] at construction always
/// contribute the `all` sentinel instead of the supplied value.
pub struct MultiTimings {
    timings: Timings,
    labels: Vec<String>,
    combined_labels: Vec<bool>,
}

impl MultiTimings {
    /// Unpublished instance without a hook.
    pub fn new<S: AsRef<str>>(
        help: impl Into<String>,
        labels: &[S],
        policy: &CombinePolicy,
    ) -> Self {
        Self::named("", help, labels, policy, None)
    }

    pub(crate) fn named<S: AsRef<str>>(
        name: impl Into<String>,
        help: impl Into<String>,
        labels: &[S],
        policy: &CombinePolicy,
        hook: Option<SharedTimerHook>,
    ) -> Self {
        let labels: Vec<String> = labels.iter().map(|l| l.as_ref().to_owned()).collect();
        let combined_labels: Vec<bool> = labels.iter().map(|l| policy.is_combined(l)).collect();
        let label = safe_join_labels(labels.as_slice(), &combined_labels);
        Self {
            timings: Timings::named(name, help, label, false, hook),
            labels,
            combined_labels,
        }
    }

    /// Names of the dimensions making up each compound category.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn combined_labels(&self) -> &[bool] {
        &self.combined_labels
    }

    /// Record `elapsed` under the compound key built from `values`.
    ///
    /// # Panics
    ///
    /// Panics when `values.len()` differs from the number of dimensions.
    pub fn add<S: AsRef<str>>(&self, values: &[S], elapsed: Duration) {
        if values.len() != self.labels.len() {
            panic!(
                "MultiTimings: wrong number of values in add: got {}, expected {}",
                values.len(),
                self.labels.len()
            );
        }
        self.timings
            .add(&safe_join_labels(values, &self.combined_labels), elapsed);
    }

    /// Record the time elapsed since `start` under the compound key built from `values`.
    ///
    /// # Panics
    ///
    /// Panics when `values.len()` differs from the number of dimensions.
    pub fn record<S: AsRef<str>>(&self, values: &[S], start: Instant) {
        if values.len() != self.labels.len() {
            panic!(
                "MultiTimings: wrong number of values in record: got {}, expected {}",
                values.len(),
                self.labels.len()
            );
        }
        self.timings
            .record(&safe_join_labels(values, &self.combined_labels), start);
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn histograms(&self) -> HashMap<String, Arc<Histogram>> {
        self.timings.histograms()
    }

    pub fn counts(&self) -> HashMap<String, i64> {
        self.timings.counts()
    }

    pub fn count(&self) -> i64 {
        self.timings.count()
    }

    pub fn time(&self) -> i64 {
        self.timings.time()
    }

    pub fn cutoffs(&self) -> &[i64] {
        self.timings.cutoffs()
    }

    /// See [`Timings::reset`]; aggregates survive.
    pub fn reset(&self) {
        self.timings.reset();
    }

    pub fn to_json(&self) -> String {
        self.timings.to_json()
    }
}

impl Serialize for MultiTimings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.timings.serialize(serializer)
    }
}

impl fmt::Display for MultiTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.timings, f)
    }
}

impl fmt::Debug for MultiTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiTimings")
            .field("name", &self.timings.name())
            .field("labels", &self.labels)
            .field("combined_labels", &self.combined_labels)
            .finish_non_exhaustive()
    }
}

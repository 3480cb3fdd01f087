//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Category-keyed timing histograms with atomic aggregates."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::{debug, error};

use crate::dimensions::STATS_ALL;
use crate::histogram::{saturating_add, timing_layout, BucketLayout, Histogram};
use crate::hook::SharedTimerHook;

/// Key of the synthetic entry in [`Timings::counts`] holding the grand total.
pub const ALL_CATEGORIES: &str = "All";

/// Tracks elapsed times by category, one histogram per category.
///
/// Histograms are created on first use of a category and live until
/// [`Timings::reset`]. Aggregate count and time are kept outside the map lock.
pub struct Timings {
    total_count: AtomicI64,
    total_time: AtomicI64,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
    layout: Arc<BucketLayout>,
    name: String,
    help: String,
    label: String,
    label_combined: bool,
    hook: Option<SharedTimerHook>,
}

impl Timings {
    /// Unpublished instance without a hook.
    pub fn new(help: impl Into<String>, label: impl Into<String>) -> Self {
        Self::named("", help, label, false, None)
    }

    pub(crate) fn named(
        name: impl Into<String>,
        help: impl Into<String>,
        label: impl Into<String>,
        label_combined: bool,
        hook: Option<SharedTimerHook>,
    ) -> Self {
        Self {
            total_count: AtomicI64::new(0),
            total_time: AtomicI64::new(0),
            histograms: RwLock::new(HashMap::new()),
            layout: timing_layout(),
            name: name.into(),
            help: help.into(),
            label: label.into(),
            label_combined,
            hook,
        }
    }

    /// Collapse every category onto the shared sentinel.
    pub fn with_combined(mut self, combined: bool) -> Self {
        self.label_combined = combined;
        self
    }

    /// Pre-create empty histograms so the categories show up before first use.
    pub fn with_categories<I, S>(self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut histograms = self.histograms.write();
            for category in categories {
                histograms
                    .entry(category.into())
                    .or_insert_with(|| Arc::new(Histogram::new(Arc::clone(&self.layout))));
            }
        }
        self
    }

    /// Drop every histogram. Intended for tests.
    ///
    /// The aggregate count and time are left untouched.
    pub fn reset(&self) {
        *self.histograms.write() = HashMap::new();
    }

    /// Record `elapsed` under `category`.
    pub fn add(&self, category: &str, elapsed: Duration) {
        let category = if self.label_combined {
            STATS_ALL
        } else {
            category
        };
        let histogram = self.histogram(category);

        let elapsed_ns = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
        histogram.add(elapsed_ns);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        saturating_add(&self.total_time, elapsed_ns);

        if let Some(hook) = &self.hook {
            if !self.name.is_empty() {
                let elapsed_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
                hook.record_timing(&self.name, category, elapsed_ms, self);
            }
        }
    }

    /// Record the time elapsed since `start` under `category`.
    pub fn record(&self, category: &str, start: Instant) {
        self.add(category, start.elapsed());
    }

    fn histogram(&self, category: &str) -> Arc<Histogram> {
        if let Some(histogram) = self.histograms.read().get(category) {
            return Arc::clone(histogram);
        }

        let mut histograms = self.histograms.write();
        let histogram = histograms.entry(category.to_owned()).or_insert_with(|| {
            debug!(variable = %self.name, category, "creating timing histogram");
            Arc::new(Histogram::new(Arc::clone(&self.layout)))
        });
        Arc::clone(histogram)
    }

    /// Copy of the category map. The histograms themselves are shared.
    pub fn histograms(&self) -> HashMap<String, Arc<Histogram>> {
        self.histograms.read().clone()
    }

    /// Count per category plus an [`ALL_CATEGORIES`] entry with the total.
    pub fn counts(&self) -> HashMap<String, i64> {
        let histograms = self.histograms.read();
        let mut counts = HashMap::with_capacity(histograms.len() + 1);
        for (category, histogram) in histograms.iter() {
            counts.insert(category.clone(), histogram.count());
        }
        counts.insert(ALL_CATEGORIES.to_owned(), self.count());
        counts
    }

    /// Total number of observations across all categories.
    pub fn count(&self) -> i64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Total elapsed time across all categories, in nanoseconds.
    pub fn time(&self) -> i64 {
        self.total_time.load(Ordering::Relaxed)
    }

    pub fn cutoffs(&self) -> &[i64] {
        self.layout.cutoffs()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_combined(&self) -> bool {
        self.label_combined
    }

    /// JSON snapshot: `{"TotalCount":…,"TotalTime":…,"Histograms":{…}}`.
    pub fn to_json(&self) -> String {
        encode_snapshot(self)
    }
}

/// Aggregates and histograms are read separately, so a snapshot taken while
/// recording may be off by in-flight observations.
impl Serialize for Timings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let histograms = self.histograms.read();
        let sorted: BTreeMap<&str, &Histogram> = histograms
            .iter()
            .map(|(category, histogram)| (category.as_str(), histogram.as_ref()))
            .collect();

        let mut state = serializer.serialize_struct("Timings", 3)?;
        state.serialize_field("TotalCount", &self.count())?;
        state.serialize_field("TotalTime", &self.time())?;
        state.serialize_field("Histograms", &sorted)?;
        state.end()
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl fmt::Debug for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timings")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("combined", &self.label_combined)
            .finish_non_exhaustive()
    }
}

/// Encodes `value` as JSON, degrading to the encoded error message so that
/// export endpoints keep answering.
pub(crate) fn encode_snapshot<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(err) => {
            error!(error = %err, "failed to encode stats snapshot");
            let message = err.to_string();
            serde_json::to_string(&message).unwrap_or_else(|_| format!("{:?}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::hook::TimerHook;

    #[test]
    fn counts_include_all_entry() {
        let timings = Timings::new("help", "op");
        timings.add("read", Duration::from_millis(2));
        timings.add("read", Duration::from_millis(2));
        timings.add("write", Duration::from_millis(1));

        let counts = timings.counts();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["read"], 2);
        assert_eq!(counts["write"], 1);
        assert_eq!(counts[ALL_CATEGORIES], 3);
        assert_eq!(timings.count(), 3);
        assert_eq!(timings.time(), 5_000_000);
    }

    #[test]
    fn combined_collapses_categories() {
        let timings = Timings::new("help", "User").with_combined(true);
        for user in ["alice", "bob", "carol"] {
            timings.add(user, Duration::from_micros(10));
        }
        let counts = timings.counts();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[STATS_ALL], 3);
        assert_eq!(counts[ALL_CATEGORIES], 3);
    }

    #[test]
    fn predeclared_categories_start_empty() {
        let timings = Timings::new("help", "op").with_categories(["read", "write"]);
        let counts = timings.counts();
        assert_eq!(counts["read"], 0);
        assert_eq!(counts["write"], 0);
        assert_eq!(counts[ALL_CATEGORIES], 0);
    }

    #[test]
    fn reset_keeps_aggregates() {
        let timings = Timings::new("help", "op");
        timings.add("read", Duration::from_millis(3));
        timings.add("write", Duration::from_millis(4));
        let (count, time) = (timings.count(), timings.time());

        timings.reset();
        assert!(timings.histograms().is_empty());
        assert_eq!(timings.count(), count);
        assert_eq!(timings.time(), time);
    }

    #[test]
    fn histograms_returns_detached_map() {
        let timings = Timings::new("help", "op");
        timings.add("read", Duration::from_millis(1));

        let mut copy = timings.histograms();
        copy.clear();
        assert_eq!(timings.histograms().len(), 1);
    }

    #[test]
    fn record_uses_elapsed_since_start() {
        let timings = Timings::new("help", "op");
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(20));
        timings.record("read", start);
        assert_eq!(timings.count(), 1);
        assert!(timings.time() >= 20_000_000);
    }

    #[test]
    fn snapshot_has_expected_shape() {
        let timings = Timings::new("help", "op");
        timings.add("read", Duration::from_nanos(500_000));

        let json: serde_json::Value = serde_json::from_str(&timings.to_json()).unwrap();
        assert_eq!(json["TotalCount"], 1);
        assert_eq!(json["TotalTime"], 500_000);
        assert_eq!(json["Histograms"]["read"]["500000"], 1);
        assert_eq!(json["Histograms"]["read"]["inf"], 1);
        assert_eq!(json["Histograms"]["read"]["Count"], 1);
        assert_eq!(json["Histograms"]["read"]["Time"], 500_000);
        assert_eq!(timings.to_string(), timings.to_json());
    }

    #[test]
    fn new_builds_unnamed_instance() {
        let timings = Timings::new("read latency", "Table");
        assert_eq!(timings.name(), "");
        assert_eq!(timings.help(), "read latency");
        assert_eq!(timings.label(), "Table");
        assert!(!timings.is_combined());
    }

    #[test]
    fn total_time_saturates() {
        let timings = Timings::new("help", "op");
        timings.add("slow", Duration::MAX);
        timings.add("slow", Duration::from_secs(1));
        assert_eq!(timings.time(), i64::MAX);
        assert_eq!(timings.count(), 2);
    }

    #[test]
    fn snapshot_falls_back_to_error_message() {
        struct Unencodable;
        impl Serialize for Unencodable {
            fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("boom"))
            }
        }
        assert_eq!(encode_snapshot(&Unencodable), "\"boom\"");
    }

    #[test]
    fn hook_sees_resolved_category_in_millis() {
        let seen: Arc<Mutex<Vec<(String, String, i64)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let hook = move |name: &str, category: &str, elapsed_ms: i64, _: &Timings| {
            sink.lock()
                .unwrap()
                .push((name.to_owned(), category.to_owned(), elapsed_ms));
        };
        let hook: SharedTimerHook = Arc::new(hook);

        let timings = Timings::named("UserTimings", "help", "User", true, Some(hook));
        timings.add("alice", Duration::from_micros(2_500));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![("UserTimings".to_owned(), STATS_ALL.to_owned(), 2)]
        );
    }

    #[test]
    fn unnamed_timings_skip_hook() {
        struct Panicking;
        impl TimerHook for Panicking {
            fn record_timing(&self, _: &str, _: &str, _: i64, _: &Timings) {
                panic!("hook must not run for unnamed timings");
            }
        }
        let timings = Timings::named("", "help", "op", false, Some(Arc::new(Panicking)));
        timings.add("read", Duration::from_millis(1));
        assert_eq!(timings.count(), 1);
    }
}

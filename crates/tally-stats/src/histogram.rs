//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fixed-bucket atomic histograms over a shared cutoff list."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Upper bounds, in nanoseconds, of the buckets used by every timing histogram.
pub const TIMING_CUTOFFS: [i64; 10] = [
    500_000,
    1_000_000,
    5_000_000,
    10_000_000,
    50_000_000,
    100_000_000,
    500_000_000,
    1_000_000_000,
    5_000_000_000,
    10_000_000_000,
];

/// Label of the overflow bucket.
pub const OVERFLOW_LABEL: &str = "inf";

const COUNT_LABEL: &str = "Count";
const TOTAL_LABEL: &str = "Time";

static TIMING_LAYOUT: Lazy<Arc<BucketLayout>> =
    Lazy::new(|| Arc::new(BucketLayout::new(TIMING_CUTOFFS.to_vec())));

/// Returns the process-wide layout shared by timing histograms.
pub fn timing_layout() -> Arc<BucketLayout> {
    Arc::clone(&TIMING_LAYOUT)
}

/// Immutable bucket boundaries plus one display label per bucket.
///
/// The label list is one longer than the cutoff list; the last label names the
/// overflow bucket and has no upper bound.
#[derive(Debug, PartialEq, Eq)]
pub struct BucketLayout {
    cutoffs: Vec<i64>,
    labels: Vec<String>,
}

impl BucketLayout {
    /// Build a layout from ascending cutoffs, labelling each bucket by its bound.
    pub fn new(cutoffs: Vec<i64>) -> Self {
        debug_assert!(cutoffs.windows(2).all(|w| w[0] < w[1]));
        let labels = cutoffs
            .iter()
            .map(|cutoff| cutoff.to_string())
            .chain(std::iter::once(OVERFLOW_LABEL.to_owned()))
            .collect();
        Self { cutoffs, labels }
    }

    pub fn cutoffs(&self) -> &[i64] {
        &self.cutoffs
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Index of the bucket receiving `value`: the first cutoff not below it,
    /// else the overflow bucket.
    pub fn bucket_index(&self, value: i64) -> usize {
        self.cutoffs.partition_point(|&cutoff| cutoff < value)
    }
}

/// Adds `value` to `counter`, pinning at the `i64` bounds instead of wrapping.
pub(crate) fn saturating_add(counter: &AtomicI64, value: i64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_add(value))
    });
}

/// Lock-free histogram counting observations per bucket.
#[derive(Debug)]
pub struct Histogram {
    layout: Arc<BucketLayout>,
    buckets: Box<[AtomicI64]>,
    total: AtomicI64,
}

impl Histogram {
    pub fn new(layout: Arc<BucketLayout>) -> Self {
        let buckets = (0..layout.labels.len())
            .map(|_| AtomicI64::new(0))
            .collect();
        Self {
            layout,
            buckets,
            total: AtomicI64::new(0),
        }
    }

    /// Histogram over the shared timing layout.
    pub fn for_timings() -> Self {
        Self::new(timing_layout())
    }

    /// Record one observation.
    pub fn add(&self, value: i64) {
        let index = self.layout.bucket_index(value);
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        saturating_add(&self.total, value);
    }

    /// Total number of observations.
    pub fn count(&self) -> i64 {
        self.buckets
            .iter()
            .map(|bucket| bucket.load(Ordering::Relaxed))
            .sum()
    }

    /// Sum of all observed values.
    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Per-bucket (non-cumulative) counts, overflow bucket last.
    pub fn buckets(&self) -> Vec<i64> {
        self.buckets
            .iter()
            .map(|bucket| bucket.load(Ordering::Relaxed))
            .collect()
    }

    pub fn cutoffs(&self) -> &[i64] {
        self.layout.cutoffs()
    }

    pub fn labels(&self) -> &[String] {
        self.layout.labels()
    }
}

/// Serializes as `{"<label>": cumulative, ..., "Count": n, "Time": sum}`.
impl Serialize for Histogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.buckets.len() + 2))?;
        let mut running = 0i64;
        for (label, bucket) in self.layout.labels.iter().zip(self.buckets.iter()) {
            running += bucket.load(Ordering::Relaxed);
            map.serialize_entry(label, &running)?;
        }
        map.serialize_entry(COUNT_LABEL, &running)?;
        map.serialize_entry(TOTAL_LABEL, &self.total())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_labels_end_with_overflow() {
        let layout = timing_layout();
        assert_eq!(layout.labels().len(), TIMING_CUTOFFS.len() + 1);
        assert_eq!(layout.labels()[0], "500000");
        assert_eq!(layout.labels()[9], "10000000000");
        assert_eq!(layout.labels()[10], OVERFLOW_LABEL);
    }

    #[test]
    fn layout_is_shared() {
        assert!(Arc::ptr_eq(&timing_layout(), &timing_layout()));
    }

    #[test]
    fn cutoff_is_inclusive_upper_bound() {
        let hist = Histogram::for_timings();
        hist.add(500_000);
        hist.add(500_001);
        hist.add(0);
        hist.add(10_000_000_000);
        hist.add(10_000_000_001);

        let buckets = hist.buckets();
        assert_eq!(buckets[0], 2);
        assert_eq!(buckets[1], 1);
        assert_eq!(buckets[9], 1);
        assert_eq!(buckets[10], 1);
        assert_eq!(hist.count(), 5);
        assert_eq!(
            hist.total(),
            500_000 + 500_001 + 10_000_000_000 + 10_000_000_001
        );
    }

    #[test]
    fn total_saturates_instead_of_wrapping() {
        let hist = Histogram::for_timings();
        hist.add(i64::MAX);
        hist.add(i64::MAX);
        assert_eq!(hist.total(), i64::MAX);
        assert_eq!(hist.count(), 2);
    }

    #[test]
    fn serializes_cumulative_counts() {
        let hist = Histogram::new(Arc::new(BucketLayout::new(vec![10, 20])));
        hist.add(5);
        hist.add(15);
        hist.add(100);

        let json = serde_json::to_value(&hist).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"10": 1, "20": 2, "inf": 3, "Count": 3, "Time": 120})
        );
    }
}

//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus collection of published timing variables."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::{
    Bucket, Histogram as HistogramProto, LabelPair, Metric, MetricFamily, MetricType,
};
use prometheus::Registry;
use tracing::{debug, warn};

use crate::dimensions::split_compound_key;
use crate::histogram::{timing_layout, Histogram};
use crate::registry::{StatsRegistry, Variable};
use crate::{Result, StatsError};

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;
const BUCKET_LABEL: &str = "le";
const DEFAULT_DIMENSION: &str = "category";
const UNIT_SUFFIX: &str = "seconds";

/// Shared registry type used by exporters.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Convert `CamelCase` or dotted names into `snake_case` metric names.
pub fn normalize_metric_name(name: &str) -> Result<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut normalized = String::with_capacity(name.len() + 4);
    for (idx, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            normalized.push('_');
            continue;
        }
        if c.is_ascii_uppercase() && idx > 0 {
            let prev = chars[idx - 1];
            let next_is_lower = chars.get(idx + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                normalized.push('_');
            }
        }
        normalized.push(c.to_ascii_lowercase());
    }
    if normalized.is_empty() || normalized.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(StatsError::InvalidName(name.to_owned()));
    }
    Ok(normalized)
}

/// Exposes one published variable as a prometheus histogram family, one
/// series per category, labelled by the variable's dimensions.
///
/// Series are rebuilt from the live histograms on every scrape, so categories
/// dropped by a reset disappear from the output.
#[derive(Clone)]
pub struct TimingsCollector {
    name: String,
    variable: Variable,
    desc: Desc,
    arity: usize,
    /// Label name and position of its value in the category key, sorted by name.
    labels: Vec<(String, usize)>,
    upper_bounds: Vec<f64>,
}

impl TimingsCollector {
    /// Fails when a dimension normalises to `le` or two dimensions normalise
    /// to the same label name.
    pub fn new(namespace: &str, name: &str, variable: Variable) -> Result<Self> {
        let base = normalize_metric_name(name)?;
        let fq_name = if namespace.is_empty() {
            format!("{}_{}", base, UNIT_SUFFIX)
        } else {
            format!("{}_{}_{}", namespace, base, UNIT_SUFFIX)
        };
        let help = if variable.help().is_empty() {
            format!("Timings for {}", name)
        } else {
            variable.help().to_owned()
        };

        let mut dimensions = Vec::new();
        for dimension in variable.dimensions() {
            let label = if dimension.is_empty() {
                DEFAULT_DIMENSION.to_owned()
            } else {
                normalize_metric_name(&dimension)?
            };
            if label == BUCKET_LABEL {
                return Err(StatsError::InvalidName(dimension));
            }
            dimensions.push(label);
        }
        let desc = Desc::new(fq_name, help, dimensions.clone(), HashMap::new())?;

        let arity = dimensions.len();
        let mut labels: Vec<(String, usize)> = dimensions.into_iter().zip(0..arity).collect();
        labels.sort();

        let upper_bounds = timing_layout()
            .cutoffs()
            .iter()
            .map(|&cutoff| cutoff as f64 / NANOS_PER_SECOND)
            .collect();

        Ok(Self {
            name: name.to_owned(),
            variable,
            desc,
            arity,
            labels,
            upper_bounds,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn label_values<'a>(&self, category: &'a str) -> Option<Vec<&'a str>> {
        match &self.variable {
            Variable::Timings(_) => Some(vec![category]),
            Variable::MultiTimings(_) => split_compound_key(category, self.arity),
        }
    }

    fn histogram_proto(&self, histogram: &Histogram) -> HistogramProto {
        let counts = histogram.buckets();
        let mut proto = HistogramProto::default();
        let mut cumulative = 0u64;
        // The overflow bucket is implicit (+Inf == sample_count).
        for (&upper_bound, &count) in self.upper_bounds.iter().zip(counts.iter()) {
            cumulative += count as u64;
            let mut bucket = Bucket::default();
            bucket.set_cumulative_count(cumulative);
            bucket.set_upper_bound(upper_bound);
            proto.mut_bucket().push(bucket);
        }
        proto.set_sample_count(counts.iter().sum::<i64>() as u64);
        proto.set_sample_sum(histogram.total() as f64 / NANOS_PER_SECOND);
        proto
    }
}

impl Collector for TimingsCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::HISTOGRAM);

        let mut histograms: Vec<_> = self.variable.timings().histograms().into_iter().collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));

        for (category, histogram) in histograms {
            let Some(values) = self.label_values(&category) else {
                warn!(variable = %self.name, category = %category, "category does not split into the declared dimensions");
                continue;
            };
            let mut metric = Metric::default();
            for (label, position) in &self.labels {
                let mut pair = LabelPair::default();
                pair.set_name(label.clone());
                pair.set_value(values[*position].to_owned());
                metric.mut_label().push(pair);
            }
            metric.set_histogram(self.histogram_proto(&histogram));
            family.mut_metric().push(metric);
        }

        vec![family]
    }
}

impl std::fmt::Debug for TimingsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingsCollector")
            .field("name", &self.name)
            .field("fq_name", &self.desc.fq_name)
            .finish_non_exhaustive()
    }
}

/// Register a collector for every variable currently published in `stats`.
///
/// Either every collector is registered or none is: collectors are built
/// before touching `registry`, and a registration failure unregisters the
/// ones added by this call. Returns the number of collectors registered.
pub fn register_published(stats: &StatsRegistry, registry: &Registry) -> Result<usize> {
    let namespace = stats.config().namespace.as_str();
    let collectors = stats
        .variables()
        .into_iter()
        .map(|(name, variable)| TimingsCollector::new(namespace, &name, variable))
        .collect::<Result<Vec<_>>>()?;

    let mut registered: Vec<TimingsCollector> = Vec::with_capacity(collectors.len());
    for collector in collectors {
        if let Err(err) = registry.register(Box::new(collector.clone())) {
            warn!(variable = %collector.name(), error = %err, "rolling back timings collectors");
            for done in registered {
                let _ = registry.unregister(Box::new(done));
            }
            return Err(err.into());
        }
        debug!(variable = %collector.name(), "registered timings collector");
        registered.push(collector);
    }
    Ok(registered.len())
}

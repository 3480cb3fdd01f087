//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dimension combining and compound category keys."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::borrow::Cow;
use std::collections::HashSet;

use tally_common::StatsConfig;

/// Sentinel replacing the value of every combined dimension.
pub const STATS_ALL: &str = "all";

/// Separator between dimension values inside a compound key.
pub const KEY_SEPARATOR: char = '.';

const SEPARATOR_SUBSTITUTE: &str = "_";

/// Set of dimension names whose values are collapsed to [`STATS_ALL`].
#[derive(Debug, Clone, Default)]
pub struct CombinePolicy {
    combined: HashSet<String>,
}

impl CombinePolicy {
    pub fn new<I, S>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            combined: dimensions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        Self::new(config.combine_dimensions.iter().cloned())
    }

    pub fn is_combined(&self, dimension: &str) -> bool {
        self.combined.contains(dimension)
    }
}

/// Makes a single value safe to embed in a compound key.
pub fn safe_label(value: &str) -> Cow<'_, str> {
    if value.contains(KEY_SEPARATOR) {
        Cow::Owned(value.replace(KEY_SEPARATOR, SEPARATOR_SUBSTITUTE))
    } else {
        Cow::Borrowed(value)
    }
}

/// Joins `values` in order, substituting [`STATS_ALL`] wherever the parallel
/// `combined` flag is set.
pub fn safe_join_labels<S: AsRef<str>>(values: &[S], combined: &[bool]) -> String {
    let mut key = String::new();
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            key.push(KEY_SEPARATOR);
        }
        if combined.get(idx).copied().unwrap_or(false) {
            key.push_str(STATS_ALL);
        } else {
            key.push_str(&safe_label(value.as_ref()));
        }
    }
    key
}

/// Splits a compound key back into exactly `arity` values.
///
/// A key with no dimensions is the empty string.
pub fn split_compound_key(key: &str, arity: usize) -> Option<Vec<&str>> {
    if arity == 0 {
        return key.is_empty().then(Vec::new);
    }
    let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    (parts.len() == arity).then_some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_in_declared_order() {
        assert_eq!(safe_join_labels(&["ks", "select"], &[false, false]), "ks.select");
        assert_ne!(
            safe_join_labels(&["ks", "select"], &[false, false]),
            safe_join_labels(&["select", "ks"], &[false, false])
        );
    }

    #[test]
    fn combined_values_become_sentinel() {
        assert_eq!(safe_join_labels(&["ks", "alice"], &[false, true]), "ks.all");
        assert_eq!(safe_join_labels(&["ks", "bob"], &[false, true]), "ks.all");
    }

    #[test]
    fn separator_inside_value_is_replaced() {
        assert_eq!(safe_join_labels(&["a.b", "c"], &[]), "a_b.c");
        assert_ne!(
            safe_join_labels(&["a.b", "c"], &[]),
            safe_join_labels(&["a", "b.c"], &[])
        );
        assert!(matches!(safe_label("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn split_checks_arity() {
        assert_eq!(split_compound_key("ks.all", 2), Some(vec!["ks", "all"]));
        assert_eq!(split_compound_key("ks.all", 3), None);
        assert_eq!(split_compound_key("", 1), Some(vec![""]));
    }

    #[test]
    fn empty_tuple_round_trips() {
        let none: [&str; 0] = [];
        let key = safe_join_labels(&none, &[]);
        assert_eq!(key, "");
        assert_eq!(split_compound_key(&key, 0), Some(Vec::new()));
        assert_eq!(split_compound_key("x", 0), None);
    }

    #[test]
    fn policy_from_config() {
        let config = StatsConfig {
            combine_dimensions: vec!["User".into()],
            ..StatsConfig::default()
        };
        let policy = CombinePolicy::from_config(&config);
        assert!(policy.is_combined("User"));
        assert!(!policy.is_combined("Keyspace"));
    }
}

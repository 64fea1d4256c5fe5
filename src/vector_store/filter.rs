//! Metadata filter grammar: a flat map of `{field: value | [value, ...]}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Bool(bool),
    Number(f64),
    List(Vec<String>),
}

impl FilterValue {
    fn as_text(&self) -> Option<&str> {
        match self {
            FilterValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub type MetadataFilter = HashMap<String, FilterValue>;

/// Semantics: list-valued expected values against list-valued metadata mean
/// "non-empty intersection"; scalar-to-scalar is equality; a scalar expected
/// value against a list-valued field means "contained in the list" and vice
/// versa. An unknown key (absent from `metadata`) never matches.
pub fn matches(metadata: &MetadataFilter, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(key, expected)| match metadata.get(key) {
        None => false,
        Some(actual) => matches_value(expected, actual),
    })
}

fn matches_value(expected: &FilterValue, actual: &FilterValue) -> bool {
    match (expected, actual) {
        (FilterValue::List(expected_list), FilterValue::List(actual_list)) => {
            expected_list.iter().any(|v| actual_list.contains(v))
        }
        (FilterValue::List(expected_list), _) => actual
            .as_text()
            .map(|v| expected_list.iter().any(|e| e == v))
            .unwrap_or(false),
        (_, FilterValue::List(actual_list)) => expected
            .as_text()
            .map(|v| actual_list.iter().any(|a| a == v))
            .unwrap_or(false),
        _ => expected == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FilterValue {
        FilterValue::Text(s.to_string())
    }

    fn list(items: &[&str]) -> FilterValue {
        FilterValue::List(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn scalar_to_scalar_requires_equality() {
        let metadata = MetadataFilter::from([("language".to_string(), text("en"))]);
        let filter_match = MetadataFilter::from([("language".to_string(), text("en"))]);
        let filter_miss = MetadataFilter::from([("language".to_string(), text("fr"))]);
        assert!(matches(&metadata, &filter_match));
        assert!(!matches(&metadata, &filter_miss));
    }

    #[test]
    fn list_valued_expected_needs_non_empty_intersection() {
        let metadata = MetadataFilter::from([("tags".to_string(), list(&["rust", "async"]))]);
        let overlapping = MetadataFilter::from([("tags".to_string(), list(&["async", "web"]))]);
        let disjoint = MetadataFilter::from([("tags".to_string(), list(&["python"]))]);
        assert!(matches(&metadata, &overlapping));
        assert!(!matches(&metadata, &disjoint));
    }

    #[test]
    fn unknown_key_never_matches() {
        let metadata = MetadataFilter::from([("language".to_string(), text("en"))]);
        let filter = MetadataFilter::from([("missing".to_string(), text("x"))]);
        assert!(!matches(&metadata, &filter));
    }
}

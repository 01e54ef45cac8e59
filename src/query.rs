//! Filter-to-query translation.
//!
//! Screens keep a flat `FilterState` (whatever the filter bar currently holds)
//! and the report service wants a sparse query: only the keys that actually
//! narrow the result. Unset, blank and null values are dropped instead of being
//! forwarded as `""`/`false`, so "show all" filters stay truly unset.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub type FilterState = Map<String, Value>;
pub type Query = Map<String, Value>;

/// Sentinel accepted by show-all keys as an explicit "no restriction".
pub const SHOW_ALL_SENTINEL: &str = "ALL";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translator {
    show_all_keys: BTreeSet<String>,
}

impl Translator {
    pub fn new<I, S>(show_all_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            show_all_keys: show_all_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn show_all_keys(&self) -> impl Iterator<Item = &str> {
        self.show_all_keys.iter().map(String::as_str)
    }

    pub fn translate(&self, filters: &FilterState) -> Query {
        let mut out = Query::new();
        for (key, raw) in filters {
            if self.show_all_keys.contains(key) && is_show_all(raw) {
                continue;
            }
            if let Some(v) = sparse_value(raw) {
                out.insert(key.clone(), v);
            }
        }
        out
    }
}

/// Translate with no show-all keys configured.
pub fn translate(filters: &FilterState) -> Query {
    Translator::default().translate(filters)
}

fn is_show_all(v: &Value) -> bool {
    v.as_str()
        .map(|s| s.trim().eq_ignore_ascii_case(SHOW_ALL_SENTINEL))
        .unwrap_or(false)
}

fn sparse_value(v: &Value) -> Option<Value> {
    match v {
        Value::Null => None,
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(Value::String(t.to_string()))
            }
        }
        Value::Bool(_) | Value::Number(_) => Some(v.clone()),
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter(|item| !item.is_array())
                .filter_map(sparse_value)
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Array(kept))
            }
        }
        // The report service only takes flat queries.
        Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn state(v: Value) -> FilterState {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn drops_blank_and_null_values() {
        let q = translate(&state(json!({
            "search": "",
            "classroom": "C1",
            "status": null
        })));
        assert_eq!(Value::Object(q), json!({ "classroom": "C1" }));
    }

    #[test]
    fn trims_strings_and_drops_whitespace_only() {
        let q = translate(&state(json!({
            "search": "   ",
            "subject": "  S-9 ",
        })));
        assert_eq!(Value::Object(q), json!({ "subject": "S-9" }));
    }

    #[test]
    fn numbers_and_bools_pass_through() {
        let q = translate(&state(json!({
            "term": 2,
            "archived": false
        })));
        assert_eq!(Value::Object(q), json!({ "term": 2, "archived": false }));
    }

    #[test]
    fn arrays_are_compacted_and_dropped_when_empty() {
        let q = translate(&state(json!({
            "tags": ["a", " ", null, "b"],
            "levels": ["", null],
            "nested": { "x": 1 }
        })));
        assert_eq!(Value::Object(q), json!({ "tags": ["a", "b"] }));
    }

    #[test]
    fn show_all_keys_treat_all_sentinel_as_unset() {
        let t = Translator::new(["status"]);
        let q = t.translate(&state(json!({
            "status": "all",
            "classroom": "ALL"
        })));
        // Only configured keys get the sentinel treatment.
        assert_eq!(Value::Object(q), json!({ "classroom": "ALL" }));
    }

    #[test]
    fn input_is_not_mutated() {
        let input = state(json!({ "search": " x ", "status": null }));
        let before = input.clone();
        let _ = translate(&input);
        assert_eq!(input, before);
    }

    proptest! {
        #[test]
        fn translate_is_deterministic_and_sparse(
            entries in proptest::collection::btree_map(
                "[a-z]{1,6}",
                prop_oneof![
                    Just(Value::Null),
                    "[ a-zA-Z0-9]{0,5}".prop_map(Value::String),
                    any::<i32>().prop_map(|n| json!(n)),
                ],
                0..8,
            )
        ) {
            let filters: FilterState = entries.into_iter().collect();
            let a = translate(&filters);
            let b = translate(&filters);
            prop_assert_eq!(&a, &b);
            for (k, v) in &a {
                prop_assert!(filters.contains_key(k));
                prop_assert!(!v.is_null());
                if let Some(s) = v.as_str() {
                    prop_assert!(!s.is_empty());
                    prop_assert_eq!(s, s.trim());
                }
            }
        }
    }
}

//! Property-based testing strategies for generating test data
//!
//! This module provides proptest strategies for query parameters and JSON
//! values, plus the properties checked against them.

#![cfg(test)]

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::Value;

use crate::cache::{canonical_json, fingerprint};
use crate::http::Method;
use crate::query::{append_query, decode, encode, ParamValue, QueryParams};

/// Strategy for query keys: printable, including characters that need escaping
pub fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_ &=?%+\\-.]{1,12}"
}

/// Strategy for query values, unicode included
pub fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 &=?#%+/.\u{4e00}-\u{4e10}]{0,16}"
}

/// Strategy for a single parameter; lists have at least two elements so they
/// survive the round trip as lists
pub fn param_value_strategy() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        value_strategy().prop_map(ParamValue::Scalar),
        vec(value_strategy(), 2..5).prop_map(ParamValue::List),
    ]
}

/// Strategy for parameter sets with unique keys
pub fn query_params_strategy() -> impl Strategy<Value = QueryParams> {
    vec((key_strategy(), param_value_strategy()), 0..6).prop_map(|pairs| pairs.into_iter().collect())
}

/// Strategy for arbitrary nested JSON
pub fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::from(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            btree_map("[a-z]{1,4}", inner, 0..4).prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Same parameters, inserted in reverse order
fn reversed(params: &QueryParams) -> QueryParams {
    let mut entries: Vec<(String, ParamValue)> = params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    entries.reverse();
    entries.into_iter().collect()
}

proptest! {
    #[test]
    fn prop_query_roundtrip(params in query_params_strategy()) {
        prop_assert_eq!(decode(&encode(&params)), params.clone());
        let url = format!("https://x.test/list?{}", encode(&params));
        prop_assert_eq!(decode(&url), params);
    }

    #[test]
    fn prop_fingerprint_ignores_param_order(params in query_params_strategy()) {
        let flipped = reversed(&params);
        prop_assert_eq!(
            fingerprint(Method::Get, "https://x.test/a", Some(&params.to_json())),
            fingerprint(Method::Get, "https://x.test/a", Some(&flipped.to_json()))
        );

        // the same parameters baked into the URL in either order
        prop_assert_eq!(
            fingerprint(Method::Get, &append_query("https://x.test/a", &params), None),
            fingerprint(Method::Get, &append_query("https://x.test/a", &flipped), None)
        );
    }

    #[test]
    fn prop_canonical_json_parses_back(value in json_strategy()) {
        let parsed: Value = serde_json::from_str(&canonical_json(&value)).unwrap();
        prop_assert_eq!(parsed, value);
    }
}

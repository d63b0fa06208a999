//! Property-based testing utilities using proptest.
//!
//! Candidates are JSON objects with integer fields `a`, `b` and `c`, a string
//! `name` and a string-list `tags`. Any field may be `null` or missing, so
//! every operator is exercised on both sides of its boundary and on absent
//! values. Specifications compare those fields against small integers, a
//! handful of names, tags and regular expressions.

use fractal_core::specification::Specification;
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::sample::{select, subsequence};
use serde_json::{Map, Value, json};

const FIELDS: [&str; 3] = ["a", "b", "c"];
const NAMES: [&str; 4] = ["ada", "ada lovelace", "grace", "a.b"];
const TAGS: [&str; 3] = ["ops", "admin", "dev"];
const PATTERNS: [&str; 5] = ["ada", "a.a", "lovelace", "gr|ad", r"a\.b"];
const ANY_FIELD: [&str; 6] = ["a", "b", "c", "name", "tags", "missing"];

/// One of the integer field names.
pub fn field() -> impl Strategy<Value = &'static str> {
    select(FIELDS.to_vec())
}

/// A small integer comparison operand.
pub fn operand() -> impl Strategy<Value = i64> {
    -3_i64..=3
}

/// A field slot: usually an operand, sometimes `null`, sometimes absent.
fn slot() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        6 => operand().prop_map(|value| Some(json!(value))),
        1 => Just(Some(Value::Null)),
        1 => Just(None),
    ]
}

/// A candidate object; any field may be `null` or missing.
pub fn candidate() -> impl Strategy<Value = Value> {
    (
        slot(),
        slot(),
        slot(),
        proptest::option::of(select(NAMES.to_vec())),
        proptest::option::of(subsequence(TAGS.to_vec(), 0..=TAGS.len())),
    )
        .prop_map(|(a, b, c, name, tags)| {
            let mut map = Map::new();
            for (field, value) in FIELDS.into_iter().zip([a, b, c]) {
                if let Some(value) = value {
                    map.insert(field.to_string(), value);
                }
            }
            if let Some(name) = name {
                map.insert("name".to_string(), json!(name));
            }
            if let Some(tags) = tags {
                map.insert("tags".to_string(), json!(tags));
            }
            Value::Object(map)
        })
}

/// Leaves every backend can negate: equality, membership and null checks.
pub fn negatable_leaf() -> BoxedStrategy<Specification> {
    prop_oneof![
        (field(), operand()).prop_map(|(f, v)| Specification::equals(f, v)),
        (field(), operand()).prop_map(|(f, v)| Specification::not_equals(f, v)),
        (field(), vec(operand(), 0..4)).prop_map(|(f, vs)| Specification::is_in(f, vs)),
        select(NAMES.to_vec()).prop_map(|name| Specification::equals("name", name)),
        select(NAMES.to_vec()).prop_map(|name| Specification::not_equals("name", name)),
        select(ANY_FIELD.to_vec()).prop_map(|f| Specification::equals(f, Value::Null)),
        select(ANY_FIELD.to_vec()).prop_map(|f| Specification::is_none(f)),
    ]
    .boxed()
}

/// Any leaf every backend translates.
pub fn leaf() -> BoxedStrategy<Specification> {
    prop_oneof![
        negatable_leaf(),
        (field(), operand()).prop_map(|(f, v)| Specification::less_than(f, v)),
        (field(), operand()).prop_map(|(f, v)| Specification::less_than_equal(f, v)),
        (field(), operand()).prop_map(|(f, v)| Specification::greater_than(f, v)),
        (field(), operand()).prop_map(|(f, v)| Specification::greater_than_equal(f, v)),
        select(TAGS.to_vec()).prop_map(|tag| Specification::contains("tags", tag)),
    ]
    .boxed()
}

/// Leaves only some backends translate: regular expressions and substrings.
pub fn text_leaf() -> BoxedStrategy<Specification> {
    prop_oneof![
        select(PATTERNS.to_vec()).prop_filter_map("pattern compiles", |pattern| {
            Specification::matches("name", pattern).ok()
        }),
        select(vec!["a", "love", ".", "ce"]).prop_map(|needle| Specification::contains("name", needle)),
    ]
    .boxed()
}

/// Arbitrary trees of leaves under `And`, `Or` and `Not`, including empty
/// conjunctions and disjunctions.
pub fn specification() -> BoxedStrategy<Specification> {
    prop_oneof![3 => leaf(), 1 => text_leaf()]
        .prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                vec(inner.clone(), 0..4).prop_map(Specification::And),
                vec(inner.clone(), 0..4).prop_map(Specification::Or),
                inner.prop_map(Specification::negate),
            ]
        })
        .boxed()
}

/// Trees where negation only wraps negatable leaves, which every builder
/// accepts.
pub fn translatable_specification() -> BoxedStrategy<Specification> {
    prop_oneof![leaf(), negatable_leaf().prop_map(Specification::negate)]
        .prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                vec(inner.clone(), 0..4).prop_map(Specification::And),
                vec(inner, 0..4).prop_map(Specification::Or),
            ]
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn candidate_fields_are_typed_when_present(candidate in candidate()) {
            for field in FIELDS {
                prop_assert!(candidate.get(field).is_none_or(|v| v.is_i64() || v.is_null()));
            }
            prop_assert!(candidate.get("name").is_none_or(Value::is_string));
            prop_assert!(candidate.get("tags").is_none_or(Value::is_array));
        }

        #[test]
        fn specifications_evaluate(spec in specification(), candidate in candidate()) {
            // Evaluation is total over generated trees
            let _ = spec.is_satisfied_by(&candidate);
        }
    }

    #[test]
    fn every_pattern_compiles() {
        for pattern in PATTERNS {
            assert!(Specification::matches("name", pattern).is_ok(), "{pattern}");
        }
    }
}

//! The process context.
//!
//! A [`ProcessContext`] is the state threaded through a workflow: a nested
//! JSON object addressed by dotted keys (`order.total` reads `total` inside
//! `order`), plus the named [`Specification`]s built by earlier steps and the
//! [`ApplicationContext`] actions resolve collaborators from.
//!
//! # Accessors
//!
//! | Call | Missing key |
//! |------|-------------|
//! | [`get`](ProcessContext::get) | `None` |
//! | [`get_or`](ProcessContext::get_or) | the default |
//! | [`require`](ProcessContext::require) | [`ContextError::MissingKey`] |
//!
//! # Merging
//!
//! [`update`](ProcessContext::update) merges recursively: where both sides
//! hold objects the keys are merged, anywhere else the incoming value wins.
//!
//! # Freezing
//!
//! A frozen context rejects every mutation with [`ContextError::Frozen`].
//! [`copy`](ProcessContext::copy) always returns an unfrozen duplicate.

use fractal_core::application::ApplicationContext;
use fractal_core::entity::FieldAccess;
use fractal_core::specification::Specification;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors reading or writing a [`ProcessContext`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// Strict lookup of an absent key
    #[error("Missing key: '{0}'")]
    MissingKey(String),

    /// Mutation of a frozen context
    #[error("Context is frozen; cannot modify '{0}'")]
    Frozen(String),

    /// A path both holds a value and has nested keys
    #[error("Conflicting keys at '{0}': a path cannot hold a value and nested keys")]
    Conflict(String),

    /// The initial value is not a JSON object
    #[error("Process context must be built from an object, got {0}")]
    NotAnObject(&'static str),
}

impl ContextError {
    /// Stable type name of the error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingKey(_) => "MissingKeyError",
            Self::Frozen(_) => "FrozenContextError",
            Self::Conflict(_) => "ContextConflictError",
            Self::NotAnObject(_) => "TypeError",
        }
    }
}

/// Mutable, mergeable, freezable workflow state.
#[derive(Clone, Debug, Default)]
pub struct ProcessContext {
    values: Map<String, Value>,
    specifications: HashMap<String, Specification>,
    application: Option<Arc<ApplicationContext>>,
    frozen: bool,
}

impl ProcessContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from `(key, value)` pairs, expanding dotted keys.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Conflict`] if one path would both hold a value
    /// and have nested keys, e.g. `"a.b"` and `"a"` given together.
    ///
    /// # Examples
    ///
    /// ```
    /// use fractal_runtime::context::ProcessContext;
    /// use serde_json::json;
    ///
    /// let context = ProcessContext::from_pairs([("a.b", json!(1)), ("a.c", json!(2))]).unwrap();
    /// assert_eq!(context.to_value(), json!({"a": {"b": 1, "c": 2}}));
    ///
    /// assert!(ProcessContext::from_pairs([("a.b", json!(1)), ("a", json!(5))]).is_err());
    /// ```
    pub fn from_pairs<K, I>(pairs: I) -> Result<Self, ContextError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut values = Map::new();
        for (key, value) in pairs {
            insert_new(&mut values, key.as_ref(), value)?;
        }
        Ok(Self {
            values,
            ..Self::default()
        })
    }

    /// Build a context from a JSON object; top-level keys may be dotted.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NotAnObject`] for non-objects and
    /// [`ContextError::Conflict`] as [`ProcessContext::from_pairs`] does.
    pub fn from_value(value: Value) -> Result<Self, ContextError> {
        match value {
            Value::Object(map) => Self::from_pairs(map),
            other => Err(ContextError::NotAnObject(type_name(&other))),
        }
    }

    /// Bind the application context actions resolve collaborators from.
    #[must_use]
    pub fn with_application(mut self, application: Arc<ApplicationContext>) -> Self {
        self.application = Some(application);
        self
    }

    /// The bound application context.
    #[must_use]
    pub const fn application(&self) -> Option<&Arc<ApplicationContext>> {
        self.application.as_ref()
    }

    /// Safe lookup of a dotted key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let first = segments.next()?;
        segments.try_fold(self.values.get(first)?, |value, segment| value.as_object()?.get(segment))
    }

    /// Lookup with a fallback.
    #[must_use]
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).cloned().unwrap_or(default)
    }

    /// Strict lookup of a dotted key.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MissingKey`] if the key is absent.
    pub fn require(&self, key: &str) -> Result<&Value, ContextError> {
        self.get(key)
            .ok_or_else(|| ContextError::MissingKey(key.to_string()))
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Write `value` at a dotted key, creating intermediate objects.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Frozen`] on a frozen context and
    /// [`ContextError::Conflict`] if an intermediate segment holds a
    /// non-object value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ContextError> {
        self.ensure_mutable(key)?;
        let (parent, last) = parent_mut(&mut self.values, key)?;
        parent.insert(last.to_string(), value.into());
        Ok(())
    }

    /// Remove a dotted key, returning its value.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Frozen`] on a frozen context.
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>, ContextError> {
        self.ensure_mutable(key)?;
        let Some((path, last)) = key.rsplit_once('.') else {
            return Ok(self.values.remove(key));
        };
        let mut map = &mut self.values;
        for segment in path.split('.') {
            match map.get_mut(segment).and_then(Value::as_object_mut) {
                Some(next) => map = next,
                None => return Ok(None),
            }
        }
        Ok(map.remove(last))
    }

    /// Deep-merge `other` into this context.
    ///
    /// Named specifications from `other` replace ones with the same name; its
    /// application context is adopted when this one has none.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Frozen`] on a frozen context.
    pub fn update(&mut self, other: Self) -> Result<(), ContextError> {
        self.ensure_mutable("*")?;
        merge(&mut self.values, other.values);
        self.specifications.extend(other.specifications);
        if self.application.is_none() {
            self.application = other.application;
        }
        Ok(())
    }

    /// Deep-merge a JSON object into this context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Frozen`] on a frozen context.
    pub fn merge_values(&mut self, values: Map<String, Value>) -> Result<(), ContextError> {
        self.ensure_mutable("*")?;
        merge(&mut self.values, values);
        Ok(())
    }

    /// An independent, unfrozen duplicate.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            frozen: false,
            ..self.clone()
        }
    }

    /// Reject every further mutation.
    pub const fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Consume and return a frozen context.
    #[must_use]
    pub const fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Whether the context is frozen.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The specification stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MissingKey`] if none is stored.
    pub fn specification(&self, name: &str) -> Result<&Specification, ContextError> {
        self.specifications
            .get(name)
            .ok_or_else(|| ContextError::MissingKey(name.to_string()))
    }

    /// Store `specification` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Frozen`] on a frozen context.
    pub fn set_specification(&mut self, name: &str, specification: Specification) -> Result<(), ContextError> {
        self.ensure_mutable(name)?;
        self.specifications.insert(name.to_string(), specification);
        Ok(())
    }

    /// The values as a JSON object.
    #[must_use]
    pub const fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// A JSON snapshot of the values.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// What this context holds that `base` does not hold identically.
    ///
    /// Nested objects are compared key by key, so the result carries only
    /// changed leaves. Removals are not represented.
    #[must_use]
    pub fn changes_since(&self, base: &Self) -> Self {
        let specifications = self
            .specifications
            .iter()
            .filter(|(name, _)| !base.specifications.contains_key(*name))
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect();
        Self {
            values: diff(&self.values, &base.values),
            specifications,
            application: None,
            frozen: false,
        }
    }

    fn ensure_mutable(&self, key: &str) -> Result<(), ContextError> {
        if self.frozen {
            return Err(ContextError::Frozen(key.to_string()));
        }
        Ok(())
    }
}

impl FieldAccess for ProcessContext {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl PartialEq for ProcessContext {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.frozen == other.frozen
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Walk to the object holding the last segment of `key`, creating objects
/// on the way.
fn parent_mut<'a, 'k>(
    values: &'a mut Map<String, Value>,
    key: &'k str,
) -> Result<(&'a mut Map<String, Value>, &'k str), ContextError> {
    let Some((path, last)) = key.rsplit_once('.') else {
        return Ok((values, key));
    };
    let mut current = values;
    for segment in path.split('.') {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = slot
            .as_object_mut()
            .ok_or_else(|| ContextError::Conflict(segment.to_string()))?;
    }
    Ok((current, last))
}

/// Construction-time insert: any collision that is not object-into-object
/// is a conflict.
fn insert_new(values: &mut Map<String, Value>, key: &str, value: Value) -> Result<(), ContextError> {
    let (parent, last) = parent_mut(values, key).map_err(|_| ContextError::Conflict(key.to_string()))?;
    match parent.get_mut(last) {
        None => {
            parent.insert(last.to_string(), value);
            Ok(())
        },
        Some(Value::Object(existing)) => {
            let Value::Object(incoming) = value else {
                return Err(ContextError::Conflict(key.to_string()));
            };
            for (child, value) in incoming {
                insert_new(existing, &child, value)
                    .map_err(|_| ContextError::Conflict(format!("{key}.{child}")))?;
            }
            Ok(())
        },
        Some(_) => Err(ContextError::Conflict(key.to_string())),
    }
}

fn merge(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match value {
            Value::Object(nested) if target.get(&key).is_some_and(Value::is_object) => {
                if let Some(Value::Object(existing)) = target.get_mut(&key) {
                    merge(existing, nested);
                }
            },
            value => {
                target.insert(key, value);
            },
        }
    }
}

fn diff(current: &Map<String, Value>, base: &Map<String, Value>) -> Map<String, Value> {
    let mut changes = Map::new();
    for (key, value) in current {
        match (value, base.get(key)) {
            (Value::Object(now), Some(Value::Object(before))) => {
                let nested = diff(now, before);
                if !nested.is_empty() {
                    changes.insert(key.clone(), Value::Object(nested));
                }
            },
            (value, Some(before)) if value == before => {},
            (value, _) => {
                changes.insert(key.clone(), value.clone());
            },
        }
    }
    changes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_keys_expand_at_construction() {
        let context = ProcessContext::from_value(json!({"a.b": 1, "a.c": 2, "d": true})).unwrap();
        assert_eq!(context.to_value(), json!({"a": {"b": 1, "c": 2}, "d": true}));
        assert_eq!(context.get("a.b"), Some(&json!(1)));
    }

    #[test]
    fn conflicts_fail_construction_in_either_order() {
        for pairs in [
            vec![("a.b", json!(1)), ("a", json!(5))],
            vec![("a", json!(5)), ("a.b", json!(1))],
        ] {
            assert!(matches!(
                ProcessContext::from_pairs(pairs),
                Err(ContextError::Conflict(_))
            ));
        }
        assert!(ProcessContext::from_pairs([("a", json!({"x": 1})), ("a.y", json!(2))]).is_ok());
        assert!(matches!(
            ProcessContext::from_value(json!([1])),
            Err(ContextError::NotAnObject("an array"))
        ));
    }

    #[test]
    fn strict_and_safe_access() {
        let context = ProcessContext::from_pairs([("user.name", json!("ada"))]).unwrap();
        assert_eq!(context.get("user.email"), None);
        assert_eq!(context.get("user.name.first"), None);
        assert_eq!(context.get_or("user.email", json!("n/a")), json!("n/a"));
        assert_eq!(
            context.require("user.email"),
            Err(ContextError::MissingKey("user.email".to_string()))
        );
        assert!(context.contains("user"));
    }

    #[test]
    fn set_and_remove_dotted() {
        let mut context = ProcessContext::new();
        context.set("order.total", 12).unwrap();
        context.set("order.lines", json!([])).unwrap();
        assert_eq!(context.to_value(), json!({"order": {"total": 12, "lines": []}}));

        assert!(matches!(
            context.set("order.total.currency", "EUR"),
            Err(ContextError::Conflict(_))
        ));

        assert_eq!(context.remove("order.total").unwrap(), Some(json!(12)));
        assert_eq!(context.remove("order.missing").unwrap(), None);
        assert_eq!(context.remove("order").unwrap(), Some(json!({"lines": []})));
        assert!(context.values().is_empty());
    }

    #[test]
    fn update_merges_recursively() {
        let mut context = ProcessContext::from_value(json!({"a": {"b": 1, "c": 2}, "x": 1})).unwrap();
        let other = ProcessContext::from_value(json!({"a": {"c": 3, "d": 4}, "x": {"y": 1}})).unwrap();
        context.update(other).unwrap();
        assert_eq!(context.to_value(), json!({"a": {"b": 1, "c": 3, "d": 4}, "x": {"y": 1}}));
    }

    #[test]
    fn copy_is_deep_and_unfrozen() {
        let mut original = ProcessContext::from_value(json!({"a": {"b": [1]}})).unwrap();
        original.freeze();

        let mut copy = original.copy();
        assert!(!copy.is_frozen());
        copy.set("a.b", json!([1, 2])).unwrap();
        assert_eq!(original.get("a.b"), Some(&json!([1])));
    }

    #[test]
    fn frozen_rejects_every_mutation() {
        let mut context = ProcessContext::from_pairs([("a", json!(1))]).unwrap().frozen();
        assert_eq!(context.set("a", 2), Err(ContextError::Frozen("a".to_string())));
        assert!(context.remove("a").is_err());
        assert!(context.update(ProcessContext::new()).is_err());
        assert!(context.set_specification("s", Specification::Empty).is_err());
        assert_eq!(context.get("a"), Some(&json!(1)));
    }

    #[test]
    fn specifications_by_name() {
        let mut context = ProcessContext::new();
        context
            .set_specification("adults", Specification::greater_than_equal("age", 18))
            .unwrap();
        assert!(context.specification("adults").is_ok());
        assert_eq!(
            context.specification("minors").err(),
            Some(ContextError::MissingKey("minors".to_string()))
        );
    }

    #[test]
    fn changes_since_carries_changed_leaves_only() {
        let base = ProcessContext::from_value(json!({"a": {"b": 1, "c": 2}, "n": 1})).unwrap();
        let mut branch = base.copy();
        branch.set("a.c", 3).unwrap();
        branch.set("m", "new").unwrap();

        assert_eq!(branch.changes_since(&base).to_value(), json!({"a": {"c": 3}, "m": "new"}));
    }

    proptest::proptest! {
        #[test]
        fn branch_changes_replay_onto_base(
            writes in proptest::collection::vec(
                (proptest::sample::select(vec!["a", "a.b", "a.c", "d", "d.e.f"]), -5_i64..5),
                0..8,
            ),
        ) {
            let base = ProcessContext::from_value(json!({"a": {"b": 1, "c": 2}, "d": 0})).unwrap();
            let mut branch = base.copy();
            for (key, value) in writes {
                // Writes through a scalar are conflicts; skip them
                let _ = branch.set(key, value);
            }

            let mut replayed = base.copy();
            replayed.update(branch.changes_since(&base)).unwrap();
            proptest::prop_assert_eq!(replayed.to_value(), branch.to_value());
        }
    }

    #[test]
    fn specifications_evaluate_against_the_context() {
        let context = ProcessContext::from_pairs([("order.total", json!(120))]).unwrap();
        assert!(Specification::greater_than("order.total", 100).is_satisfied_by(&context));
        assert!(Specification::is_none("order.discount").is_satisfied_by(&context));
    }
}

//! Entity contract and dynamic field access.
//!
//! Specifications evaluate predicates by reading *named fields* off a
//! candidate. Instead of arbitrary reflection, a candidate exposes its fields
//! through the narrow [`FieldAccess`] capability, returning each field as a
//! [`serde_json::Value`]. Types that already implement `Serialize` can reuse
//! [`serialized_field`] instead of writing a match by hand.
//!
//! Values are compared with JSON semantics: numbers compare numerically
//! regardless of integer/float representation, strings lexicographically,
//! booleans `false < true`. Mixed types are not ordered.

use crate::aggregate::EventSourcedAggregateRoot;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

/// Read access to the named fields of a value.
///
/// Returning `None` means the field does not exist. Specifications treat a
/// missing field the same way as an explicit `null`.
pub trait FieldAccess {
    /// Returns the value of the field called `name`, if present.
    fn field(&self, name: &str) -> Option<Value>;
}

impl FieldAccess for Value {
    fn field(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|map| map.get(name)).cloned()
    }
}

impl FieldAccess for serde_json::Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// A record with a stable, caller-assigned identifier.
///
/// Entities are plain value records. The repository layer keys them by
/// [`Entity::id`], and multi-tenant filtering relies on the conventional
/// `account_id` field being reachable through [`FieldAccess`].
pub trait Entity: FieldAccess + Clone + Send + Sync + 'static {
    /// The unique identifier of this entity.
    fn id(&self) -> &str;

    /// Exposes the aggregate-root capability of this entity, if it has one.
    ///
    /// Event-sourced repositories reject entities that return `None`.
    fn as_aggregate_root(&mut self) -> Option<&mut dyn EventSourcedAggregateRoot> {
        None
    }
}

/// JSON objects with a string `id` are entities, which suits schemaless
/// collections and tests. A missing or non-string id reads as `""`.
impl Entity for Value {
    fn id(&self) -> &str {
        self.get("id").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Reads a field from any serializable value.
///
/// The value is serialized to JSON and the top-level key `name` is returned.
/// Non-object values have no fields.
///
/// # Examples
///
/// ```
/// use fractal_core::entity::serialized_field;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Account {
///     id: String,
///     seats: u32,
/// }
///
/// let account = Account { id: "a-1".into(), seats: 3 };
/// assert_eq!(serialized_field(&account, "seats"), Some(serde_json::json!(3)));
/// assert_eq!(serialized_field(&account, "missing"), None);
/// ```
pub fn serialized_field<T: Serialize + ?Sized>(value: &T, name: &str) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(mut map)) => map.remove(name),
        _ => None,
    }
}

/// Equality with numeric normalisation (`1 == 1.0`).
#[must_use]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => compare_values(left, right) == Some(Ordering::Equal),
        _ => left == right,
    }
}

/// Partial ordering between two values of the same kind.
///
/// Returns `None` when the values are of different kinds, or for arrays and
/// objects, which have no natural order.
#[must_use]
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total ordering used for sorting query results.
///
/// Values are grouped by kind (`null < bool < number < string < array <
/// object`) and compared within the group. Arrays and objects compare equal to
/// their own kind, so sorting stays stable for them.
#[must_use]
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    const fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.total_cmp(&b)
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}

/// The unqualified name of a type (`my_crate::orders::PlaceOrder` -> `PlaceOrder`).
///
/// Generic parameters are dropped.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

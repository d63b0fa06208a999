//! Specification query algebra.
//!
//! A [`Specification`] is an immutable node in a boolean expression tree over
//! the named fields of an entity. Every specification supports two
//! orthogonal capabilities:
//!
//! - [`Specification::is_satisfied_by`]: a pure in-process predicate
//! - [`Specification::to_collection`]: a backend-neutral structural form
//!
//! Backend builders in [`builders`] lower the tree into native query
//! representations. The variant set is closed, so every builder handles each
//! variant explicitly and refuses the ones it cannot express.
//!
//! # Composition
//!
//! `and`/`or` flatten: combining two `And` nodes (or a leaf with an `And`
//! node) yields a single `And` listing every operand, never `And(And(..))`.
//!
//! ```
//! use fractal_core::specification::Specification;
//! use serde_json::json;
//!
//! let adults = Specification::greater_than_equal("age", 18);
//! let in_acme = Specification::account_id("acme");
//! let named = Specification::equals("name", "ada");
//!
//! let spec = adults.and(in_acme).and(named);
//! assert!(matches!(&spec, Specification::And(children) if children.len() == 3));
//!
//! let candidate = json!({"age": 36, "account_id": "acme", "name": "ada"});
//! assert!(spec.is_satisfied_by(&candidate));
//! ```

pub mod builders;

use crate::entity::{FieldAccess, compare_values, values_equal};
use regex::Regex;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A compiled regular expression anchored at the start of the value.
///
/// The uncompiled source text is kept for builders that embed the pattern in
/// a query.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    anchored: Regex,
}

impl Pattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] if the pattern is not a valid regular expression.
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        let source = source.into();
        let anchored = Regex::new(&format!("^(?:{source})"))?;
        Ok(Self { source, anchored })
    }

    /// The pattern as written by the caller.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern matches at the start of `text`.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.anchored.is_match(text)
    }
}

/// Arbitrary in-process predicate.
///
/// This is the escape hatch of the algebra: it can be evaluated against a
/// candidate but has no collection form, so no backend can translate it.
#[derive(Clone)]
pub struct Predicate {
    description: String,
    check: Arc<dyn Fn(&dyn FieldAccess) -> bool + Send + Sync>,
}

impl Predicate {
    /// The human-readable description given at construction.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A composable boolean predicate over an entity's fields.
#[derive(Clone, Debug)]
pub enum Specification {
    /// `field == value`
    Equals {
        /// Field name
        field: String,
        /// Comparison value
        value: Value,
    },
    /// `field != value`
    NotEquals {
        /// Field name
        field: String,
        /// Comparison value
        value: Value,
    },
    /// `field < value`
    LessThan {
        /// Field name
        field: String,
        /// Comparison value
        value: Value,
    },
    /// `field <= value`
    LessThanEqual {
        /// Field name
        field: String,
        /// Comparison value
        value: Value,
    },
    /// `field > value`
    GreaterThan {
        /// Field name
        field: String,
        /// Comparison value
        value: Value,
    },
    /// `field >= value`
    GreaterThanEqual {
        /// Field name
        field: String,
        /// Comparison value
        value: Value,
    },
    /// `field` equals one of `values`
    In {
        /// Field name
        field: String,
        /// Accepted values
        values: Vec<Value>,
    },
    /// `field` (a string or a list) contains `value`
    Contains {
        /// Field name
        field: String,
        /// Substring or element
        value: Value,
    },
    /// `field` is a string matching `pattern` from its start
    Matches {
        /// Field name
        field: String,
        /// Compiled pattern
        pattern: Pattern,
    },
    /// `field` is absent or `null`
    IsNone {
        /// Field name
        field: String,
    },
    /// Every child is satisfied (`true` when empty)
    And(Vec<Specification>),
    /// At least one child is satisfied (`false` when empty)
    Or(Vec<Specification>),
    /// The child is not satisfied
    Not(Box<Specification>),
    /// Always satisfied; translates to "select all"
    Empty,
    /// Arbitrary in-process predicate without a collection form
    Predicate(Predicate),
}

impl Specification {
    /// `field == value`
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field != value`
    #[must_use]
    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field < value`
    #[must_use]
    pub fn less_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::LessThan {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field <= value`
    #[must_use]
    pub fn less_than_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::LessThanEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field > value`
    #[must_use]
    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::GreaterThan {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field >= value`
    #[must_use]
    pub fn greater_than_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::GreaterThanEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field` is one of `values`
    #[must_use]
    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `field` contains `value` (substring for strings, element for lists)
    #[must_use]
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field` matches the regular expression `pattern` from its start.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] if `pattern` does not compile.
    pub fn matches(field: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches {
            field: field.into(),
            pattern: Pattern::new(pattern)?,
        })
    }

    /// `field` is absent or `null`
    #[must_use]
    pub fn is_none(field: impl Into<String>) -> Self {
        Self::IsNone {
            field: field.into(),
        }
    }

    /// Wrap an arbitrary predicate.
    ///
    /// The result can only be evaluated in-process; every builder refuses it.
    #[must_use]
    pub fn predicate<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&dyn FieldAccess) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Predicate {
            description: description.into(),
            check: Arc::new(check),
        })
    }

    /// Matches the entity with identifier `id`.
    #[must_use]
    pub fn id(id: impl Into<Value>) -> Self {
        Self::equals("id", id)
    }

    /// Matches entities owned by `account_id`.
    #[must_use]
    pub fn account_id(account_id: impl Into<Value>) -> Self {
        Self::equals("account_id", account_id)
    }

    /// Matches entities belonging to `user_id`.
    #[must_use]
    pub fn user_id(user_id: impl Into<Value>) -> Self {
        Self::equals("user_id", user_id)
    }

    /// Matches entity `id`, but only when it belongs to `account_id`.
    #[must_use]
    pub fn object_of_account(id: impl Into<Value>, account_id: impl Into<Value>) -> Self {
        Self::And(vec![Self::account_id(account_id), Self::id(id)])
    }

    /// Conjunction, flattening nested `And` nodes.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            },
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            },
            (left, Self::And(right)) => {
                let mut children = Vec::with_capacity(right.len() + 1);
                children.push(left);
                children.extend(right);
                Self::And(children)
            },
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Disjunction, flattening nested `Or` nodes.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            },
            (Self::Or(mut left), right) => {
                left.push(right);
                Self::Or(left)
            },
            (left, Self::Or(right)) => {
                let mut children = Vec::with_capacity(right.len() + 1);
                children.push(left);
                children.extend(right);
                Self::Or(children)
            },
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate the predicate against `candidate`.
    ///
    /// `And`/`Or` short-circuit over their children in declared order.
    #[must_use]
    pub fn is_satisfied_by(&self, candidate: &dyn FieldAccess) -> bool {
        let read = |field: &str| candidate.field(field).unwrap_or(Value::Null);
        let ordered = |field: &str, value: &Value, accept: fn(Ordering) -> bool| {
            compare_values(&read(field), value).is_some_and(accept)
        };

        match self {
            Self::Equals { field, value } => values_equal(&read(field), value),
            Self::NotEquals { field, value } => !values_equal(&read(field), value),
            Self::LessThan { field, value } => ordered(field, value, Ordering::is_lt),
            Self::LessThanEqual { field, value } => ordered(field, value, Ordering::is_le),
            Self::GreaterThan { field, value } => ordered(field, value, Ordering::is_gt),
            Self::GreaterThanEqual { field, value } => ordered(field, value, Ordering::is_ge),
            Self::In { field, values } => {
                let actual = read(field);
                values.iter().any(|value| values_equal(&actual, value))
            },
            Self::Contains { field, value } => match (read(field), value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                _ => false,
            },
            Self::Matches { field, pattern } => match read(field) {
                Value::String(text) => pattern.is_match(&text),
                _ => false,
            },
            Self::IsNone { field } => read(field).is_null(),
            Self::And(children) => children.iter().all(|child| child.is_satisfied_by(candidate)),
            Self::Or(children) => children.iter().any(|child| child.is_satisfied_by(candidate)),
            Self::Not(child) => !child.is_satisfied_by(candidate),
            Self::Empty => true,
            Self::Predicate(predicate) => (predicate.check)(candidate),
        }
    }

    /// Backend-neutral structural form.
    ///
    /// Leaves become `[field, operator, value]` triples, composites become
    /// `{"and": [...]}`, `{"or": [...]}` and `{"not": ...}`. `Empty`,
    /// `Predicate`, and any composite containing them have no collection form
    /// and return `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fractal_core::specification::Specification;
    /// use serde_json::json;
    ///
    /// let spec = Specification::object_of_account("42", "acme");
    /// assert_eq!(
    ///     spec.to_collection(),
    ///     Some(json!({"and": [["account_id", "==", "acme"], ["id", "==", "42"]]}))
    /// );
    /// ```
    #[must_use]
    pub fn to_collection(&self) -> Option<Value> {
        let children = |specs: &[Self]| -> Option<Vec<Value>> {
            specs.iter().map(Self::to_collection).collect()
        };

        match self {
            Self::Equals { field, value } => Some(json!([field, "==", value])),
            Self::NotEquals { field, value } => Some(json!([field, "!=", value])),
            Self::LessThan { field, value } => Some(json!([field, "<", value])),
            Self::LessThanEqual { field, value } => Some(json!([field, "<=", value])),
            Self::GreaterThan { field, value } => Some(json!([field, ">", value])),
            Self::GreaterThanEqual { field, value } => Some(json!([field, ">=", value])),
            Self::In { field, values } => Some(json!([field, "in", values])),
            Self::Contains { field, value } => Some(json!([field, "contains", value])),
            Self::Matches { field, pattern } => Some(json!([field, "matches", pattern.as_str()])),
            Self::IsNone { field } => Some(json!([field, "is_none", null])),
            Self::And(specs) => children(specs).map(|items| json!({ "and": items })),
            Self::Or(specs) => children(specs).map(|items| json!({ "or": items })),
            Self::Not(child) => child.to_collection().map(|item| json!({ "not": item })),
            Self::Empty | Self::Predicate(_) => None,
        }
    }
}

impl std::ops::BitAnd for Specification {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Specification {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.or(rhs)
    }
}

impl std::ops::Not for Specification {
    type Output = Self;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, specs: &[Specification], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (index, spec) in specs.iter().enumerate() {
                if index > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{spec}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::Equals { field, value } => write!(f, "{field} == {value}"),
            Self::NotEquals { field, value } => write!(f, "{field} != {value}"),
            Self::LessThan { field, value } => write!(f, "{field} < {value}"),
            Self::LessThanEqual { field, value } => write!(f, "{field} <= {value}"),
            Self::GreaterThan { field, value } => write!(f, "{field} > {value}"),
            Self::GreaterThanEqual { field, value } => write!(f, "{field} >= {value}"),
            Self::In { field, values } => write!(f, "{field} in {}", Value::from(values.clone())),
            Self::Contains { field, value } => write!(f, "{field} contains {value}"),
            Self::Matches { field, pattern } => write!(f, "{field} matches /{}/", pattern.as_str()),
            Self::IsNone { field } => write!(f, "{field} is none"),
            Self::And(specs) => join(f, specs, "AND"),
            Self::Or(specs) => join(f, specs, "OR"),
            Self::Not(child) => write!(f, "NOT {child}"),
            Self::Empty => write!(f, "<empty>"),
            Self::Predicate(predicate) => write!(f, "<predicate: {}>", predicate.description),
        }
    }
}

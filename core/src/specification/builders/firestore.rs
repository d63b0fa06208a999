//! Firestore query builder.
//!
//! Firestore queries are conjunctions of `(field, op, value)` filters. There is
//! no general OR across fields, so the builder normalises the tree into a
//! disjunction of conjunctions and returns one fragment per disjunct:
//!
//! ```text
//! a AND (b OR c)   =>   Union[ Where[a, b], Where[a, c] ]
//! ```
//!
//! The caller runs every fragment as its own query and unions the results.
//! A document matching several fragments is returned several times, so the
//! caller deduplicates by id and may re-check each document in-process with
//! [`FirestoreQuery::matches`] or the originating specification.

use super::{SpecificationBuilder, SpecificationNotMappedError};
use crate::entity::FieldAccess;
use crate::specification::Specification;
use serde_json::{Value, json};

/// One `where(field, op, value)` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    /// Field path
    pub field: String,
    /// Firestore operator (`==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `not-in`, `array-contains`)
    pub op: &'static str,
    /// Right-hand side
    pub value: Value,
}

impl FieldFilter {
    fn new(field: &str, op: &'static str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
        }
    }

    /// The filter as a `[field, op, value]` triple.
    #[must_use]
    pub fn to_triple(&self) -> Value {
        json!([self.field, self.op, self.value])
    }

    /// Evaluate the filter in-process with specification semantics.
    ///
    /// This differs from the server for missing fields: Firestore's `!=` and
    /// `not-in` skip documents that lack the field, while here a missing
    /// field reads as `null` and is not equal to any other value. Re-checking
    /// server results with this method therefore cannot recover documents the
    /// server skipped; a caller needing them queries the null case too.
    #[must_use]
    pub fn matches(&self, candidate: &dyn FieldAccess) -> bool {
        let field = self.field.as_str();
        let spec = match self.op {
            "==" => Specification::equals(field, self.value.clone()),
            "!=" => Specification::not_equals(field, self.value.clone()),
            "<" => Specification::less_than(field, self.value.clone()),
            "<=" => Specification::less_than_equal(field, self.value.clone()),
            ">" => Specification::greater_than(field, self.value.clone()),
            ">=" => Specification::greater_than_equal(field, self.value.clone()),
            "in" | "not-in" => {
                let values = self.value.as_array().cloned().unwrap_or_default();
                let spec = Specification::In {
                    field: self.field.clone(),
                    values,
                };
                if self.op == "in" { spec } else { spec.negate() }
            },
            "array-contains" => {
                return match candidate.field(field) {
                    Some(Value::Array(_)) => {
                        Specification::contains(field, self.value.clone()).is_satisfied_by(candidate)
                    },
                    _ => false,
                };
            },
            _ => return false,
        };
        spec.is_satisfied_by(candidate)
    }
}

/// A Firestore query plan.
#[derive(Debug, Clone, PartialEq)]
pub enum FirestoreQuery {
    /// No filters: read the whole collection
    All,
    /// A single query whose filters are ANDed
    Where(Vec<FieldFilter>),
    /// Independent queries whose results are unioned; empty matches nothing
    Union(Vec<FirestoreQuery>),
}

impl FirestoreQuery {
    /// Evaluate the plan in-process: a union matches if any fragment does.
    ///
    /// Uses [`FieldFilter::matches`], so missing fields follow specification
    /// semantics rather than the server's.
    #[must_use]
    pub fn matches(&self, candidate: &dyn FieldAccess) -> bool {
        match self {
            Self::All => true,
            Self::Where(filters) => filters.iter().all(|filter| filter.matches(candidate)),
            Self::Union(queries) => queries.iter().any(|query| query.matches(candidate)),
        }
    }

    /// The filter lists to run, one per query.
    ///
    /// `All` yields a single empty list; an empty union yields none.
    #[must_use]
    pub fn fragments(&self) -> Vec<&[FieldFilter]> {
        match self {
            Self::All => vec![&[][..]],
            Self::Where(filters) => vec![filters.as_slice()],
            Self::Union(queries) => queries.iter().flat_map(Self::fragments).collect(),
        }
    }
}

/// Disjunctive normal form: OR of ANDs.
type Disjunction = Vec<Vec<FieldFilter>>;

/// Builds [`FirestoreQuery`] plans.
///
/// `Contains` maps to `array-contains`, so it only matches array fields.
/// Regex matching has no Firestore operator and is refused, as is negation of
/// anything other than equality, membership, or a null check.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirestoreSpecificationBuilder;

impl FirestoreSpecificationBuilder {
    fn leaf(filter: FieldFilter) -> Disjunction {
        vec![vec![filter]]
    }

    fn negated(self, spec: &Specification, child: &Specification) -> Result<Disjunction, SpecificationNotMappedError> {
        Ok(match child {
            Specification::Equals { field, value } => Self::leaf(FieldFilter::new(field, "!=", value.clone())),
            Specification::NotEquals { field, value } => Self::leaf(FieldFilter::new(field, "==", value.clone())),
            Specification::In { field, values } => {
                Self::leaf(FieldFilter::new(field, "not-in", Value::Array(values.clone())))
            },
            Specification::IsNone { field } => Self::leaf(FieldFilter::new(field, "!=", Value::Null)),
            Specification::Not(inner) => self.normalise(inner)?,
            _ => return Err(SpecificationNotMappedError::new(self.backend(), spec)),
        })
    }

    fn normalise(self, spec: &Specification) -> Result<Disjunction, SpecificationNotMappedError> {
        Ok(match spec {
            Specification::Equals { field, value } => Self::leaf(FieldFilter::new(field, "==", value.clone())),
            Specification::NotEquals { field, value } => Self::leaf(FieldFilter::new(field, "!=", value.clone())),
            Specification::LessThan { field, value } => Self::leaf(FieldFilter::new(field, "<", value.clone())),
            Specification::LessThanEqual { field, value } => {
                Self::leaf(FieldFilter::new(field, "<=", value.clone()))
            },
            Specification::GreaterThan { field, value } => Self::leaf(FieldFilter::new(field, ">", value.clone())),
            Specification::GreaterThanEqual { field, value } => {
                Self::leaf(FieldFilter::new(field, ">=", value.clone()))
            },
            Specification::In { field, values } => {
                Self::leaf(FieldFilter::new(field, "in", Value::Array(values.clone())))
            },
            Specification::Contains { field, value } => {
                Self::leaf(FieldFilter::new(field, "array-contains", value.clone()))
            },
            Specification::IsNone { field } => Self::leaf(FieldFilter::new(field, "==", Value::Null)),
            Specification::And(children) => {
                let mut product: Disjunction = vec![Vec::new()];
                for child in children {
                    let terms = self.normalise(child)?;
                    let mut next = Vec::with_capacity(product.len() * terms.len());
                    for left in &product {
                        for right in &terms {
                            let mut conjunction = left.clone();
                            conjunction.extend(right.iter().cloned());
                            next.push(conjunction);
                        }
                    }
                    product = next;
                }
                product
            },
            Specification::Or(children) => {
                let mut union = Vec::new();
                for child in children {
                    union.extend(self.normalise(child)?);
                }
                union
            },
            Specification::Not(child) => self.negated(spec, child)?,
            Specification::Empty => vec![Vec::new()],
            Specification::Matches { .. } | Specification::Predicate(_) => {
                return Err(SpecificationNotMappedError::new(self.backend(), spec));
            },
        })
    }
}

impl SpecificationBuilder for FirestoreSpecificationBuilder {
    type Query = FirestoreQuery;

    fn backend(&self) -> &'static str {
        "firestore"
    }

    fn build(&self, specification: Option<&Specification>) -> Result<FirestoreQuery, SpecificationNotMappedError> {
        let Some(spec) = specification else {
            return Ok(FirestoreQuery::All);
        };

        let mut disjunction = self.normalise(spec)?;
        if disjunction.iter().any(Vec::is_empty) {
            return Ok(FirestoreQuery::All);
        }
        Ok(match disjunction.len() {
            1 => FirestoreQuery::Where(disjunction.remove(0)),
            _ => FirestoreQuery::Union(disjunction.into_iter().map(FirestoreQuery::Where).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(spec: &Specification) -> FirestoreQuery {
        FirestoreSpecificationBuilder
            .build(Some(spec))
            .unwrap_or(FirestoreQuery::Union(vec![]))
    }

    fn triples(query: &FirestoreQuery) -> Vec<Vec<Value>> {
        query
            .fragments()
            .into_iter()
            .map(|fragment| fragment.iter().map(FieldFilter::to_triple).collect())
            .collect()
    }

    #[test]
    fn leaves_become_triples() {
        assert_eq!(
            triples(&build(&Specification::greater_than_equal("age", 18))),
            vec![vec![json!(["age", ">=", 18])]]
        );
        assert_eq!(
            triples(&build(&Specification::contains("tags", "ops"))),
            vec![vec![json!(["tags", "array-contains", "ops"])]]
        );
        assert_eq!(
            triples(&build(&Specification::is_in("id", ["1"]).negate())),
            vec![vec![json!(["id", "not-in", ["1"]])]]
        );
    }

    #[test]
    fn and_collects_filters_into_one_query() {
        let query = build(&Specification::object_of_account("1", "acme"));
        assert_eq!(
            triples(&query),
            vec![vec![json!(["account_id", "==", "acme"]), json!(["id", "==", "1"])]]
        );
    }

    #[test]
    fn and_distributes_over_or() {
        let spec = Specification::account_id("acme")
            .and(Specification::equals("role", "admin").or(Specification::equals("role", "owner")));
        let query = build(&spec);
        assert!(matches!(query, FirestoreQuery::Union(ref parts) if parts.len() == 2));
        assert_eq!(
            triples(&query),
            vec![
                vec![json!(["account_id", "==", "acme"]), json!(["role", "==", "admin"])],
                vec![json!(["account_id", "==", "acme"]), json!(["role", "==", "owner"])],
            ]
        );
    }

    #[test]
    fn select_all_and_match_nothing() {
        assert_eq!(FirestoreSpecificationBuilder.build(None), Ok(FirestoreQuery::All));
        assert_eq!(build(&Specification::And(vec![])), FirestoreQuery::All);
        assert_eq!(build(&Specification::Empty), FirestoreQuery::All);
        assert_eq!(build(&Specification::Or(vec![])), FirestoreQuery::Union(vec![]));
        assert_eq!(build(&Specification::id("1").or(Specification::Empty)), FirestoreQuery::All);
        assert!(build(&Specification::Or(vec![])).fragments().is_empty());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn unsupported_variants_are_refused() {
        let regex = Specification::matches("name", "a.*").unwrap();
        assert!(FirestoreSpecificationBuilder.build(Some(&regex)).is_err());

        let negated_range = Specification::less_than("age", 3).negate();
        let error = FirestoreSpecificationBuilder.build(Some(&negated_range)).unwrap_err();
        assert_eq!(error.backend, "firestore");
        assert_eq!(error.specification, "NOT age < 3");
    }

    #[test]
    fn union_evaluation_agrees_with_specification() {
        let spec = Specification::account_id("acme")
            .and(Specification::contains("tags", "ops").or(Specification::is_none("deleted_at").negate()));
        let query = build(&spec);
        let candidates = [
            json!({"account_id": "acme", "tags": ["ops"]}),
            json!({"account_id": "acme", "tags": [], "deleted_at": "2024"}),
            json!({"account_id": "acme", "tags": []}),
            json!({"account_id": "globex", "tags": ["ops"]}),
        ];
        for candidate in &candidates {
            assert_eq!(query.matches(candidate), spec.is_satisfied_by(candidate), "{candidate}");
        }
    }

    #[test]
    fn missing_fields_follow_specification_semantics() {
        let spec = Specification::not_equals("email", "a@acme.test");
        let filter = FieldFilter::new("email", "!=", json!("a@acme.test"));
        let without_email = json!({"id": "1"});
        assert!(spec.is_satisfied_by(&without_email));
        assert!(filter.matches(&without_email));

        let not_in = FieldFilter::new("email", "not-in", json!(["a@acme.test"]));
        assert!(not_in.matches(&without_email));
    }
}

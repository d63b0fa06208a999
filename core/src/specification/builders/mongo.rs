//! Mongo filter document builder.

use super::{SpecificationBuilder, SpecificationNotMappedError, escape_regex};
use crate::specification::Specification;
use serde_json::{Map, Value, json};

/// Builds Mongo query documents (`{"age": {"$gte": 18}}`).
///
/// Values are always wrapped in an operator (`$eq` for equality), so an object
/// value is compared literally instead of being read as an operator document.
/// `Contains` on a string becomes an escaped `$regex` substring match; on any
/// other value it becomes an `$elemMatch` over array fields. `Not` is
/// expressed with `$nor` so it can wrap any document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoSpecificationBuilder;

impl MongoSpecificationBuilder {
    fn operator(field: &str, operator: &str, value: &Value) -> Value {
        let mut inner = Map::new();
        inner.insert(operator.to_string(), value.clone());
        let mut outer = Map::new();
        outer.insert(field.to_string(), Value::Object(inner));
        Value::Object(outer)
    }

    fn translate(self, spec: &Specification) -> Result<Value, SpecificationNotMappedError> {
        let all = |children: &[Specification]| -> Result<Vec<Value>, SpecificationNotMappedError> {
            children.iter().map(|child| self.translate(child)).collect()
        };

        Ok(match spec {
            Specification::Equals { field, value } => Self::operator(field, "$eq", value),
            Specification::NotEquals { field, value } => Self::operator(field, "$ne", value),
            Specification::LessThan { field, value } => Self::operator(field, "$lt", value),
            Specification::LessThanEqual { field, value } => Self::operator(field, "$lte", value),
            Specification::GreaterThan { field, value } => Self::operator(field, "$gt", value),
            Specification::GreaterThanEqual { field, value } => Self::operator(field, "$gte", value),
            Specification::In { field, values } => {
                Self::operator(field, "$in", &Value::Array(values.clone()))
            },
            Specification::Contains { field, value } => match value {
                Value::String(needle) => Self::operator(
                    field,
                    "$regex",
                    &Value::String(format!(".*{}.*", escape_regex(needle))),
                ),
                other => Self::operator(field, "$elemMatch", &json!({ "$eq": other })),
            },
            Specification::Matches { field, pattern } => {
                Self::operator(field, "$regex", &Value::String(format!("^(?:{})", pattern.as_str())))
            },
            Specification::IsNone { field } => Self::operator(field, "$eq", &Value::Null),
            Specification::And(children) if children.is_empty() => json!({}),
            Specification::And(children) => json!({ "$and": all(children)? }),
            Specification::Or(children) if children.is_empty() => json!({ "$expr": false }),
            Specification::Or(children) => json!({ "$or": all(children)? }),
            Specification::Not(child) => json!({ "$nor": [self.translate(child)?] }),
            Specification::Empty => json!({}),
            Specification::Predicate(_) => {
                return Err(SpecificationNotMappedError::new(self.backend(), spec));
            },
        })
    }
}

impl SpecificationBuilder for MongoSpecificationBuilder {
    type Query = Value;

    fn backend(&self) -> &'static str {
        "mongo"
    }

    fn build(&self, specification: Option<&Specification>) -> Result<Value, SpecificationNotMappedError> {
        specification.map_or_else(|| Ok(json!({})), |spec| self.translate(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(spec: &Specification) -> Value {
        MongoSpecificationBuilder.build(Some(spec)).unwrap_or(Value::Null)
    }

    #[test]
    fn none_is_empty_document() {
        assert_eq!(MongoSpecificationBuilder.build(None), Ok(json!({})));
        assert_eq!(build(&Specification::Empty), json!({}));
        assert_eq!(build(&Specification::And(vec![])), json!({}));
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(build(&Specification::equals("name", "ada")), json!({"name": {"$eq": "ada"}}));
        assert_eq!(build(&Specification::not_equals("name", "ada")), json!({"name": {"$ne": "ada"}}));
        assert_eq!(build(&Specification::less_than("age", 5)), json!({"age": {"$lt": 5}}));
        assert_eq!(build(&Specification::less_than_equal("age", 5)), json!({"age": {"$lte": 5}}));
        assert_eq!(build(&Specification::greater_than("age", 5)), json!({"age": {"$gt": 5}}));
        assert_eq!(build(&Specification::greater_than_equal("age", 5)), json!({"age": {"$gte": 5}}));
        assert_eq!(build(&Specification::is_in("age", [1, 2])), json!({"age": {"$in": [1, 2]}}));
        assert_eq!(build(&Specification::is_none("age")), json!({"age": {"$eq": null}}));
    }

    #[test]
    fn contains_escapes_regex_metacharacters() {
        assert_eq!(
            build(&Specification::contains("name", "a.b(c)")),
            json!({"name": {"$regex": r".*a\.b\(c\).*"}})
        );
        assert_eq!(
            build(&Specification::contains("tags", 3)),
            json!({"tags": {"$elemMatch": {"$eq": 3}}})
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn matches_keeps_pattern_and_anchors_it() {
        let spec = Specification::matches("name", "a.+").unwrap();
        assert_eq!(build(&spec), json!({"name": {"$regex": "^(?:a.+)"}}));
    }

    #[test]
    fn composites() {
        let spec = Specification::object_of_account("1", "acme")
            .or(Specification::equals("public", true).negate());
        assert_eq!(
            build(&spec),
            json!({"$or": [
                {"$and": [{"account_id": {"$eq": "acme"}}, {"id": {"$eq": "1"}}]},
                {"$nor": [{"public": {"$eq": true}}]}
            ]})
        );
        assert_eq!(build(&Specification::Or(vec![])), json!({"$expr": false}));
    }

    #[test]
    fn object_values_are_compared_literally() {
        let spec = Specification::equals("name", json!({"$ne": null}));
        assert_eq!(build(&spec), json!({"name": {"$eq": {"$ne": null}}}));
        assert!(!spec.is_satisfied_by(&json!({"name": "bob"})));

        let spec = Specification::contains("tags", json!({"$gt": 0}));
        assert_eq!(build(&spec), json!({"tags": {"$elemMatch": {"$eq": {"$gt": 0}}}}));
    }

    #[test]
    fn predicate_is_not_mapped() {
        let spec = Specification::predicate("custom", |_| true).negate();
        let result = MongoSpecificationBuilder.build(Some(&spec));
        assert!(matches!(result, Err(ref e) if e.backend == "mongo"));
    }
}

//! ORM filter builder (Django-style field lookups).

use super::{SpecificationBuilder, SpecificationNotMappedError};
use crate::entity::FieldAccess;
use crate::specification::Specification;
use regex::Regex;
use serde_json::Value;
use std::fmt;

/// A tree of ORM lookups, equivalent to composed Django `Q` objects.
#[derive(Debug, Clone, PartialEq)]
pub enum OrmFilter {
    /// No filter (`Q()`)
    All,
    /// Matches nothing (`Q(pk__in=[])`)
    Nothing,
    /// A single `field__lookup=value` condition
    Lookup {
        /// Field name with optional `__lookup` suffix
        lookup: String,
        /// Right-hand side
        value: Value,
    },
    /// `Q(..) & Q(..)`
    And(Vec<OrmFilter>),
    /// `Q(..) | Q(..)`
    Or(Vec<OrmFilter>),
    /// `~Q(..)`
    Not(Box<OrmFilter>),
}

impl OrmFilter {
    fn lookup(field: &str, suffix: Option<&str>, value: Value) -> Self {
        let lookup = match suffix {
            Some(suffix) => format!("{field}__{suffix}"),
            None => field.to_string(),
        };
        Self::Lookup { lookup, value }
    }

    /// Evaluate the lookups in-process with the ORM's semantics.
    ///
    /// Used to check repository results and builder output against the
    /// specification they came from.
    #[must_use]
    pub fn matches(&self, candidate: &dyn FieldAccess) -> bool {
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::Lookup { lookup, value } => {
                let (field, suffix) = match lookup.split_once("__") {
                    Some((field, suffix)) => (field, Some(suffix)),
                    None => (lookup.as_str(), None),
                };
                let spec = match suffix {
                    None | Some("exact") => Specification::equals(field, value.clone()),
                    Some("lt") => Specification::less_than(field, value.clone()),
                    Some("lte") => Specification::less_than_equal(field, value.clone()),
                    Some("gt") => Specification::greater_than(field, value.clone()),
                    Some("gte") => Specification::greater_than_equal(field, value.clone()),
                    Some("in") => Specification::In {
                        field: field.to_string(),
                        values: value.as_array().cloned().unwrap_or_default(),
                    },
                    Some("contains") => Specification::contains(field, value.clone()),
                    Some("regex") => {
                        let Some(Ok(pattern)) = value.as_str().map(Regex::new) else {
                            return false;
                        };
                        return matches!(candidate.field(field), Some(Value::String(text)) if pattern.is_match(&text));
                    },
                    Some("isnull") => {
                        let spec = Specification::is_none(field);
                        if value.as_bool().unwrap_or(true) { spec } else { spec.negate() }
                    },
                    Some(_) => return false,
                };
                spec.is_satisfied_by(candidate)
            },
            Self::And(filters) => filters.iter().all(|filter| filter.matches(candidate)),
            Self::Or(filters) => filters.iter().any(|filter| filter.matches(candidate)),
            Self::Not(filter) => !filter.matches(candidate),
        }
    }
}

impl fmt::Display for OrmFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, filters: &[OrmFilter], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (index, filter) in filters.iter().enumerate() {
                if index > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{filter}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::All => write!(f, "Q()"),
            Self::Nothing => write!(f, "Q(pk__in=[])"),
            Self::Lookup { lookup, value } => write!(f, "Q({lookup}={value})"),
            Self::And(filters) => join(f, filters, "&"),
            Self::Or(filters) => join(f, filters, "|"),
            Self::Not(filter) => write!(f, "~{filter}"),
        }
    }
}

/// Builds [`OrmFilter`] trees.
///
/// The ORM parameterises lookup values itself, so `contains` values are
/// passed through unescaped. `__regex` searches anywhere in the value, so
/// `Matches` anchors its pattern as `^(?:pattern)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrmSpecificationBuilder;

impl OrmSpecificationBuilder {
    fn translate(self, spec: &Specification) -> Result<OrmFilter, SpecificationNotMappedError> {
        Ok(match spec {
            Specification::Equals { field, value } => OrmFilter::lookup(field, None, value.clone()),
            Specification::NotEquals { field, value } => {
                OrmFilter::Not(Box::new(OrmFilter::lookup(field, None, value.clone())))
            },
            Specification::LessThan { field, value } => {
                OrmFilter::lookup(field, Some("lt"), value.clone())
            },
            Specification::LessThanEqual { field, value } => {
                OrmFilter::lookup(field, Some("lte"), value.clone())
            },
            Specification::GreaterThan { field, value } => {
                OrmFilter::lookup(field, Some("gt"), value.clone())
            },
            Specification::GreaterThanEqual { field, value } => {
                OrmFilter::lookup(field, Some("gte"), value.clone())
            },
            Specification::In { field, values } => {
                OrmFilter::lookup(field, Some("in"), Value::Array(values.clone()))
            },
            Specification::Contains { field, value } => {
                OrmFilter::lookup(field, Some("contains"), value.clone())
            },
            Specification::Matches { field, pattern } => {
                OrmFilter::lookup(field, Some("regex"), Value::from(format!("^(?:{})", pattern.as_str())))
            },
            Specification::IsNone { field } => OrmFilter::lookup(field, Some("isnull"), Value::Bool(true)),
            Specification::And(children) => {
                let filters = children
                    .iter()
                    .map(|child| self.translate(child))
                    .collect::<Result<Vec<_>, _>>()?;
                let filters: Vec<_> = filters.into_iter().filter(|f| *f != OrmFilter::All).collect();
                match filters.len() {
                    0 => OrmFilter::All,
                    _ => OrmFilter::And(filters),
                }
            },
            Specification::Or(children) => {
                if children.is_empty() {
                    return Ok(OrmFilter::Nothing);
                }
                OrmFilter::Or(
                    children
                        .iter()
                        .map(|child| self.translate(child))
                        .collect::<Result<_, _>>()?,
                )
            },
            Specification::Not(child) => OrmFilter::Not(Box::new(self.translate(child)?)),
            Specification::Empty => OrmFilter::All,
            Specification::Predicate(_) => {
                return Err(SpecificationNotMappedError::new(self.backend(), spec));
            },
        })
    }
}

impl SpecificationBuilder for OrmSpecificationBuilder {
    type Query = OrmFilter;

    fn backend(&self) -> &'static str {
        "orm"
    }

    fn build(
        &self,
        specification: Option<&Specification>,
    ) -> Result<OrmFilter, SpecificationNotMappedError> {
        specification.map_or(Ok(OrmFilter::All), |spec| self.translate(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(spec: &Specification) -> OrmFilter {
        OrmSpecificationBuilder.build(Some(spec)).unwrap_or(OrmFilter::Nothing)
    }

    #[test]
    fn leaves_map_to_lookups() {
        assert_eq!(
            build(&Specification::greater_than_equal("age", 18)),
            OrmFilter::Lookup {
                lookup: "age__gte".to_string(),
                value: json!(18)
            }
        );
        assert_eq!(build(&Specification::equals("name", "ada")).to_string(), r#"Q(name="ada")"#);
        assert_eq!(build(&Specification::less_than("age", 3)).to_string(), "Q(age__lt=3)");
        assert_eq!(build(&Specification::is_in("id", [1, 2])).to_string(), "Q(id__in=[1,2])");
        assert_eq!(build(&Specification::is_none("deleted_at")).to_string(), "Q(deleted_at__isnull=true)");
        assert_eq!(build(&Specification::not_equals("id", 1)).to_string(), "~Q(id=1)");
    }

    #[test]
    fn composites_map_to_q_expressions() {
        let spec = Specification::object_of_account("1", "acme").or(Specification::contains("name", "x"));
        assert_eq!(
            build(&spec).to_string(),
            r#"((Q(account_id="acme") & Q(id="1")) | Q(name__contains="x"))"#
        );
        assert_eq!(build(&Specification::And(vec![])), OrmFilter::All);
        assert_eq!(build(&Specification::Or(vec![])), OrmFilter::Nothing);
        assert_eq!(build(&Specification::Empty), OrmFilter::All);
    }

    #[test]
    fn none_selects_all() {
        assert_eq!(OrmSpecificationBuilder.build(None), Ok(OrmFilter::All));
    }

    #[test]
    fn predicate_is_not_mapped() {
        let spec = Specification::id("1").and(Specification::predicate("custom", |_| true));
        let error = OrmSpecificationBuilder.build(Some(&spec));
        assert!(matches!(error, Err(ref e) if e.backend == "orm" && e.specification.contains("custom")));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn regex_lookup_is_anchored_at_the_start() {
        let spec = Specification::matches("name", "lovelace").unwrap();
        let filter = build(&spec);
        assert_eq!(filter.to_string(), r#"Q(name__regex="^(?:lovelace)")"#);

        let row = json!({"name": "ada lovelace"});
        assert!(!spec.is_satisfied_by(&row));
        assert!(!filter.matches(&row));

        let unanchored = OrmFilter::Lookup {
            lookup: "name__regex".to_string(),
            value: json!("lovelace"),
        };
        assert!(unanchored.matches(&row));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn evaluation_agrees_with_specification() {
        let candidate = json!({"id": "1", "name": "ada", "age": 36, "tags": ["a"]});
        let specs = [
            Specification::equals("name", "ada"),
            Specification::not_equals("age", 36),
            Specification::is_in("age", [1, 36]),
            Specification::contains("tags", "b"),
            Specification::matches("name", "a.a").unwrap(),
            Specification::is_none("age").negate(),
            Specification::less_than("age", 40).and(Specification::greater_than("age", 40)),
        ];
        for spec in &specs {
            assert_eq!(build(spec).matches(&candidate), spec.is_satisfied_by(&candidate), "{spec}");
        }
    }
}

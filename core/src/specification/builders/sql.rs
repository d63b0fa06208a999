//! SQL WHERE clause builder.

use super::{SpecificationBuilder, SpecificationNotMappedError, escape_like};
use crate::specification::Specification;
use serde_json::Value;
use std::fmt;

/// A parameterised WHERE clause.
///
/// Identifiers are double-quoted, values are bound positionally through `?`
/// placeholders in the order they appear in `params`. An empty clause selects
/// every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFilter {
    /// Boolean expression without the `WHERE` keyword
    pub clause: String,
    /// Positional parameters for the `?` placeholders
    pub params: Vec<Value>,
}

impl SqlFilter {
    /// The select-all filter.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            clause: String::new(),
            params: Vec::new(),
        }
    }

    /// Whether this filter selects every row.
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.clause.is_empty()
    }

    /// The clause prefixed with `WHERE `, or an empty string for select-all.
    #[must_use]
    pub fn where_clause(&self) -> String {
        if self.is_all() {
            String::new()
        } else {
            format!("WHERE {}", self.clause)
        }
    }

    fn nothing() -> Self {
        Self {
            clause: "1=0".to_string(),
            params: Vec::new(),
        }
    }

    fn compare(field: &str, op: &str, value: &Value) -> Self {
        Self {
            clause: format!("{} {op} ?", quote_identifier(field)),
            params: vec![value.clone()],
        }
    }

    fn null(field: &str, negated: bool) -> Self {
        Self {
            clause: format!("{} IS {}NULL", quote_identifier(field), if negated { "NOT " } else { "" }),
            params: Vec::new(),
        }
    }

    /// Make a leaf false, rather than unknown, when `field` is NULL.
    fn not_null(self, field: &str) -> Self {
        Self {
            clause: format!("({} AND {} IS NOT NULL)", self.clause, quote_identifier(field)),
            params: self.params,
        }
    }

    fn negate(self) -> Self {
        let clause = if self.clause.starts_with('(') {
            format!("NOT {}", self.clause)
        } else {
            format!("NOT ({})", self.clause)
        };
        Self {
            clause,
            params: self.params,
        }
    }

    fn join(filters: Vec<Self>, op: &str) -> Self {
        let mut clauses = Vec::with_capacity(filters.len());
        let mut params = Vec::new();
        for filter in filters {
            clauses.push(filter.clause);
            params.extend(filter.params);
        }
        Self {
            clause: format!("({})", clauses.join(&format!(" {op} "))),
            params,
        }
    }
}

impl fmt::Display for SqlFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clause)
    }
}

/// Quote an identifier, doubling embedded quotes.
fn quote_identifier(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Builds [`SqlFilter`] clauses.
///
/// `Contains` on a string becomes `LIKE ? ESCAPE '\'` with the needle's `%`,
/// `_` and `\` escaped. Element containment and regular expressions are not
/// portable across SQL dialects and are refused.
///
/// A missing field compares as not-equal to any value, so `NotEquals` keeps
/// NULL rows and negated leaves are guarded against NULL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlSpecificationBuilder;

impl SqlSpecificationBuilder {
    /// `negated` is set below a `Not`, where a leaf evaluating to NULL would
    /// stay unknown instead of becoming true; such leaves get a NULL guard.
    fn translate(self, spec: &Specification, negated: bool) -> Result<SqlFilter, SpecificationNotMappedError> {
        let not_mapped = || SpecificationNotMappedError::new(self.backend(), spec);
        let leaf = |field: &str, filter: SqlFilter| if negated { filter.not_null(field) } else { filter };
        let all = |children: &[Specification]| -> Result<Vec<SqlFilter>, SpecificationNotMappedError> {
            children.iter().map(|child| self.translate(child, negated)).collect()
        };

        Ok(match spec {
            Specification::Equals { field, value: Value::Null } | Specification::IsNone { field } => {
                SqlFilter::null(field, false)
            },
            Specification::NotEquals { field, value: Value::Null } => SqlFilter::null(field, true),
            Specification::Equals { field, value } => leaf(field, SqlFilter::compare(field, "=", value)),
            Specification::NotEquals { field, value } => {
                let quoted = quote_identifier(field);
                SqlFilter {
                    clause: format!("({quoted} <> ? OR {quoted} IS NULL)"),
                    params: vec![value.clone()],
                }
            },
            Specification::LessThan { field, value } => leaf(field, SqlFilter::compare(field, "<", value)),
            Specification::LessThanEqual { field, value } => leaf(field, SqlFilter::compare(field, "<=", value)),
            Specification::GreaterThan { field, value } => leaf(field, SqlFilter::compare(field, ">", value)),
            Specification::GreaterThanEqual { field, value } => {
                leaf(field, SqlFilter::compare(field, ">=", value))
            },
            Specification::In { values, .. } if values.is_empty() => SqlFilter::nothing(),
            Specification::In { field, values } => leaf(
                field,
                SqlFilter {
                    clause: format!(
                        "{} IN ({})",
                        quote_identifier(field),
                        vec!["?"; values.len()].join(", ")
                    ),
                    params: values.clone(),
                },
            ),
            Specification::Contains {
                field,
                value: Value::String(needle),
            } => leaf(
                field,
                SqlFilter {
                    clause: format!("{} LIKE ? ESCAPE '\\'", quote_identifier(field)),
                    params: vec![Value::String(format!("%{}%", escape_like(needle)))],
                },
            ),
            Specification::And(children) => {
                let filters: Vec<_> = all(children)?.into_iter().filter(|f| !f.is_all()).collect();
                match filters.len() {
                    0 => SqlFilter::all(),
                    _ => SqlFilter::join(filters, "AND"),
                }
            },
            Specification::Or(children) if children.is_empty() => SqlFilter::nothing(),
            Specification::Or(children) => {
                let filters = all(children)?;
                if filters.iter().any(SqlFilter::is_all) {
                    return Ok(SqlFilter::all());
                }
                SqlFilter::join(filters, "OR")
            },
            Specification::Not(child) => {
                let inner = self.translate(child, true)?;
                if inner.is_all() { SqlFilter::nothing() } else { inner.negate() }
            },
            Specification::Empty => SqlFilter::all(),
            Specification::Contains { .. } | Specification::Matches { .. } | Specification::Predicate(_) => {
                return Err(not_mapped());
            },
        })
    }
}

impl SpecificationBuilder for SqlSpecificationBuilder {
    type Query = SqlFilter;

    fn backend(&self) -> &'static str {
        "sql"
    }

    fn build(&self, specification: Option<&Specification>) -> Result<SqlFilter, SpecificationNotMappedError> {
        specification.map_or_else(|| Ok(SqlFilter::all()), |spec| self.translate(spec, false))
    }
}

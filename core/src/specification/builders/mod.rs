//! Backend translation of specifications.
//!
//! Each builder is a stateless, recursive translator from a [`Specification`]
//! tree into one backend's native query representation:
//!
//! | Builder | Output | Select all |
//! |---------|--------|------------|
//! | [`OrmSpecificationBuilder`] | [`OrmFilter`] (Django-style lookups) | `OrmFilter::All` |
//! | [`MongoSpecificationBuilder`] | Mongo filter document | `{}` |
//! | [`FirestoreSpecificationBuilder`] | [`FirestoreQuery`] (field/op/value triples) | `FirestoreQuery::All` |
//! | [`SqlSpecificationBuilder`] | [`SqlFilter`] (parameterised WHERE clause) | empty clause |
//!
//! Translation is closed-world: a variant a backend cannot express fails with
//! [`SpecificationNotMappedError`] instead of being dropped. Values embedded
//! in regex or LIKE fragments are escaped first.

mod firestore;
mod mongo;
mod orm;
mod sql;

pub use firestore::{FieldFilter, FirestoreQuery, FirestoreSpecificationBuilder};
pub use mongo::MongoSpecificationBuilder;
pub use orm::{OrmFilter, OrmSpecificationBuilder};
pub use sql::{SqlFilter, SqlSpecificationBuilder};

use super::Specification;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A specification variant has no translation for a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Specification '{specification}' not mapped to {backend}")]
pub struct SpecificationNotMappedError {
    /// The backend that refused the specification.
    pub backend: &'static str,
    /// Description of the unmapped specification.
    pub specification: String,
}

impl SpecificationNotMappedError {
    /// Build the error for `specification` on `backend`.
    #[must_use]
    pub fn new(backend: &'static str, specification: &Specification) -> Self {
        Self {
            backend,
            specification: specification.to_string(),
        }
    }
}

/// Translates specifications into a backend's query representation.
pub trait SpecificationBuilder {
    /// The native query type produced by this builder.
    type Query;

    /// Backend name used in error messages.
    fn backend(&self) -> &'static str;

    /// Translate `specification`; `None` means "select all".
    ///
    /// # Errors
    ///
    /// Returns [`SpecificationNotMappedError`] if any node of the tree has no
    /// translation for this backend.
    fn build(&self, specification: Option<&Specification>)
    -> Result<Self::Query, SpecificationNotMappedError>;
}

/// Backend families a specification can be lowered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process evaluation (the in-memory repository)
    #[default]
    Memory,
    /// ORM filter lookups
    Orm,
    /// Mongo operator documents
    Mongo,
    /// Firestore field/op/value triples
    Firestore,
    /// SQL WHERE clauses
    Sql,
}

/// The result of translating a specification with a [`Backend`].
#[derive(Debug, Clone)]
pub enum BackendQuery {
    /// Evaluated in-process; carries the specification itself.
    InProcess(Option<Specification>),
    /// ORM lookups
    Orm(OrmFilter),
    /// Mongo filter document
    Mongo(Value),
    /// Firestore fragments
    Firestore(FirestoreQuery),
    /// SQL WHERE clause
    Sql(SqlFilter),
}

impl Backend {
    /// Translate `specification` with this backend's builder.
    ///
    /// # Errors
    ///
    /// Returns [`SpecificationNotMappedError`] if the builder refuses part of
    /// the tree. The in-process backend never fails.
    pub fn build(
        self,
        specification: Option<&Specification>,
    ) -> Result<BackendQuery, SpecificationNotMappedError> {
        Ok(match self {
            Self::Memory => BackendQuery::InProcess(specification.cloned()),
            Self::Orm => BackendQuery::Orm(OrmSpecificationBuilder.build(specification)?),
            Self::Mongo => BackendQuery::Mongo(MongoSpecificationBuilder.build(specification)?),
            Self::Firestore => {
                BackendQuery::Firestore(FirestoreSpecificationBuilder.build(specification)?)
            },
            Self::Sql => BackendQuery::Sql(SqlSpecificationBuilder.build(specification)?),
        })
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Orm => write!(f, "orm"),
            Self::Mongo => write!(f, "mongo"),
            Self::Firestore => write!(f, "firestore"),
            Self::Sql => write!(f, "sql"),
        }
    }
}

/// Error for [`Backend`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown specification backend: {0}")]
pub struct ParseBackendError(String);

impl FromStr for Backend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Ok(Self::Memory),
            "orm" | "django" => Ok(Self::Orm),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "firestore" => Ok(Self::Firestore),
            "sql" | "postgres" => Ok(Self::Sql),
            _ => Err(ParseBackendError(s.to_string())),
        }
    }
}

/// Escape a literal for embedding in a regular expression.
#[must_use]
pub fn escape_regex(literal: &str) -> String {
    regex::escape(literal)
}

/// Escape a literal for embedding in a `LIKE` pattern with `ESCAPE '\'`.
#[must_use]
pub fn escape_like(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

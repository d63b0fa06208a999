//! Repository contract and the in-memory reference implementation.
//!
//! A [`Repository`] is the storage-agnostic CRUD + query contract over a
//! single entity type. Domain code only ever talks to this trait; the concrete
//! storage technology sits behind it.
//!
//! # Contract
//!
//! - `add` stores the entity under its own id, overwriting any previous one.
//! - `update(entity, upsert)` overwrites an existing entity. When the id is
//!   absent it inserts with `upsert = true` and returns `Ok(None)` otherwise.
//! - `remove_one` deletes the first match; no match is not an error.
//! - `find_one` fails with a "not found" error when nothing matches.
//! - `find` yields a finite sequence of matches.
//! - `is_healthy` checks the backend and never fails.
//!
//! Ordering and pagination are a refinement of [`InMemoryRepository`]
//! ([`InMemoryRepository::find_with`]), not part of the universal contract.

use crate::entity::{Entity, short_type_name, sort_order};
use crate::event_store::EventStoreError;
use crate::specification::Specification;
use crate::specification::builders::SpecificationNotMappedError;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No entity matched the specification.
    #[error("{entity} not found for {specification}")]
    NotFound {
        /// Entity type name
        entity: &'static str,
        /// Description of the specification that matched nothing
        specification: String,
    },

    /// A domain-specific error, e.g. a repository's own not-found type.
    #[error(transparent)]
    Domain(Box<dyn std::error::Error + Send + Sync>),

    /// The entity is not an event-sourced aggregate root.
    #[error("Entity {0} is not an event-sourced aggregate root")]
    AggregateRoot(String),

    /// The repository does not offer this operation.
    #[error("{operation} is not supported by {repository}")]
    Unsupported {
        /// Operation name
        operation: &'static str,
        /// Repository type name
        repository: &'static str,
    },

    /// The specification could not be translated for the backend.
    #[error(transparent)]
    NotMapped(#[from] SpecificationNotMappedError),

    /// The event store behind the repository failed.
    #[error("Event store error: {0}")]
    EventStore(Box<EventStoreError>),

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<EventStoreError> for RepositoryError {
    fn from(error: EventStoreError) -> Self {
        Self::EventStore(Box::new(error))
    }
}

impl RepositoryError {
    /// Whether this error means "no entity matched".
    ///
    /// Domain errors installed with [`InMemoryRepository::with_not_found`] are
    /// not recognised; callers match on their own type instead.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A finite sequence of entities returned by [`Repository::find`].
pub type EntityIter<'a, E> = Box<dyn Iterator<Item = E> + Send + 'a>;

/// Storage-agnostic CRUD + query contract for one entity type.
///
/// Implementations are shared across threads (`Send + Sync`) and use interior
/// mutability; every method takes `&self`.
pub trait Repository<E: Entity>: Send + Sync {
    /// Store `entity` under its id, overwriting any existing one.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the backend rejects the write.
    fn add(&self, entity: E) -> Result<E, RepositoryError>;

    /// Overwrite an existing entity.
    ///
    /// Returns `Ok(None)` when the id is absent and `upsert` is false; the
    /// store is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the backend rejects the write.
    fn update(&self, entity: E, upsert: bool) -> Result<Option<E>, RepositoryError>;

    /// Delete the first entity satisfying `specification`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the backend fails.
    fn remove_one(&self, specification: &Specification) -> Result<(), RepositoryError>;

    /// Return the first entity satisfying `specification`.
    ///
    /// # Errors
    ///
    /// Returns the repository's not-found error when nothing matches.
    fn find_one(&self, specification: &Specification) -> Result<E, RepositoryError>;

    /// Return every entity satisfying `specification` (all when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the specification cannot be evaluated by
    /// the backend.
    fn find(&self, specification: Option<&Specification>) -> Result<EntityIter<'_, E>, RepositoryError>;

    /// Probe the backend. Never fails; an unreachable backend reports `false`.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Ordering and pagination for [`InMemoryRepository::find_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindOptions {
    /// Number of matches to skip
    pub offset: usize,
    /// Maximum number of matches to return; `0` means unbounded
    pub limit: usize,
    /// Field to sort by; a leading `-` sorts descending
    pub order_by: String,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 0,
            order_by: "id".to_string(),
        }
    }
}

impl FindOptions {
    /// Sort by `field` (prefix with `-` for descending).
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = field.into();
        self
    }

    /// Skip the first `offset` matches.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Return at most `limit` matches (`0` = unbounded).
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

type NotFoundFactory = Arc<dyn Fn(&Specification) -> RepositoryError + Send + Sync>;

/// Reference repository over an insertion-ordered map keyed by entity id.
///
/// Every query is evaluated in-process with
/// [`Specification::is_satisfied_by`], so all specification variants,
/// including predicates, are supported.
///
/// # Example
///
/// ```
/// use fractal_core::repository::{FindOptions, InMemoryRepository, Repository};
/// use fractal_core::specification::Specification;
/// use serde_json::json;
///
/// # fn main() -> Result<(), fractal_core::repository::RepositoryError> {
/// let repository = InMemoryRepository::<serde_json::Value>::new();
/// repository.add(json!({"id": "1", "name": "b"}))?;
/// repository.add(json!({"id": "2", "name": "a"}))?;
/// repository.add(json!({"id": "3", "name": "c"}))?;
///
/// let ids: Vec<_> = repository
///     .find_with(None, &FindOptions::default().order_by("name"))
///     .map(|user| user["id"].clone())
///     .collect();
/// assert_eq!(ids, vec![json!("2"), json!("1"), json!("3")]);
/// # Ok(())
/// # }
/// ```
pub struct InMemoryRepository<E: Entity> {
    entities: RwLock<IndexMap<String, E>>,
    not_found: NotFoundFactory,
}

impl<E: Entity> InMemoryRepository<E> {
    /// Create an empty repository with the default not-found error.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(IndexMap::new()),
            not_found: Arc::new(|specification: &Specification| RepositoryError::NotFound {
                entity: short_type_name::<E>(),
                specification: specification.to_string(),
            }),
        }
    }

    /// Replace the error returned by `find_one` when nothing matches.
    ///
    /// # Example
    ///
    /// ```
    /// use fractal_core::repository::{InMemoryRepository, Repository, RepositoryError};
    /// use fractal_core::specification::Specification;
    ///
    /// #[derive(Debug, thiserror::Error)]
    /// #[error("no such user")]
    /// struct UserNotFound;
    ///
    /// let users = InMemoryRepository::<serde_json::Value>::new()
    ///     .with_not_found(|_| RepositoryError::Domain(Box::new(UserNotFound)));
    /// let error = users.find_one(&Specification::id("42")).unwrap_err();
    /// assert_eq!(error.to_string(), "no such user");
    /// ```
    #[must_use]
    pub fn with_not_found<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Specification) -> RepositoryError + Send + Sync + 'static,
    {
        self.not_found = Arc::new(factory);
        self
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the repository holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find with ordering and pagination.
    ///
    /// Matches are sorted by `options.order_by` (stable, so ties keep insertion
    /// order), then `[offset..offset + limit]` is returned.
    pub fn find_with(&self, specification: Option<&Specification>, options: &FindOptions) -> EntityIter<'_, E> {
        let (field, descending) = match options.order_by.strip_prefix('-') {
            Some(field) => (field, true),
            None => (options.order_by.as_str(), false),
        };

        let mut matches: Vec<(Value, E)> = {
            let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
            entities
                .values()
                .filter(|entity| specification.is_none_or(|spec| spec.is_satisfied_by(*entity)))
                .map(|entity| (entity.field(field).unwrap_or(Value::Null), entity.clone()))
                .collect()
        };

        matches.sort_by(|(left, _), (right, _)| {
            let order = sort_order(left, right);
            if descending { order.reverse() } else { order }
        });

        let limit = if options.limit == 0 { usize::MAX } else { options.limit };
        Box::new(matches.into_iter().map(|(_, entity)| entity).skip(options.offset).take(limit))
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> fmt::Debug for InMemoryRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("entity", &short_type_name::<E>())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    fn add(&self, entity: E) -> Result<E, RepositoryError> {
        tracing::trace!(entity = short_type_name::<E>(), id = entity.id(), "Adding entity");
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    fn update(&self, entity: E, upsert: bool) -> Result<Option<E>, RepositoryError> {
        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        if !upsert && !entities.contains_key(entity.id()) {
            tracing::trace!(entity = short_type_name::<E>(), id = entity.id(), "Update skipped, id absent");
            return Ok(None);
        }
        tracing::trace!(entity = short_type_name::<E>(), id = entity.id(), upsert, "Updating entity");
        entities.insert(entity.id().to_string(), entity.clone());
        Ok(Some(entity))
    }

    fn remove_one(&self, specification: &Specification) -> Result<(), RepositoryError> {
        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        let position = entities.values().position(|entity| specification.is_satisfied_by(entity));
        if let Some(index) = position {
            // shift_remove keeps the remaining insertion order intact
            if let Some((id, _)) = entities.shift_remove_index(index) {
                tracing::trace!(entity = short_type_name::<E>(), id = %id, "Removed entity");
            }
        }
        Ok(())
    }

    fn find_one(&self, specification: &Specification) -> Result<E, RepositoryError> {
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        entities
            .values()
            .find(|entity| specification.is_satisfied_by(*entity))
            .cloned()
            .ok_or_else(|| (self.not_found)(specification))
    }

    fn find(&self, specification: Option<&Specification>) -> Result<EntityIter<'_, E>, RepositoryError> {
        Ok(self.find_with(specification, &FindOptions::default()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> InMemoryRepository<Value> {
        let repository = InMemoryRepository::new();
        repository.add(json!({"id": "1", "name": "b", "account_id": "acme"})).unwrap();
        repository.add(json!({"id": "2", "name": "a", "account_id": "acme"})).unwrap();
        repository.add(json!({"id": "3", "name": "c", "account_id": "globex"})).unwrap();
        repository
    }

    fn ids(entities: impl Iterator<Item = Value>) -> Vec<String> {
        entities.map(|entity| entity.id().to_string()).collect()
    }

    #[test]
    fn add_then_find_one_by_id() {
        let repository = seeded();
        let found = repository.find_one(&Specification::id("2")).unwrap();
        assert_eq!(found["name"], "a");
        assert_eq!(repository.len(), 3);
    }

    #[test]
    fn add_overwrites_by_id() {
        let repository = seeded();
        repository.add(json!({"id": "1", "name": "z"})).unwrap();
        assert_eq!(repository.len(), 3);
        assert_eq!(repository.find_one(&Specification::id("1")).unwrap()["name"], "z");
    }

    #[test]
    fn update_without_upsert_on_absent_id_is_a_silent_no_op() {
        // Kept as observed behaviour: the write is dropped and reported as None.
        let repository = seeded();
        let result = repository.update(json!({"id": "9", "name": "x"}), false).unwrap();
        assert!(result.is_none());
        assert_eq!(repository.len(), 3);
        assert!(repository.find_one(&Specification::id("9")).is_err());
    }

    #[test]
    fn update_with_upsert_inserts() {
        let repository = seeded();
        let result = repository.update(json!({"id": "9", "name": "x"}), true).unwrap();
        assert_eq!(result, Some(json!({"id": "9", "name": "x"})));
        assert_eq!(repository.len(), 4);
    }

    #[test]
    fn update_existing_overwrites() {
        let repository = seeded();
        let result = repository.update(json!({"id": "2", "name": "q"}), false).unwrap();
        assert!(result.is_some());
        assert_eq!(repository.find_one(&Specification::id("2")).unwrap()["name"], "q");
    }

    #[test]
    fn remove_one_deletes_first_match_only() {
        let repository = seeded();
        repository.remove_one(&Specification::account_id("acme")).unwrap();
        assert_eq!(ids(repository.find(None).unwrap()), vec!["2", "3"]);

        repository.remove_one(&Specification::id("missing")).unwrap();
        assert_eq!(repository.len(), 2);
    }

    #[test]
    fn find_one_reports_not_found() {
        let error = seeded().find_one(&Specification::id("42")).unwrap_err();
        assert!(error.is_not_found());
        assert_eq!(error.to_string(), r#"Value not found for id == "42""#);
    }

    #[test]
    fn find_orders_by_field() {
        let repository = seeded();
        let options = FindOptions::default().order_by("name");
        assert_eq!(ids(repository.find_with(None, &options)), vec!["2", "1", "3"]);

        let options = FindOptions::default().order_by("-name");
        assert_eq!(ids(repository.find_with(None, &options)), vec!["3", "1", "2"]);
    }

    #[test]
    fn find_paginates_after_ordering() {
        let repository = seeded();
        let options = FindOptions::default().order_by("name").offset(1).limit(1);
        assert_eq!(ids(repository.find_with(None, &options)), vec!["1"]);

        let options = FindOptions::default().offset(2);
        assert_eq!(ids(repository.find_with(None, &options)), vec!["3"]);

        let options = FindOptions::default().offset(5);
        assert!(ids(repository.find_with(None, &options)).is_empty());
    }

    #[test]
    fn find_filters_with_specification() {
        let repository = seeded();
        let spec = Specification::account_id("acme");
        assert_eq!(ids(repository.find(Some(&spec)).unwrap()), vec!["1", "2"]);
    }

    #[test]
    fn in_memory_is_always_healthy() {
        assert!(InMemoryRepository::<Value>::new().is_healthy());
        assert!(InMemoryRepository::<Value>::new().is_empty());
    }
}

//! Entity actions.
//!
//! Each action resolves a repository by name from the application context
//! bound to the process context and moves entities between it and the
//! context as JSON values.

use super::{Action, SpecificationSource, application};
use crate::context::ProcessContext;
use crate::error::ProcessError;
use fractal_core::entity::Entity;
use fractal_core::repository::Repository;
use fractal_core::specification::Specification;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

fn repository<E: Entity>(context: &ProcessContext, name: &str) -> Result<Arc<dyn Repository<E>>, ProcessError> {
    Ok(application(context)?.repository::<E>(name)?)
}

fn to_value<E: Serialize>(entity: &E) -> Result<Value, ProcessError> {
    serde_json::to_value(entity).map_err(|e| ProcessError::Serialization(e.to_string()))
}

fn from_value<E: DeserializeOwned>(value: &Value) -> Result<E, ProcessError> {
    E::deserialize(value).map_err(|e| ProcessError::Serialization(e.to_string()))
}

/// Loads the first entity matching a specification into the context.
///
/// Fails with the repository's not-found error when nothing matches.
pub struct FetchEntityAction<E> {
    repository: String,
    specification: SpecificationSource,
    target: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> FetchEntityAction<E> {
    /// Fetch from `repository`, storing the entity under `entity`.
    #[must_use]
    pub fn new(repository: impl Into<String>, specification: impl Into<SpecificationSource>) -> Self {
        Self {
            repository: repository.into(),
            specification: specification.into(),
            target: "entity".to_string(),
            _entity: PhantomData,
        }
    }

    /// Store the entity under `key` instead.
    #[must_use]
    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.target = key.into();
        self
    }
}

impl<E> Action for FetchEntityAction<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let repository = repository::<E>(context, &self.repository)?;
        let entity = repository.find_one(self.specification.resolve(context)?)?;
        context.set(&self.target, to_value(&entity)?)?;
        Ok(())
    }
}

/// Loads every entity matching an optional specification as an array.
pub struct FindEntitiesAction<E> {
    repository: String,
    specification: Option<SpecificationSource>,
    target: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> FindEntitiesAction<E> {
    /// Load every entity of `repository` under `entities`.
    #[must_use]
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            specification: None,
            target: "entities".to_string(),
            _entity: PhantomData,
        }
    }

    /// Only load entities matching `specification`.
    #[must_use]
    pub fn matching(mut self, specification: impl Into<SpecificationSource>) -> Self {
        self.specification = Some(specification.into());
        self
    }

    /// Store the array under `key` instead.
    #[must_use]
    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.target = key.into();
        self
    }
}

impl<E> Action for FindEntitiesAction<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let repository = repository::<E>(context, &self.repository)?;
        let specification = self
            .specification
            .as_ref()
            .map(|source| source.resolve(context))
            .transpose()?;
        let entities = repository
            .find(specification)?
            .map(|entity| to_value(&entity))
            .collect::<Result<Vec<_>, _>>()?;
        context.set(&self.target, Value::Array(entities))?;
        Ok(())
    }
}

/// Adds the entity held at a context key and writes back what the
/// repository returned.
pub struct AddEntityAction<E> {
    repository: String,
    source: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> AddEntityAction<E> {
    /// Add the entity stored under `entity`.
    #[must_use]
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            source: "entity".to_string(),
            _entity: PhantomData,
        }
    }

    /// Read the entity from `key` instead.
    #[must_use]
    pub fn from_key(mut self, key: impl Into<String>) -> Self {
        self.source = key.into();
        self
    }
}

impl<E> Action for AddEntityAction<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let repository = repository::<E>(context, &self.repository)?;
        let entity: E = from_value(context.require(&self.source)?)?;
        let added = repository.add(entity)?;
        context.set(&self.source, to_value(&added)?)?;
        Ok(())
    }
}

/// Updates the entity held at a context key.
///
/// Without upsert an entity the repository does not hold is left alone and
/// the context is unchanged.
pub struct UpdateEntityAction<E> {
    repository: String,
    source: String,
    upsert: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> UpdateEntityAction<E> {
    /// Update the entity stored under `entity`.
    #[must_use]
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            source: "entity".to_string(),
            upsert: false,
            _entity: PhantomData,
        }
    }

    /// Read the entity from `key` instead.
    #[must_use]
    pub fn from_key(mut self, key: impl Into<String>) -> Self {
        self.source = key.into();
        self
    }

    /// Insert the entity when the repository does not hold it.
    #[must_use]
    pub const fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

impl<E> Action for UpdateEntityAction<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let repository = repository::<E>(context, &self.repository)?;
        let entity: E = from_value(context.require(&self.source)?)?;
        match repository.update(entity, self.upsert)? {
            Some(updated) => context.set(&self.source, to_value(&updated)?)?,
            None => tracing::debug!(key = %self.source, "Update skipped: entity not stored"),
        }
        Ok(())
    }
}

/// Removes the first entity matching a specification.
pub struct DeleteEntityAction<E> {
    repository: String,
    specification: SpecificationSource,
    _entity: PhantomData<fn() -> E>,
}

impl<E> DeleteEntityAction<E> {
    /// Delete from `repository`.
    #[must_use]
    pub fn new(repository: impl Into<String>, specification: impl Into<SpecificationSource>) -> Self {
        Self {
            repository: repository.into(),
            specification: specification.into(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Action for DeleteEntityAction<E> {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let repository = repository::<E>(context, &self.repository)?;
        let specification: &Specification = self.specification.resolve(context)?;
        repository.remove_one(specification)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Process;
    use fractal_core::application::ApplicationContext;
    use fractal_core::repository::InMemoryRepository;
    use fractal_core::settings::Settings;
    use serde_json::json;

    fn context() -> (ProcessContext, Arc<InMemoryRepository<Value>>) {
        let users = Arc::new(InMemoryRepository::<Value>::new());
        users.add(json!({"id": "1", "name": "ada", "age": 36})).unwrap();
        users.add(json!({"id": "2", "name": "alan", "age": 41})).unwrap();
        let app = ApplicationContext::builder(Settings::default())
            .repository::<Value>("users", users.clone())
            .build();
        (ProcessContext::new().with_application(Arc::new(app)), users)
    }

    #[test]
    fn fetch_direct_and_named() {
        let (mut ctx, _) = context();
        FetchEntityAction::<Value>::new("users", Specification::id("2"))
            .execute(&mut ctx)
            .unwrap();
        assert_eq!(ctx.get("entity.name"), Some(&json!("alan")));

        ctx.set_specification("first", Specification::id("1")).unwrap();
        FetchEntityAction::<Value>::new("users", "first")
            .store_as("user")
            .execute(&mut ctx)
            .unwrap();
        assert_eq!(ctx.get("user.name"), Some(&json!("ada")));
    }

    #[test]
    fn missing_named_specification_is_a_missing_key() {
        let (mut ctx, _) = context();
        let error = FetchEntityAction::<Value>::new("users", "nope")
            .execute(&mut ctx)
            .unwrap_err();
        assert_eq!(error.kind(), "MissingKeyError");
    }

    #[test]
    fn fetch_without_match_is_not_found() {
        let (mut ctx, _) = context();
        let error = FetchEntityAction::<Value>::new("users", Specification::id("9"))
            .execute(&mut ctx)
            .unwrap_err();
        assert_eq!(error.kind(), "NotFoundError");
    }

    #[test]
    fn find_add_update_delete() {
        let (mut ctx, users) = context();
        ctx.set("entity", json!({"id": "3", "name": "grace", "age": 85})).unwrap();

        let process = Process::new()
            .then(AddEntityAction::<Value>::new("users"))
            .then(FindEntitiesAction::<Value>::new("users").matching(Specification::greater_than("age", 40)))
            .then(DeleteEntityAction::<Value>::new("users", Specification::id("1")));
        process.run_in(&mut ctx).unwrap();

        assert_eq!(ctx.get("entities").and_then(Value::as_array).map(Vec::len), Some(2));
        assert_eq!(users.len(), 2);

        ctx.set("entity.age", 86).unwrap();
        UpdateEntityAction::<Value>::new("users").execute(&mut ctx).unwrap();
        let grace = users.find_one(&Specification::id("3")).unwrap();
        assert_eq!(grace["age"], json!(86));
    }

    #[test]
    fn update_without_upsert_leaves_absent_entities_alone() {
        let (mut ctx, users) = context();
        ctx.set("ghost", json!({"id": "x"})).unwrap();

        UpdateEntityAction::<Value>::new("users")
            .from_key("ghost")
            .execute(&mut ctx)
            .unwrap();
        assert_eq!(users.len(), 2);

        UpdateEntityAction::<Value>::new("users")
            .from_key("ghost")
            .upsert(true)
            .execute(&mut ctx)
            .unwrap();
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn unbound_application_fails() {
        let mut ctx = ProcessContext::new();
        let error = FindEntitiesAction::<Value>::new("users").execute(&mut ctx).unwrap_err();
        assert!(matches!(error, ProcessError::NoApplication));
    }
}

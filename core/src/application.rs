//! Explicit dependency container.
//!
//! An [`ApplicationContext`] is built once at startup and handed to whatever
//! needs shared collaborators: named repositories, the command bus, the event
//! publisher, typed services and the [`Settings`]. There is no global
//! instance; workflows receive it through their process context.
//!
//! # Example
//!
//! ```
//! use fractal_core::application::ApplicationContext;
//! use fractal_core::repository::{InMemoryRepository, Repository};
//! use fractal_core::settings::Settings;
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! let users: Arc<dyn Repository<Value>> = Arc::new(InMemoryRepository::new());
//! let app = ApplicationContext::builder(Settings::default())
//!     .repository("users", users)
//!     .build();
//!
//! let users = app.repository::<Value>("users").unwrap();
//! users.add(json!({"id": "1", "name": "ada"})).unwrap();
//! assert!(app.health()["users"]);
//! ```

use crate::command::CommandBus;
use crate::entity::{Entity, short_type_name};
use crate::projection::{BasicEventPublisher, EventPublisher};
use crate::repository::Repository;
use crate::settings::Settings;
use crate::specification::Specification;
use crate::specification::builders::{BackendQuery, SpecificationNotMappedError};
use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors resolving collaborators from an [`ApplicationContext`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationContextError {
    /// No repository is registered under this name
    #[error("Repository '{0}' is not registered")]
    UnknownRepository(String),

    /// The repository exists but holds another entity type
    #[error("Repository '{name}' holds {actual}, not {requested}")]
    RepositoryType {
        /// Registered name
        name: String,
        /// Entity type it was registered with
        actual: &'static str,
        /// Entity type asked for
        requested: &'static str,
    },

    /// No service of this type is registered
    #[error("Service {0} is not registered")]
    UnknownService(&'static str),
}

struct RepositorySlot {
    entity: &'static str,
    handle: Box<dyn Any + Send + Sync>,
    health: Box<dyn Fn() -> bool + Send + Sync>,
}

/// Shared collaborators for one running application.
pub struct ApplicationContext {
    settings: Settings,
    command_bus: Arc<CommandBus>,
    event_publisher: Arc<dyn EventPublisher>,
    repositories: IndexMap<String, RepositorySlot>,
    services: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl ApplicationContext {
    /// Start building a context around `settings`.
    #[must_use]
    pub fn builder(settings: Settings) -> ApplicationContextBuilder {
        ApplicationContextBuilder {
            settings,
            command_bus: None,
            event_publisher: None,
            repositories: IndexMap::new(),
            services: HashMap::new(),
        }
    }

    /// The settings this context was built with.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The command bus.
    #[must_use]
    pub const fn command_bus(&self) -> &Arc<CommandBus> {
        &self.command_bus
    }

    /// The event publisher.
    #[must_use]
    pub const fn event_publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.event_publisher
    }

    /// The repository registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationContextError::UnknownRepository`] if nothing is
    /// registered under `name`, or [`ApplicationContextError::RepositoryType`]
    /// if it stores another entity type.
    pub fn repository<E: Entity>(&self, name: &str) -> Result<Arc<dyn Repository<E>>, ApplicationContextError> {
        let slot = self
            .repositories
            .get(name)
            .ok_or_else(|| ApplicationContextError::UnknownRepository(name.to_string()))?;
        slot.handle
            .downcast_ref::<Arc<dyn Repository<E>>>()
            .cloned()
            .ok_or_else(|| ApplicationContextError::RepositoryType {
                name: name.to_string(),
                actual: slot.entity,
                requested: short_type_name::<E>(),
            })
    }

    /// Registered repository names, in registration order.
    pub fn repository_names(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    /// The service of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationContextError::UnknownService`] if none was
    /// registered.
    pub fn service<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ApplicationContextError> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|(_, service)| Arc::clone(service).downcast::<T>().ok())
            .ok_or_else(|| ApplicationContextError::UnknownService(short_type_name::<T>()))
    }

    /// Translate `specification` for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`SpecificationNotMappedError`] if the backend cannot express
    /// part of the tree.
    pub fn translate(&self, specification: Option<&Specification>) -> Result<BackendQuery, SpecificationNotMappedError> {
        self.settings.specification_backend.build(specification)
    }

    /// Health of every repository, by name.
    #[must_use]
    pub fn health(&self) -> IndexMap<String, bool> {
        self.repositories
            .iter()
            .map(|(name, slot)| (name.clone(), (slot.health)()))
            .collect()
    }

    /// Whether every repository reports healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.repositories.values().all(|slot| (slot.health)())
    }
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services: Vec<_> = self.services.values().map(|(name, _)| *name).collect();
        f.debug_struct("ApplicationContext")
            .field("settings", &self.settings)
            .field("repositories", &self.repositories.keys().collect::<Vec<_>>())
            .field("services", &services)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ApplicationContext`].
pub struct ApplicationContextBuilder {
    settings: Settings,
    command_bus: Option<Arc<CommandBus>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
    repositories: IndexMap<String, RepositorySlot>,
    services: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl ApplicationContextBuilder {
    /// Use `bus` instead of an empty command bus.
    #[must_use]
    pub fn command_bus(mut self, bus: Arc<CommandBus>) -> Self {
        self.command_bus = Some(bus);
        self
    }

    /// Use `publisher` instead of a publisher without projectors.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Register `repository` as `name`, replacing any previous one.
    #[must_use]
    pub fn repository<E: Entity>(mut self, name: impl Into<String>, repository: Arc<dyn Repository<E>>) -> Self {
        let checked = Arc::clone(&repository);
        self.repositories.insert(
            name.into(),
            RepositorySlot {
                entity: short_type_name::<E>(),
                handle: Box::new(repository),
                health: Box::new(move || checked.is_healthy()),
            },
        );
        self
    }

    /// Register a service, looked up later by its type.
    #[must_use]
    pub fn service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        let service: Arc<dyn Any + Send + Sync> = service;
        self.services.insert(TypeId::of::<T>(), (short_type_name::<T>(), service));
        self
    }

    /// Finish the context.
    #[must_use]
    pub fn build(self) -> ApplicationContext {
        tracing::debug!(
            app = %self.settings.app_name,
            environment = %self.settings.environment,
            backend = %self.settings.specification_backend,
            repositories = self.repositories.len(),
            services = self.services.len(),
            "Application context built"
        );
        ApplicationContext {
            settings: self.settings,
            command_bus: self.command_bus.unwrap_or_default(),
            event_publisher: self
                .event_publisher
                .unwrap_or_else(|| Arc::new(BasicEventPublisher::default())),
            repositories: self.repositories,
            services: self.services,
        }
    }
}

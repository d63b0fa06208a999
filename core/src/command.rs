//! Command bus and command handlers.
//!
//! Commands are plain typed values. Handlers register for the command types
//! they handle; the bus routes a command to every handler registered for its
//! concrete type, in registration order, and collects the non-null results
//! keyed by the handler's type name.
//!
//! # Example
//!
//! ```
//! use fractal_core::command::{Command, CommandBus, CommandBusError, CommandHandler};
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! struct CreateUser {
//!     name: String,
//! }
//!
//! impl Command for CreateUser {}
//!
//! struct CreateUserHandler;
//!
//! impl CommandHandler<CreateUser> for CreateUserHandler {
//!     fn handle(&self, command: &CreateUser) -> Result<Option<Value>, CommandBusError> {
//!         Ok(Some(json!({"created": command.name})))
//!     }
//! }
//!
//! # fn main() -> Result<(), CommandBusError> {
//! let bus = CommandBus::new();
//! bus.add_handler::<CreateUser, _>(Arc::new(CreateUserHandler));
//!
//! let results = bus.handle(&CreateUser { name: "ada".into() })?;
//! assert_eq!(results["CreateUserHandler"], json!({"created": "ada"}));
//! # Ok(())
//! # }
//! ```

use crate::entity::short_type_name;
use crate::repository::RepositoryError;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors that can occur while dispatching commands.
#[derive(Error, Debug)]
pub enum CommandBusError {
    /// A handler rejected the command.
    #[error("Command rejected: {0}")]
    Rejected(String),

    /// An asynchronous handler was reached through the synchronous path.
    #[error("Handler {0} is asynchronous; dispatch with handle_async")]
    AsyncHandler(&'static str),

    /// A repository used by a handler failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Any other handler failure.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Result of one handler invocation; `None` contributes nothing to the bus result.
pub type HandlerResult = Result<Option<Value>, CommandBusError>;

/// Future returned by [`AsyncCommandHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// Marker for values routed through the [`CommandBus`].
pub trait Command: Any + Send + Sync {}

/// Synchronous handler for commands of type `C`.
///
/// A handler type may implement this for several command types and be
/// registered once per type.
pub trait CommandHandler<C: Command>: Send + Sync {
    /// Handle `command`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandBusError`] if the command cannot be handled; dispatch
    /// stops at the first failing handler.
    fn handle(&self, command: &C) -> HandlerResult;
}

/// Asynchronous handler for commands of type `C`.
///
/// # Dyn Compatibility
///
/// Returns an explicit `Pin<Box<dyn Future>>` so handlers can be stored as
/// `Arc<dyn AsyncCommandHandler<C>>`.
pub trait AsyncCommandHandler<C: Command>: Send + Sync {
    /// Handle `command`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandBusError`] if the command cannot be handled.
    fn handle<'a>(&'a self, command: &'a C) -> HandlerFuture<'a>;
}

enum Call<C: Command> {
    Sync(Arc<dyn CommandHandler<C>>),
    Async(Arc<dyn AsyncCommandHandler<C>>),
}

impl<C: Command> Clone for Call<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(handler) => Self::Sync(Arc::clone(handler)),
            Self::Async(handler) => Self::Async(Arc::clone(handler)),
        }
    }
}

struct Registered<C: Command> {
    name: &'static str,
    call: Call<C>,
}

impl<C: Command> Clone for Registered<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            call: self.call.clone(),
        }
    }
}

/// Routes commands to the handlers registered for their type.
///
/// Registration takes `&self`, so a bus shared through `Arc` can be extended
/// after construction.
#[derive(Default)]
pub struct CommandBus {
    // TypeId::of::<C>() -> Vec<Registered<C>>
    handlers: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl CommandBus {
    /// Create a bus with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register<C: Command>(&self, name: &'static str, call: Call<C>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let entry = handlers
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Box::new(Vec::<Registered<C>>::new()));
        if let Some(list) = entry.downcast_mut::<Vec<Registered<C>>>() {
            list.push(Registered { name, call });
        }
        tracing::debug!(command = short_type_name::<C>(), handler = name, "Registered command handler");
    }

    /// Register a synchronous handler for `C`.
    pub fn add_handler<C, H>(&self, handler: Arc<H>)
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        self.register::<C>(short_type_name::<H>(), Call::Sync(handler));
    }

    /// Register an asynchronous handler for `C`.
    pub fn add_async_handler<C, H>(&self, handler: Arc<H>)
    where
        C: Command,
        H: AsyncCommandHandler<C> + 'static,
    {
        self.register::<C>(short_type_name::<H>(), Call::Async(handler));
    }

    fn registered<C: Command>(&self) -> Vec<Registered<C>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers
            .get(&TypeId::of::<C>())
            .and_then(|entry| entry.downcast_ref::<Vec<Registered<C>>>())
            .cloned()
            .unwrap_or_default()
    }

    /// Type names of the handlers registered for `C`, in registration order.
    #[must_use]
    pub fn handler_names<C: Command>(&self) -> Vec<&'static str> {
        self.registered::<C>().iter().map(|registered| registered.name).collect()
    }

    /// Dispatch `command` to its synchronous handlers.
    ///
    /// Returns the non-null results keyed by handler type name. A command
    /// without handlers yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns the first handler error, or [`CommandBusError::AsyncHandler`]
    /// if an asynchronous handler is registered for `C`. Handlers before the
    /// failing one have already run.
    pub fn handle<C: Command>(&self, command: &C) -> Result<IndexMap<String, Value>, CommandBusError> {
        let mut results = IndexMap::new();
        for registered in self.registered::<C>() {
            let result = match &registered.call {
                Call::Sync(handler) => handler.handle(command)?,
                Call::Async(_) => return Err(CommandBusError::AsyncHandler(registered.name)),
            };
            if let Some(value) = result.filter(|value| !value.is_null()) {
                results.insert(registered.name.to_string(), value);
            }
        }
        tracing::debug!(command = short_type_name::<C>(), results = results.len(), "Command handled");
        Ok(results)
    }

    /// Dispatch `command` to every handler, awaiting each in registration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the first handler error.
    pub async fn handle_async<C: Command>(&self, command: &C) -> Result<IndexMap<String, Value>, CommandBusError> {
        let mut results = IndexMap::new();
        for registered in self.registered::<C>() {
            let result = match &registered.call {
                Call::Sync(handler) => handler.handle(command)?,
                Call::Async(handler) => handler.handle(command).await?,
            };
            if let Some(value) = result.filter(|value| !value.is_null()) {
                results.insert(registered.name.to_string(), value);
            }
        }
        tracing::debug!(command = short_type_name::<C>(), results = results.len(), "Command handled");
        Ok(results)
    }
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self.handlers.read().map_or(0, |handlers| handlers.len());
        f.debug_struct("CommandBus")
            .field("command_types", &registered)
            .finish()
    }
}

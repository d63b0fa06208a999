//! # Fractal Core
//!
//! Core traits and types for the Fractal application toolkit.
//!
//! This crate provides the building blocks that let application backends swap
//! persistence and messaging technology without touching domain code:
//!
//! - **Entity**: A record with a stable, caller-assigned identifier
//! - **Specification**: A composable boolean query over entity fields
//! - **Builders**: Translators that lower a specification into a backend query
//! - **Repository**: Storage-agnostic CRUD + query contract
//! - **Command Bus**: Routes typed commands to registered handlers
//! - **Event Sourcing**: Aggregate roots, event store, projectors and publishers
//! - **Application Context**: Explicit dependency container built once at startup
//!
//! ## Example
//!
//! ```
//! use fractal_core::entity::{Entity, FieldAccess, serialized_field};
//! use fractal_core::repository::{InMemoryRepository, Repository};
//! use fractal_core::specification::Specification;
//! use serde::Serialize;
//!
//! #[derive(Clone, Debug, Serialize)]
//! struct User {
//!     id: String,
//!     account_id: String,
//!     name: String,
//! }
//!
//! impl FieldAccess for User {
//!     fn field(&self, name: &str) -> Option<serde_json::Value> {
//!         serialized_field(self, name)
//!     }
//! }
//!
//! impl Entity for User {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let users = InMemoryRepository::<User>::new();
//! users.add(User { id: "1".into(), account_id: "acme".into(), name: "ada".into() })?;
//!
//! let spec = Specification::object_of_account("1", "acme");
//! assert_eq!(users.find_one(&spec)?.name, "ada");
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use serde_json::Value;

/// Aggregate roots and the event-sourced repository
pub mod aggregate;

/// Explicit application context (dependency container)
pub mod application;

/// Command bus and command handlers
pub mod command;

/// Entity contract and dynamic field access
pub mod entity;

/// Domain events and their encodings
pub mod event;

/// Message bus abstraction used by projectors
pub mod event_bus;

/// Event store persisting event streams as messages
pub mod event_store;

/// Event projectors and publishers
pub mod projection;

/// Repository contract and the in-memory reference implementation
pub mod repository;

/// Application settings loaded from the environment
pub mod settings;

/// Specification query algebra and backend builders
pub mod specification;

/// Event stream identification and versioning
pub mod stream;

/// Environment module - Dependency injection traits
///
/// External dependencies that influence behaviour (currently only time) are
/// abstracted behind traits so tests can substitute deterministic versions.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use fractal_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

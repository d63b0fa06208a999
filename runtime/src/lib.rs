//! # Fractal Runtime
//!
//! Process engine for the Fractal toolkit.
//!
//! A [`Process`] is an ordered list of [`Action`]s run against a
//! [`ProcessContext`], a nested key/value state bag that can be deep-merged,
//! copied and frozen. Actions read and write the context, reach repositories,
//! the command bus and the event publisher through the
//! [`ApplicationContext`](fractal_core::application::ApplicationContext)
//! bound to it, and compose into conditionals, loops, parallel branches and
//! sub-processes.
//!
//! ## Core Components
//!
//! - **`ProcessContext`**: Dotted-key state with strict and safe accessors
//! - **Actions**: Value, entity, specification, control-flow and messaging steps
//! - **`Process`**: Sequential, fail-fast interpreter
//! - **`AsyncProcess`**: The same contract with suspendable steps
//!
//! ## Example
//!
//! ```
//! use fractal_core::specification::Specification;
//! use fractal_runtime::actions::{IncreaseValueAction, SetValueAction, WhileAction};
//! use fractal_runtime::Process;
//!
//! let process = Process::new()
//!     .then(SetValueAction::new("x", 1))
//!     .then(WhileAction::new(
//!         Specification::less_than("x", 5),
//!         Process::new().then(IncreaseValueAction::new("x", 1)),
//!     ));
//!
//! let context = process.run(None).unwrap();
//! assert_eq!(context.get("x"), Some(&serde_json::json!(5)));
//! ```

/// Process context
pub mod context;

/// Workflow steps
pub mod actions;

/// Sync and async interpreters
pub mod process;

/// Prometheus metrics for observability
pub mod metrics;

/// Tracing subscriber setup
pub mod telemetry;

pub use actions::{Action, ActionFuture, AsyncAction};
pub use context::{ContextError, ProcessContext};
pub use error::ProcessError;
pub use process::{AsyncProcess, Process, Step};

/// Error types for process execution
pub mod error {
    use crate::context::ContextError;
    use fractal_core::application::ApplicationContextError;
    use fractal_core::command::CommandBusError;
    use fractal_core::projection::ProjectionError;
    use fractal_core::repository::RepositoryError;
    use thiserror::Error;

    /// Errors that abort a process.
    ///
    /// Every variant has a stable [`kind`](ProcessError::kind), the name
    /// `TryExceptAction` and `ParallelAction` record in the context.
    #[derive(Error, Debug)]
    pub enum ProcessError {
        /// A context read or write failed
        #[error(transparent)]
        Context(#[from] ContextError),

        /// A repository call failed
        #[error(transparent)]
        Repository(#[from] RepositoryError),

        /// A collaborator could not be resolved
        #[error(transparent)]
        Application(#[from] ApplicationContextError),

        /// No application context is bound to the process context
        #[error("No application context bound to the process context")]
        NoApplication,

        /// A command failed
        #[error(transparent)]
        Command(#[from] CommandBusError),

        /// Publishing an event failed
        #[error(transparent)]
        Publish(#[from] ProjectionError),

        /// A value had the wrong shape
        #[error("'{key}' is not {expected}")]
        TypeMismatch {
            /// Context key
            key: String,
            /// What was expected there
            expected: &'static str,
        },

        /// An entity could not be converted to or from a context value
        #[error("Serialization failed: {0}")]
        Serialization(String),

        /// A branch did not finish
        #[error("Branch {branch} did not complete: {reason}")]
        Task {
            /// Branch index
            branch: usize,
            /// What happened
            reason: String,
        },

        /// Raised on purpose by a workflow
        #[error("{message}")]
        Raised {
            /// Caller-chosen error type name
            kind: String,
            /// Message
            message: String,
        },
    }

    impl ProcessError {
        /// Create a deliberately raised error.
        #[must_use]
        pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
            Self::Raised {
                kind: kind.into(),
                message: message.into(),
            }
        }

        /// Stable type name of the error.
        #[must_use]
        pub fn kind(&self) -> &str {
            match self {
                Self::Context(error) => error.kind(),
                Self::Repository(error) if error.is_not_found() => "NotFoundError",
                Self::Repository(_) => "RepositoryError",
                Self::Application(_) | Self::NoApplication => "ApplicationContextError",
                Self::Command(_) => "CommandBusError",
                Self::Publish(_) => "EventPublisherError",
                Self::TypeMismatch { .. } => "TypeError",
                Self::Serialization(_) => "SerializationError",
                Self::Task { .. } => "TaskError",
                Self::Raised { kind, .. } => kind,
            }
        }
    }

}

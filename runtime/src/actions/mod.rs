//! Workflow steps.
//!
//! An [`Action`] is one step of a [`Process`](crate::Process): it reads and
//! writes the [`ProcessContext`] in place and either succeeds or fails with a
//! [`ProcessError`]. An [`AsyncAction`] is the same contract for steps that
//! await I/O; it only runs inside an [`AsyncProcess`](crate::AsyncProcess).
//!
//! | Module | Actions |
//! |--------|---------|
//! | [`value`] | set, set many, copy, increase, decrease |
//! | [`entity`] | fetch, find, add, update, delete through a named repository |
//! | [`specification`] | build and store a specification from the context |
//! | [`control`] | if, while, for-each, parallel, sub-process, try/except, raise |
//! | [`messaging`] | commands, queries and event publication, sync and async |

use crate::context::{ContextError, ProcessContext};
use crate::error::ProcessError;
use fractal_core::application::ApplicationContext;
use fractal_core::entity::short_type_name;
use fractal_core::specification::Specification;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub mod control;
pub mod entity;
pub mod messaging;
pub mod specification;
pub mod value;

pub use control::{
    ForEachAction, IfAction, ParallelAction, RaiseExceptionAction, SubProcessAction, TryExceptAction, WhileAction,
};
pub use entity::{AddEntityAction, DeleteEntityAction, FetchEntityAction, FindEntitiesAction, UpdateEntityAction};
pub use messaging::{
    AsyncCommandAction, AsyncParallelAction, AsyncQueryAction, CommandAction, PublishEventAction, QueryAction,
};
pub use specification::SpecificationFactoryAction;
pub use value::{CopyValueAction, DecreaseValueAction, IncreaseValueAction, SetValueAction, SetVariablesAction};

/// Boxed future returned by [`AsyncAction::execute_async`].
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProcessError>> + Send + 'a>>;

/// A function of the current context.
pub type ContextFn<T> = Arc<dyn Fn(&ProcessContext) -> T + Send + Sync>;

/// One synchronous workflow step.
pub trait Action: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    /// Run the step against `context`.
    ///
    /// # Errors
    ///
    /// Any [`ProcessError`]; the process stops and the context keeps every
    /// change made so far.
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError>;
}

/// One workflow step that may suspend.
pub trait AsyncAction: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    /// Run the step against `context`.
    fn execute_async<'a>(&'a self, context: &'a mut ProcessContext) -> ActionFuture<'a>;
}

/// Where an action gets its specification from.
#[derive(Clone, Debug)]
pub enum SpecificationSource {
    /// Given at construction
    Direct(Specification),
    /// Stored in the context under this name (see
    /// [`SpecificationFactoryAction`])
    Named(String),
}

impl SpecificationSource {
    /// The specification to use against `context`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MissingKey`] if a named specification is not
    /// in the context.
    pub fn resolve<'a>(&'a self, context: &'a ProcessContext) -> Result<&'a Specification, ContextError> {
        match self {
            Self::Direct(specification) => Ok(specification),
            Self::Named(name) => context.specification(name),
        }
    }
}

impl From<Specification> for SpecificationSource {
    fn from(specification: Specification) -> Self {
        Self::Direct(specification)
    }
}

impl From<&str> for SpecificationSource {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for SpecificationSource {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// The application context bound to `context`.
pub(crate) fn application(context: &ProcessContext) -> Result<Arc<ApplicationContext>, ProcessError> {
    context.application().cloned().ok_or(ProcessError::NoApplication)
}

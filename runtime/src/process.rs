//! Sync and async interpreters.
//!
//! Both run their steps strictly in declared order, each to completion
//! before the next starts, and stop at the first error. Nothing is rolled
//! back: the context keeps every change made before the failure. Use
//! [`Process::run_in`] / [`AsyncProcess::run_in_async`] to keep that context
//! visible to the caller on error.

use crate::actions::{Action, ActionFuture, AsyncAction};
use crate::context::ProcessContext;
use crate::error::ProcessError;
use crate::metrics::ProcessMetrics;
use std::fmt;
use std::time::Instant;

fn execute_step(action: &dyn Action, context: &mut ProcessContext) -> Result<(), ProcessError> {
    let name = action.name();
    tracing::debug!(action = name, "Executing action");
    let started = Instant::now();
    let result = action.execute(context);
    ProcessMetrics::record_action(name, started.elapsed());
    if result.is_err() {
        ProcessMetrics::record_failure(name);
    }
    result
}

fn finish(result: Result<(), ProcessError>, context: ProcessContext, started: Instant) -> Result<ProcessContext, ProcessError> {
    ProcessMetrics::record_run(started.elapsed(), result.is_ok());
    match result {
        Ok(()) => Ok(context),
        Err(error) => {
            tracing::warn!(kind = error.kind(), %error, "Process aborted");
            Err(error)
        },
    }
}

/// An ordered list of synchronous actions.
///
/// A `Process` is itself an [`Action`], so processes nest.
#[derive(Default)]
pub struct Process {
    actions: Vec<Box<dyn Action>>,
}

impl Process {
    /// Create an empty process.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a process from boxed actions.
    #[must_use]
    pub const fn from_actions(actions: Vec<Box<dyn Action>>) -> Self {
        Self { actions }
    }

    /// Append `action`.
    #[must_use]
    pub fn then(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    /// Append a boxed action.
    pub fn push(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    /// Number of top-level actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the process has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Names of the top-level actions, in order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|action| action.name()).collect()
    }

    /// Run from `context`, or from an empty context, and return the final
    /// context.
    ///
    /// # Errors
    ///
    /// The first action error. The partially updated context is dropped;
    /// see [`run_in`](Self::run_in).
    #[tracing::instrument(skip_all, fields(actions = self.actions.len()))]
    pub fn run(&self, context: Option<ProcessContext>) -> Result<ProcessContext, ProcessError> {
        let started = Instant::now();
        let mut context = context.unwrap_or_default();
        let result = self.run_in(&mut context);
        finish(result, context, started)
    }

    /// Run against `context` in place.
    ///
    /// # Errors
    ///
    /// The first action error; `context` holds every change made before it.
    pub fn run_in(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        self.actions
            .iter()
            .try_for_each(|action| execute_step(action.as_ref(), context))
    }
}

impl Action for Process {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        self.run_in(context)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("actions", &self.action_names())
            .finish()
    }
}

/// One step of an [`AsyncProcess`].
pub enum Step {
    /// Runs to completion without yielding
    Sync(Box<dyn Action>),
    /// May suspend while it waits
    Async(Box<dyn AsyncAction>),
}

impl Step {
    /// Name of the wrapped action.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync(action) => action.name(),
            Self::Async(action) => action.name(),
        }
    }
}

/// An ordered list of sync and async steps.
///
/// Steps are awaited one after another; sibling steps never overlap. Use
/// [`AsyncParallelAction`](crate::actions::AsyncParallelAction) for
/// concurrency.
///
/// # Examples
///
/// ```
/// use fractal_runtime::actions::{AsyncQueryAction, SetValueAction};
/// use fractal_runtime::AsyncProcess;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let process = AsyncProcess::new()
///     .then(SetValueAction::new("n", 20))
///     .then_async(AsyncQueryAction::new("answer", |ctx| {
///         Box::pin(async move { Ok(json!(ctx.get("n").and_then(|n| n.as_i64()).unwrap_or(0) + 22)) })
///     }));
///
/// let context = process.run_async(None).await.unwrap();
/// assert_eq!(context.get("answer"), Some(&json!(42)));
/// # }
/// ```
#[derive(Default)]
pub struct AsyncProcess {
    steps: Vec<Step>,
}

impl AsyncProcess {
    /// Create an empty process.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a process from steps.
    #[must_use]
    pub const fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Append a synchronous action.
    #[must_use]
    pub fn then(mut self, action: impl Action + 'static) -> Self {
        self.steps.push(Step::Sync(Box::new(action)));
        self
    }

    /// Append an asynchronous action.
    #[must_use]
    pub fn then_async(mut self, action: impl AsyncAction + 'static) -> Self {
        self.steps.push(Step::Async(Box::new(action)));
        self
    }

    /// Number of top-level steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the process has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run from `context`, or from an empty context, and return the final
    /// context.
    ///
    /// # Errors
    ///
    /// The first step error. The partially updated context is dropped;
    /// see [`run_in_async`](Self::run_in_async).
    #[tracing::instrument(skip_all, fields(steps = self.steps.len()))]
    pub async fn run_async(&self, context: Option<ProcessContext>) -> Result<ProcessContext, ProcessError> {
        let started = Instant::now();
        let mut context = context.unwrap_or_default();
        let result = self.run_in_async(&mut context).await;
        finish(result, context, started)
    }

    /// Run against `context` in place.
    ///
    /// The returned future fails with the first step error; `context` holds
    /// every change made before it.
    pub fn run_in_async<'a>(&'a self, context: &'a mut ProcessContext) -> ActionFuture<'a> {
        Box::pin(async move {
            for step in &self.steps {
                match step {
                    Step::Sync(action) => execute_step(action.as_ref(), context)?,
                    Step::Async(action) => {
                        let name = action.name();
                        tracing::debug!(action = name, "Executing async action");
                        let started = Instant::now();
                        let result = action.execute_async(context).await;
                        ProcessMetrics::record_action(name, started.elapsed());
                        if result.is_err() {
                            ProcessMetrics::record_failure(name);
                        }
                        result?;
                    },
                }
            }
            Ok(())
        })
    }
}

impl AsyncAction for AsyncProcess {
    fn execute_async<'a>(&'a self, context: &'a mut ProcessContext) -> ActionFuture<'a> {
        self.run_in_async(context)
    }
}

impl fmt::Debug for AsyncProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.steps.iter().map(Step::name).collect();
        f.debug_struct("AsyncProcess").field("steps", &names).finish()
    }
}

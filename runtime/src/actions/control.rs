//! Control-flow actions.
//!
//! Branch bodies are [`Process`]es running in the same context as the
//! enclosing step, so their changes are visible to everything after them.
//! [`ParallelAction`] is the exception: each branch works on its own copy
//! and only the keys a branch changed are merged back.

use super::{Action, ContextFn, SpecificationSource};
use crate::context::ProcessContext;
use crate::error::ProcessError;
use crate::metrics::ProcessMetrics;
use crate::process::Process;
use serde_json::{Value, json};
use std::sync::Arc;
use std::thread;

/// Context key collecting errors of failed parallel branches.
pub const PARALLEL_ERRORS_KEY: &str = "parallel_errors";
/// Context key receiving the caught error's type in [`TryExceptAction`].
pub const ERROR_TYPE_KEY: &str = "error_type";
/// Context key receiving the caught error's message in [`TryExceptAction`].
pub const ERROR_MESSAGE_KEY: &str = "error_message";

/// Runs one of two bodies depending on a specification evaluated against
/// the context.
pub struct IfAction {
    condition: SpecificationSource,
    then: Process,
    otherwise: Option<Process>,
}

impl IfAction {
    /// Run `then` when `condition` holds.
    #[must_use]
    pub fn new(condition: impl Into<SpecificationSource>, then: Process) -> Self {
        Self {
            condition: condition.into(),
            then,
            otherwise: None,
        }
    }

    /// Run `otherwise` when `condition` does not hold.
    #[must_use]
    pub fn otherwise(mut self, otherwise: Process) -> Self {
        self.otherwise = Some(otherwise);
        self
    }
}

impl Action for IfAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let holds = self.condition.resolve(context)?.is_satisfied_by(context);
        match (holds, &self.otherwise) {
            (true, _) => self.then.run_in(context),
            (false, Some(otherwise)) => otherwise.run_in(context),
            (false, None) => Ok(()),
        }
    }
}

/// Repeats a body while a specification holds.
///
/// The condition is evaluated before every iteration against the context
/// as the body left it.
pub struct WhileAction {
    condition: SpecificationSource,
    body: Process,
}

impl WhileAction {
    /// Run `body` while `condition` holds.
    #[must_use]
    pub fn new(condition: impl Into<SpecificationSource>, body: Process) -> Self {
        Self {
            condition: condition.into(),
            body,
        }
    }
}

impl Action for WhileAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let mut iterations = 0_usize;
        while self.condition.resolve(context)?.is_satisfied_by(context) {
            self.body.run_in(context)?;
            iterations += 1;
        }
        tracing::trace!(iterations, "Loop finished");
        Ok(())
    }
}

enum Items {
    Literal(Vec<Value>),
    Named(String),
    Computed(ContextFn<Vec<Value>>),
}

/// Runs a body once per item, with the item bound under a context key.
///
/// Changes made by one iteration are visible to the next.
///
/// # Examples
///
/// ```
/// use fractal_runtime::actions::{ForEachAction, SetValueAction};
/// use fractal_runtime::{Process, ProcessContext};
/// use serde_json::json;
///
/// let sum = SetValueAction::computed("sum", |ctx| {
///     let sum = ctx.get_or("sum", json!(0)).as_i64().unwrap_or(0);
///     json!(sum + ctx.get_or("item", json!(0)).as_i64().unwrap_or(0))
/// });
/// let process = Process::new().then(ForEachAction::over_key("numbers", Process::new().then(sum)));
///
/// let context = ProcessContext::from_pairs([("numbers", json!([1, 2, 3]))]).unwrap();
/// let context = process.run(Some(context)).unwrap();
/// assert_eq!(context.get("sum"), Some(&json!(6)));
/// ```
pub struct ForEachAction {
    items: Items,
    item_key: String,
    body: Process,
}

impl ForEachAction {
    fn with_items(items: Items, body: Process) -> Self {
        Self {
            items,
            item_key: "item".to_string(),
            body,
        }
    }

    /// Iterate over literal values.
    #[must_use]
    pub fn over(items: impl IntoIterator<Item = Value>, body: Process) -> Self {
        Self::with_items(Items::Literal(items.into_iter().collect()), body)
    }

    /// Iterate over the array stored at `key`.
    #[must_use]
    pub fn over_key(key: impl Into<String>, body: Process) -> Self {
        Self::with_items(Items::Named(key.into()), body)
    }

    /// Iterate over what `items` returns when the action runs.
    #[must_use]
    pub fn computed<F>(items: F, body: Process) -> Self
    where
        F: Fn(&ProcessContext) -> Vec<Value> + Send + Sync + 'static,
    {
        Self::with_items(Items::Computed(Arc::new(items)), body)
    }

    /// Bind each item under `key` instead of `item`.
    #[must_use]
    pub fn item_key(mut self, key: impl Into<String>) -> Self {
        self.item_key = key.into();
        self
    }
}

impl Action for ForEachAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let items = match &self.items {
            Items::Literal(items) => items.clone(),
            Items::Named(key) => match context.require(key)? {
                Value::Array(items) => items.clone(),
                _ => {
                    return Err(ProcessError::TypeMismatch {
                        key: key.clone(),
                        expected: "an array",
                    });
                },
            },
            Items::Computed(items) => items(context),
        };

        for item in items {
            context.set(&self.item_key, item)?;
            self.body.run_in(context)?;
        }
        Ok(())
    }
}

/// Runs branches concurrently, one thread per branch.
///
/// Every branch starts from its own copy of the context. When all branches
/// are done, the keys each successful branch changed are merged back in
/// branch order. A failing branch does not stop its siblings or the process:
/// its error is appended to `parallel_errors` as
/// `{"branch": index, "type": kind, "message": text}` and its changes are
/// dropped.
pub struct ParallelAction {
    branches: Vec<Process>,
}

impl ParallelAction {
    /// Run `branches` concurrently.
    #[must_use]
    pub const fn new(branches: Vec<Process>) -> Self {
        Self { branches }
    }
}

impl Action for ParallelAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let base = context.copy();
        let outcomes = thread::scope(|scope| {
            let handles: Vec<_> = self
                .branches
                .iter()
                .map(|branch| {
                    let base = &base;
                    scope.spawn(move || {
                        let mut local = base.copy();
                        branch.run_in(&mut local).map(|()| local.changes_since(base))
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(branch, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ProcessError::Task {
                            branch,
                            reason: "panicked".to_string(),
                        })
                    })
                })
                .collect::<Vec<_>>()
        });
        merge_branches(context, outcomes)
    }
}

/// Merge successful branch deltas into `context` and record failures.
///
/// Errors a branch recorded itself, from a nested parallel step, are
/// appended rather than merged so sibling branches do not overwrite them.
pub(crate) fn merge_branches(
    context: &mut ProcessContext,
    outcomes: Vec<Result<ProcessContext, ProcessError>>,
) -> Result<(), ProcessError> {
    let inherited = context
        .get(PARALLEL_ERRORS_KEY)
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let mut errors = Vec::new();
    for (branch, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(mut changes) => {
                if let Some(Value::Array(recorded)) = changes.remove(PARALLEL_ERRORS_KEY)? {
                    errors.extend(recorded.into_iter().skip(inherited));
                }
                context.update(changes)?;
            },
            Err(error) => {
                tracing::warn!(branch, kind = error.kind(), %error, "Parallel branch failed");
                ProcessMetrics::record_parallel_error();
                errors.push(json!({
                    "branch": branch,
                    "type": error.kind(),
                    "message": error.to_string(),
                }));
            },
        }
    }

    if !errors.is_empty() {
        let mut recorded = match context.get(PARALLEL_ERRORS_KEY) {
            Some(Value::Array(existing)) => existing.clone(),
            _ => Vec::new(),
        };
        recorded.extend(errors);
        context.set(PARALLEL_ERRORS_KEY, Value::Array(recorded))?;
    }
    Ok(())
}

/// Embeds another process, sharing the context.
pub struct SubProcessAction {
    process: Process,
}

impl SubProcessAction {
    /// Run `process` as one step.
    #[must_use]
    pub const fn new(process: Process) -> Self {
        Self { process }
    }
}

impl Action for SubProcessAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        self.process.run_in(context)
    }
}

/// Runs a body and, if it fails, a fallback.
///
/// The caught error's kind and message are written to `error_type` and
/// `error_message` before the fallback runs. Changes the body made before
/// failing are kept.
pub struct TryExceptAction {
    body: Process,
    fallback: Process,
}

impl TryExceptAction {
    /// Run `body`, then `fallback` on failure.
    #[must_use]
    pub const fn new(body: Process, fallback: Process) -> Self {
        Self { body, fallback }
    }
}

impl Action for TryExceptAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let Err(error) = self.body.run_in(context) else {
            return Ok(());
        };
        tracing::debug!(kind = error.kind(), %error, "Caught process error");
        context.set(ERROR_TYPE_KEY, error.kind())?;
        context.set(ERROR_MESSAGE_KEY, error.to_string())?;
        self.fallback.run_in(context)
    }
}

/// Aborts the process with a chosen error kind.
///
/// A computed message, when it yields one, replaces the static message.
pub struct RaiseExceptionAction {
    kind: String,
    message: String,
    computed: Option<ContextFn<Option<String>>>,
}

impl RaiseExceptionAction {
    /// Fail with `kind` and `message`.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            computed: None,
        }
    }

    /// Compute the message from the context at raise time.
    #[must_use]
    pub fn computed_message<F>(mut self, message: F) -> Self
    where
        F: Fn(&ProcessContext) -> Option<String> + Send + Sync + 'static,
    {
        self.computed = Some(Arc::new(message));
        self
    }
}

impl Action for RaiseExceptionAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let message = self
            .computed
            .as_ref()
            .and_then(|compute| compute(context))
            .unwrap_or_else(|| self.message.clone());
        Err(ProcessError::raised(self.kind.clone(), message))
    }
}

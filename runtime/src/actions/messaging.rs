//! Command, query and event actions.
//!
//! Commands and events go through the command bus and event publisher of the
//! bound application context. Queries are plain read-only functions of the
//! context.

use super::control::merge_branches;
use super::{Action, ActionFuture, AsyncAction, ContextFn, application};
use crate::context::ProcessContext;
use crate::error::ProcessError;
use crate::process::AsyncProcess;
use fractal_core::command::Command;
use fractal_core::event::Event;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by async queries.
pub type QueryFuture = Pin<Box<dyn Future<Output = Result<Value, ProcessError>> + Send>>;

fn store_results(
    context: &mut ProcessContext,
    target: Option<&str>,
    results: IndexMap<String, Value>,
) -> Result<(), ProcessError> {
    if let Some(target) = target {
        context.set(target, Value::Object(results.into_iter().collect::<Map<_, _>>()))?;
    }
    Ok(())
}

/// Dispatches a command built from the context on the command bus.
///
/// Handler results, keyed by handler name, are stored when a target key is
/// set.
pub struct CommandAction<C> {
    factory: ContextFn<C>,
    target: Option<String>,
}

impl<C: Command> CommandAction<C> {
    /// Dispatch the command `factory` builds.
    #[must_use]
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ProcessContext) -> C + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            target: None,
        }
    }

    /// Store handler results under `key`.
    #[must_use]
    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.target = Some(key.into());
        self
    }
}

impl<C: Command> Action for CommandAction<C> {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let app = application(context)?;
        let command = (self.factory)(context);
        let results = app.command_bus().handle(&command)?;
        store_results(context, self.target.as_deref(), results)
    }
}

/// Async variant of [`CommandAction`]; async handlers are awaited in
/// registration order.
pub struct AsyncCommandAction<C> {
    factory: ContextFn<C>,
    target: Option<String>,
}

impl<C: Command> AsyncCommandAction<C> {
    /// Dispatch the command `factory` builds.
    #[must_use]
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ProcessContext) -> C + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            target: None,
        }
    }

    /// Store handler results under `key`.
    #[must_use]
    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.target = Some(key.into());
        self
    }
}

impl<C: Command> AsyncAction for AsyncCommandAction<C> {
    fn execute_async<'a>(&'a self, context: &'a mut ProcessContext) -> ActionFuture<'a> {
        Box::pin(async move {
            let app = application(context)?;
            let command = (self.factory)(context);
            let results = app.command_bus().handle_async(&command).await?;
            store_results(context, self.target.as_deref(), results)
        })
    }
}

/// Stores the result of a read-only query under a key.
pub struct QueryAction {
    query: ContextFn<Result<Value, ProcessError>>,
    target: String,
}

impl QueryAction {
    /// Store what `query` returns under `target`.
    #[must_use]
    pub fn new<F>(target: impl Into<String>, query: F) -> Self
    where
        F: Fn(&ProcessContext) -> Result<Value, ProcessError> + Send + Sync + 'static,
    {
        Self {
            query: Arc::new(query),
            target: target.into(),
        }
    }
}

impl Action for QueryAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let result = (self.query)(context)?;
        context.set(&self.target, result)?;
        Ok(())
    }
}

/// Async variant of [`QueryAction`].
///
/// The query receives a copy of the context so the returned future owns
/// everything it reads.
pub struct AsyncQueryAction {
    query: Arc<dyn Fn(ProcessContext) -> QueryFuture + Send + Sync>,
    target: String,
}

impl AsyncQueryAction {
    /// Store what `query` resolves to under `target`.
    #[must_use]
    pub fn new<F>(target: impl Into<String>, query: F) -> Self
    where
        F: Fn(ProcessContext) -> QueryFuture + Send + Sync + 'static,
    {
        Self {
            query: Arc::new(query),
            target: target.into(),
        }
    }
}

impl AsyncAction for AsyncQueryAction {
    fn execute_async<'a>(&'a self, context: &'a mut ProcessContext) -> ActionFuture<'a> {
        Box::pin(async move {
            let result = (self.query)(context.copy()).await?;
            context.set(&self.target, result)?;
            Ok(())
        })
    }
}

/// Publishes events built from the context through the event publisher.
pub struct PublishEventAction {
    factory: ContextFn<Vec<Arc<dyn Event>>>,
}

impl PublishEventAction {
    /// Publish the event `factory` builds.
    #[must_use]
    pub fn new<E, F>(factory: F) -> Self
    where
        E: Event,
        F: Fn(&ProcessContext) -> E + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(move |context| vec![Arc::new(factory(context)) as Arc<dyn Event>]),
        }
    }

    /// Publish every event `factory` builds, in order.
    #[must_use]
    pub fn many<F>(factory: F) -> Self
    where
        F: Fn(&ProcessContext) -> Vec<Arc<dyn Event>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }
}

impl Action for PublishEventAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let app = application(context)?;
        let events = (self.factory)(context);
        tracing::debug!(events = events.len(), "Publishing events");
        app.event_publisher().publish_events(events)?;
        Ok(())
    }
}

/// Runs async branches concurrently on the current task.
///
/// Same merge and error contract as
/// [`ParallelAction`](super::ParallelAction). With a timeout, a branch that
/// has not finished in time is recorded as a `TaskError`; timeouts need a
/// Tokio runtime.
pub struct AsyncParallelAction {
    branches: Vec<AsyncProcess>,
    timeout: Option<Duration>,
}

impl AsyncParallelAction {
    /// Run `branches` concurrently.
    #[must_use]
    pub const fn new(branches: Vec<AsyncProcess>) -> Self {
        Self {
            branches,
            timeout: None,
        }
    }

    /// Give up on branches still running after `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl AsyncAction for AsyncParallelAction {
    fn execute_async<'a>(&'a self, context: &'a mut ProcessContext) -> ActionFuture<'a> {
        Box::pin(async move {
            let base = context.copy();
            let runs = self.branches.iter().enumerate().map(|(branch, process)| {
                let base = &base;
                async move {
                    let mut local = base.copy();
                    let run = process.run_in_async(&mut local);
                    let outcome = match self.timeout {
                        Some(limit) => tokio::time::timeout(limit, run).await.unwrap_or_else(|_| {
                            Err(ProcessError::Task {
                                branch,
                                reason: format!("timed out after {limit:?}"),
                            })
                        }),
                        None => run.await,
                    };
                    outcome.map(|()| local.changes_since(base))
                }
            });
            let outcomes = futures::future::join_all(runs).await;
            merge_branches(context, outcomes)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::actions::control::PARALLEL_ERRORS_KEY;
    use crate::actions::{RaiseExceptionAction, SetValueAction};
    use fractal_core::application::ApplicationContext;
    use fractal_core::command::{
        AsyncCommandHandler, CommandBus, CommandHandler, HandlerFuture, HandlerResult,
    };
    use fractal_core::projection::{BasicEventPublisher, EventProjector, ProjectionError};
    use fractal_core::settings::Settings;
    use fractal_core::stream::StreamId;
    use serde::Serialize;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Instant;

    struct Charge {
        amount: i64,
    }

    impl Command for Charge {}

    struct Billing;

    impl CommandHandler<Charge> for Billing {
        fn handle(&self, command: &Charge) -> HandlerResult {
            Ok(Some(json!({"charged": command.amount})))
        }
    }

    struct Receipts;

    impl AsyncCommandHandler<Charge> for Receipts {
        fn handle<'a>(&'a self, command: &'a Charge) -> HandlerFuture<'a> {
            Box::pin(async move { Ok(Some(json!({"receipt": command.amount}))) })
        }
    }

    #[derive(Debug, Serialize)]
    struct Charged {
        id: String,
    }

    impl Event for Charged {
        fn object_id(&self) -> &str {
            &self.id
        }
    }

    #[derive(Default)]
    struct Seen(Mutex<Vec<String>>);

    impl EventProjector for Seen {
        fn project(&self, stream_id: &StreamId, event: &Arc<dyn Event>) -> Result<(), ProjectionError> {
            self.0.lock().unwrap().push(format!("{stream_id}:{}", event.event_type()));
            Ok(())
        }
    }

    fn context(seen: Arc<Seen>) -> ProcessContext {
        let bus = Arc::new(CommandBus::new());
        bus.add_handler::<Charge, _>(Arc::new(Billing));
        bus.add_async_handler::<Charge, _>(Arc::new(Receipts));
        let app = ApplicationContext::builder(Settings::default())
            .command_bus(bus)
            .event_publisher(Arc::new(BasicEventPublisher::new(vec![seen as Arc<dyn EventProjector>])))
            .build();
        ProcessContext::from_pairs([("amount", json!(7))])
            .unwrap()
            .with_application(Arc::new(app))
    }

    fn amount(ctx: &ProcessContext) -> i64 {
        ctx.get("amount").and_then(Value::as_i64).unwrap_or(0)
    }

    #[test]
    fn sync_command_refuses_async_handlers() {
        let mut ctx = context(Arc::default());
        let error = CommandAction::new(|ctx| Charge { amount: amount(ctx) })
            .execute(&mut ctx)
            .unwrap_err();
        assert_eq!(error.kind(), "CommandBusError");
    }

    #[tokio::test]
    async fn async_command_stores_results_by_handler() {
        let mut ctx = context(Arc::default());
        AsyncCommandAction::new(|ctx| Charge { amount: amount(ctx) })
            .store_as("billing")
            .execute_async(&mut ctx)
            .await
            .unwrap();
        assert_eq!(
            ctx.get("billing"),
            Some(&json!({"Billing": {"charged": 7}, "Receipts": {"receipt": 7}}))
        );
    }

    #[test]
    fn query_stores_its_result() {
        let mut ctx = context(Arc::default());
        QueryAction::new("double", |ctx| Ok(json!(amount(ctx) * 2)))
            .execute(&mut ctx)
            .unwrap();
        assert_eq!(ctx.get("double"), Some(&json!(14)));
    }

    #[tokio::test]
    async fn async_query_reads_a_copy() {
        let mut ctx = context(Arc::default());
        AsyncQueryAction::new("total", |snapshot| {
            Box::pin(async move { Ok(json!(amount(&snapshot) + 1)) })
        })
        .execute_async(&mut ctx)
        .await
        .unwrap();
        assert_eq!(ctx.get("total"), Some(&json!(8)));
    }

    #[test]
    fn publish_goes_through_the_publisher() {
        let seen = Arc::new(Seen::default());
        let mut ctx = context(Arc::clone(&seen));
        PublishEventAction::new(|_| Charged { id: "c-1".to_string() })
            .execute(&mut ctx)
            .unwrap();
        assert_eq!(*seen.0.lock().unwrap(), vec!["c-1:Charged".to_string()]);
        assert_eq!(ctx.get("amount"), Some(&json!(7)));
    }

    struct Nap(Duration);

    impl AsyncAction for Nap {
        fn execute_async<'a>(&'a self, _context: &'a mut ProcessContext) -> ActionFuture<'a> {
            Box::pin(async move {
                tokio::time::sleep(self.0).await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn async_parallel_runs_branches_concurrently() {
        let branch = |key: &str| {
            AsyncProcess::new()
                .then_async(Nap(Duration::from_millis(100)))
                .then(SetValueAction::new(key, true))
        };
        let action = AsyncParallelAction::new(vec![
            branch("a"),
            branch("b"),
            branch("c"),
            AsyncProcess::new().then(RaiseExceptionAction::new("ValueError", "nope")),
        ]);

        let mut ctx = ProcessContext::new();
        let started = Instant::now();
        action.execute_async(&mut ctx).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(ctx.get("a"), Some(&json!(true)));
        assert_eq!(ctx.get("c"), Some(&json!(true)));
        assert_eq!(ctx.get(PARALLEL_ERRORS_KEY).and_then(Value::as_array).map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn async_parallel_times_out_slow_branches() {
        let action = AsyncParallelAction::new(vec![
            AsyncProcess::new().then_async(Nap(Duration::from_secs(5))),
            AsyncProcess::new().then(SetValueAction::new("fast", true)),
        ])
        .with_timeout(Duration::from_millis(50));

        let mut ctx = ProcessContext::new();
        action.execute_async(&mut ctx).await.unwrap();
        assert_eq!(ctx.get("fast"), Some(&json!(true)));
        let errors = ctx.get(PARALLEL_ERRORS_KEY).and_then(Value::as_array).unwrap();
        assert_eq!(errors[0]["type"], json!("TaskError"));
    }
}

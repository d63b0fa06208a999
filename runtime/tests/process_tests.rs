//! Integration tests for processes running against a full application
//! context: repositories, command bus and event publisher.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use fractal_core::application::ApplicationContext;
use fractal_core::command::{Command, CommandBus, CommandHandler, HandlerResult};
use fractal_core::projection::BasicEventPublisher;
use fractal_core::repository::{InMemoryRepository, Repository};
use fractal_core::settings::Settings;
use fractal_core::specification::Specification;
use fractal_runtime::actions::control::{ERROR_MESSAGE_KEY, ERROR_TYPE_KEY};
use fractal_runtime::actions::{
    AsyncCommandAction, AsyncParallelAction, AsyncQueryAction, CommandAction, FetchEntityAction, FindEntitiesAction,
    ForEachAction, IfAction, IncreaseValueAction, ParallelAction, PublishEventAction, SetValueAction,
    SpecificationFactoryAction, TryExceptAction, WhileAction,
};
use fractal_runtime::{Action, ActionFuture, AsyncAction, AsyncProcess, Process, ProcessContext};
use fractal_testing::fixtures::{TestUser, UserRegistered, sample_users};
use fractal_testing::{RecordingProjector, init_test_tracing};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

struct RegisterUser {
    id: String,
    account_id: String,
    name: String,
}

impl Command for RegisterUser {}

struct RegisterUserHandler {
    users: Arc<InMemoryRepository<TestUser>>,
}

impl CommandHandler<RegisterUser> for RegisterUserHandler {
    fn handle(&self, command: &RegisterUser) -> HandlerResult {
        let user = TestUser::new(&command.id, &command.account_id, &command.name, 30);
        self.users.add(user)?;
        Ok(Some(json!({"registered": command.id})))
    }
}

struct Harness {
    context: ProcessContext,
    users: Arc<InMemoryRepository<TestUser>>,
    projector: RecordingProjector,
}

fn harness() -> Harness {
    init_test_tracing();
    let users = Arc::new(InMemoryRepository::<TestUser>::new());
    for user in sample_users() {
        users.add(user).unwrap();
    }

    let bus = Arc::new(CommandBus::new());
    bus.add_handler::<RegisterUser, _>(Arc::new(RegisterUserHandler {
        users: Arc::clone(&users),
    }));

    let projector = RecordingProjector::new();
    let mut publisher = BasicEventPublisher::default();
    publisher.add_projector(Arc::new(projector.clone()));

    let app = ApplicationContext::builder(Settings::default())
        .repository::<TestUser>("users", users.clone())
        .command_bus(bus)
        .event_publisher(Arc::new(publisher))
        .build();

    Harness {
        context: ProcessContext::new().with_application(Arc::new(app)),
        users,
        projector,
    }
}

fn text(ctx: &ProcessContext, key: &str) -> String {
    ctx.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

// ============================================================================
// Sync processes
// ============================================================================

#[test]
fn while_loop_counts_to_five() {
    let process = Process::new()
        .then(SetValueAction::new("x", 1))
        .then(WhileAction::new(
            Specification::less_than("x", 5),
            Process::new().then(IncreaseValueAction::new("x", 1)),
        ));

    let context = process.run(None).unwrap();
    assert_eq!(context.get("x"), Some(&json!(5)));
}

#[test]
fn onboarding_workflow_registers_and_publishes() {
    let Harness {
        context,
        users,
        projector,
    } = harness();
    let context = {
        let mut context = context;
        context.set("request", json!({"id": "5", "account": "acme", "name": "barbara"})).unwrap();
        context
    };

    let register = Process::new()
        .then(
            CommandAction::new(|ctx| RegisterUser {
                id: text(ctx, "request.id"),
                account_id: text(ctx, "request.account"),
                name: text(ctx, "request.name"),
            })
            .store_as("registration"),
        )
        .then(PublishEventAction::new(|ctx| UserRegistered {
            user_id: text(ctx, "request.id"),
            account_id: text(ctx, "request.account"),
            name: text(ctx, "request.name"),
        }));

    let process = Process::new()
        .then(SpecificationFactoryAction::new("specs.account", |ctx| {
            Specification::account_id(ctx.get_or("request.account", Value::Null))
        }))
        .then(
            FindEntitiesAction::<TestUser>::new("users")
                .matching("specs.account")
                .store_as("members"),
        )
        .then(SetValueAction::computed("member_count", |ctx| {
            json!(ctx.get("members").and_then(Value::as_array).map_or(0, Vec::len))
        }))
        .then(IfAction::new(Specification::less_than("member_count", 3), register))
        .then(FetchEntityAction::<TestUser>::new("users", Specification::id("5")).store_as("new_user"));

    let context = process.run(Some(context)).unwrap();

    assert_eq!(context.get("member_count"), Some(&json!(2)));
    assert_eq!(
        context.get("registration"),
        Some(&json!({"RegisterUserHandler": {"registered": "5"}}))
    );
    assert_eq!(context.get("new_user.name"), Some(&json!("barbara")));
    assert_eq!(users.len(), 5);
    assert_eq!(projector.event_types(), vec!["UserRegistered".to_string()]);
}

#[test]
fn failure_keeps_partial_effects() {
    let Harness { mut context, .. } = harness();
    let process = Process::new()
        .then(SetValueAction::new("step", 1))
        .then(FetchEntityAction::<TestUser>::new("users", Specification::id("404")))
        .then(SetValueAction::new("step", 3));

    let error = process.run_in(&mut context).unwrap_err();
    assert_eq!(error.kind(), "NotFoundError");
    assert_eq!(context.get("step"), Some(&json!(1)));
    assert!(!context.contains("entity"));
}

#[test]
fn try_except_records_the_caught_error() {
    let Harness { context, .. } = harness();
    let process = Process::new().then(TryExceptAction::new(
        Process::new().then(FetchEntityAction::<TestUser>::new("users", Specification::id("404"))),
        Process::new().then(SetValueAction::new("recovered", true)),
    ));

    let context = process.run(Some(context)).unwrap();
    assert_eq!(context.get(ERROR_TYPE_KEY), Some(&json!("NotFoundError")));
    assert!(context.get(ERROR_MESSAGE_KEY).is_some());
    assert_eq!(context.get("recovered"), Some(&json!(true)));
}

#[test]
fn for_each_over_found_entities() {
    let Harness { context, .. } = harness();
    let process = Process::new()
        .then(FindEntitiesAction::<TestUser>::new("users").store_as("all"))
        .then(
            ForEachAction::over_key(
                "all",
                Process::new().then(SetValueAction::computed("total_age", |ctx| {
                    let total = ctx.get("total_age").and_then(Value::as_u64).unwrap_or(0);
                    json!(total + ctx.get("user.age").and_then(Value::as_u64).unwrap_or(0))
                })),
            )
            .item_key("user"),
        );

    let context = process.run(Some(context)).unwrap();
    assert_eq!(context.get("total_age"), Some(&json!(36 + 41 + 85 + 28)));
}

#[test]
fn parallel_branches_merge_their_changes() {
    let Harness { context, .. } = harness();
    let branch = |id: &'static str, key: &'static str| {
        Process::new().then(FetchEntityAction::<TestUser>::new("users", Specification::id(id)).store_as(key))
    };
    let process = Process::new().then(ParallelAction::new(vec![
        branch("1", "found.first"),
        branch("3", "found.third"),
        branch("404", "found.missing"),
    ]));

    let context = process.run(Some(context)).unwrap();
    assert_eq!(context.get("found.first.name"), Some(&json!("ada")));
    assert_eq!(context.get("found.third.name"), Some(&json!("grace")));
    assert!(!context.contains("found.missing"));

    let errors = context.get("parallel_errors").and_then(Value::as_array).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["branch"], json!(2));
    assert_eq!(errors[0]["type"], json!("NotFoundError"));
}

#[test]
fn frozen_initial_context_rejects_writes() {
    let initial = ProcessContext::from_pairs([("x", json!(1))]).unwrap().frozen();
    let error = Process::new()
        .then(SetValueAction::new("y", 2))
        .run(Some(initial))
        .unwrap_err();
    assert_eq!(error.kind(), "FrozenContextError");
}

// ============================================================================
// Async processes
// ============================================================================

struct Record {
    label: &'static str,
    delay: Duration,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl AsyncAction for Record {
    fn execute_async<'a>(&'a self, context: &'a mut ProcessContext) -> ActionFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push(self.label);
            context.set(self.label, true)?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn async_steps_run_in_declared_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let step = |label, millis| Record {
        label,
        delay: Duration::from_millis(millis),
        log: Arc::clone(&log),
    };
    let process = AsyncProcess::new()
        .then_async(step("slow", 60))
        .then_async(step("fast", 1))
        .then(SetValueAction::new("sync", true))
        .then_async(step("medium", 20));

    let context = process.run_async(None).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["slow", "fast", "medium"]);
    assert_eq!(context.get("sync"), Some(&json!(true)));
}

#[tokio::test]
async fn async_command_and_query_share_the_context() {
    let Harness { context, users, .. } = harness();
    let process = AsyncProcess::new()
        .then(SetValueAction::new("request", json!({"id": "6", "account": "globex", "name": "edsger"})))
        .then_async(
            AsyncCommandAction::new(|ctx| RegisterUser {
                id: text(ctx, "request.id"),
                account_id: text(ctx, "request.account"),
                name: text(ctx, "request.name"),
            })
            .store_as("registration"),
        )
        .then_async(AsyncQueryAction::new("headcount", move |_ctx| {
            let count = users.len();
            Box::pin(async move { Ok(json!(count)) })
        }));

    let context = process.run_async(Some(context)).await.unwrap();
    assert_eq!(context.get("registration.RegisterUserHandler.registered"), Some(&json!("6")));
    assert_eq!(context.get("headcount"), Some(&json!(5)));
}

#[tokio::test]
async fn async_parallel_takes_the_slowest_branch_time() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let branch = |label, millis| {
        AsyncProcess::new().then_async(Record {
            label,
            delay: Duration::from_millis(millis),
            log: Arc::clone(&log),
        })
    };
    let process = AsyncProcess::new().then_async(AsyncParallelAction::new(vec![
        branch("a", 100),
        branch("b", 100),
        branch("c", 100),
    ]));

    let started = std::time::Instant::now();
    let context = process.run_async(None).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
    for key in ["a", "b", "c"] {
        assert_eq!(context.get(key), Some(&json!(true)));
    }
}

#[test]
fn sync_actions_report_their_names() {
    assert_eq!(SetValueAction::new("a", 1).name(), "SetValueAction");
    assert_eq!(Process::new().name(), "Process");
}

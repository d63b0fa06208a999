//! Event projectors and publishers.
//!
//! # Overview
//!
//! Projectors are the fan-out side of event sourcing. Once an aggregate has
//! released its events, an [`EventPublisher`] hands every event to a set of
//! [`EventProjector`]s, each of which turns it into one side effect:
//!
//! | Projector | Side effect |
//! |-----------|-------------|
//! | [`PrintEventProjector`] | writes a line to stdout (or any `io::Write`) |
//! | [`EventStoreEventProjector`] | commits the event to an [`EventStore`] |
//! | [`EventBusEventProjector`] | publishes the event to an [`EventBus`] topic |
//! | [`CommandBusEventProjector`] | maps the event to a command and dispatches it |
//!
//! ```text
//!                       ┌──────────────────────┐
//! publish_event(e) ───► │  BasicEventPublisher │
//!                       └──────────┬───────────┘
//!            project(stream_id, e) │ (in registration order)
//!        ┌──────────────┬──────────┴───┬──────────────────┐
//!        ▼              ▼              ▼                  ▼
//!     stdout       EventStore      EventBus          CommandBus
//! ```

use crate::command::{Command, CommandBus, CommandBusError};
use crate::event::{AsAny, Event, EventError, SerializedEvent};
use crate::event_bus::{EventBus, EventBusError};
use crate::event_store::{EventStore, EventStoreError};
use crate::stream::{EventStream, StreamId};
use serde_json::json;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Writing to an output sink failed
    #[error("Output error: {0}")]
    Io(#[from] io::Error),

    /// The event could not be serialized
    #[error(transparent)]
    Event(#[from] EventError),

    /// The event store rejected the event
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    /// The event bus rejected the event
    #[error(transparent)]
    EventBus(#[from] EventBusError),

    /// The command produced from the event failed
    #[error(transparent)]
    Command(#[from] CommandBusError),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// A sink reacting to published events.
pub trait EventProjector: Send + Sync {
    /// React to `event`, published on `stream_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the side effect fails.
    fn project(&self, stream_id: &StreamId, event: &Arc<dyn Event>) -> Result<()>;
}

/// Writes one line per event: `<stream id> <event type> <json payload>`.
pub struct PrintEventProjector<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
}

impl PrintEventProjector {
    /// Print to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> PrintEventProjector<W> {
    /// Print to `out`.
    #[must_use]
    pub const fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    /// Recover the writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventProjector for PrintEventProjector<W> {
    fn project(&self, stream_id: &StreamId, event: &Arc<dyn Event>) -> Result<()> {
        let payload = event.to_json()?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{stream_id} {} {payload}", event.event_type())?;
        Ok(())
    }
}

/// Commits every projected event to an [`EventStore`].
///
/// Each event becomes a one-event stream with the publisher's stream id,
/// versioned after the events already stored for its aggregate.
pub struct EventStoreEventProjector {
    store: Arc<EventStore>,
    aggregate_root_name: String,
}

impl EventStoreEventProjector {
    /// Commit to `store`, stamping messages with `aggregate_root_name`.
    #[must_use]
    pub fn new(store: Arc<EventStore>, aggregate_root_name: impl Into<String>) -> Self {
        Self {
            store,
            aggregate_root_name: aggregate_root_name.into(),
        }
    }
}

impl EventProjector for EventStoreEventProjector {
    fn project(&self, stream_id: &StreamId, event: &Arc<dyn Event>) -> Result<()> {
        let stream = EventStream::with_id(stream_id.clone(), vec![Arc::clone(event)]);
        self.store
            .append(&stream, &self.aggregate_root_name, event.aggregate_root_id())?;
        Ok(())
    }
}

/// Publishes every projected event to one [`EventBus`] topic as JSON.
///
/// The metadata carries `stream_id` and `aggregate_root_id`.
pub struct EventBusEventProjector {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl EventBusEventProjector {
    /// Publish to `topic` on `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }
}

impl EventProjector for EventBusEventProjector {
    fn project(&self, stream_id: &StreamId, event: &Arc<dyn Event>) -> Result<()> {
        let metadata = json!({
            "stream_id": stream_id.as_str(),
            "aggregate_root_id": event.aggregate_root_id(),
        });
        let serialized = SerializedEvent::from_event(&**event, Some(metadata))?;
        self.bus.publish(&self.topic, &serialized)?;
        tracing::debug!(topic = %self.topic, event_type = event.event_type(), "Published event");
        Ok(())
    }
}

type Mapping = Arc<dyn Fn(&Arc<dyn Event>, &CommandBus) -> std::result::Result<(), CommandBusError> + Send + Sync>;

/// Turns events back into commands and dispatches them on a [`CommandBus`].
///
/// Mappings are registered per event type; events without a mapping are
/// ignored.
pub struct CommandBusEventProjector {
    bus: Arc<CommandBus>,
    mappings: HashMap<TypeId, Mapping>,
}

impl CommandBusEventProjector {
    /// Dispatch mapped commands on `bus`.
    #[must_use]
    pub fn new(bus: Arc<CommandBus>) -> Self {
        Self {
            bus,
            mappings: HashMap::new(),
        }
    }

    /// Map events of type `E` to commands of type `C`.
    #[must_use]
    pub fn map<E, C, F>(mut self, to_command: F) -> Self
    where
        E: Event,
        C: Command,
        F: Fn(&E) -> C + Send + Sync + 'static,
    {
        let mapping: Mapping = Arc::new(move |event: &Arc<dyn Event>, bus: &CommandBus| {
            if let Some(event) = event.downcast_ref::<E>() {
                bus.handle(&to_command(event))?;
            }
            Ok(())
        });
        self.mappings.insert(TypeId::of::<E>(), mapping);
        self
    }
}

impl EventProjector for CommandBusEventProjector {
    fn project(&self, _stream_id: &StreamId, event: &Arc<dyn Event>) -> Result<()> {
        let type_id = Any::type_id(AsAny::as_any(&**event));
        if let Some(mapping) = self.mappings.get(&type_id) {
            mapping(event, &self.bus)?;
        }
        Ok(())
    }
}

/// Outbound interface for publishing released events.
pub trait EventPublisher: Send + Sync {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns the first projector error.
    fn publish_event(&self, event: Arc<dyn Event>) -> Result<()>;

    /// Publish events in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first projector error.
    fn publish_events(&self, events: Vec<Arc<dyn Event>>) -> Result<()> {
        for event in events {
            self.publish_event(event)?;
        }
        Ok(())
    }
}

/// Fans every event out to its projectors, in registration order.
///
/// The stream id handed to projectors is the event's aggregate root id.
#[derive(Default)]
pub struct BasicEventPublisher {
    projectors: Vec<Arc<dyn EventProjector>>,
}

impl BasicEventPublisher {
    /// Create a publisher over `projectors`.
    #[must_use]
    pub fn new(projectors: Vec<Arc<dyn EventProjector>>) -> Self {
        Self { projectors }
    }

    /// Append a projector.
    pub fn add_projector(&mut self, projector: Arc<dyn EventProjector>) {
        self.projectors.push(projector);
    }

    /// Number of projectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    /// Whether no projectors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }
}

impl EventPublisher for BasicEventPublisher {
    fn publish_event(&self, event: Arc<dyn Event>) -> Result<()> {
        let stream_id = StreamId::new(event.aggregate_root_id());
        for projector in &self.projectors {
            projector.project(&stream_id, &event)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BasicEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicEventPublisher")
            .field("projectors", &self.projectors.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::{CommandHandler, HandlerResult};
    use crate::event_store::{EventEncoding, EventRegistry, Message};
    use crate::repository::{InMemoryRepository, Repository};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Shipped {
        order_id: String,
        parcel: u32,
    }

    impl Event for Shipped {
        fn object_id(&self) -> &str {
            &self.order_id
        }
    }

    fn shipped() -> Arc<dyn Event> {
        Arc::new(Shipped {
            order_id: "o-1".to_string(),
            parcel: 2,
        })
    }

    #[derive(Default)]
    struct Topics(Mutex<Vec<(String, SerializedEvent)>>);

    impl EventBus for Topics {
        fn publish(&self, topic: &str, event: &SerializedEvent) -> std::result::Result<(), EventBusError> {
            self.0.lock().unwrap().push((topic.to_string(), event.clone()));
            Ok(())
        }
    }

    struct Notify {
        order_id: String,
    }

    impl Command for Notify {}

    #[derive(Default)]
    struct Notifications(Mutex<Vec<String>>);

    impl CommandHandler<Notify> for Notifications {
        fn handle(&self, command: &Notify) -> HandlerResult {
            self.0.lock().unwrap().push(command.order_id.clone());
            Ok(None)
        }
    }

    #[test]
    fn print_projector_writes_one_line_per_event() {
        let projector = PrintEventProjector::new(Vec::new());
        projector.project(&StreamId::new("o-1"), &shipped()).unwrap();
        let output = String::from_utf8(projector.into_inner()).unwrap();
        assert_eq!(output, "o-1 Shipped {\"order_id\":\"o-1\",\"parcel\":2}\n");
    }

    #[test]
    fn event_store_projector_commits() {
        let messages = Arc::new(InMemoryRepository::<Message>::new());
        let mut registry = EventRegistry::new();
        registry.register::<Shipped>();
        let store = Arc::new(EventStore::new(EventEncoding::Json, messages.clone(), registry));
        let projector = EventStoreEventProjector::new(Arc::clone(&store), "Order");

        projector.project(&StreamId::new("s-1"), &shipped()).unwrap();
        projector.project(&StreamId::new("s-2"), &shipped()).unwrap();

        assert_eq!(store.get_event_stream(None).unwrap().len(), 2);
        let mut versions: Vec<u64> = messages.find(None).unwrap().map(|m| m.aggregate_root_version).collect();
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn event_bus_projector_publishes_json() {
        let bus = Arc::new(Topics::default());
        let projector = EventBusEventProjector::new(bus.clone(), "order-events");
        projector.project(&StreamId::new("o-1"), &shipped()).unwrap();

        let published = bus.0.lock().unwrap();
        assert_eq!(published.len(), 1);
        let (topic, event) = &published[0];
        assert_eq!(topic, "order-events");
        assert_eq!(event.event_type, "Shipped");
        assert_eq!(event.json().unwrap(), json!({"order_id": "o-1", "parcel": 2}));
        assert_eq!(event.metadata, Some(json!({"stream_id": "o-1", "aggregate_root_id": "o-1"})));
    }

    #[test]
    fn command_bus_projector_maps_registered_events_only() {
        let command_bus = Arc::new(CommandBus::new());
        let notifications = Arc::new(Notifications::default());
        command_bus.add_handler::<Notify, _>(Arc::clone(&notifications));

        let projector = CommandBusEventProjector::new(command_bus).map(|event: &Shipped| Notify {
            order_id: event.order_id.clone(),
        });
        projector.project(&StreamId::new("o-1"), &shipped()).unwrap();

        #[derive(Debug, Serialize)]
        struct Unmapped;
        impl Event for Unmapped {
            fn object_id(&self) -> &str {
                "x"
            }
        }
        projector.project(&StreamId::new("x"), &(Arc::new(Unmapped) as Arc<dyn Event>)).unwrap();

        assert_eq!(*notifications.0.lock().unwrap(), vec!["o-1".to_string()]);
    }

    #[test]
    fn publisher_fans_out_in_order_keyed_by_aggregate() {
        let bus = Arc::new(Topics::default());
        let mut publisher = BasicEventPublisher::default();
        publisher.add_projector(Arc::new(EventBusEventProjector::new(bus.clone(), "a")));
        publisher.add_projector(Arc::new(EventBusEventProjector::new(bus.clone(), "b")));
        assert_eq!(publisher.len(), 2);

        publisher.publish_events(vec![shipped(), shipped()]).unwrap();

        let topics: Vec<String> = bus.0.lock().unwrap().iter().map(|(topic, _)| topic.clone()).collect();
        assert_eq!(topics, vec!["a", "b", "a", "b"]);
        let first = &bus.0.lock().unwrap()[0].1;
        assert_eq!(first.metadata.as_ref().unwrap()["stream_id"], "o-1");
    }
}

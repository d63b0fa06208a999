//! Event store persisting event streams as messages.
//!
//! The event store is a thin layer over a [`Repository`] of [`Message`]s.
//! Committing a stream wraps every event in a message stamped with the
//! aggregate it belongs to and an encoded payload; reading a stream decodes
//! the payloads back into events.
//!
//! # Encodings
//!
//! | Encoding | Payload | Read path |
//! |----------|---------|-----------|
//! | [`EventEncoding::Object`] | the `Arc<dyn Event>` itself | returned as-is (same allocation) |
//! | [`EventEncoding::Dict`] | JSON object | registry lookup + `serde_json::from_value` |
//! | [`EventEncoding::Json`] | JSON string | registry lookup + `serde_json::from_str` |
//! | [`EventEncoding::Binary`] | `bincode` bytes | registry lookup + `bincode::deserialize` |
//!
//! Encoded flavors need the concrete event type back, so readers register
//! every event type they expect in an [`EventRegistry`]. A message whose type
//! name is not registered fails the whole read with
//! [`EventError::NotMapped`]; it is never skipped.
//!
//! # Example
//!
//! ```
//! use fractal_core::event::Event;
//! use fractal_core::event_store::{EventEncoding, EventRegistry, EventStore, Message};
//! use fractal_core::repository::InMemoryRepository;
//! use fractal_core::stream::{EventStream, Version};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct AccountOpened {
//!     id: String,
//! }
//!
//! impl Event for AccountOpened {
//!     fn object_id(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = EventRegistry::new();
//! registry.register::<AccountOpened>();
//!
//! let store = EventStore::new(
//!     EventEncoding::Json,
//!     Arc::new(InMemoryRepository::<Message>::new()),
//!     registry,
//! );
//!
//! let opened: Arc<dyn Event> = Arc::new(AccountOpened { id: "a-1".into() });
//! store.commit(&EventStream::new(vec![opened]), "Account", Version::INITIAL)?;
//!
//! let stream = store.get_event_stream(None)?;
//! assert_eq!(stream.events()[0].downcast_ref::<AccountOpened>().map(|e| e.id.as_str()), Some("a-1"));
//! # Ok(())
//! # }
//! ```

use crate::entity::{Entity, FieldAccess};
use crate::environment::{Clock, SystemClock};
use crate::event::{Event, EventError};
use crate::repository::{Repository, RepositoryError};
use crate::specification::Specification;
use crate::stream::{EventStream, StreamId, Version};
use crate::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// The message repository failed.
    #[error("Message repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// An event could not be encoded or decoded.
    #[error(transparent)]
    Event(#[from] EventError),
}

/// How event payloads are stored in messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventEncoding {
    /// Keep the event object itself (in-process stores only)
    #[default]
    Object,
    /// A JSON object
    Dict,
    /// A JSON string
    Json,
    /// `bincode` bytes
    Binary,
}

impl EventEncoding {
    /// Encode `event` into a payload of this flavor.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event fails to serialize,
    /// or, for [`EventEncoding::Dict`], does not serialize to a JSON object.
    pub fn encode(self, event: &Arc<dyn Event>) -> Result<Payload, EventError> {
        Ok(match self {
            Self::Object => Payload::Object(Arc::clone(event)),
            Self::Dict => match event.to_json()? {
                Value::Object(map) => Payload::Dict(map),
                other => {
                    return Err(EventError::Serialization(format!(
                        "{} serializes to {other}, not an object",
                        event.event_type()
                    )));
                },
            },
            Self::Json => Payload::Json(
                serde_json::to_string(&**event).map_err(|e| EventError::Serialization(e.to_string()))?,
            ),
            Self::Binary => Payload::Binary(event.to_bytes()?),
        })
    }
}

impl fmt::Display for EventEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "object"),
            Self::Dict => write!(f, "dict"),
            Self::Json => write!(f, "json"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Error for [`EventEncoding`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown event encoding: {0}")]
pub struct ParseEventEncodingError(String);

impl FromStr for EventEncoding {
    type Err = ParseEventEncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "object" => Ok(Self::Object),
            "dict" => Ok(Self::Dict),
            "json" => Ok(Self::Json),
            "binary" | "bincode" => Ok(Self::Binary),
            _ => Err(ParseEventEncodingError(s.to_string())),
        }
    }
}

/// An encoded event payload.
#[derive(Clone, Debug)]
pub enum Payload {
    /// The event object itself
    Object(Arc<dyn Event>),
    /// A JSON object
    Dict(serde_json::Map<String, Value>),
    /// A JSON string
    Json(String),
    /// `bincode` bytes
    Binary(Vec<u8>),
}

impl Payload {
    /// JSON view of the payload, for field access and diagnostics.
    ///
    /// Binary payloads are opaque without their type and have no JSON view.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Object(event) => event.to_json().ok(),
            Self::Dict(map) => Some(Value::Object(map.clone())),
            Self::Json(text) => serde_json::from_str(text).ok(),
            Self::Binary(_) => None,
        }
    }
}

/// An event-store record.
#[derive(Clone, Debug)]
pub struct Message {
    /// Unique message id (UUID v4)
    pub id: String,
    /// When the message was committed
    pub occurred_on: DateTime<Utc>,
    /// The event type name
    pub event: String,
    /// The encoded event
    pub data: Payload,
    /// The object the event is about
    pub object_id: String,
    /// The aggregate root that recorded the event
    pub aggregate_root_id: String,
    /// The aggregate root type name
    pub aggregate_root_name: String,
    /// The version the aggregate reached with this event
    pub aggregate_root_version: u64,
    /// The stream the event was committed in
    pub stream_id: StreamId,
    /// Store-wide commit order
    pub sequence: u64,
}

impl FieldAccess for Message {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id.as_str())),
            "occurred_on" => Some(Value::from(self.occurred_on.to_rfc3339())),
            "event" => Some(Value::from(self.event.as_str())),
            "data" => self.data.to_value(),
            "object_id" => Some(Value::from(self.object_id.as_str())),
            "aggregate_root_id" => Some(Value::from(self.aggregate_root_id.as_str())),
            "aggregate_root_name" => Some(Value::from(self.aggregate_root_name.as_str())),
            "aggregate_root_version" => Some(Value::from(self.aggregate_root_version)),
            "stream_id" => Some(Value::from(self.stream_id.as_str())),
            "sequence" => Some(Value::from(self.sequence)),
            _ => None,
        }
    }
}

impl Entity for Message {
    fn id(&self) -> &str {
        &self.id
    }
}

type Decoder = Arc<dyn Fn(&Payload) -> Result<Arc<dyn Event>, EventError> + Send + Sync>;

/// Maps recorded event type names back to concrete event types.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<String, Decoder>,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `E` under its unqualified type name.
    ///
    /// Events that override [`Event::event_type`] must be registered with
    /// [`EventRegistry::register_as`] instead.
    pub fn register<E>(&mut self) -> &mut Self
    where
        E: Event + DeserializeOwned,
    {
        self.register_as::<E>(crate::entity::short_type_name::<E>())
    }

    /// Register `E` under an explicit type name.
    pub fn register_as<E>(&mut self, name: impl Into<String>) -> &mut Self
    where
        E: Event + DeserializeOwned,
    {
        let decoder: Decoder = Arc::new(|payload: &Payload| -> Result<Arc<dyn Event>, EventError> {
            let event: E = match payload {
                Payload::Object(event) => return Ok(Arc::clone(event)),
                Payload::Dict(map) => serde_json::from_value(Value::Object(map.clone()))
                    .map_err(|e| EventError::Deserialization(e.to_string()))?,
                Payload::Json(text) => {
                    serde_json::from_str(text).map_err(|e| EventError::Deserialization(e.to_string()))?
                },
                Payload::Binary(bytes) => {
                    bincode::deserialize(bytes).map_err(|e| EventError::Deserialization(e.to_string()))?
                },
            };
            Ok(Arc::new(event))
        });
        self.decoders.insert(name.into(), decoder);
        self
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Decode a payload recorded under `name`.
    ///
    /// Object payloads are returned as-is without consulting the registry.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::NotMapped`] for an unregistered name and
    /// [`EventError::Deserialization`] for a payload that does not decode.
    pub fn decode(&self, name: &str, payload: &Payload) -> Result<Arc<dyn Event>, EventError> {
        if let Payload::Object(event) = payload {
            return Ok(Arc::clone(event));
        }
        let decoder = self
            .decoders
            .get(name)
            .ok_or_else(|| EventError::NotMapped(name.to_string()))?;
        decoder(payload)
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("EventRegistry").field("events", &names).finish()
    }
}

/// Persists event streams as [`Message`]s in a repository.
///
/// Writes through one store are serialised: the last assigned `sequence` is
/// kept behind a lock that is held for the whole commit, so sequences are
/// unique and gap-free per store. The counter is loaded from the highest
/// stored sequence on the first commit.
pub struct EventStore {
    encoding: EventEncoding,
    messages: Arc<dyn Repository<Message>>,
    registry: EventRegistry,
    clock: Arc<dyn Clock>,
    sequence: Mutex<Option<u64>>,
}

impl EventStore {
    /// Create a store writing `encoding` payloads into `messages`.
    #[must_use]
    pub fn new(encoding: EventEncoding, messages: Arc<dyn Repository<Message>>, registry: EventRegistry) -> Self {
        Self {
            encoding,
            messages,
            registry,
            clock: Arc::new(SystemClock),
            sequence: Mutex::new(None),
        }
    }

    /// Use `clock` for `occurred_on` timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The payload encoding of this store.
    #[must_use]
    pub const fn encoding(&self) -> EventEncoding {
        self.encoding
    }

    /// Persist every event of `stream` as a message.
    ///
    /// `version` is the aggregate's version before the stream; the n-th event
    /// (1-based) is stamped with `version + n`. Every event is encoded before
    /// anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] if an event fails to encode or the message
    /// repository rejects a write. Messages written before the failure stay.
    #[tracing::instrument(
        skip(self, stream),
        fields(stream_id = %stream.id(), events = stream.len(), encoding = %self.encoding)
    )]
    pub fn commit(&self, stream: &EventStream, aggregate_root_name: &str, version: Version) -> Result<(), EventStoreError> {
        let mut last = self.lock_sequence();
        self.write(&mut last, stream, aggregate_root_name, version)
    }

    /// Commit `stream` at the next version of `aggregate_root_id`.
    ///
    /// The version lookup and the writes happen under the store's write
    /// lock, so concurrent appends never stamp the same version twice.
    /// Returns the version before the stream.
    ///
    /// # Errors
    ///
    /// As [`EventStore::commit`], plus repository errors from the version
    /// lookup.
    #[tracing::instrument(skip(self, stream), fields(stream_id = %stream.id(), events = stream.len()))]
    pub fn append(
        &self,
        stream: &EventStream,
        aggregate_root_name: &str,
        aggregate_root_id: &str,
    ) -> Result<Version, EventStoreError> {
        let mut last = self.lock_sequence();
        let version = self.current_version(aggregate_root_id)?;
        self.write(&mut last, stream, aggregate_root_name, version)?;
        Ok(version)
    }

    fn lock_sequence(&self) -> MutexGuard<'_, Option<u64>> {
        self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(
        &self,
        last: &mut Option<u64>,
        stream: &EventStream,
        aggregate_root_name: &str,
        version: Version,
    ) -> Result<(), EventStoreError> {
        let base = match *last {
            Some(sequence) => sequence,
            None => self.messages.find(None)?.map(|message| message.sequence).max().unwrap_or(0),
        };
        *last = Some(base);
        let occurred_on = self.clock.now();

        let messages = (1_u64..)
            .zip(stream.events())
            .map(|(offset, event)| -> Result<Message, EventError> {
                Ok(Message {
                    id: uuid::Uuid::new_v4().to_string(),
                    occurred_on,
                    event: event.event_type().to_string(),
                    data: self.encoding.encode(event)?,
                    object_id: event.object_id().to_string(),
                    aggregate_root_id: event.aggregate_root_id().to_string(),
                    aggregate_root_name: aggregate_root_name.to_string(),
                    aggregate_root_version: (version + offset).value(),
                    stream_id: stream.id().clone(),
                    sequence: base.saturating_add(offset),
                })
            })
            .collect::<Result<Vec<_>, EventError>>()?;

        for message in messages {
            let sequence = message.sequence;
            self.messages.add(message)?;
            *last = Some(sequence);
        }

        tracing::debug!(last_sequence = ?*last, "Committed event stream");
        Ok(())
    }

    /// Reconstruct the events of every message matching `specification`, in
    /// commit order.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::NotMapped`] (wrapped) if a message names an event
    /// type missing from the registry, or a repository error.
    pub fn get_event_stream(&self, specification: Option<&Specification>) -> Result<EventStream, EventStoreError> {
        let mut messages: Vec<Message> = self.messages.find(specification)?.collect();
        messages.sort_by_key(|message| message.sequence);

        let events = messages
            .iter()
            .map(|message| self.registry.decode(&message.event, &message.data))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventStream::new(events))
    }

    /// Number of events committed for `aggregate_root_id`.
    ///
    /// A plain read; use [`EventStore::append`] to commit at this version
    /// without racing other writers.
    ///
    /// # Errors
    ///
    /// Returns a repository error if the messages cannot be read.
    pub fn current_version(&self, aggregate_root_id: &str) -> Result<Version, EventStoreError> {
        let spec = Specification::equals("aggregate_root_id", aggregate_root_id);
        Ok(Version::new(self.messages.find(Some(&spec))?.count() as u64))
    }

    /// Probe the message repository.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.messages.is_healthy()
    }
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("encoding", &self.encoding)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

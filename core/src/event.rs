//! Domain events and their wire form.
//!
//! Events represent immutable facts about things that have happened in the
//! past. Aggregate roots record them, the event store persists them and
//! projectors fan them out.
//!
//! # Design
//!
//! Aggregates, projectors and publishers handle heterogeneous events, so
//! events travel as `Arc<dyn Event>`. The trait is object safe:
//!
//! - Serialization goes through `erased_serde`, so any `dyn Event` can be
//!   written with any serde format (JSON for the bus, `bincode` for the binary
//!   store encoding).
//! - Deserialization needs the concrete type and is done through an
//!   [`EventRegistry`](crate::event_store::EventRegistry) keyed by
//!   [`Event::event_type`].
//! - Concrete types are recovered with `<dyn Event>::downcast_ref`.
//!
//! # Example
//!
//! ```
//! use fractal_core::event::Event;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct OrderPlaced {
//!     order_id: String,
//!     total: f64,
//! }
//!
//! impl Event for OrderPlaced {
//!     fn object_id(&self) -> &str {
//!         &self.order_id
//!     }
//! }
//!
//! let event: Box<dyn Event> = Box::new(OrderPlaced { order_id: "o-1".into(), total: 9.5 });
//! assert_eq!(event.event_type(), "OrderPlaced");
//! assert_eq!(event.aggregate_root_id(), "o-1");
//! assert!(event.downcast_ref::<OrderPlaced>().is_some());
//! ```

use crate::entity::short_type_name;
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize event.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),

    /// No concrete type is registered for a recorded event type name.
    #[error("Event '{0}' not mapped")]
    NotMapped(String),
}

/// Upcast helper so trait objects can reach [`Any`].
pub trait AsAny: Any {
    /// `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A domain event.
///
/// # Naming
///
/// [`Event::event_type`] is the name recorded in the event store and used to
/// find the concrete type again on read. It defaults to the unqualified type
/// name (`OrderPlaced`); override it to keep stored names stable across
/// renames.
///
/// # Thread Safety
///
/// Events must be `Send + Sync + 'static` to be shared between projectors and
/// parallel workflow branches.
pub trait Event: erased_serde::Serialize + AsAny + fmt::Debug + Send + Sync {
    /// Stable type name recorded with the event.
    fn event_type(&self) -> &'static str {
        short_type_name::<Self>()
    }

    /// Identifier of the object the event is about.
    fn object_id(&self) -> &str;

    /// Identifier of the aggregate root that recorded the event.
    ///
    /// Defaults to [`Event::object_id`]; events about a child entity override
    /// it with the owning aggregate's id.
    fn aggregate_root_id(&self) -> &str {
        self.object_id()
    }
}

impl dyn Event {
    /// Downcast to a concrete event type.
    #[must_use]
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }

    /// Whether the event is of concrete type `T`.
    #[must_use]
    pub fn is<T: Event>(&self) -> bool {
        AsAny::as_any(self).is::<T>()
    }

    /// Serialize the event to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event's `Serialize`
    /// implementation fails.
    pub fn to_json(&self) -> Result<serde_json::Value, EventError> {
        serde_json::to_value(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Serialize the event to `bincode` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event's `Serialize`
    /// implementation fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::Serialization(e.to_string()))
    }
}

impl serde::Serialize for dyn Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        erased_serde::serialize(self, serializer)
    }
}

/// A serialized event ready for a message bus.
///
/// Carries the event type name, the JSON-encoded payload, and optional
/// metadata. This is the wire form used by
/// [`EventBus`](crate::event_bus::EventBus).
#[derive(Clone, Debug)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., `"OrderPlaced"`).
    pub event_type: String,

    /// The JSON-encoded event data.
    pub data: Vec<u8>,

    /// Optional metadata.
    ///
    /// Common metadata fields:
    /// - `stream_id`: The stream the event was published on
    /// - `aggregate_root_id`: The aggregate that recorded the event
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    ///
    /// # Examples
    ///
    /// ```
    /// use fractal_core::event::SerializedEvent;
    ///
    /// let event = SerializedEvent::new("OrderPlaced".to_string(), b"{}".to_vec(), None);
    /// assert_eq!(event.event_type, "OrderPlaced");
    /// ```
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Create a serialized event from an `Event` trait object.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event cannot be serialized.
    pub fn from_event(event: &dyn Event, metadata: Option<serde_json::Value>) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: serde_json::to_vec(event).map_err(|e| EventError::Serialization(e.to_string()))?,
            metadata,
        })
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload is not JSON.
    pub fn json(&self) -> Result<serde_json::Value, EventError> {
        serde_json::from_slice(&self.data).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

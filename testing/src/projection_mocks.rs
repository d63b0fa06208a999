//! In-memory projection testing utilities
//!
//! Provides deterministic doubles for the outbound side of event sourcing:
//! - [`InMemoryEventBus`]: records every publication per topic
//! - [`RecordingProjector`]: records every projected event

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use fractal_core::event::{Event, SerializedEvent};
use fractal_core::event_bus::{EventBus, EventBusError};
use fractal_core::projection::{EventProjector, ProjectionError};
use fractal_core::stream::StreamId;
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// In-memory event bus for fast, deterministic testing.
///
/// Clones share the same log, so a test can keep one handle and give the
/// other to an `EventBusEventProjector`.
///
/// # Example
///
/// ```
/// use fractal_core::event::SerializedEvent;
/// use fractal_core::event_bus::EventBus;
/// use fractal_testing::InMemoryEventBus;
///
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("UserRegistered".into(), b"{}".to_vec(), None);
/// bus.publish("user-events", &event).unwrap();
///
/// assert_eq!(bus.published_to("user-events").len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventBus {
    published: Arc<RwLock<Vec<(String, SerializedEvent)>>>,
    rejected_topics: Arc<RwLock<Vec<String>>>,
}

impl InMemoryEventBus {
    /// Create a new empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publications to `topic` fail with `PublishFailed`
    pub fn reject_topic(&self, topic: &str) {
        self.rejected_topics.write().unwrap().push(topic.to_string());
    }

    /// Every publication in order, as `(topic, event)`
    #[must_use]
    pub fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.published.read().unwrap().clone()
    }

    /// Events published to `topic`, in order
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<SerializedEvent> {
        self.published
            .read()
            .unwrap()
            .iter()
            .filter(|(published, _)| published == topic)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Number of publications
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.read().unwrap().len()
    }

    /// Check if nothing was published
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.read().unwrap().is_empty()
    }

    /// Forget every publication (for test isolation)
    pub fn clear(&self) {
        self.published.write().unwrap().clear();
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: &str, event: &SerializedEvent) -> Result<(), EventBusError> {
        if topic.is_empty() {
            return Err(EventBusError::InvalidTopic(topic.to_string()));
        }
        if self.rejected_topics.read().unwrap().iter().any(|rejected| rejected == topic) {
            return Err(EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: "rejected by test bus".to_string(),
            });
        }
        self.published
            .write()
            .unwrap()
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}

/// One event seen by a [`RecordingProjector`].
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedEvent {
    /// Stream the event was projected for
    pub stream_id: StreamId,
    /// Event type name
    pub event_type: String,
    /// JSON form of the event
    pub data: Value,
}

/// Projector that records what it is given.
#[derive(Clone, Debug, Default)]
pub struct RecordingProjector {
    seen: Arc<RwLock<Vec<ProjectedEvent>>>,
}

impl RecordingProjector {
    /// Create a new projector with nothing recorded
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything projected so far, in order
    #[must_use]
    pub fn projected(&self) -> Vec<ProjectedEvent> {
        self.seen.read().unwrap().clone()
    }

    /// Event type names projected so far, in order
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.seen
            .read()
            .unwrap()
            .iter()
            .map(|projected| projected.event_type.clone())
            .collect()
    }

    /// Number of projected events
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.read().unwrap().len()
    }

    /// Check if nothing was projected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.read().unwrap().is_empty()
    }
}

impl EventProjector for RecordingProjector {
    fn project(&self, stream_id: &StreamId, event: &Arc<dyn Event>) -> Result<(), ProjectionError> {
        let data = event.to_json()?;
        self.seen.write().unwrap().push(ProjectedEvent {
            stream_id: stream_id.clone(),
            event_type: event.event_type().to_string(),
            data,
        });
        Ok(())
    }
}

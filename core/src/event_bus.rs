//! Message bus abstraction used by projectors.
//!
//! The [`EventBus`] trait is the narrow outbound interface to a messaging
//! transport (pub/sub, broker, HTTP webhook). The core never sees the
//! transport; it only publishes [`SerializedEvent`]s to named topics.
//!
//! ```text
//! aggregate.release()
//!        │
//!        ▼
//! ┌─────────────────┐
//! │ EventPublisher  │
//! └────────┬────────┘
//!          │  project(stream_id, event)
//!     ┌────┴──────────────┐
//!     ▼                   ▼
//! ┌────────────┐   ┌────────────────────┐
//! │ EventStore │   │ EventBusEventProj. │──► EventBus::publish(topic, ..)
//! └────────────┘   └────────────────────┘
//! ```
//!
//! # Topic Naming Convention
//!
//! Topics follow the pattern `{aggregate-type}-events`:
//! - `order-events` - All events from Order aggregates
//! - `account-events` - All events from Account aggregates
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (in `fractal-testing`) - records publications for assertions

use crate::event::SerializedEvent;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

/// Trait for event bus implementations.
///
/// Publication is synchronous: the call returns once the transport has
/// accepted the event. Delivery guarantees beyond that belong to the
/// transport.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; projectors holding a bus are shared
/// across workflow branches.
pub trait EventBus: Send + Sync {
    /// Publish `event` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the transport rejects the event or the
    /// topic is invalid.
    fn publish(&self, topic: &str, event: &SerializedEvent) -> Result<(), EventBusError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(String, String)>>);

    impl EventBus for Recording {
        fn publish(&self, topic: &str, event: &SerializedEvent) -> Result<(), EventBusError> {
            if topic.is_empty() {
                return Err(EventBusError::InvalidTopic(topic.to_string()));
            }
            if let Ok(mut published) = self.0.lock() {
                published.push((topic.to_string(), event.event_type.clone()));
            }
            Ok(())
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn buses_are_usable_as_trait_objects() {
        let bus: Box<dyn EventBus> = Box::new(Recording::default());
        let event = SerializedEvent::new("OrderPlaced".to_string(), b"{}".to_vec(), None);

        bus.publish("order-events", &event).unwrap();
        assert!(matches!(
            bus.publish("", &event),
            Err(EventBusError::InvalidTopic(_))
        ));
    }

    #[test]
    fn error_messages() {
        let error = EventBusError::PublishFailed {
            topic: "order-events".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(error.to_string(), "Publish failed for topic 'order-events': broker down");
    }
}

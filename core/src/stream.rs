//! Event stream identification and versioning types.
//!
//! This module defines strong types for event stream identification
//! (`StreamId`), aggregate versions (`Version`) and the ordered batch of events
//! produced by one logical operation (`EventStream`).

use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Error type for `StreamId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// Identifier of one committed batch of events.
///
/// Generated with [`StreamId::generate`] when an aggregate's events are
/// committed, or set to the aggregate root id when events are projected.
/// Parsing rejects the empty string; [`StreamId::new`] and `From` do not
/// validate.
///
/// ```
/// use fractal_core::stream::StreamId;
///
/// let parsed: StreamId = "wallet-7".parse().unwrap();
/// assert_eq!(parsed, StreamId::new("wallet-7"));
/// assert!("".parse::<StreamId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Wrap `id` without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh UUID v4 stream id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseStreamIdError("stream id cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Number of events committed for an aggregate.
///
/// Every message is stamped with the version its aggregate reached through
/// it; [`EventStore::commit`](crate::event_store::EventStore::commit) takes
/// the version *before* the stream. Arithmetic saturates at `u64::MAX`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// No events committed yet.
    pub const INITIAL: Self = Self(0);

    /// Wrap a raw version number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version after one more event.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Whether no events were committed.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// `version + n`: the version after `n` more events.
impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

/// An ordered sequence of domain events produced by one logical operation.
///
/// # Examples
///
/// ```
/// use fractal_core::event::Event;
/// use fractal_core::stream::EventStream;
/// use std::sync::Arc;
///
/// #[derive(Debug, serde::Serialize)]
/// struct Opened {
///     id: String,
/// }
///
/// impl Event for Opened {
///     fn object_id(&self) -> &str {
///         &self.id
///     }
/// }
///
/// let stream = EventStream::new(vec![Arc::new(Opened { id: "a-1".into() }) as Arc<dyn Event>]);
/// assert_eq!(stream.len(), 1);
/// assert_eq!(stream.events()[0].event_type(), "Opened");
/// ```
#[derive(Clone, Debug)]
pub struct EventStream {
    id: StreamId,
    events: Vec<Arc<dyn Event>>,
}

impl EventStream {
    /// Wrap `events` in a stream with a generated id.
    #[must_use]
    pub fn new(events: Vec<Arc<dyn Event>>) -> Self {
        Self::with_id(StreamId::generate(), events)
    }

    /// Wrap `events` in a stream with the given id.
    #[must_use]
    pub const fn with_id(id: StreamId, events: Vec<Arc<dyn Event>>) -> Self {
        Self { id, events }
    }

    /// The stream id.
    #[must_use]
    pub const fn id(&self) -> &StreamId {
        &self.id
    }

    /// The events in recorded order.
    #[must_use]
    pub fn events(&self) -> &[Arc<dyn Event>] {
        &self.events
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the stream holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take the events out of the stream.
    #[must_use]
    pub fn into_events(self) -> Vec<Arc<dyn Event>> {
        self.events
    }
}

impl IntoIterator for EventStream {
    type Item = Arc<dyn Event>;
    type IntoIter = std::vec::IntoIter<Arc<dyn Event>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

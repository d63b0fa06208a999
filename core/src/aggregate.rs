//! Aggregate roots and the event-sourced repository.
//!
//! An aggregate root records domain events as it changes and hands them over
//! in one batch with [`EventSourcedAggregateRoot::release`]. The
//! [`EventSourcedRepository`] commits released batches to an
//! [`EventStore`] instead of storing entity state.
//!
//! # Example
//!
//! ```
//! use fractal_core::aggregate::{EventBuffer, EventSourcedAggregateRoot};
//! use fractal_core::event::Event;
//!
//! #[derive(Debug, serde::Serialize)]
//! struct Renamed {
//!     id: String,
//!     name: String,
//! }
//!
//! impl Event for Renamed {
//!     fn object_id(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Account {
//!     id: String,
//!     name: String,
//!     events: EventBuffer,
//! }
//!
//! impl EventSourcedAggregateRoot for Account {
//!     fn event_buffer(&mut self) -> &mut EventBuffer {
//!         &mut self.events
//!     }
//! }
//!
//! impl Account {
//!     fn rename(&mut self, name: &str) {
//!         self.name = name.to_string();
//!         let event = Renamed { id: self.id.clone(), name: name.to_string() };
//!         self.record(event);
//!     }
//! }
//!
//! let mut account = Account { id: "a-1".into(), ..Account::default() };
//! account.rename("acme");
//! account.rename("globex");
//!
//! let released = account.release();
//! assert_eq!(released.len(), 2);
//! assert!(account.release().is_empty());
//! ```

use crate::entity::{Entity, short_type_name};
use crate::event::Event;
use crate::event_store::EventStore;
use crate::repository::{EntityIter, Repository, RepositoryError};
use crate::specification::Specification;
use crate::stream::{EventStream, Version};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Ordered buffer of events recorded but not yet released.
///
/// Embed one in an aggregate and expose it through
/// [`EventSourcedAggregateRoot::event_buffer`]. Cloning an aggregate clones
/// its pending events (the events themselves are shared).
#[derive(Clone, Default)]
pub struct EventBuffer {
    events: Vec<Arc<dyn Event>>,
}

impl EventBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event.
    pub fn push(&mut self, event: Arc<dyn Event>) {
        self.events.push(event);
    }

    /// Take every buffered event, leaving the buffer empty.
    #[must_use]
    pub fn release(&mut self) -> Vec<Arc<dyn Event>> {
        std::mem::take(&mut self.events)
    }

    /// Pending events, oldest first.
    #[must_use]
    pub fn pending(&self) -> &[Arc<dyn Event>] {
        &self.events
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.events.iter().map(|event| event.event_type()).collect();
        f.debug_struct("EventBuffer").field("pending", &names).finish()
    }
}

/// An entity that accumulates domain events before they are committed.
pub trait EventSourcedAggregateRoot {
    /// The buffer holding recorded events.
    fn event_buffer(&mut self) -> &mut EventBuffer;

    /// Record `event`; returns `self` so calls chain.
    fn record<E: Event>(&mut self, event: E) -> &mut Self
    where
        Self: Sized,
    {
        self.event_buffer().push(Arc::new(event));
        self
    }

    /// Record an already shared event.
    fn record_shared(&mut self, event: Arc<dyn Event>) {
        self.event_buffer().push(event);
    }

    /// Hand over every recorded event in recording order and clear the buffer.
    ///
    /// The returned list is owned by the caller; a second call before any new
    /// `record` returns an empty list.
    fn release(&mut self) -> Vec<Arc<dyn Event>> {
        self.event_buffer().release()
    }
}

/// Write-side repository committing aggregates' released events.
///
/// `add` and `update` behave identically: the entity's pending events are
/// released and committed as one stream, stamped with the aggregate type name
/// and its current version. [`EventSourcedRepository::save`] does the same on
/// a borrowed entity and keeps its events when the store fails. Reads go through the event stream, so
/// `find_one`, `find` and `remove_one` fail with
/// [`RepositoryError::Unsupported`].
pub struct EventSourcedRepository<E: Entity> {
    store: Arc<EventStore>,
    aggregate_root_name: &'static str,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EventSourcedRepository<E> {
    /// Create a repository committing to `store`.
    #[must_use]
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            aggregate_root_name: short_type_name::<E>(),
            _entity: PhantomData,
        }
    }

    /// The event store behind this repository.
    #[must_use]
    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Commit the pending events of `entity` in place.
    ///
    /// Returns the aggregate's version before the commit. If the store
    /// fails, the released events are recorded back onto `entity` in their
    /// original order so the save can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AggregateRoot`] for an entity without the
    /// aggregate-root capability, or the store's error.
    pub fn save(&self, entity: &mut E) -> Result<Version, RepositoryError> {
        let id = entity.id().to_string();
        let Some(root) = entity.as_aggregate_root() else {
            return Err(RepositoryError::AggregateRoot(format!("{} '{id}'", self.aggregate_root_name)));
        };

        let stream = EventStream::new(root.release());
        tracing::debug!(
            aggregate = self.aggregate_root_name,
            id = %id,
            events = stream.len(),
            "Committing aggregate events"
        );
        match self.store.append(&stream, self.aggregate_root_name, &id) {
            Ok(version) => Ok(version),
            Err(error) => {
                for event in stream {
                    root.record_shared(event);
                }
                tracing::warn!(aggregate = self.aggregate_root_name, id = %id, %error, "Commit failed, events kept");
                Err(error.into())
            },
        }
    }

    const fn unsupported(&self, operation: &'static str) -> RepositoryError {
        RepositoryError::Unsupported {
            operation,
            repository: "EventSourcedRepository",
        }
    }
}

impl<E: Entity> fmt::Debug for EventSourcedRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSourcedRepository")
            .field("aggregate_root_name", &self.aggregate_root_name)
            .field("store", &self.store)
            .finish()
    }
}

impl<E: Entity> Repository<E> for EventSourcedRepository<E> {
    fn add(&self, mut entity: E) -> Result<E, RepositoryError> {
        self.save(&mut entity)?;
        Ok(entity)
    }

    fn update(&self, entity: E, _upsert: bool) -> Result<Option<E>, RepositoryError> {
        self.add(entity).map(Some)
    }

    fn remove_one(&self, _specification: &Specification) -> Result<(), RepositoryError> {
        Err(self.unsupported("remove_one"))
    }

    fn find_one(&self, _specification: &Specification) -> Result<E, RepositoryError> {
        Err(self.unsupported("find_one"))
    }

    fn find(&self, _specification: Option<&Specification>) -> Result<EntityIter<'_, E>, RepositoryError> {
        Err(self.unsupported("find"))
    }

    fn is_healthy(&self) -> bool {
        self.store.is_healthy()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::{FieldAccess, serialized_field};
    use crate::event_store::{EventEncoding, EventRegistry, Message};
    use crate::repository::{EntityIter, InMemoryRepository};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Opened {
        id: String,
    }

    impl Event for Opened {
        fn object_id(&self) -> &str {
            &self.id
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Credited {
        id: String,
        amount: i64,
    }

    impl Event for Credited {
        fn object_id(&self) -> &str {
            &self.id
        }
    }

    #[derive(Clone, Debug, Default, Serialize)]
    struct Wallet {
        id: String,
        balance: i64,
        #[serde(skip)]
        events: EventBuffer,
    }

    impl Wallet {
        fn open(id: &str) -> Self {
            let mut wallet = Self {
                id: id.to_string(),
                ..Self::default()
            };
            wallet.record(Opened { id: id.to_string() });
            wallet
        }

        fn credit(&mut self, amount: i64) {
            self.balance += amount;
            let id = self.id.clone();
            self.record(Credited { id, amount });
        }
    }

    impl EventSourcedAggregateRoot for Wallet {
        fn event_buffer(&mut self) -> &mut EventBuffer {
            &mut self.events
        }
    }

    impl FieldAccess for Wallet {
        fn field(&self, name: &str) -> Option<Value> {
            serialized_field(self, name)
        }
    }

    impl Entity for Wallet {
        fn id(&self) -> &str {
            &self.id
        }

        fn as_aggregate_root(&mut self) -> Option<&mut dyn EventSourcedAggregateRoot> {
            Some(self)
        }
    }

    fn repository() -> (EventSourcedRepository<Wallet>, Arc<InMemoryRepository<Message>>) {
        let messages = Arc::new(InMemoryRepository::<Message>::new());
        let mut registry = EventRegistry::new();
        registry.register::<Opened>().register::<Credited>();
        let store = EventStore::new(EventEncoding::Dict, messages.clone(), registry);
        (EventSourcedRepository::new(Arc::new(store)), messages)
    }

    #[test]
    fn record_then_release_in_order() {
        let mut wallet = Wallet::open("w-1");
        wallet.credit(5);
        let released = wallet.release();
        assert_eq!(released.len(), 2);
        assert!(released[0].is::<Opened>());
        assert_eq!(released[1].downcast_ref::<Credited>().map(|c| c.amount), Some(5));
    }

    #[test]
    fn release_twice_yields_nothing_the_second_time() {
        let mut wallet = Wallet::default();
        wallet.record(Opened { id: "1".to_string() }).record(Credited {
            id: "1".to_string(),
            amount: 2,
        });
        let first = wallet.release();
        assert_eq!(first.len(), 2);
        assert!(wallet.release().is_empty());

        wallet.credit(1);
        assert_eq!(wallet.release().len(), 1);
        // Earlier batches are unaffected by later records
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn add_and_update_commit_released_events() {
        let (repository, messages) = repository();
        let wallet = repository.add(Wallet::open("w-1")).unwrap();
        assert!(wallet.events.is_empty());
        assert_eq!(messages.len(), 1);

        let mut wallet = wallet;
        wallet.credit(3);
        wallet.credit(4);
        let updated = repository.update(wallet, false).unwrap();
        assert!(updated.is_some());

        let stream = repository.event_store().get_event_stream(None).unwrap();
        assert_eq!(stream.len(), 3);

        let versions: Vec<u64> = {
            let mut all: Vec<Message> = messages.find(None).unwrap().collect();
            all.sort_by_key(|m| m.sequence);
            all.iter().map(|m| m.aggregate_root_version).collect()
        };
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(
            messages
                .find(None)
                .unwrap()
                .all(|m| m.aggregate_root_name == "Wallet")
        );
    }

    #[test]
    fn plain_entities_are_rejected() {
        let messages = Arc::new(InMemoryRepository::<Message>::new());
        let store = EventStore::new(EventEncoding::Object, messages, EventRegistry::new());
        let repository = EventSourcedRepository::<Value>::new(Arc::new(store));

        let error = repository.add(serde_json::json!({"id": "1"})).unwrap_err();
        assert!(matches!(error, RepositoryError::AggregateRoot(_)));
    }

    #[test]
    fn reads_are_unsupported() {
        let (repository, _) = repository();
        let spec = Specification::id("w-1");
        assert!(matches!(
            repository.find_one(&spec),
            Err(RepositoryError::Unsupported { operation: "find_one", .. })
        ));
        assert!(repository.find(None).is_err());
        assert!(repository.remove_one(&spec).is_err());
        assert!(repository.is_healthy());
    }

    /// Message repository whose writes can be switched off.
    #[derive(Default)]
    struct Flaky {
        messages: InMemoryRepository<Message>,
        failing: AtomicBool,
    }

    impl Flaky {
        fn check(&self) -> Result<(), RepositoryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RepositoryError::Domain("message store offline".into()));
            }
            Ok(())
        }
    }

    impl Repository<Message> for Flaky {
        fn add(&self, message: Message) -> Result<Message, RepositoryError> {
            self.check()?;
            self.messages.add(message)
        }

        fn update(&self, message: Message, upsert: bool) -> Result<Option<Message>, RepositoryError> {
            self.check()?;
            self.messages.update(message, upsert)
        }

        fn remove_one(&self, specification: &Specification) -> Result<(), RepositoryError> {
            self.messages.remove_one(specification)
        }

        fn find_one(&self, specification: &Specification) -> Result<Message, RepositoryError> {
            self.messages.find_one(specification)
        }

        fn find(&self, specification: Option<&Specification>) -> Result<EntityIter<'_, Message>, RepositoryError> {
            self.messages.find(specification)
        }
    }

    #[test]
    fn failed_commit_keeps_events_for_retry() {
        let flaky = Arc::new(Flaky::default());
        let store = EventStore::new(EventEncoding::Object, flaky.clone(), EventRegistry::new());
        let repository = EventSourcedRepository::<Wallet>::new(Arc::new(store));

        let mut wallet = Wallet::open("w-1");
        wallet.credit(7);
        flaky.failing.store(true, Ordering::SeqCst);
        assert!(repository.save(&mut wallet).is_err());
        assert_eq!(wallet.events.len(), 2);
        assert!(wallet.events.pending()[0].is::<Opened>());
        assert!(flaky.messages.is_empty());

        flaky.failing.store(false, Ordering::SeqCst);
        assert_eq!(repository.save(&mut wallet).unwrap(), Version::INITIAL);
        assert!(wallet.events.is_empty());
        assert_eq!(flaky.messages.len(), 2);

        wallet.credit(1);
        assert_eq!(repository.save(&mut wallet).unwrap(), Version::new(2));
    }
}

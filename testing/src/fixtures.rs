//! Fixture entities, events and aggregates.

use fractal_core::aggregate::{EventBuffer, EventSourcedAggregateRoot};
use fractal_core::entity::{Entity, FieldAccess, serialized_field};
use fractal_core::event::Event;
use fractal_core::event_store::EventRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A plain multi-tenant entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestUser {
    /// Identifier
    pub id: String,
    /// Owning account
    pub account_id: String,
    /// Display name
    pub name: String,
    /// Age in years
    pub age: u32,
    /// Optional contact address
    pub email: Option<String>,
    /// Free-form labels
    pub tags: Vec<String>,
}

impl TestUser {
    /// A user with no email and no tags.
    #[must_use]
    pub fn new(id: &str, account_id: &str, name: &str, age: u32) -> Self {
        Self {
            id: id.to_string(),
            account_id: account_id.to_string(),
            name: name.to_string(),
            age,
            email: None,
            tags: Vec::new(),
        }
    }

    /// Set the email.
    #[must_use]
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn tagged(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }
}

impl FieldAccess for TestUser {
    fn field(&self, name: &str) -> Option<Value> {
        serialized_field(self, name)
    }
}

impl Entity for TestUser {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Four users over two accounts, `acme` and `globex`.
#[must_use]
pub fn sample_users() -> Vec<TestUser> {
    vec![
        TestUser::new("1", "acme", "ada", 36).with_email("ada@acme.test").tagged("admin"),
        TestUser::new("2", "acme", "alan", 41).tagged("ops"),
        TestUser::new("3", "globex", "grace", 85).with_email("grace@globex.test"),
        TestUser::new("4", "globex", "linus", 28).tagged("admin").tagged("ops"),
    ]
}

/// A user signed up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRegistered {
    /// The new user
    pub user_id: String,
    /// Owning account
    pub account_id: String,
    /// Display name
    pub name: String,
}

impl Event for UserRegistered {
    fn object_id(&self) -> &str {
        &self.user_id
    }
}

/// A user changed their display name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRenamed {
    /// The renamed user
    pub user_id: String,
    /// New display name
    pub name: String,
}

impl Event for UserRenamed {
    fn object_id(&self) -> &str {
        &self.user_id
    }
}

/// A registry knowing every fixture event.
#[must_use]
pub fn event_registry() -> EventRegistry {
    let mut registry = EventRegistry::new();
    registry.register::<UserRegistered>().register::<UserRenamed>();
    registry
}

/// An event-sourced user aggregate.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UserAggregate {
    /// Identifier
    pub id: String,
    /// Owning account
    pub account_id: String,
    /// Display name
    pub name: String,
    #[serde(skip)]
    events: EventBuffer,
}

impl UserAggregate {
    /// Register a user, recording [`UserRegistered`].
    #[must_use]
    pub fn register(id: &str, account_id: &str, name: &str) -> Self {
        let mut user = Self {
            id: id.to_string(),
            account_id: account_id.to_string(),
            name: name.to_string(),
            events: EventBuffer::new(),
        };
        user.record(UserRegistered {
            user_id: id.to_string(),
            account_id: account_id.to_string(),
            name: name.to_string(),
        });
        user
    }

    /// Rename the user, recording [`UserRenamed`].
    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
        let user_id = self.id.clone();
        self.record(UserRenamed {
            user_id,
            name: name.to_string(),
        });
    }

    /// Events recorded and not yet released.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.events.len()
    }
}

impl EventSourcedAggregateRoot for UserAggregate {
    fn event_buffer(&mut self) -> &mut EventBuffer {
        &mut self.events
    }
}

impl FieldAccess for UserAggregate {
    fn field(&self, name: &str) -> Option<Value> {
        serialized_field(self, name)
    }
}

impl Entity for UserAggregate {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_aggregate_root(&mut self) -> Option<&mut dyn EventSourcedAggregateRoot> {
        Some(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn users_expose_fields() {
        let ada = &sample_users()[0];
        assert_eq!(ada.field("account_id"), Some(Value::from("acme")));
        assert_eq!(ada.field("tags"), Some(serde_json::json!(["admin"])));
        assert_eq!(ada.field("missing"), None);
    }

    #[test]
    fn aggregate_records_then_releases() {
        let mut user = UserAggregate::register("u-1", "acme", "ada");
        user.rename("ada lovelace");
        assert_eq!(user.pending(), 2);

        let events = user.release();
        assert_eq!(events[0].event_type(), "UserRegistered");
        assert_eq!(events[1].downcast_ref::<UserRenamed>().unwrap().name, "ada lovelace");
        assert!(user.release().is_empty());
    }
}

//! # Fractal Testing
//!
//! Testing utilities and helpers for the Fractal toolkit.
//!
//! This crate provides:
//! - A fixed [`Clock`] for deterministic event timestamps
//! - Fixture entities and events
//! - [`InMemoryEventBus`] and [`RecordingProjector`] for asserting on
//!   publications
//! - proptest strategies for specifications and candidates
//! - [`init_test_tracing`] to see `tracing` output in test runs
//!
//! ## Example
//!
//! ```
//! use fractal_core::repository::{InMemoryRepository, Repository};
//! use fractal_core::specification::Specification;
//! use fractal_testing::fixtures::{sample_users, TestUser};
//!
//! let users = InMemoryRepository::<TestUser>::new();
//! for user in sample_users() {
//!     users.add(user).unwrap();
//! }
//!
//! let acme = users.find(Some(&Specification::account_id("acme"))).unwrap();
//! assert_eq!(acme.count(), 2);
//! ```

use chrono::{DateTime, Utc};
use fractal_core::environment::Clock;

pub mod fixtures;
mod projection_mocks;
pub mod properties;

pub use projection_mocks::{InMemoryEventBus, ProjectedEvent, RecordingProjector};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use fractal_testing::mocks::FixedClock;
    /// use fractal_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

pub use mocks::{FixedClock, test_clock};

/// Install a test-friendly `fmt` subscriber.
///
/// Output goes through the test harness writer, so it is only shown for
/// failing tests. The filter comes from `RUST_LOG`, defaulting to `debug`.
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}

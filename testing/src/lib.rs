//! # Eventbook Testing
//!
//! Testing utilities and the in-process store for the Eventbook reservation engine.
//!
//! This crate provides:
//! - [`InMemoryReservationStore`]: a complete [`ReservationStore`] serializing each
//!   event behind its own async mutex (also usable outside tests)
//! - [`FaultyStore`]: a wrapper injecting storage failures at chosen points
//! - Mock implementations of the collaborator traits (clocks, cache sinks)
//! - Fixtures for common events
//!
//! ## Example
//!
//! ```
//! use eventbook_testing::{helpers, InMemoryReservationStore};
//! use eventbook_core::store::ReservationStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryReservationStore::new();
//! let event = store.insert_event(helpers::upcoming_event(7, 2)).await?;
//! assert_eq!(event.capacity.available(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! [`ReservationStore`]: eventbook_core::store::ReservationStore

pub mod faults;
pub mod memory;

use chrono::{DateTime, Utc};
use eventbook_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use eventbook_core::cache::{CacheError, CacheInvalidator, CacheKey};
    use eventbook_core::types::EventId;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventbook_testing::mocks::FixedClock;
    /// use eventbook_core::environment::Clock;
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

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the engine.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or backward, with a negative duration)
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Cache sink capturing every invalidation request.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingCacheInvalidator {
        calls: Arc<Mutex<Vec<Vec<CacheKey>>>>,
    }

    impl RecordingCacheInvalidator {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every batch of keys received, in order
        #[must_use]
        pub fn calls(&self) -> Vec<Vec<CacheKey>> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Events whose detail entry was invalidated, in order
        #[must_use]
        pub fn invalidated_events(&self) -> Vec<EventId> {
            self.calls()
                .into_iter()
                .flatten()
                .filter_map(|key| match key {
                    CacheKey::EventDetail(id) => Some(id),
                    CacheKey::EventListings | CacheKey::PopularEvents => None,
                })
                .collect()
        }
    }

    impl CacheInvalidator for RecordingCacheInvalidator {
        fn invalidate<'a>(
            &'a self,
            keys: &'a [CacheKey],
        ) -> BoxFuture<'a, Result<(), CacheError>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(keys.to_vec());
                Ok(())
            })
        }
    }

    /// Cache sink that rejects every request.
    #[derive(Debug, Clone, Default)]
    pub struct FailingCacheInvalidator {
        attempts: Arc<AtomicUsize>,
    }

    impl FailingCacheInvalidator {
        /// Create a failing sink
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of invalidation requests received
        #[must_use]
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl CacheInvalidator for FailingCacheInvalidator {
        fn invalidate<'a>(
            &'a self,
            _keys: &'a [CacheKey],
        ) -> BoxFuture<'a, Result<(), CacheError>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Err(CacheError("connection refused".to_string()))
            })
        }
    }
}

/// Test helpers and utilities
pub mod helpers {
    use super::mocks::test_epoch;
    use chrono::Duration;
    use eventbook_core::types::{NewEvent, UserId};

    /// An event 30 days after the test epoch.
    #[must_use]
    pub fn upcoming_event(creator_id: i64, max_capacity: u32) -> NewEvent {
        NewEvent {
            creator_id: UserId::new(creator_id),
            event_date: test_epoch() + Duration::days(30),
            max_capacity,
        }
    }

    /// An event one day before the test epoch.
    #[must_use]
    pub fn past_event(creator_id: i64, max_capacity: u32) -> NewEvent {
        NewEvent {
            creator_id: UserId::new(creator_id),
            event_date: test_epoch() - Duration::days(1),
            max_capacity,
        }
    }

    /// Install a test subscriber printing `RUST_LOG`-filtered traces.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use faults::{FaultPoint, FaultyStore, FaultyTransaction};
pub use memory::{InMemoryReservationStore, InMemoryTransaction};
pub use mocks::{
    FailingCacheInvalidator, FixedClock, ManualClock, RecordingCacheInvalidator, test_clock,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, Timelike};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_epoch_is_new_year_2025() {
        let now = test_clock().now();
        assert_eq!((now.year(), now.month(), now.day()), (2025, 1, 1));
        assert_eq!(now.hour(), 0);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let engine_handle = clock.clone();
        clock.advance(Duration::hours(2));
        assert_eq!(engine_handle.now(), test_clock().now() + Duration::hours(2));
    }
}

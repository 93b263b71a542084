//! # Eventbook Core
//!
//! Core types and traits for the Eventbook reservation engine.
//!
//! This crate owns the rules that keep an event's spot count honest:
//!
//! - **Capacity Ledger**: `available_spots` never drops below zero, never exceeds
//!   `max_capacity`, and always equals `max_capacity - confirmed reservations`
//! - **Reservation rules**: the preconditions gating `Confirmed → Canceled`
//!   and the creation of new confirmed reservations
//! - **Collaborator traits**: transactional storage, a clock, and a cache
//!   invalidation sink, all injected by the caller
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell: no I/O lives here
//! - Every ledger mutation happens inside a [`store::LedgerTransaction`] that
//!   holds the event's exclusive lock
//! - Business-rule failures are values ([`error::ReservationError`]), not panics
//!
//! ## Example
//!
//! ```
//! use eventbook_core::ledger::Capacity;
//!
//! let mut capacity = Capacity::new(2);
//! assert_eq!(capacity.try_decrement(), Ok(1));
//! assert_eq!(capacity.reserved(), 1);
//! assert!(capacity.resize(0).is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod ledger;
pub mod rules;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ReservationError, Result};
pub use ledger::{Capacity, CapacityLedger, LedgerError};
pub use types::*;

/// Environment module - Dependency injection traits
///
/// External dependencies that the reservation rules need (currently only
/// "what time is it") are abstracted behind traits and injected by the
/// caller, so tests can pin time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use eventbook_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

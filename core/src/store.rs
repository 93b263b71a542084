//! Transactional storage traits.
//!
//! The reservation engine needs exactly one thing from storage: the ability to
//! take an exclusive lock on one event's ledger row, read and write that row and
//! its reservations, and then commit everything at once or nothing at all.
//!
//! A [`ReservationStore`] opens a [`LedgerTransaction`] already holding that
//! lock. Implementations must guarantee:
//!
//! - two transactions on the same event never overlap (the second waits)
//! - transactions on different events never block each other
//! - dropping a transaction without [`LedgerTransaction::commit`] discards every
//!   write made through it
//! - at most one confirmed reservation per (event, user) can ever be stored;
//!   an insert violating that returns [`StoreError::UniqueViolation`]
//!
//! Note: methods return `impl Future + Send` so that generic callers can be
//! spawned onto a multi-threaded runtime.

use crate::error::ReservationError;
use crate::ledger::Capacity;
use crate::types::{
    EventId, EventRecord, NewEvent, ReservationId, ReservationRecord, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

/// Storage-layer failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row referenced inside an open transaction disappeared.
    #[error("Row not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint
        constraint: String,
    },

    /// Deadlock, serialization failure, pool exhaustion or lost connection.
    /// The whole transaction may be retried.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<StoreError> for ReservationError {
    fn from(error: StoreError) -> Self {
        let retryable = matches!(error, StoreError::Transient(_));
        Self::StorageFailure {
            message: error.to_string(),
            retryable,
        }
    }
}

/// A storage transaction holding the exclusive lock of one event.
pub trait LedgerTransaction: Send {
    /// The locked event row, reflecting writes made through this transaction.
    fn event(&self) -> &EventRecord;

    /// The reservation locked by [`ReservationStore::lock_reservation`], if the
    /// transaction was opened that way.
    fn reservation(&self) -> Option<&ReservationRecord>;

    /// Whether `user_id` holds a confirmed reservation for the locked event.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn has_active_reservation(
        &mut self,
        user_id: UserId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Count confirmed reservations for the locked event.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn count_confirmed(&mut self) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// Persist new capacity fields for the locked event.
    ///
    /// Only [`crate::ledger::CapacityLedger`] calls this.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    fn write_capacity(
        &mut self,
        capacity: Capacity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert a confirmed reservation for the locked event.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UniqueViolation`] if the user already holds a confirmed
    ///   reservation for this event
    /// - any other [`StoreError`] if the insert fails
    fn insert_reservation(
        &mut self,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<ReservationRecord, StoreError>> + Send;

    /// Mark the locked reservation as canceled.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no reservation is locked by this transaction
    /// - any other [`StoreError`] if the update fails
    fn mark_canceled(
        &mut self,
        canceled_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<ReservationRecord, StoreError>> + Send;

    /// Apply every write atomically and release the lock.
    ///
    /// # Errors
    ///
    /// Returns error if the commit fails; nothing is applied in that case.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Storage for events and reservations.
pub trait ReservationStore: Send + Sync + 'static {
    /// Transaction type handed out by this store.
    type Transaction: LedgerTransaction;

    /// Insert a new event with every spot available.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    fn insert_event(
        &self,
        event: NewEvent,
    ) -> impl Future<Output = Result<EventRecord, StoreError>> + Send;

    /// Open a transaction holding the lock of `event_id`.
    ///
    /// Returns `None` if the event does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the lock cannot be acquired.
    fn lock_event(
        &self,
        event_id: EventId,
    ) -> impl Future<Output = Result<Option<Self::Transaction>, StoreError>> + Send;

    /// Open a transaction holding the lock of the reservation's event and the
    /// reservation row itself (event first, then reservation).
    ///
    /// Returns `None` if the reservation does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the locks cannot be acquired.
    fn lock_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Self::Transaction>, StoreError>> + Send;

    /// Read an event without locking it.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn load_event(
        &self,
        event_id: EventId,
    ) -> impl Future<Output = Result<Option<EventRecord>, StoreError>> + Send;

    /// Whether `user_id` holds a confirmed reservation for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn has_active_reservation(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// All reservations of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn reservations_for_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<ReservationRecord>, StoreError>> + Send;
}

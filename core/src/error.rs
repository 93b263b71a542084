//! Error taxonomy for reservation and capacity operations.

use crate::types::{EventId, ReservationId};
use thiserror::Error;

/// Result type alias for reservation operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Every way a reservation, cancellation or resize can fail.
///
/// All variants except [`ReservationError::StorageFailure`] are business-rule
/// outcomes: expected, returned to the caller, never logged as errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    // ═══════════════════════════════════════════════════════════
    // Reservation creation
    // ═══════════════════════════════════════════════════════════

    /// The event does not exist.
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// The event date is not strictly in the future.
    #[error("Event {0} has already taken place")]
    EventInPast(EventId),

    /// An admin tried to reserve a spot at their own event.
    #[error("Event creators with admin role cannot reserve their own event")]
    SelfReservationForbidden,

    /// The user already holds a confirmed reservation for the event.
    #[error("User already holds a confirmed reservation for this event")]
    AlreadyReserved,

    /// No spots left.
    #[error("Event {0} has no available spots")]
    NoCapacity(EventId),

    // ═══════════════════════════════════════════════════════════
    // Cancellation
    // ═══════════════════════════════════════════════════════════

    /// The reservation does not exist.
    #[error("Reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// Requester neither owns the reservation nor is an admin.
    #[error("Not allowed to cancel this reservation")]
    Forbidden,

    /// The reservation was canceled before.
    #[error("Reservation {0} is already canceled")]
    AlreadyCanceled(ReservationId),

    // ═══════════════════════════════════════════════════════════
    // Capacity management
    // ═══════════════════════════════════════════════════════════

    /// Resize target is below the number of confirmed reservations.
    #[error("Cannot set capacity to {requested}: {reserved} spots are already reserved")]
    CapacityBelowReservedFloor {
        /// Requested maximum capacity
        requested: u32,
        /// Confirmed reservations at the time of the request
        reserved: u32,
    },

    /// Requested capacity is outside `1..=MAX_CAPACITY` for a new event, or
    /// above [`MAX_CAPACITY`] for a resize.
    ///
    /// [`MAX_CAPACITY`]: crate::ledger::MAX_CAPACITY
    #[error("Capacity {requested} is out of range")]
    InvalidCapacity {
        /// Requested maximum capacity
        requested: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// The storage transaction could not complete; nothing was applied.
    #[error("Storage failure: {message}")]
    StorageFailure {
        /// Underlying error description
        message: String,
        /// Whether re-running the whole transaction may succeed
        retryable: bool,
    },
}

impl ReservationError {
    /// Build a non-retryable storage failure.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether this is an expected business-rule outcome (as opposed to an
    /// infrastructure failure).
    #[must_use]
    pub const fn is_business_rule(&self) -> bool {
        !matches!(self, Self::StorageFailure { .. })
    }

    /// Whether the whole transaction may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageFailure { retryable: true, .. })
    }

    /// Stable machine-readable name, used as a metrics label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EventNotFound(_) => "event_not_found",
            Self::EventInPast(_) => "event_in_past",
            Self::SelfReservationForbidden => "self_reservation_forbidden",
            Self::AlreadyReserved => "already_reserved",
            Self::NoCapacity(_) => "no_capacity",
            Self::ReservationNotFound(_) => "reservation_not_found",
            Self::Forbidden => "forbidden",
            Self::AlreadyCanceled(_) => "already_canceled",
            Self::CapacityBelowReservedFloor { .. } => "capacity_below_reserved_floor",
            Self::InvalidCapacity { .. } => "invalid_capacity",
            Self::StorageFailure { .. } => "storage_failure",
        }
    }
}

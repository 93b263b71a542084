//! Domain types for the reservation engine.
//!
//! Identifiers are opaque integers assigned by the storage layer. Records
//! (`EventRecord`, `ReservationRecord`) are what a [`crate::store::LedgerTransaction`]
//! hands back; views (`EventView`, `ReservationView`) are the serializable read
//! models returned to the surrounding application.

use crate::ledger::Capacity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(i64);

impl EventId {
    /// Wrap a raw storage identifier
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw storage identifier
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(i64);

impl ReservationId {
    /// Wrap a raw storage identifier
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Role of the caller, already resolved by the authentication layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular user
    User,
    /// Administrator (manages events, users and reservations)
    Admin,
}

impl Role {
    /// Whether this role carries admin privileges
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Reservation lifecycle status.
///
/// `Canceled` is terminal: a canceled reservation is never re-confirmed, a new
/// one is created instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holds one spot of the event's capacity
    Confirmed,
    /// Released; no longer counts against capacity
    Canceled,
}

impl ReservationStatus {
    /// Convert status to its storage string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse status from its storage string.
    ///
    /// Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(Self::Confirmed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Whether the reservation still counts against capacity
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Request to register a new capacity-bearing event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Owning user
    pub creator_id: UserId,
    /// When the event takes place
    pub event_date: DateTime<Utc>,
    /// Maximum number of confirmed reservations
    pub max_capacity: u32,
}

/// An event row as seen under its ledger lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    /// Event identifier
    pub id: EventId,
    /// Owning user (back-reference only)
    pub creator_id: UserId,
    /// When the event takes place
    pub event_date: DateTime<Utc>,
    /// Capacity fields, mutated only through the ledger
    pub capacity: Capacity,
}

/// A reservation row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationRecord {
    /// Reservation identifier
    pub id: ReservationId,
    /// Reserved event
    pub event_id: EventId,
    /// Reserving user
    pub user_id: UserId,
    /// Current status
    pub status: ReservationStatus,
    /// When the reservation was confirmed
    pub created_at: DateTime<Utc>,
    /// When it was canceled, if it was
    pub canceled_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Views
// ============================================================================

/// Read model of an event's capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventView {
    /// Event identifier
    pub event_id: EventId,
    /// Owning user
    pub creator_id: UserId,
    /// When the event takes place
    pub event_date: DateTime<Utc>,
    /// Maximum capacity
    pub max_capacity: u32,
    /// Spots still available
    pub available_spots: u32,
}

impl From<&EventRecord> for EventView {
    fn from(record: &EventRecord) -> Self {
        Self {
            event_id: record.id,
            creator_id: record.creator_id,
            event_date: record.event_date,
            max_capacity: record.capacity.max(),
            available_spots: record.capacity.available(),
        }
    }
}

/// Read model of a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    /// Reservation identifier
    pub reservation_id: ReservationId,
    /// Reserved event
    pub event_id: EventId,
    /// Reserving user
    pub user_id: UserId,
    /// Current status
    pub status: ReservationStatus,
    /// When the reservation was confirmed
    pub created_at: DateTime<Utc>,
    /// When it was canceled, if it was
    pub canceled_at: Option<DateTime<Utc>>,
}

impl From<&ReservationRecord> for ReservationView {
    fn from(record: &ReservationRecord) -> Self {
        Self {
            reservation_id: record.id,
            event_id: record.event_id,
            user_id: record.user_id,
            status: record.status,
            created_at: record.created_at,
            canceled_at: record.canceled_at,
        }
    }
}

/// Result of recounting an event's confirmed reservations against its ledger row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    /// Audited event
    pub event_id: EventId,
    /// Maximum capacity on the ledger row
    pub max_capacity: u32,
    /// Available spots on the ledger row
    pub available_spots: u32,
    /// Confirmed reservations actually stored
    pub confirmed_reservations: u32,
}

impl LedgerAudit {
    /// `available_spots == max_capacity - confirmed_reservations`
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.available_spots <= self.max_capacity
            && self.max_capacity - self.available_spots == self.confirmed_reservations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_string() {
        for status in [ReservationStatus::Confirmed, ReservationStatus::Canceled] {
            assert_eq!(ReservationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReservationStatus::parse("pending"), None);
    }

    #[test]
    fn only_confirmed_is_active() {
        assert!(ReservationStatus::Confirmed.is_active());
        assert!(!ReservationStatus::Canceled.is_active());
    }

    #[test]
    fn audit_detects_drift() {
        let audit = LedgerAudit {
            event_id: EventId::new(1),
            max_capacity: 10,
            available_spots: 7,
            confirmed_reservations: 3,
        };
        assert!(audit.is_consistent());

        let drifted = LedgerAudit {
            confirmed_reservations: 2,
            ..audit
        };
        assert!(!drifted.is_consistent());
    }

    #[test]
    fn views_serialize_with_snake_case_status() {
        let view = ReservationView {
            reservation_id: ReservationId::new(4),
            event_id: EventId::new(2),
            user_id: UserId::new(9),
            status: ReservationStatus::Canceled,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            canceled_at: None,
        };
        let json = serde_json::to_value(&view).unwrap_or_default();
        assert_eq!(json["status"], "canceled");
        assert_eq!(json["reservation_id"], 4);
    }
}

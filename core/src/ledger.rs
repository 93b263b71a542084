//! Capacity Ledger for the reservation engine.
//!
//! Owns the relationship between an event's maximum capacity, its available
//! spots, and the number of confirmed reservations:
//!
//! ```text
//! 0 <= available <= max
//! reserved = max - available = count(confirmed reservations)
//! ```
//!
//! [`Capacity`] is the pure arithmetic. [`CapacityLedger`] applies it to the
//! locked event row of a [`LedgerTransaction`], which is the only path allowed to
//! write `available_spots`. Serialization per event comes from the transaction's
//! exclusive lock, so the read-check-write below can never interleave with another
//! ledger operation on the same event.

use crate::error::{ReservationError, Result};
use crate::store::LedgerTransaction;
use crate::types::EventId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest capacity an event may have; every store can hold it in a signed
/// 32-bit column.
pub const MAX_CAPACITY: u32 = 2_147_483_647;

/// Ledger arithmetic failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    /// No spot left to take.
    #[error("No available spots")]
    NoCapacity,

    /// Resize target is below the reserved count.
    #[error("Requested capacity {requested} is below the {reserved} reserved spots")]
    BelowReservedFloor {
        /// Requested maximum capacity
        requested: u32,
        /// Spots currently reserved
        reserved: u32,
    },

    /// Stored fields violate `available <= max`.
    #[error("Inconsistent capacity row: {available} available of {max}")]
    Inconsistent {
        /// Stored maximum capacity
        max: u32,
        /// Stored available spots
        available: u32,
    },
}

impl LedgerError {
    /// Attach the event the failure happened on.
    #[must_use]
    pub fn for_event(self, event_id: EventId) -> ReservationError {
        match self {
            Self::NoCapacity => ReservationError::NoCapacity(event_id),
            Self::BelowReservedFloor {
                requested,
                reserved,
            } => ReservationError::CapacityBelowReservedFloor {
                requested,
                reserved,
            },
            Self::Inconsistent { .. } => {
                ReservationError::storage(format!("event {event_id}: {self}"))
            }
        }
    }
}

/// Capacity fields of one event.
///
/// Fields are private so that every constructor and mutator upholds
/// `available <= max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "CapacityFields")]
pub struct Capacity {
    max: u32,
    available: u32,
}

/// Unchecked wire shape of [`Capacity`]; deserialization goes through
/// [`Capacity::from_parts`].
#[derive(Deserialize)]
struct CapacityFields {
    max: u32,
    available: u32,
}

impl TryFrom<CapacityFields> for Capacity {
    type Error = LedgerError;

    fn try_from(fields: CapacityFields) -> std::result::Result<Self, Self::Error> {
        Self::from_parts(fields.max, fields.available)
    }
}

impl Capacity {
    /// Fresh capacity: every spot available.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self {
            max,
            available: max,
        }
    }

    /// Rebuild capacity from stored fields.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Inconsistent`] if `available > max`.
    pub const fn from_parts(max: u32, available: u32) -> std::result::Result<Self, LedgerError> {
        if available > max {
            return Err(LedgerError::Inconsistent { max, available });
        }
        Ok(Self { max, available })
    }

    /// Maximum capacity
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Spots still available
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.available
    }

    /// Spots held by confirmed reservations
    #[must_use]
    pub const fn reserved(&self) -> u32 {
        self.max - self.available
    }

    /// Whether no spot is held by a confirmed reservation
    #[must_use]
    pub const fn is_unreserved(&self) -> bool {
        self.available == self.max
    }

    /// Take one spot.
    ///
    /// Returns the new available count.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NoCapacity`] without mutating when no spot is left.
    pub const fn try_decrement(&mut self) -> std::result::Result<u32, LedgerError> {
        if self.available == 0 {
            return Err(LedgerError::NoCapacity);
        }
        self.available -= 1;
        Ok(self.available)
    }

    /// Return one spot, clamped at `max`.
    ///
    /// Returns the new available count.
    pub const fn increment(&mut self) -> u32 {
        if self.available < self.max {
            self.available += 1;
        }
        self.available
    }

    /// Change the maximum capacity, keeping the reserved count.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::BelowReservedFloor`] if `new_max` is smaller than
    /// the number of reserved spots; nothing is mutated in that case.
    pub const fn resize(&mut self, new_max: u32) -> std::result::Result<(), LedgerError> {
        let reserved = self.reserved();
        if new_max < reserved {
            return Err(LedgerError::BelowReservedFloor {
                requested: new_max,
                reserved,
            });
        }
        self.max = new_max;
        self.available = new_max - reserved;
        Ok(())
    }
}

/// Transactional ledger operations.
///
/// Each operation reads the capacity of the event locked by `tx`, applies the
/// arithmetic, and writes it back through the same transaction. Nothing is
/// persisted until the caller commits.
#[derive(Clone, Copy, Debug, Default)]
pub struct CapacityLedger;

impl CapacityLedger {
    /// Take one spot from the locked event.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::NoCapacity`] when `available == 0` (nothing written)
    /// - [`ReservationError::StorageFailure`] if the write fails
    pub async fn try_decrement<T: LedgerTransaction>(tx: &mut T) -> Result<u32> {
        let event_id = tx.event().id;
        let mut capacity = tx.event().capacity;
        let available = capacity
            .try_decrement()
            .map_err(|e| e.for_event(event_id))?;
        tx.write_capacity(capacity).await?;
        Ok(available)
    }

    /// Return one spot to the locked event.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::StorageFailure`] if the write fails.
    pub async fn increment<T: LedgerTransaction>(tx: &mut T) -> Result<u32> {
        let event_id = tx.event().id;
        let mut capacity = tx.event().capacity;
        if capacity.is_unreserved() {
            tracing::warn!(
                event_id = %event_id,
                max_capacity = capacity.max(),
                "Spot release clamped at max capacity"
            );
            return Ok(capacity.available());
        }
        let available = capacity.increment();
        tx.write_capacity(capacity).await?;
        Ok(available)
    }

    /// Change the locked event's maximum capacity.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::CapacityBelowReservedFloor`] if `new_max` is below the
    ///   reserved count (nothing written)
    /// - [`ReservationError::StorageFailure`] if the write fails
    pub async fn resize<T: LedgerTransaction>(tx: &mut T, new_max: u32) -> Result<Capacity> {
        let event_id = tx.event().id;
        let mut capacity = tx.event().capacity;
        capacity.resize(new_max).map_err(|e| e.for_event(event_id))?;
        tx.write_capacity(capacity).await?;
        Ok(capacity)
    }
}

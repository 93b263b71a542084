//! In-process reservation store.
//!
//! Each event lives in its own slot behind a `tokio::sync::Mutex`. Opening a
//! transaction takes that mutex (owned, so the guard can travel across await
//! points and tasks) and copies the slot into a working set. Writes go to the
//! working set only; [`LedgerTransaction::commit`] swaps it into the slot while
//! the lock is still held. Dropping the transaction discards the working set, which
//! is the rollback.
//!
//! Events never share a mutex, so traffic on one event never blocks another.

use eventbook_core::ledger::Capacity;
use eventbook_core::store::{LedgerTransaction, ReservationStore, StoreError};
use eventbook_core::types::{
    EventId, EventRecord, NewEvent, ReservationId, ReservationRecord, ReservationStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Name reported by [`StoreError::UniqueViolation`], matching the Postgres index.
const ONE_CONFIRMED_PER_USER: &str = "reservations_one_confirmed_per_user";

#[derive(Clone, Debug)]
struct EventSlot {
    event: EventRecord,
    reservations: BTreeMap<ReservationId, ReservationRecord>,
}

impl EventSlot {
    fn has_active(&self, user_id: UserId) -> bool {
        self.reservations
            .values()
            .any(|r| r.user_id == user_id && r.status.is_active())
    }
}

#[derive(Debug, Default)]
struct Tables {
    events: RwLock<HashMap<EventId, Arc<AsyncMutex<EventSlot>>>>,
    reservation_events: RwLock<HashMap<ReservationId, EventId>>,
    next_event_id: AtomicI64,
    next_reservation_id: AtomicI64,
}

impl Tables {
    fn slot(&self, event_id: EventId) -> Option<Arc<AsyncMutex<EventSlot>>> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_id)
            .cloned()
    }

    fn all_slots(&self) -> Vec<Arc<AsyncMutex<EventSlot>>> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn event_of(&self, reservation_id: ReservationId) -> Option<EventId> {
        self.reservation_events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&reservation_id)
            .copied()
    }
}

/// In-process [`ReservationStore`] with one async mutex per event.
///
/// Cloning is cheap and clones share the same tables.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReservationStore {
    tables: Arc<Tables>,
}

impl InMemoryReservationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered events
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.tables
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Committed state of one event and all its reservations.
    ///
    /// Waits for any open transaction on the event to finish.
    pub async fn snapshot(
        &self,
        event_id: EventId,
    ) -> Option<(EventRecord, Vec<ReservationRecord>)> {
        let slot = self.tables.slot(event_id)?;
        let slot = slot.lock().await;
        Some((
            slot.event.clone(),
            slot.reservations.values().cloned().collect(),
        ))
    }

    async fn open(
        &self,
        slot: Arc<AsyncMutex<EventSlot>>,
        locked_reservation: Option<ReservationId>,
    ) -> InMemoryTransaction {
        let guard = slot.lock_owned().await;
        let working = guard.clone();
        InMemoryTransaction {
            guard,
            working,
            locked_reservation,
            inserted: Vec::new(),
            tables: Arc::clone(&self.tables),
        }
    }
}

impl ReservationStore for InMemoryReservationStore {
    type Transaction = InMemoryTransaction;

    async fn insert_event(&self, event: NewEvent) -> Result<EventRecord, StoreError> {
        let id = EventId::new(self.tables.next_event_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = EventRecord {
            id,
            creator_id: event.creator_id,
            event_date: event.event_date,
            capacity: Capacity::new(event.max_capacity),
        };

        let slot = EventSlot {
            event: record.clone(),
            reservations: BTreeMap::new(),
        };
        self.tables
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(AsyncMutex::new(slot)));

        Ok(record)
    }

    async fn lock_event(&self, event_id: EventId) -> Result<Option<InMemoryTransaction>, StoreError> {
        let Some(slot) = self.tables.slot(event_id) else {
            return Ok(None);
        };
        Ok(Some(self.open(slot, None).await))
    }

    async fn lock_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<InMemoryTransaction>, StoreError> {
        let Some(event_id) = self.tables.event_of(reservation_id) else {
            return Ok(None);
        };
        let Some(slot) = self.tables.slot(event_id) else {
            return Ok(None);
        };

        let tx = self.open(slot, Some(reservation_id)).await;
        if tx.reservation().is_none() {
            return Ok(None);
        }
        Ok(Some(tx))
    }

    async fn load_event(&self, event_id: EventId) -> Result<Option<EventRecord>, StoreError> {
        let Some(slot) = self.tables.slot(event_id) else {
            return Ok(None);
        };
        let event = slot.lock().await.event.clone();
        Ok(Some(event))
    }

    async fn has_active_reservation(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        let Some(slot) = self.tables.slot(event_id) else {
            return Ok(false);
        };
        let active = slot.lock().await.has_active(user_id);
        Ok(active)
    }

    async fn reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationRecord>, StoreError> {
        let mut found = Vec::new();
        for slot in self.tables.all_slots() {
            let slot = slot.lock().await;
            found.extend(
                slot.reservations
                    .values()
                    .filter(|r| r.user_id == user_id)
                    .cloned(),
            );
        }
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }
}

/// Transaction over one event slot of an [`InMemoryReservationStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<EventSlot>,
    working: EventSlot,
    locked_reservation: Option<ReservationId>,
    inserted: Vec<ReservationId>,
    tables: Arc<Tables>,
}

impl LedgerTransaction for InMemoryTransaction {
    fn event(&self) -> &EventRecord {
        &self.working.event
    }

    fn reservation(&self) -> Option<&ReservationRecord> {
        self.locked_reservation
            .and_then(|id| self.working.reservations.get(&id))
    }

    async fn has_active_reservation(&mut self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.working.has_active(user_id))
    }

    async fn count_confirmed(&mut self) -> Result<u32, StoreError> {
        let confirmed = self
            .working
            .reservations
            .values()
            .filter(|r| r.status.is_active())
            .count();
        u32::try_from(confirmed)
            .map_err(|_| StoreError::Database(format!("{confirmed} reservations overflow u32")))
    }

    async fn write_capacity(&mut self, capacity: Capacity) -> Result<(), StoreError> {
        self.working.event.capacity = capacity;
        Ok(())
    }

    async fn insert_reservation(
        &mut self,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<ReservationRecord, StoreError> {
        if self.working.has_active(user_id) {
            return Err(StoreError::UniqueViolation {
                constraint: ONE_CONFIRMED_PER_USER.to_string(),
            });
        }

        let id = ReservationId::new(
            self.tables.next_reservation_id.fetch_add(1, Ordering::SeqCst) + 1,
        );
        let record = ReservationRecord {
            id,
            event_id: self.working.event.id,
            user_id,
            status: ReservationStatus::Confirmed,
            created_at,
            canceled_at: None,
        };
        self.working.reservations.insert(id, record.clone());
        self.inserted.push(id);
        Ok(record)
    }

    async fn mark_canceled(
        &mut self,
        canceled_at: DateTime<Utc>,
    ) -> Result<ReservationRecord, StoreError> {
        let record = self
            .locked_reservation
            .and_then(|id| self.working.reservations.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound("no reservation locked".to_string()))?;
        record.status = ReservationStatus::Canceled;
        record.canceled_at = Some(canceled_at);
        Ok(record.clone())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let Self {
            mut guard,
            working,
            inserted,
            tables,
            ..
        } = self;

        let event_id = working.event.id;
        {
            let mut index = tables
                .reservation_events
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for id in inserted {
                index.insert(id, event_id);
            }
        }
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::helpers::upcoming_event;
    use crate::mocks::test_epoch;
    use std::time::Duration;

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryReservationStore::new();
        let event = store.insert_event(upcoming_event(1, 3)).await.unwrap();

        {
            let mut tx = store.lock_event(event.id).await.unwrap().unwrap();
            tx.write_capacity(Capacity::from_parts(3, 2).unwrap())
                .await
                .unwrap();
            tx.insert_reservation(UserId::new(5), test_epoch())
                .await
                .unwrap();
        }

        let (event, reservations) = store.snapshot(event.id).await.unwrap();
        assert_eq!(event.capacity.available(), 3);
        assert!(reservations.is_empty());
    }

    #[tokio::test]
    async fn committed_reservation_is_indexed() {
        let store = InMemoryReservationStore::new();
        let event = store.insert_event(upcoming_event(1, 3)).await.unwrap();

        let mut tx = store.lock_event(event.id).await.unwrap().unwrap();
        let reservation = tx
            .insert_reservation(UserId::new(5), test_epoch())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let tx = store.lock_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(tx.reservation().map(|r| r.user_id), Some(UserId::new(5)));
        assert_eq!(tx.event().id, event.id);
    }

    #[tokio::test]
    async fn second_confirmed_insert_violates_uniqueness() {
        let store = InMemoryReservationStore::new();
        let event = store.insert_event(upcoming_event(1, 3)).await.unwrap();

        let mut tx = store.lock_event(event.id).await.unwrap().unwrap();
        tx.insert_reservation(UserId::new(5), test_epoch())
            .await
            .unwrap();
        let err = tx
            .insert_reservation(UserId::new(5), test_epoch())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn unknown_ids_open_nothing() {
        let store = InMemoryReservationStore::new();
        assert!(store.lock_event(EventId::new(9)).await.unwrap().is_none());
        assert!(store
            .lock_reservation(ReservationId::new(9))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_event_transactions_serialize() {
        let store = InMemoryReservationStore::new();
        let event = store.insert_event(upcoming_event(1, 3)).await.unwrap();

        let tx = store.lock_event(event.id).await.unwrap().unwrap();

        let contender = store.clone();
        let event_id = event.id;
        let waiting = tokio::spawn(async move { contender.lock_event(event_id).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(tx);
        let second = waiting.await.unwrap().unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn different_events_do_not_block() {
        let store = InMemoryReservationStore::new();
        let first = store.insert_event(upcoming_event(1, 3)).await.unwrap();
        let second = store.insert_event(upcoming_event(1, 3)).await.unwrap();

        let _held = store.lock_event(first.id).await.unwrap().unwrap();
        let other = tokio::time::timeout(Duration::from_secs(1), store.lock_event(second.id))
            .await
            .unwrap()
            .unwrap();
        assert!(other.is_some());
    }
}

//! Fault injection for storage tests.
//!
//! [`FaultyStore`] wraps any [`ReservationStore`] and fails chosen operations
//! with chosen [`StoreError`]s. Faults are queued per injection point and
//! consumed one per call, so a test can say "the next two commits hit a
//! deadlock" and then watch the engine retry.

use eventbook_core::ledger::Capacity;
use eventbook_core::store::{LedgerTransaction, ReservationStore, StoreError};
use eventbook_core::types::{
    EventId, EventRecord, NewEvent, ReservationId, ReservationRecord, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Where a fault fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    /// Opening a transaction (`lock_event` / `lock_reservation`)
    Lock,
    /// Writing capacity fields
    WriteCapacity,
    /// Inserting a reservation
    InsertReservation,
    /// Marking a reservation canceled
    MarkCanceled,
    /// Committing
    Commit,
}

#[derive(Debug, Default)]
struct FaultPlan {
    lock: VecDeque<StoreError>,
    write_capacity: VecDeque<StoreError>,
    insert_reservation: VecDeque<StoreError>,
    mark_canceled: VecDeque<StoreError>,
    commit: VecDeque<StoreError>,
    fired: usize,
}

impl FaultPlan {
    fn queue(&mut self, point: FaultPoint) -> &mut VecDeque<StoreError> {
        match point {
            FaultPoint::Lock => &mut self.lock,
            FaultPoint::WriteCapacity => &mut self.write_capacity,
            FaultPoint::InsertReservation => &mut self.insert_reservation,
            FaultPoint::MarkCanceled => &mut self.mark_canceled,
            FaultPoint::Commit => &mut self.commit,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct SharedPlan(Arc<Mutex<FaultPlan>>);

impl SharedPlan {
    fn take(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut plan = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match plan.queue(point).pop_front() {
            Some(error) => {
                plan.fired += 1;
                tracing::debug!(?point, %error, "Injecting storage fault");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

/// Store wrapper that fails operations on demand.
#[derive(Clone, Debug)]
pub struct FaultyStore<S> {
    inner: S,
    plan: SharedPlan,
}

impl<S: ReservationStore> FaultyStore<S> {
    /// Wrap `inner` with an empty fault plan
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            plan: SharedPlan::default(),
        }
    }

    /// The wrapped store
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `times` calls at `point` with `error`.
    pub fn fail_next(&self, point: FaultPoint, times: usize, error: &StoreError) {
        let mut plan = self.plan.0.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = plan.queue(point);
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Number of faults fired so far
    #[must_use]
    pub fn faults_fired(&self) -> usize {
        self.plan.0.lock().unwrap_or_else(PoisonError::into_inner).fired
    }

    fn wrap(&self, tx: Option<S::Transaction>) -> Option<FaultyTransaction<S::Transaction>> {
        tx.map(|inner| FaultyTransaction {
            inner,
            plan: self.plan.clone(),
        })
    }
}

impl<S: ReservationStore> ReservationStore for FaultyStore<S> {
    type Transaction = FaultyTransaction<S::Transaction>;

    async fn insert_event(&self, event: NewEvent) -> Result<EventRecord, StoreError> {
        self.inner.insert_event(event).await
    }

    async fn lock_event(
        &self,
        event_id: EventId,
    ) -> Result<Option<Self::Transaction>, StoreError> {
        self.plan.take(FaultPoint::Lock)?;
        let tx = self.inner.lock_event(event_id).await?;
        Ok(self.wrap(tx))
    }

    async fn lock_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Self::Transaction>, StoreError> {
        self.plan.take(FaultPoint::Lock)?;
        let tx = self.inner.lock_reservation(reservation_id).await?;
        Ok(self.wrap(tx))
    }

    async fn load_event(&self, event_id: EventId) -> Result<Option<EventRecord>, StoreError> {
        self.inner.load_event(event_id).await
    }

    async fn has_active_reservation(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.inner.has_active_reservation(event_id, user_id).await
    }

    async fn reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationRecord>, StoreError> {
        self.inner.reservations_for_user(user_id).await
    }
}

/// Transaction wrapper consulting the store's fault plan.
///
/// A fault at [`FaultPoint::Commit`] drops the inner transaction, so the
/// wrapped store rolls back exactly as it would on a real commit failure.
#[derive(Debug)]
pub struct FaultyTransaction<T> {
    inner: T,
    plan: SharedPlan,
}

impl<T: LedgerTransaction> LedgerTransaction for FaultyTransaction<T> {
    fn event(&self) -> &EventRecord {
        self.inner.event()
    }

    fn reservation(&self) -> Option<&ReservationRecord> {
        self.inner.reservation()
    }

    async fn has_active_reservation(&mut self, user_id: UserId) -> Result<bool, StoreError> {
        self.inner.has_active_reservation(user_id).await
    }

    async fn count_confirmed(&mut self) -> Result<u32, StoreError> {
        self.inner.count_confirmed().await
    }

    async fn write_capacity(&mut self, capacity: Capacity) -> Result<(), StoreError> {
        self.plan.take(FaultPoint::WriteCapacity)?;
        self.inner.write_capacity(capacity).await
    }

    async fn insert_reservation(
        &mut self,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<ReservationRecord, StoreError> {
        self.plan.take(FaultPoint::InsertReservation)?;
        self.inner.insert_reservation(user_id, created_at).await
    }

    async fn mark_canceled(
        &mut self,
        canceled_at: DateTime<Utc>,
    ) -> Result<ReservationRecord, StoreError> {
        self.plan.take(FaultPoint::MarkCanceled)?;
        self.inner.mark_canceled(canceled_at).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.plan.take(FaultPoint::Commit)?;
        self.inner.commit().await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::helpers::upcoming_event;
    use crate::memory::InMemoryReservationStore;

    #[tokio::test]
    async fn faults_fire_once_each() {
        let store = FaultyStore::new(InMemoryReservationStore::new());
        let event = store.insert_event(upcoming_event(1, 2)).await.unwrap();
        store.fail_next(FaultPoint::Lock, 1, &StoreError::Transient("timeout".into()));

        assert!(store.lock_event(event.id).await.is_err());
        assert!(store.lock_event(event.id).await.unwrap().is_some());
        assert_eq!(store.faults_fired(), 1);
    }

    #[tokio::test]
    async fn commit_fault_discards_writes() {
        let store = FaultyStore::new(InMemoryReservationStore::new());
        let event = store.insert_event(upcoming_event(1, 2)).await.unwrap();
        store.fail_next(FaultPoint::Commit, 1, &StoreError::Database("disk full".into()));

        let mut tx = store.lock_event(event.id).await.unwrap().unwrap();
        tx.write_capacity(Capacity::from_parts(2, 1).unwrap())
            .await
            .unwrap();
        assert!(tx.commit().await.is_err());

        let (event, _) = store.inner().snapshot(event.id).await.unwrap();
        assert_eq!(event.capacity.available(), 2);
    }
}

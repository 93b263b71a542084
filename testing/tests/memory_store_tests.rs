//! Tests for the in-process store's locking and rollback guarantees.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use eventbook_core::ledger::CapacityLedger;
use eventbook_core::store::{LedgerTransaction, ReservationStore};
use eventbook_core::types::{EventId, UserId};
use eventbook_testing::helpers::upcoming_event;
use eventbook_testing::mocks::test_epoch;
use eventbook_testing::InMemoryReservationStore;
use proptest::prelude::*;
use std::collections::HashSet;

/// 50 tasks race for 10 spots through raw ledger transactions.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decrements_never_oversell() {
    let store = InMemoryReservationStore::new();
    let event = store.insert_event(upcoming_event(1, 10)).await.unwrap();

    let mut handles = Vec::new();
    for user in 0..50 {
        let store = store.clone();
        let event_id = event.id;
        handles.push(tokio::spawn(async move {
            let mut tx = store.lock_event(event_id).await.unwrap().unwrap();
            // Yield while holding the lock to widen any race window.
            tokio::task::yield_now().await;
            match CapacityLedger::try_decrement(&mut tx).await {
                Ok(_) => {
                    tx.insert_reservation(UserId::new(user), test_epoch())
                        .await
                        .unwrap();
                    tx.commit().await.unwrap();
                    true
                }
                Err(_) => false,
            }
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 10);
    let (event, reservations) = store.snapshot(event.id).await.unwrap();
    assert_eq!(event.capacity.available(), 0);
    assert_eq!(reservations.len(), 10);
}

#[tokio::test]
async fn reservations_for_user_are_newest_first() {
    let store = InMemoryReservationStore::new();
    let first = store.insert_event(upcoming_event(1, 5)).await.unwrap();
    let second = store.insert_event(upcoming_event(1, 5)).await.unwrap();
    let user = UserId::new(42);

    for (event_id, minutes) in [(first.id, 1), (second.id, 2)] {
        let mut tx = store.lock_event(event_id).await.unwrap().unwrap();
        tx.insert_reservation(user, test_epoch() + chrono::Duration::minutes(minutes))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    let found = store.reservations_for_user(user).await.unwrap();
    let events: Vec<_> = found.iter().map(|r| r.event_id).collect();
    assert_eq!(events, vec![second.id, first.id]);
    assert!(store.has_active_reservation(first.id, user).await.unwrap());
    assert!(!store
        .has_active_reservation(first.id, UserId::new(7))
        .await
        .unwrap());
}

#[derive(Debug, Clone)]
enum Step {
    Reserve { user: i64, commit: bool },
    Cancel { user: i64, commit: bool },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..5_i64, any::<bool>()).prop_map(|(user, commit)| Step::Reserve { user, commit }),
        (0..5_i64, any::<bool>()).prop_map(|(user, commit)| Step::Cancel { user, commit }),
    ]
}

async fn apply(store: &InMemoryReservationStore, event_id: EventId, step: &Step) -> bool {
    match *step {
        Step::Reserve { user, commit } => {
            let mut tx = store.lock_event(event_id).await.unwrap().unwrap();
            if tx.has_active_reservation(UserId::new(user)).await.unwrap()
                || CapacityLedger::try_decrement(&mut tx).await.is_err()
            {
                return false;
            }
            tx.insert_reservation(UserId::new(user), test_epoch())
                .await
                .unwrap();
            if commit {
                tx.commit().await.unwrap();
            }
            commit
        }
        Step::Cancel { user, commit } => {
            let (_, reservations) = store.snapshot(event_id).await.unwrap();
            let Some(active) = reservations
                .iter()
                .find(|r| r.user_id == UserId::new(user) && r.status.is_active())
            else {
                return false;
            };
            let mut tx = store.lock_reservation(active.id).await.unwrap().unwrap();
            CapacityLedger::increment(&mut tx).await.unwrap();
            tx.mark_canceled(test_epoch()).await.unwrap();
            if commit {
                tx.commit().await.unwrap();
            }
            commit
        }
    }
}

proptest! {
    /// Committed and dropped transactions interleave without the stored spot
    /// count drifting from the committed reservations.
    #[test]
    fn dropped_transactions_leave_no_trace(steps in prop::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let store = InMemoryReservationStore::new();
            let event = store.insert_event(upcoming_event(1, 3)).await.unwrap();
            let mut holders = HashSet::new();

            for step in &steps {
                if apply(&store, event.id, step).await {
                    match *step {
                        Step::Reserve { user, .. } => holders.insert(user),
                        Step::Cancel { user, .. } => holders.remove(&user),
                    };
                }

                let (stored, reservations) = store.snapshot(event.id).await.unwrap();
                let confirmed: HashSet<i64> = reservations
                    .iter()
                    .filter(|r| r.status.is_active())
                    .map(|r| r.user_id.value())
                    .collect();
                assert_eq!(confirmed, holders);
                assert_eq!(stored.capacity.reserved(), u32::try_from(holders.len()).unwrap());
            }
        });
    }
}

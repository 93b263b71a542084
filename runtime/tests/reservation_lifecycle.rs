//! End-to-end reservation lifecycle against the in-process store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::Duration;
use eventbook_core::error::ReservationError;
use eventbook_core::ledger::MAX_CAPACITY;
use eventbook_core::types::{EventId, ReservationId, ReservationStatus, Role, UserId};
use eventbook_runtime::{InvalidationMode, ReservationService, RetryPolicy};
use eventbook_testing::helpers::{init_tracing, past_event, upcoming_event};
use eventbook_testing::mocks::test_epoch;
use eventbook_testing::{InMemoryReservationStore, ManualClock, RecordingCacheInvalidator, test_clock};
use std::sync::Arc;

const CREATOR: i64 = 1;

fn service() -> ReservationService<InMemoryReservationStore> {
    init_tracing();
    ReservationService::builder(InMemoryReservationStore::new())
        .clock(Arc::new(test_clock()))
        .retry_policy(RetryPolicy::none())
        .build()
}

fn user(id: i64) -> UserId {
    UserId::new(id)
}

#[tokio::test]
async fn capacity_two_walkthrough() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 2)).await.unwrap();
    let id = event.event_id;
    assert_eq!(event.available_spots, 2);

    let a = service.create_reservation(id, user(10), Role::User).await.unwrap();
    assert_eq!(service.event(id).await.unwrap().unwrap().available_spots, 1);

    service.create_reservation(id, user(11), Role::User).await.unwrap();
    assert_eq!(service.event(id).await.unwrap().unwrap().available_spots, 0);

    let err = service
        .create_reservation(id, user(12), Role::User)
        .await
        .unwrap_err();
    assert_eq!(err, ReservationError::NoCapacity(id));
    assert_eq!(service.event(id).await.unwrap().unwrap().available_spots, 0);

    service
        .cancel_reservation(a.reservation_id, user(10), Role::User)
        .await
        .unwrap();
    assert_eq!(service.event(id).await.unwrap().unwrap().available_spots, 1);

    service.create_reservation(id, user(12), Role::User).await.unwrap();
    assert_eq!(service.event(id).await.unwrap().unwrap().available_spots, 0);

    let audit = service.audit_event(id).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.confirmed_reservations, 2);
}

#[tokio::test]
async fn open_event_rejects_zero_capacity() {
    let service = service();
    let err = service.open_event(upcoming_event(CREATOR, 0)).await.unwrap_err();
    assert_eq!(err, ReservationError::InvalidCapacity { requested: 0 });
    assert_eq!(service.store().event_count(), 0);
}

#[tokio::test]
async fn capacity_above_storable_range_is_rejected() {
    let service = service();
    let too_large = MAX_CAPACITY + 1;

    let err = service
        .open_event(upcoming_event(CREATOR, too_large))
        .await
        .unwrap_err();
    assert_eq!(err, ReservationError::InvalidCapacity { requested: too_large });
    assert!(err.is_business_rule());

    let event = service.open_event(upcoming_event(CREATOR, 2)).await.unwrap();
    let err = service
        .resize_event_capacity(event.event_id, too_large)
        .await
        .unwrap_err();
    assert_eq!(err, ReservationError::InvalidCapacity { requested: too_large });
    assert_eq!(service.event(event.event_id).await.unwrap().unwrap().max_capacity, 2);

    let resized = service
        .resize_event_capacity(event.event_id, MAX_CAPACITY)
        .await
        .unwrap();
    assert_eq!(resized.available_spots, MAX_CAPACITY);
}

#[tokio::test]
async fn unknown_event_and_reservation_are_not_found() {
    let service = service();
    let missing = EventId::new(404);

    assert_eq!(
        service.create_reservation(missing, user(10), Role::User).await,
        Err(ReservationError::EventNotFound(missing))
    );
    assert_eq!(
        service.resize_event_capacity(missing, 5).await,
        Err(ReservationError::EventNotFound(missing))
    );
    assert_eq!(service.event(missing).await, Ok(None));

    let reservation = ReservationId::new(404);
    assert_eq!(
        service.cancel_reservation(reservation, user(10), Role::Admin).await,
        Err(ReservationError::ReservationNotFound(reservation))
    );
}

#[tokio::test]
async fn past_events_cannot_be_reserved() {
    let service = service();
    let event = service.open_event(past_event(CREATOR, 5)).await.unwrap();

    let err = service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap_err();

    assert_eq!(err, ReservationError::EventInPast(event.event_id));
    assert_eq!(service.event(event.event_id).await.unwrap().unwrap().available_spots, 5);
}

#[tokio::test]
async fn event_happening_right_now_is_past() {
    let clock = ManualClock::new(test_epoch());
    let service = ReservationService::builder(InMemoryReservationStore::new())
        .clock(Arc::new(clock.clone()))
        .build();
    let event = service.open_event(upcoming_event(CREATOR, 5)).await.unwrap();

    clock.set(event.event_date);

    assert_eq!(
        service.create_reservation(event.event_id, user(10), Role::User).await,
        Err(ReservationError::EventInPast(event.event_id))
    );
}

#[tokio::test]
async fn admin_cannot_reserve_own_event() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 5)).await.unwrap();

    let err = service
        .create_reservation(event.event_id, user(CREATOR), Role::Admin)
        .await
        .unwrap_err();
    assert_eq!(err, ReservationError::SelfReservationForbidden);

    // Another admin may.
    service
        .create_reservation(event.event_id, user(2), Role::Admin)
        .await
        .unwrap();
}

#[tokio::test]
async fn second_reservation_by_same_user_is_rejected() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 5)).await.unwrap();

    service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap();
    let err = service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap_err();

    assert_eq!(err, ReservationError::AlreadyReserved);
    assert_eq!(service.event(event.event_id).await.unwrap().unwrap().available_spots, 4);
    assert!(service.has_active_reservation(event.event_id, user(10)).await.unwrap());
}

#[tokio::test]
async fn cancel_then_rebook_creates_a_new_reservation() {
    let clock = ManualClock::new(test_epoch());
    let service = ReservationService::builder(InMemoryReservationStore::new())
        .clock(Arc::new(clock.clone()))
        .build();
    let event = service.open_event(upcoming_event(CREATOR, 1)).await.unwrap();

    let first = service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    service
        .cancel_reservation(first.reservation_id, user(10), Role::User)
        .await
        .unwrap();
    assert!(!service.has_active_reservation(event.event_id, user(10)).await.unwrap());

    clock.advance(Duration::minutes(1));
    let second = service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap();
    assert_ne!(first.reservation_id, second.reservation_id);

    let history = service.reservations_for_user(user(10)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reservation_id, second.reservation_id);
    assert_eq!(history[0].status, ReservationStatus::Confirmed);
    assert_eq!(history[1].status, ReservationStatus::Canceled);
    assert_eq!(
        history[1].canceled_at,
        Some(test_epoch() + Duration::minutes(1))
    );
}

#[tokio::test]
async fn cancel_is_not_idempotent() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 3)).await.unwrap();
    let reservation = service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap();

    service
        .cancel_reservation(reservation.reservation_id, user(10), Role::User)
        .await
        .unwrap();
    let err = service
        .cancel_reservation(reservation.reservation_id, user(10), Role::User)
        .await
        .unwrap_err();

    assert_eq!(err, ReservationError::AlreadyCanceled(reservation.reservation_id));
    assert_eq!(service.event(event.event_id).await.unwrap().unwrap().available_spots, 3);
}

#[tokio::test]
async fn only_owner_or_admin_may_cancel() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 3)).await.unwrap();
    let reservation = service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap();

    assert_eq!(
        service
            .cancel_reservation(reservation.reservation_id, user(11), Role::User)
            .await,
        Err(ReservationError::Forbidden)
    );
    assert_eq!(service.event(event.event_id).await.unwrap().unwrap().available_spots, 2);

    service
        .cancel_reservation(reservation.reservation_id, user(99), Role::Admin)
        .await
        .unwrap();
    assert_eq!(service.event(event.event_id).await.unwrap().unwrap().available_spots, 3);
}

#[tokio::test]
async fn stranger_learns_nothing_about_canceled_reservation() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 3)).await.unwrap();
    let reservation = service
        .create_reservation(event.event_id, user(10), Role::User)
        .await
        .unwrap();
    service
        .cancel_reservation(reservation.reservation_id, user(10), Role::User)
        .await
        .unwrap();

    assert_eq!(
        service
            .cancel_reservation(reservation.reservation_id, user(11), Role::User)
            .await,
        Err(ReservationError::Forbidden)
    );
}

#[tokio::test]
async fn resize_keeps_reserved_spots() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 5)).await.unwrap();
    for id in 10..13 {
        service
            .create_reservation(event.event_id, user(id), Role::User)
            .await
            .unwrap();
    }

    let grown = service.resize_event_capacity(event.event_id, 10).await.unwrap();
    assert_eq!((grown.max_capacity, grown.available_spots), (10, 7));

    let shrunk = service.resize_event_capacity(event.event_id, 3).await.unwrap();
    assert_eq!((shrunk.max_capacity, shrunk.available_spots), (3, 0));

    let err = service
        .resize_event_capacity(event.event_id, 2)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ReservationError::CapacityBelowReservedFloor {
            requested: 2,
            reserved: 3
        }
    );

    let current = service.event(event.event_id).await.unwrap().unwrap();
    assert_eq!((current.max_capacity, current.available_spots), (3, 0));
    assert!(service.audit_event(event.event_id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn empty_event_may_be_resized_to_zero() {
    let service = service();
    let event = service.open_event(upcoming_event(CREATOR, 5)).await.unwrap();

    let resized = service.resize_event_capacity(event.event_id, 0).await.unwrap();
    assert_eq!((resized.max_capacity, resized.available_spots), (0, 0));

    assert_eq!(
        service
            .create_reservation(event.event_id, user(10), Role::User)
            .await,
        Err(ReservationError::NoCapacity(event.event_id))
    );
}

#[tokio::test]
async fn committed_mutations_invalidate_cache_once_each() {
    let sink = RecordingCacheInvalidator::new();
    let service = ReservationService::builder(InMemoryReservationStore::new())
        .clock(Arc::new(test_clock()))
        .cache(Arc::new(sink.clone()))
        .invalidation_mode(InvalidationMode::Inline)
        .build();

    let event = service.open_event(upcoming_event(CREATOR, 1)).await.unwrap();
    let id = event.event_id;
    let reservation = service.create_reservation(id, user(10), Role::User).await.unwrap();
    service
        .cancel_reservation(reservation.reservation_id, user(10), Role::User)
        .await
        .unwrap();
    service.resize_event_capacity(id, 4).await.unwrap();

    assert_eq!(sink.invalidated_events(), vec![id, id, id, id]);
}

#[tokio::test]
async fn rejected_operations_do_not_invalidate_cache() {
    let sink = RecordingCacheInvalidator::new();
    let service = ReservationService::builder(InMemoryReservationStore::new())
        .clock(Arc::new(test_clock()))
        .cache(Arc::new(sink.clone()))
        .invalidation_mode(InvalidationMode::Inline)
        .build();

    let event = service.open_event(upcoming_event(CREATOR, 1)).await.unwrap();
    let id = event.event_id;
    service.create_reservation(id, user(10), Role::User).await.unwrap();
    assert!(service.create_reservation(id, user(11), Role::User).await.is_err());
    assert!(service.resize_event_capacity(id, 0).await.is_err());
    assert!(service.audit_event(id).await.is_ok());

    // open + the one successful create
    assert_eq!(sink.invalidated_events(), vec![id, id]);
}

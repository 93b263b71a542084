//! Reservation state machine rules.
//!
//! ```text
//!   create ──► Confirmed ──cancel──► Canceled (terminal)
//! ```
//!
//! These checks are pure: they look at rows already read under the event lock
//! and decide whether a transition may proceed. Existence checks (event and
//! reservation lookups) and the duplicate/capacity checks that need storage are
//! performed by the caller in the documented order; the functions here cover the
//! remaining preconditions.

use crate::error::{ReservationError, Result};
use crate::types::{EventRecord, ReservationRecord, ReservationStatus, Role, UserId};
use chrono::{DateTime, Utc};

/// Preconditions 2 and 3 of reservation creation.
///
/// 2. The event date must be strictly after `now`.
/// 3. An admin may not reserve a spot at an event they created.
///
/// # Errors
///
/// - [`ReservationError::EventInPast`]
/// - [`ReservationError::SelfReservationForbidden`]
pub fn check_reservable(
    event: &EventRecord,
    user_id: UserId,
    role: Role,
    now: DateTime<Utc>,
) -> Result<()> {
    if event.event_date <= now {
        return Err(ReservationError::EventInPast(event.id));
    }

    if role.is_admin() && event.creator_id == user_id {
        return Err(ReservationError::SelfReservationForbidden);
    }

    Ok(())
}

/// Preconditions 2 and 3 of cancellation.
///
/// 2. The requester owns the reservation or is an admin.
/// 3. The reservation is still confirmed.
///
/// Ownership is checked first so that a stranger probing someone else's
/// reservation learns nothing about its status.
///
/// # Errors
///
/// - [`ReservationError::Forbidden`]
/// - [`ReservationError::AlreadyCanceled`]
pub fn check_cancelable(
    reservation: &ReservationRecord,
    requester_id: UserId,
    role: Role,
) -> Result<()> {
    if reservation.user_id != requester_id && !role.is_admin() {
        return Err(ReservationError::Forbidden);
    }

    if reservation.status == ReservationStatus::Canceled {
        return Err(ReservationError::AlreadyCanceled(reservation.id));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Capacity;
    use crate::types::{EventId, ReservationId};
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000)
    }

    fn event(creator: i64, starts_in: Duration) -> EventRecord {
        EventRecord {
            id: EventId::new(1),
            creator_id: UserId::new(creator),
            event_date: now() + starts_in,
            capacity: Capacity::new(10),
        }
    }

    fn reservation(owner: i64, status: ReservationStatus) -> ReservationRecord {
        ReservationRecord {
            id: ReservationId::new(3),
            event_id: EventId::new(1),
            user_id: UserId::new(owner),
            status,
            created_at: now(),
            canceled_at: None,
        }
    }

    #[test]
    fn future_event_is_reservable() {
        let event = event(7, Duration::hours(1));
        assert_eq!(
            check_reservable(&event, UserId::new(8), Role::User, now()),
            Ok(())
        );
    }

    #[test]
    fn event_starting_now_is_in_the_past() {
        let event = event(7, Duration::zero());
        assert_eq!(
            check_reservable(&event, UserId::new(8), Role::User, now()),
            Err(ReservationError::EventInPast(EventId::new(1)))
        );
    }

    #[test]
    fn admin_cannot_book_own_event() {
        let event = event(7, Duration::days(3));
        assert_eq!(
            check_reservable(&event, UserId::new(7), Role::Admin, now()),
            Err(ReservationError::SelfReservationForbidden)
        );
    }

    #[test]
    fn non_admin_creator_may_book_own_event() {
        let event = event(7, Duration::days(3));
        assert_eq!(
            check_reservable(&event, UserId::new(7), Role::User, now()),
            Ok(())
        );
    }

    #[test]
    fn past_check_runs_before_self_reservation_check() {
        let event = event(7, -Duration::days(1));
        assert_eq!(
            check_reservable(&event, UserId::new(7), Role::Admin, now()),
            Err(ReservationError::EventInPast(EventId::new(1)))
        );
    }

    #[test]
    fn owner_and_admin_may_cancel() {
        let confirmed = reservation(5, ReservationStatus::Confirmed);
        assert_eq!(
            check_cancelable(&confirmed, UserId::new(5), Role::User),
            Ok(())
        );
        assert_eq!(
            check_cancelable(&confirmed, UserId::new(99), Role::Admin),
            Ok(())
        );
    }

    #[test]
    fn stranger_cannot_cancel() {
        let confirmed = reservation(5, ReservationStatus::Confirmed);
        assert_eq!(
            check_cancelable(&confirmed, UserId::new(6), Role::User),
            Err(ReservationError::Forbidden)
        );
    }

    #[test]
    fn canceled_is_terminal() {
        let canceled = reservation(5, ReservationStatus::Canceled);
        assert_eq!(
            check_cancelable(&canceled, UserId::new(5), Role::User),
            Err(ReservationError::AlreadyCanceled(ReservationId::new(3)))
        );
        assert_eq!(
            check_cancelable(&canceled, UserId::new(6), Role::User),
            Err(ReservationError::Forbidden)
        );
    }
}

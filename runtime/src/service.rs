//! Reservation State Machine executor.
//!
//! [`ReservationService`] is the surface the surrounding application calls. Each
//! operation runs one storage transaction that holds the event's exclusive lock
//! for its whole read-check-write:
//!
//! ```text
//! create:  lock event → rules → duplicate check → ledger decrement → insert → commit
//! cancel:  lock event+reservation → rules → mark canceled → ledger increment → commit
//! resize:  lock event → ledger resize → commit
//! ```
//!
//! Any failure before commit drops the transaction, which rolls back every write.
//! Transient storage failures re-run the whole transaction under the configured
//! [`RetryPolicy`]. After a commit the [`CacheCoherence`] hook fires exactly once.

use crate::coherence::{CacheCoherence, InvalidationMode};
use crate::metrics::ReservationMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use eventbook_core::cache::{CacheInvalidator, LoggingCacheInvalidator};
use eventbook_core::environment::{Clock, SystemClock};
use eventbook_core::error::{ReservationError, Result};
use eventbook_core::ledger::{CapacityLedger, MAX_CAPACITY};
use eventbook_core::rules;
use eventbook_core::store::{LedgerTransaction, ReservationStore, StoreError};
use eventbook_core::types::{
    EventId, EventView, LedgerAudit, NewEvent, ReservationId, ReservationView, Role, UserId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// The reservation engine.
///
/// Cheap to clone; clones share the store, clock and cache hook.
pub struct ReservationService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    coherence: CacheCoherence,
    retry: RetryPolicy,
}

impl<S> Clone for ReservationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            coherence: self.coherence.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: ReservationStore> ReservationService<S> {
    /// Create a service with the system clock, no cache and the default retry policy.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }

    /// Start configuring a service around `store`.
    #[must_use]
    pub fn builder(store: S) -> ReservationServiceBuilder<S> {
        ReservationServiceBuilder {
            store,
            clock: Arc::new(SystemClock),
            cache: Arc::new(LoggingCacheInvalidator),
            mode: InvalidationMode::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // Event capacity
    // ========================================================================

    /// Register a new event with every spot available.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InvalidCapacity`] if `max_capacity` is 0 or above
    ///   [`MAX_CAPACITY`]
    /// - [`ReservationError::StorageFailure`] if the insert fails
    #[tracing::instrument(skip(self, event), fields(creator_id = %event.creator_id))]
    pub async fn open_event(&self, event: NewEvent) -> Result<EventView> {
        if event.max_capacity == 0 || event.max_capacity > MAX_CAPACITY {
            return Err(reject_capacity("open_event", event.max_capacity));
        }

        let record = self
            .execute("open_event", || async {
                self.store
                    .insert_event(event.clone())
                    .await
                    .map_err(ReservationError::from)
            })
            .await?;

        tracing::info!(
            event_id = %record.id,
            max_capacity = record.capacity.max(),
            "Event opened"
        );
        self.coherence.event_changed(record.id).await;
        Ok(EventView::from(&record))
    }

    /// Read an event's capacity without locking it.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::StorageFailure`] if the query fails.
    pub async fn event(&self, event_id: EventId) -> Result<Option<EventView>> {
        let record = self
            .execute("load_event", || async {
                self.store
                    .load_event(event_id)
                    .await
                    .map_err(ReservationError::from)
            })
            .await?;
        Ok(record.as_ref().map(EventView::from))
    }

    /// Change an event's maximum capacity, keeping every confirmed reservation.
    ///
    /// `available_spots` becomes `new_max_capacity - reserved`.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InvalidCapacity`] if `new_max_capacity` is above
    ///   [`MAX_CAPACITY`]
    /// - [`ReservationError::EventNotFound`]
    /// - [`ReservationError::CapacityBelowReservedFloor`] if `new_max_capacity`
    ///   is below the number of confirmed reservations
    /// - [`ReservationError::StorageFailure`]
    #[tracing::instrument(skip(self))]
    pub async fn resize_event_capacity(
        &self,
        event_id: EventId,
        new_max_capacity: u32,
    ) -> Result<EventView> {
        if new_max_capacity > MAX_CAPACITY {
            return Err(reject_capacity("resize", new_max_capacity));
        }

        let view = self
            .execute("resize", || self.try_resize(event_id, new_max_capacity))
            .await?;

        ReservationMetrics::record_resized();
        tracing::info!(
            event_id = %event_id,
            max_capacity = view.max_capacity,
            available = view.available_spots,
            "Event capacity resized"
        );
        self.coherence.event_changed(event_id).await;
        Ok(view)
    }

    /// Recount confirmed reservations against the ledger row.
    ///
    /// Read-only: takes the event lock for a consistent count, writes nothing.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::EventNotFound`]
    /// - [`ReservationError::StorageFailure`]
    pub async fn audit_event(&self, event_id: EventId) -> Result<LedgerAudit> {
        let audit = self
            .execute("audit", || self.try_audit(event_id))
            .await?;

        if !audit.is_consistent() {
            tracing::warn!(
                event_id = %event_id,
                max_capacity = audit.max_capacity,
                available = audit.available_spots,
                confirmed = audit.confirmed_reservations,
                "Ledger row disagrees with confirmed reservations"
            );
        }
        Ok(audit)
    }

    // ========================================================================
    // Reservations
    // ========================================================================

    /// Reserve one spot at `event_id` for `user_id`.
    ///
    /// Preconditions, checked in order (the first failure wins, nothing is
    /// written on any failure):
    ///
    /// 1. the event exists
    /// 2. the event date is strictly in the future
    /// 3. an admin is not reserving their own event
    /// 4. the user holds no confirmed reservation for the event
    /// 5. a spot is available
    ///
    /// # Errors
    ///
    /// One of [`ReservationError::EventNotFound`], [`ReservationError::EventInPast`],
    /// [`ReservationError::SelfReservationForbidden`],
    /// [`ReservationError::AlreadyReserved`], [`ReservationError::NoCapacity`], or
    /// [`ReservationError::StorageFailure`].
    #[tracing::instrument(skip(self))]
    pub async fn create_reservation(
        &self,
        event_id: EventId,
        user_id: UserId,
        role: Role,
    ) -> Result<ReservationView> {
        let view = self
            .execute("create", || self.try_create(event_id, user_id, role))
            .await?;

        ReservationMetrics::record_created();
        tracing::info!(
            reservation_id = %view.reservation_id,
            event_id = %event_id,
            user_id = %user_id,
            "Reservation confirmed"
        );
        self.coherence.event_changed(event_id).await;
        Ok(view)
    }

    /// Cancel a confirmed reservation and release its spot.
    ///
    /// Not idempotent: a second cancel of the same reservation fails with
    /// [`ReservationError::AlreadyCanceled`].
    ///
    /// # Errors
    ///
    /// One of [`ReservationError::ReservationNotFound`], [`ReservationError::Forbidden`],
    /// [`ReservationError::AlreadyCanceled`], or [`ReservationError::StorageFailure`].
    #[tracing::instrument(skip(self))]
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        requester_id: UserId,
        role: Role,
    ) -> Result<()> {
        let event_id = self
            .execute("cancel", || {
                self.try_cancel(reservation_id, requester_id, role)
            })
            .await?;

        ReservationMetrics::record_canceled();
        tracing::info!(
            reservation_id = %reservation_id,
            event_id = %event_id,
            requester_id = %requester_id,
            "Reservation canceled"
        );
        self.coherence.event_changed(event_id).await;
        Ok(())
    }

    /// Whether `user_id` holds a confirmed reservation for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::StorageFailure`] if the query fails.
    pub async fn has_active_reservation(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        self.execute("has_active", || async {
            self.store
                .has_active_reservation(event_id, user_id)
                .await
                .map_err(ReservationError::from)
        })
        .await
    }

    /// All reservations of `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::StorageFailure`] if the query fails.
    pub async fn reservations_for_user(&self, user_id: UserId) -> Result<Vec<ReservationView>> {
        let records = self
            .execute("list_for_user", || async {
                self.store
                    .reservations_for_user(user_id)
                    .await
                    .map_err(ReservationError::from)
            })
            .await?;
        Ok(records.iter().map(ReservationView::from).collect())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    async fn try_create(
        &self,
        event_id: EventId,
        user_id: UserId,
        role: Role,
    ) -> Result<ReservationView> {
        let now = self.clock.now();
        let mut tx = self
            .store
            .lock_event(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;

        rules::check_reservable(tx.event(), user_id, role, now)?;

        if tx.has_active_reservation(user_id).await? {
            return Err(ReservationError::AlreadyReserved);
        }

        let available = CapacityLedger::try_decrement(&mut tx).await?;

        // The store's uniqueness guarantee is authoritative; a violation here is
        // the same outcome as the pre-check above.
        let reservation = tx
            .insert_reservation(user_id, now)
            .await
            .map_err(|error| match error {
                StoreError::UniqueViolation { .. } => ReservationError::AlreadyReserved,
                other => other.into(),
            })?;

        tx.commit().await?;

        tracing::debug!(event_id = %event_id, available, "Spot taken");
        Ok(ReservationView::from(&reservation))
    }

    async fn try_cancel(
        &self,
        reservation_id: ReservationId,
        requester_id: UserId,
        role: Role,
    ) -> Result<EventId> {
        let now = self.clock.now();
        let mut tx = self
            .store
            .lock_reservation(reservation_id)
            .await?
            .ok_or(ReservationError::ReservationNotFound(reservation_id))?;

        let reservation = tx
            .reservation()
            .cloned()
            .ok_or(ReservationError::ReservationNotFound(reservation_id))?;

        rules::check_cancelable(&reservation, requester_id, role)?;

        tx.mark_canceled(now).await?;
        let available = CapacityLedger::increment(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(event_id = %reservation.event_id, available, "Spot released");
        Ok(reservation.event_id)
    }

    async fn try_resize(&self, event_id: EventId, new_max_capacity: u32) -> Result<EventView> {
        let mut tx = self
            .store
            .lock_event(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;

        CapacityLedger::resize(&mut tx, new_max_capacity).await?;
        let view = EventView::from(tx.event());
        tx.commit().await?;
        Ok(view)
    }

    async fn try_audit(&self, event_id: EventId) -> Result<LedgerAudit> {
        let mut tx = self
            .store
            .lock_event(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;

        let confirmed_reservations = tx.count_confirmed().await?;
        let capacity = tx.event().capacity;
        Ok(LedgerAudit {
            event_id,
            max_capacity: capacity.max(),
            available_spots: capacity.available(),
            confirmed_reservations,
        })
    }

    /// Run one transaction attempt under the retry policy, timing it and
    /// reporting failures.
    async fn execute<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result =
            retry_with_predicate(&self.retry, attempt, ReservationError::is_retryable).await;
        ReservationMetrics::record_duration(operation, started.elapsed());

        if let Err(error) = &result {
            report_failure(operation, error);
        }
        result
    }
}

fn report_failure(operation: &'static str, error: &ReservationError) {
    if error.is_business_rule() {
        tracing::debug!(operation, reason = error.kind(), %error, "Operation rejected");
        ReservationMetrics::record_rejected(error.kind());
    } else {
        tracing::error!(operation, %error, "Transaction failed and was rolled back");
    }
}

fn reject_capacity(operation: &'static str, requested: u32) -> ReservationError {
    let error = ReservationError::InvalidCapacity { requested };
    report_failure(operation, &error);
    error
}

/// Builder for [`ReservationService`].
pub struct ReservationServiceBuilder<S> {
    store: S,
    clock: Arc<dyn Clock>,
    cache: Arc<dyn CacheInvalidator>,
    mode: InvalidationMode,
    retry: RetryPolicy,
}

impl<S: ReservationStore> ReservationServiceBuilder<S> {
    /// Use `clock` for "now" comparisons.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send post-commit invalidations to `cache`.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    /// Choose how invalidations are scheduled.
    #[must_use]
    pub const fn invalidation_mode(mut self, mode: InvalidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Retry transient storage failures according to `policy`.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Build the service.
    #[must_use]
    pub fn build(self) -> ReservationService<S> {
        ReservationService {
            store: Arc::new(self.store),
            clock: self.clock,
            coherence: CacheCoherence::new(self.cache, self.mode),
            retry: self.retry,
        }
    }
}

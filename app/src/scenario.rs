//! The reference reservation scenario, replayed against a live service.
//!
//! ```text
//! capacity 2:  A reserves (1 left) → B reserves (0 left) → C rejected, no capacity
//!              A cancels (1 left)  → A cancels again, rejected
//!              C reserves (0 left) → B reserves again, rejected
//!              creator (admin) reserves own event, rejected
//!              shrink to 1, rejected → grow to 5 (3 left)
//! ```
//!
//! Each step is checked against its expected outcome; the first surprise stops
//! the run with [`ScenarioError::Unexpected`].

use chrono::{DateTime, Utc};
use eventbook_core::error::ReservationError;
use eventbook_core::store::ReservationStore;
use eventbook_core::types::{EventId, EventView, LedgerAudit, NewEvent, Role, UserId};
use eventbook_runtime::ReservationService;
use serde::Serialize;
use thiserror::Error;

const CREATOR: UserId = UserId::new(7);
const ALICE: UserId = UserId::new(101);
const BOB: UserId = UserId::new(102);
const CAROL: UserId = UserId::new(103);

/// Scenario failures.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// A step did not end the way the scenario expects
    #[error("Step {step:?} expected {expected}, got {actual}")]
    Unexpected {
        /// Step description
        step: &'static str,
        /// Expected outcome
        expected: &'static str,
        /// Actual outcome
        actual: &'static str,
    },

    /// Storage failed underneath the scenario
    #[error(transparent)]
    Reservation(#[from] ReservationError),
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// The operation committed
    Succeeded,
    /// The operation was rejected by a business rule
    Rejected {
        /// Error kind
        reason: &'static str,
    },
}

/// One replayed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioStep {
    /// What was attempted
    pub action: &'static str,
    /// How it ended
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Available spots after the step
    pub available_spots: u32,
}

/// Everything the scenario observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// The event as opened
    pub event: EventView,
    /// Steps in order
    pub steps: Vec<ScenarioStep>,
    /// Final ledger audit
    pub audit: LedgerAudit,
}

/// Replay the reference scenario on a fresh event dated `event_date`.
///
/// # Errors
///
/// - [`ScenarioError::Unexpected`] if any step deviates from the expected outcome
/// - [`ScenarioError::Reservation`] on storage failure
pub async fn run<S: ReservationStore>(
    service: &ReservationService<S>,
    event_date: DateTime<Utc>,
) -> Result<ScenarioReport, ScenarioError> {
    let event = service
        .open_event(NewEvent {
            creator_id: CREATOR,
            event_date,
            max_capacity: 2,
        })
        .await?;
    let id = event.event_id;
    let mut log = StepLog {
        service,
        event_id: id,
        steps: Vec::new(),
    };

    let alice = log
        .succeeds(
            "alice reserves",
            service.create_reservation(id, ALICE, Role::User).await,
        )
        .await?;
    log.succeeds(
        "bob reserves",
        service.create_reservation(id, BOB, Role::User).await,
    )
    .await?;
    log.rejected(
        "carol reserves a full event",
        service.create_reservation(id, CAROL, Role::User).await,
        "no_capacity",
    )
    .await?;
    log.succeeds(
        "alice cancels",
        service
            .cancel_reservation(alice.reservation_id, ALICE, Role::User)
            .await,
    )
    .await?;
    log.rejected(
        "alice cancels again",
        service
            .cancel_reservation(alice.reservation_id, ALICE, Role::User)
            .await,
        "already_canceled",
    )
    .await?;
    log.succeeds(
        "carol reserves the released spot",
        service.create_reservation(id, CAROL, Role::User).await,
    )
    .await?;
    log.rejected(
        "bob reserves twice",
        service.create_reservation(id, BOB, Role::User).await,
        "already_reserved",
    )
    .await?;
    log.rejected(
        "creator reserves own event as admin",
        service.create_reservation(id, CREATOR, Role::Admin).await,
        "self_reservation_forbidden",
    )
    .await?;
    log.rejected(
        "shrink capacity below reserved spots",
        service.resize_event_capacity(id, 1).await,
        "capacity_below_reserved_floor",
    )
    .await?;
    log.succeeds("grow capacity to 5", service.resize_event_capacity(id, 5).await)
        .await?;

    let audit = service.audit_event(id).await?;
    Ok(ScenarioReport {
        event,
        steps: log.steps,
        audit,
    })
}

struct StepLog<'a, S> {
    service: &'a ReservationService<S>,
    event_id: EventId,
    steps: Vec<ScenarioStep>,
}

impl<S: ReservationStore> StepLog<'_, S> {
    async fn succeeds<T>(
        &mut self,
        action: &'static str,
        result: Result<T, ReservationError>,
    ) -> Result<T, ScenarioError> {
        match result {
            Ok(value) => {
                self.record(action, Outcome::Succeeded).await?;
                Ok(value)
            }
            Err(error) if error.is_business_rule() => Err(ScenarioError::Unexpected {
                step: action,
                expected: "success",
                actual: error.kind(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn rejected<T>(
        &mut self,
        action: &'static str,
        result: Result<T, ReservationError>,
        reason: &'static str,
    ) -> Result<(), ScenarioError> {
        match result {
            Ok(_) => Err(ScenarioError::Unexpected {
                step: action,
                expected: reason,
                actual: "success",
            }),
            Err(error) if error.kind() == reason => {
                self.record(action, Outcome::Rejected { reason }).await
            }
            Err(error) if error.is_business_rule() => Err(ScenarioError::Unexpected {
                step: action,
                expected: reason,
                actual: error.kind(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn record(&mut self, action: &'static str, outcome: Outcome) -> Result<(), ScenarioError> {
        let available_spots = self
            .service
            .event(self.event_id)
            .await?
            .map_or(0, |event| event.available_spots);

        tracing::debug!(action, ?outcome, available_spots, "Scenario step");
        self.steps.push(ScenarioStep {
            action,
            outcome,
            available_spots,
        });
        Ok(())
    }
}

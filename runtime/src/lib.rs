//! # Eventbook Runtime
//!
//! Executes the reservation state machine on top of a
//! [`ReservationStore`](eventbook_core::store::ReservationStore).
//!
//! ## Core Components
//!
//! - **`ReservationService`**: create, cancel and resize, each as one locked,
//!   all-or-nothing transaction
//! - **`CacheCoherence`**: the post-commit invalidation hook
//! - **Retry**: exponential backoff for transient storage failures
//! - **Metrics**: Prometheus counters and histograms
//!
//! ## Example
//!
//! ```ignore
//! use eventbook_runtime::ReservationService;
//! use eventbook_core::{EventId, UserId, Role};
//!
//! let service = ReservationService::builder(store)
//!     .cache(Arc::new(redis_invalidator))
//!     .build();
//!
//! let reservation = service
//!     .create_reservation(EventId::new(1), UserId::new(7), Role::User)
//!     .await?;
//! service
//!     .cancel_reservation(reservation.reservation_id, UserId::new(7), Role::User)
//!     .await?;
//! ```

/// Post-commit cache invalidation
pub mod coherence;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// The reservation service
pub mod service;

pub use coherence::{CacheCoherence, InvalidationMode};
pub use retry::{RetryPolicy, retry_with_predicate};
pub use service::{ReservationService, ReservationServiceBuilder};

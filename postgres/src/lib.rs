//! `PostgreSQL` reservation store for Eventbook.
//!
//! Implements [`ReservationStore`](eventbook_core::store::ReservationStore) with
//! row-level locks:
//!
//! - `SELECT ... FOR UPDATE` on the event row serializes every transaction that
//!   touches that event's capacity
//! - a partial unique index enforces one confirmed reservation per user and event
//! - deadlocks, serialization failures and pool timeouts map to
//!   [`StoreError::Transient`](eventbook_core::store::StoreError::Transient)
//!
//! # Example
//!
//! ```ignore
//! use eventbook_postgres::{PoolSettings, PostgresReservationStore};
//! use eventbook_runtime::ReservationService;
//!
//! let store = PostgresReservationStore::connect(&database_url, &PoolSettings::default()).await?;
//! store.migrate().await?;
//! let service = ReservationService::new(store);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod store;

pub use store::{PoolSettings, PostgresReservationStore, PostgresTransaction};

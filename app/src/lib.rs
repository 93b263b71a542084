//! Eventbook application wiring.
//!
//! Ties the workspace together for a deployable process:
//!
//! - [`config`]: environment configuration (`DATABASE_URL`, `REDIS_URL`, retry
//!   and metrics settings)
//! - [`bootstrap`]: connects the selected store and cache sink and builds the
//!   [`ReservationService`](eventbook_runtime::ReservationService)
//! - [`scenario`]: the reference reservation walkthrough, used by the `demo`
//!   binary and as an end-to-end smoke test
//!
//! # Example
//!
//! ```ignore
//! use eventbook::{Config, bootstrap};
//!
//! let config = Config::from_env()?;
//! match bootstrap::build(&config).await? {
//!     bootstrap::Backend::Memory(service) => { /* ... */ }
//!     bootstrap::Backend::Postgres(service) => { /* ... */ }
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod scenario;

pub use bootstrap::{Backend, BootstrapError};
pub use config::{Config, ConfigError, StorageBackend};

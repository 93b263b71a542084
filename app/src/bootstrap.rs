//! Wiring from [`Config`] to a running [`ReservationService`].
//!
//! The service is generic over its store, so the backend is chosen here and the
//! caller receives a [`Backend`] to dispatch on.

use crate::config::{Config, StorageBackend};
use eventbook_core::cache::{CacheError, CacheInvalidator, LoggingCacheInvalidator};
use eventbook_core::store::{ReservationStore, StoreError};
use eventbook_postgres::PostgresReservationStore;
use eventbook_redis::RedisCacheInvalidator;
use eventbook_runtime::ReservationService;
use eventbook_runtime::metrics::{MetricsError, MetricsServer};
use eventbook_testing::InMemoryReservationStore;
use std::sync::Arc;
use thiserror::Error;

/// Startup failures.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The database could not be reached or migrated
    #[error("Storage initialization failed: {0}")]
    Storage(#[from] StoreError),

    /// Redis could not be reached
    #[error("Cache initialization failed: {0}")]
    Cache(#[from] CacheError),

    /// The metrics recorder could not be installed
    #[error("Metrics initialization failed: {0}")]
    Metrics(#[from] MetricsError),

    /// Configuration was invalid
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// A service over whichever store the configuration selected.
pub enum Backend {
    /// In-process store
    Memory(ReservationService<InMemoryReservationStore>),
    /// `PostgreSQL`
    Postgres(ReservationService<PostgresReservationStore>),
}

impl Backend {
    /// Name of the backend, for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }
}

/// Connect storage and cache and build the service.
///
/// # Errors
///
/// Returns [`BootstrapError`] if the database or Redis cannot be reached, or
/// migrations fail.
pub async fn build(config: &Config) -> Result<Backend, BootstrapError> {
    let cache = build_cache(config).await?;

    let backend = match config.storage {
        StorageBackend::Memory => {
            Backend::Memory(build_service(InMemoryReservationStore::new(), config, cache))
        }
        StorageBackend::Postgres => {
            let store = PostgresReservationStore::connect(
                &config.postgres.url,
                &config.postgres.pool_settings(),
            )
            .await?;
            store.migrate().await?;
            Backend::Postgres(build_service(store, config, cache))
        }
    };

    tracing::info!(backend = backend.name(), "Reservation service ready");
    Ok(backend)
}

/// Build a service around `store` using the configured retry policy.
#[must_use]
pub fn build_service<S: ReservationStore>(
    store: S,
    config: &Config,
    cache: Arc<dyn CacheInvalidator>,
) -> ReservationService<S> {
    ReservationService::builder(store)
        .cache(cache)
        .retry_policy(config.retry.policy())
        .build()
}

/// The configured cache sink: Redis when `REDIS_URL` is set, otherwise a sink
/// that only logs.
///
/// # Errors
///
/// Returns [`CacheError`] if Redis is configured but unreachable.
pub async fn build_cache(config: &Config) -> Result<Arc<dyn CacheInvalidator>, CacheError> {
    match &config.redis.url {
        Some(url) => Ok(Arc::new(RedisCacheInvalidator::new(url).await?)),
        None => {
            tracing::info!("REDIS_URL not set; cache invalidations will only be logged");
            Ok(Arc::new(LoggingCacheInvalidator))
        }
    }
}

/// Install the Prometheus recorder and serve `/metrics` on
/// `METRICS_HOST:METRICS_PORT` if metrics are enabled.
///
/// Call from within the Tokio runtime.
///
/// # Errors
///
/// Returns [`BootstrapError`] if the address is invalid or cannot be bound, or
/// the recorder cannot be installed.
pub fn start_metrics(config: &Config) -> Result<Option<MetricsServer>, BootstrapError> {
    if !config.metrics.enabled {
        return Ok(None);
    }

    let mut server = MetricsServer::new(config.metrics.addr()?);
    server.start()?;
    Ok(Some(server))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn memory_config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    #[tokio::test]
    async fn default_config_builds_memory_backend() {
        let backend = build(&memory_config()).await.unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[tokio::test]
    async fn missing_redis_url_uses_logging_sink() {
        let cache = build_cache(&memory_config()).await.unwrap();
        let keys = eventbook_core::cache::keys_for_event(eventbook_core::EventId::new(1));
        assert_eq!(cache.invalidate(&keys).await, Ok(()));
    }

    #[test]
    fn metrics_disabled_by_default() {
        assert!(start_metrics(&memory_config()).unwrap().is_none());
    }
}

//! Cache invalidation contract.
//!
//! The engine does not cache anything itself. After every committed create,
//! cancel or resize it asks a [`CacheInvalidator`] to drop the views that might
//! now be stale:
//!
//! - the event's detail entry
//! - every event listing (filter combinations are unbounded, so all of them)
//! - the popular-events ranking
//!
//! Invalidation is best-effort. A failure is logged by the caller and never
//! affects the committed transaction.

use crate::types::EventId;
use futures::future::BoxFuture;
use std::fmt;
use thiserror::Error;

/// A cache entry (or family of entries) to drop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Detail view of a single event
    EventDetail(EventId),
    /// Every event listing, whatever its filters or page
    EventListings,
    /// Popular-events ranking
    PopularEvents,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventDetail(id) => write!(f, "event:{id}"),
            Self::EventListings => f.write_str("events:list:*"),
            Self::PopularEvents => f.write_str("events:popular"),
        }
    }
}

impl CacheKey {
    /// Whether the rendered key is a glob matching many entries
    #[must_use]
    pub const fn is_pattern(&self) -> bool {
        matches!(self, Self::EventListings)
    }
}

/// Keys invalidated after a mutation of `event_id`.
#[must_use]
pub const fn keys_for_event(event_id: EventId) -> [CacheKey; 3] {
    [
        CacheKey::EventDetail(event_id),
        CacheKey::EventListings,
        CacheKey::PopularEvents,
    ]
}

/// Cache backend failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cache invalidation failed: {0}")]
pub struct CacheError(pub String);

/// Sink for invalidation signals.
///
/// Note: returns `BoxFuture` instead of async fn to be dyn-compatible, so the
/// engine can hold an `Arc<dyn CacheInvalidator>`.
pub trait CacheInvalidator: Send + Sync {
    /// Drop every entry named by `keys`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache backend rejects the request.
    fn invalidate<'a>(&'a self, keys: &'a [CacheKey]) -> BoxFuture<'a, Result<(), CacheError>>;
}

/// Invalidator used when no cache is deployed: records the keys in the trace
/// log and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCacheInvalidator;

impl CacheInvalidator for LoggingCacheInvalidator {
    fn invalidate<'a>(&'a self, keys: &'a [CacheKey]) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            for key in keys {
                tracing::trace!(key = %key, "Cache invalidation (no cache configured)");
            }
            Ok(())
        })
    }
}

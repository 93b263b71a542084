//! Cache Coherence Controller.
//!
//! The single post-commit hook for every mutation path. [`crate::ReservationService`]
//! calls [`CacheCoherence::event_changed`] after a create, cancel or resize has
//! committed; nothing else in the engine talks to the cache.
//!
//! Invalidation never reports failure upward. In detached mode the sink runs on
//! its own task so the caller's response does not wait for the cache at all; in
//! inline mode it is awaited (useful in tests that assert on the sink).

use crate::metrics::CacheMetrics;
use eventbook_core::cache::{CacheInvalidator, keys_for_event};
use eventbook_core::types::EventId;
use std::sync::Arc;

/// How invalidation is scheduled relative to the caller's response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InvalidationMode {
    /// Spawn onto the runtime and return immediately
    #[default]
    Detached,
    /// Await the sink before returning
    Inline,
}

/// Post-commit cache hook.
#[derive(Clone)]
pub struct CacheCoherence {
    sink: Arc<dyn CacheInvalidator>,
    mode: InvalidationMode,
}

impl CacheCoherence {
    /// Create a hook dispatching to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn CacheInvalidator>, mode: InvalidationMode) -> Self {
        Self { sink, mode }
    }

    /// Scheduling mode
    #[must_use]
    pub const fn mode(&self) -> InvalidationMode {
        self.mode
    }

    /// Invalidate every view that may show `event_id`'s capacity.
    pub async fn event_changed(&self, event_id: EventId) {
        match self.mode {
            InvalidationMode::Inline => dispatch(self.sink.as_ref(), event_id).await,
            InvalidationMode::Detached => {
                let sink = Arc::clone(&self.sink);
                tokio::spawn(async move { dispatch(sink.as_ref(), event_id).await });
            }
        }
    }
}

async fn dispatch(sink: &dyn CacheInvalidator, event_id: EventId) {
    let keys = keys_for_event(event_id);
    match sink.invalidate(&keys).await {
        Ok(()) => tracing::debug!(event_id = %event_id, "Cache invalidated"),
        Err(error) => {
            tracing::warn!(
                event_id = %event_id,
                error = %error,
                "Cache invalidation failed; cached views may be stale until they expire"
            );
            CacheMetrics::record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventbook_core::cache::CacheKey;
    use eventbook_testing::{FailingCacheInvalidator, RecordingCacheInvalidator};
    use std::time::Duration;

    #[tokio::test]
    async fn inline_mode_invalidates_before_returning() {
        let sink = RecordingCacheInvalidator::new();
        let hook = CacheCoherence::new(Arc::new(sink.clone()), InvalidationMode::Inline);

        hook.event_changed(EventId::new(3)).await;

        assert_eq!(
            sink.calls(),
            vec![vec![
                CacheKey::EventDetail(EventId::new(3)),
                CacheKey::EventListings,
                CacheKey::PopularEvents,
            ]]
        );
    }

    #[tokio::test]
    async fn detached_mode_eventually_invalidates() {
        let sink = RecordingCacheInvalidator::new();
        let hook = CacheCoherence::new(Arc::new(sink.clone()), InvalidationMode::Detached);

        hook.event_changed(EventId::new(8)).await;

        for _ in 0..100 {
            if !sink.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sink.invalidated_events(), vec![EventId::new(8)]);
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let sink = FailingCacheInvalidator::new();
        let hook = CacheCoherence::new(Arc::new(sink.clone()), InvalidationMode::Inline);

        hook.event_changed(EventId::new(1)).await;

        assert_eq!(sink.attempts(), 1);
    }
}

//! Redis cache invalidation for Eventbook.
//!
//! [`RedisCacheInvalidator`] drops the cached views that may show an event's
//! capacity once a reservation transaction has committed.
//!
//! # Key layout
//!
//! - **Event detail**: `event:{event_id}` (deleted directly)
//! - **Listings**: `events:list:*` (one key per filter/page combination; found
//!   with `SCAN` and deleted page by page)
//! - **Popular ranking**: `events:popular` (deleted directly)
//!
//! `SCAN` is used instead of `KEYS` so a large keyspace never blocks the server.
//!
//! # Example
//!
//! ```no_run
//! use eventbook_redis::RedisCacheInvalidator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RedisCacheInvalidator::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eventbook_core::cache::{CacheError, CacheInvalidator, CacheKey};
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 100;

/// Cache invalidator backed by Redis.
///
/// Cheap to clone; clones share one `ConnectionManager`, which reconnects on
/// its own after a dropped connection.
#[derive(Clone)]
pub struct RedisCacheInvalidator {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisCacheInvalidator {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns error if connection to Redis fails.
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("Redis cache invalidator connected");
        Ok(Self { conn_manager })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    async fn delete_all(&self, keys: &[CacheKey]) -> Result<usize, CacheError> {
        let mut conn = self.conn_manager.clone();
        let mut direct = Vec::new();
        let mut removed = 0;

        for key in keys {
            if key.is_pattern() {
                removed += delete_matching(&mut conn, &key.to_string()).await?;
            } else {
                direct.push(key.to_string());
            }
        }

        removed += delete_keys(&mut conn, &direct).await?;
        Ok(removed)
    }
}

impl CacheInvalidator for RedisCacheInvalidator {
    fn invalidate<'a>(&'a self, keys: &'a [CacheKey]) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let removed = self.delete_all(keys).await?;
            tracing::debug!(removed, "Redis cache entries deleted");
            Ok(())
        })
    }
}

/// Delete every key matching `pattern`, one `SCAN` page at a time.
async fn delete_matching(conn: &mut ConnectionManager, pattern: &str) -> Result<usize, CacheError> {
    let mut cursor: u64 = 0;
    let mut removed = 0;

    loop {
        let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(conn)
            .await
            .map_err(|e| CacheError(format!("Failed to scan {pattern}: {e}")))?;

        removed += delete_keys(conn, &page).await?;
        if next == 0 {
            return Ok(removed);
        }
        cursor = next;
    }
}

async fn delete_keys(conn: &mut ConnectionManager, keys: &[String]) -> Result<usize, CacheError> {
    if keys.is_empty() {
        return Ok(0);
    }

    conn.del(keys)
        .await
        .map_err(|e| CacheError(format!("Failed to delete cache keys: {e}")))
}

//! [`ReservationStore`] over a `PostgreSQL` connection pool.
//!
//! Every ledger transaction is a database transaction that starts with
//! `SELECT ... FOR UPDATE` on the event row. Concurrent transactions on the
//! same event queue behind that row lock; transactions on other events never
//! touch it. Dropping a [`PostgresTransaction`] without committing rolls the
//! database transaction back.

use crate::error::{map_sqlx_error, to_i32, to_u32};
use chrono::{DateTime, Utc};
use eventbook_core::ledger::Capacity;
use eventbook_core::store::{LedgerTransaction, ReservationStore, StoreError};
use eventbook_core::types::{
    EventId, EventRecord, NewEvent, ReservationId, ReservationRecord, ReservationStatus, UserId,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

const EVENT_COLUMNS: &str = "id, creator_id, event_date, max_capacity, available_spots";
const RESERVATION_COLUMNS: &str = "id, event_id, user_id, status, created_at, canceled_at";

/// Connection pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of idle connections kept open
    pub min_connections: u32,
    /// How long to wait for a connection before failing
    pub connect_timeout: Duration,
    /// How long a connection may sit idle before being closed
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// `PostgreSQL`-backed reservation store.
///
/// # Example
///
/// ```no_run
/// use eventbook_postgres::{PoolSettings, PostgresReservationStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store =
///     PostgresReservationStore::connect("postgres://localhost/eventbook", &PoolSettings::default())
///         .await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    /// Open a connection pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if no connection can be established.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .idle_timeout(settings.idle_timeout)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!(
            max_connections = settings.max_connections,
            "PostgreSQL pool connected"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `events` and `reservations` tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(map_sqlx_error)
    }
}

impl ReservationStore for PostgresReservationStore {
    type Transaction = PostgresTransaction;

    async fn insert_event(&self, event: NewEvent) -> Result<EventRecord, StoreError> {
        let max = to_i32(event.max_capacity, "max_capacity")?;
        let row = sqlx::query(&format!(
            r"
            INSERT INTO events (creator_id, event_date, max_capacity, available_spots)
            VALUES ($1, $2, $3, $3)
            RETURNING {EVENT_COLUMNS}
            "
        ))
        .bind(event.creator_id.value())
        .bind(event.event_date)
        .bind(max)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        event_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn lock_event(&self, event_id: EventId) -> Result<Option<PostgresTransaction>, StoreError> {
        let mut tx = self.begin().await?;
        let Some(event) = lock_event_row(&mut tx, event_id).await? else {
            return Ok(None);
        };

        Ok(Some(PostgresTransaction {
            tx,
            event,
            reservation: None,
        }))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn lock_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<PostgresTransaction>, StoreError> {
        let mut tx = self.begin().await?;

        // event_id never changes, so it can be read before any lock is held.
        let event_id: Option<i64> =
            sqlx::query_scalar("SELECT event_id FROM reservations WHERE id = $1")
                .bind(reservation_id.value())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        let Some(event_id) = event_id else {
            return Ok(None);
        };

        // Lock order: event row, then reservation row.
        let Some(event) = lock_event_row(&mut tx, EventId::new(event_id)).await? else {
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(reservation_id.value())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(PostgresTransaction {
            tx,
            event,
            reservation: Some(reservation_from_row(&row)?),
        }))
    }

    async fn load_event(&self, event_id: EventId) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(event_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn has_active_reservation(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar(HAS_ACTIVE_SQL)
            .bind(event_id.value())
            .bind(user_id.value())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "
        ))
        .bind(user_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(reservation_from_row).collect()
    }
}

const HAS_ACTIVE_SQL: &str = r"
    SELECT EXISTS (
        SELECT 1 FROM reservations
        WHERE event_id = $1 AND user_id = $2 AND status = 'confirmed'
    )
";

/// An open database transaction holding the row lock of one event.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    event: EventRecord,
    reservation: Option<ReservationRecord>,
}

impl LedgerTransaction for PostgresTransaction {
    fn event(&self) -> &EventRecord {
        &self.event
    }

    fn reservation(&self) -> Option<&ReservationRecord> {
        self.reservation.as_ref()
    }

    async fn has_active_reservation(&mut self, user_id: UserId) -> Result<bool, StoreError> {
        sqlx::query_scalar(HAS_ACTIVE_SQL)
            .bind(self.event.id.value())
            .bind(user_id.value())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn count_confirmed(&mut self) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE event_id = $1 AND status = 'confirmed'",
        )
        .bind(self.event.id.value())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        to_u32(count, "count")
    }

    async fn write_capacity(&mut self, capacity: Capacity) -> Result<(), StoreError> {
        sqlx::query("UPDATE events SET max_capacity = $2, available_spots = $3 WHERE id = $1")
            .bind(self.event.id.value())
            .bind(to_i32(capacity.max(), "max_capacity")?)
            .bind(to_i32(capacity.available(), "available_spots")?)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        self.event.capacity = capacity;
        Ok(())
    }

    async fn insert_reservation(
        &mut self,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<ReservationRecord, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO reservations (event_id, user_id, status, created_at)
            VALUES ($1, $2, 'confirmed', $3)
            RETURNING id
            ",
        )
        .bind(self.event.id.value())
        .bind(user_id.value())
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ReservationRecord {
            id: ReservationId::new(id),
            event_id: self.event.id,
            user_id,
            status: ReservationStatus::Confirmed,
            created_at,
            canceled_at: None,
        })
    }

    async fn mark_canceled(
        &mut self,
        canceled_at: DateTime<Utc>,
    ) -> Result<ReservationRecord, StoreError> {
        let Some(reservation) = self.reservation.as_mut() else {
            return Err(StoreError::NotFound(
                "No reservation locked by this transaction".to_string(),
            ));
        };

        sqlx::query(
            "UPDATE reservations SET status = 'canceled', canceled_at = $2 WHERE id = $1",
        )
        .bind(reservation.id.value())
        .bind(canceled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        reservation.status = ReservationStatus::Canceled;
        reservation.canceled_at = Some(canceled_at);
        Ok(reservation.clone())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }
}

async fn lock_event_row(
    tx: &mut Transaction<'static, Postgres>,
    event_id: EventId,
) -> Result<Option<EventRecord>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE"
    ))
    .bind(event_id.value())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    row.as_ref().map(event_from_row).transpose()
}

fn event_from_row(row: &PgRow) -> Result<EventRecord, StoreError> {
    let id = EventId::new(column(row, "id")?);
    let max: i32 = column(row, "max_capacity")?;
    let available: i32 = column(row, "available_spots")?;
    let capacity = Capacity::from_parts(
        to_u32(i64::from(max), "max_capacity")?,
        to_u32(i64::from(available), "available_spots")?,
    )
    .map_err(|e| StoreError::Database(format!("Event {id}: {e}")))?;

    Ok(EventRecord {
        id,
        creator_id: UserId::new(column(row, "creator_id")?),
        event_date: column(row, "event_date")?,
        capacity,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<ReservationRecord, StoreError> {
    let status: String = column(row, "status")?;
    let status = ReservationStatus::parse(&status)
        .ok_or_else(|| StoreError::Database(format!("Invalid reservation status: {status}")))?;

    Ok(ReservationRecord {
        id: ReservationId::new(column(row, "id")?),
        event_id: EventId::new(column(row, "event_id")?),
        user_id: UserId::new(column(row, "user_id")?),
        status,
        created_at: column(row, "created_at")?,
        canceled_at: column(row, "canceled_at")?,
    })
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(map_sqlx_error)
}

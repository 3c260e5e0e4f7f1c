//! Booking repository
//!
//! Plain reads go through the pool. Writes that must be atomic with payment
//! changes take an open connection so the caller can run them inside its
//! own transaction.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Database row for `bookings`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BookingRow {
    pub booking_id: Uuid,
    pub customer_id: Uuid,
    pub trainer_id: Option<Uuid>,
    pub kind: String,
    pub status: String,
    pub scheduled_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub total_price_minor: i64,
    pub currency: String,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BookingRepository {
    pool: PgPool,
}

impl BookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, booking_id: Uuid) -> Result<Option<BookingRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE booking_id = $1")
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn insert(&self, row: &BookingRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (
                booking_id, customer_id, trainer_id, kind, status,
                scheduled_at, ends_at, total_price_minor, currency, cancellation_reason,
                created_at, matched_at, confirmed_at, started_at, completed_at,
                cancelled_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(row.booking_id)
        .bind(row.customer_id)
        .bind(row.trainer_id)
        .bind(&row.kind)
        .bind(&row.status)
        .bind(row.scheduled_at)
        .bind(row.ends_at)
        .bind(row.total_price_minor)
        .bind(&row.currency)
        .bind(&row.cancellation_reason)
        .bind(row.created_at)
        .bind(row.matched_at)
        .bind(row.confirmed_at)
        .bind(row.started_at)
        .bind(row.completed_at)
        .bind(row.cancelled_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn exists<'e>(
        executor: impl PgExecutor<'e>,
        booking_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM bookings WHERE booking_id = $1)")
                .bind(booking_id)
                .fetch_one(executor)
                .await?,
        )
    }

    /// Locks the booking row for the rest of the transaction
    pub async fn lock(
        conn: &mut PgConnection,
        booking_id: Uuid,
    ) -> Result<Option<BookingRow>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE booking_id = $1 FOR UPDATE")
                .bind(booking_id)
                .fetch_optional(conn)
                .await?,
        )
    }

    /// Writes every mutable column if the stored status still equals `expected`
    ///
    /// Returns false when the guard did not match (or the row is gone).
    pub async fn update_guarded<'e>(
        executor: impl PgExecutor<'e>,
        row: &BookingRow,
        expected: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                trainer_id = $2,
                status = $3,
                scheduled_at = $4,
                ends_at = $5,
                cancellation_reason = $6,
                matched_at = $7,
                confirmed_at = $8,
                started_at = $9,
                completed_at = $10,
                cancelled_at = $11,
                updated_at = $12
            WHERE booking_id = $1 AND status = $13
            "#,
        )
        .bind(row.booking_id)
        .bind(row.trainer_id)
        .bind(&row.status)
        .bind(row.scheduled_at)
        .bind(row.ends_at)
        .bind(&row.cancellation_reason)
        .bind(row.matched_at)
        .bind(row.confirmed_at)
        .bind(row.started_at)
        .bind(row.completed_at)
        .bind(row.cancelled_at)
        .bind(row.updated_at)
        .bind(expected)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes a booking still awaiting payment
    pub async fn delete_pending_payment(
        conn: &mut PgConnection,
        booking_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM bookings WHERE booking_id = $1 AND status = 'pending_payment'",
        )
        .bind(booking_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

//! Payment and payment event repository

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Statuses covered by the one-active-payment index
pub const ACTIVE_STATUSES: [&str; 4] = ["pending", "held", "paid", "partially_captured"];

/// Database row for `payments`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub provider: String,
    pub status: String,
    pub amount_minor: i64,
    pub captured_minor: i64,
    pub refunded_minor: i64,
    pub currency: String,
    pub correlation_key: String,
    pub provider_ref: Value,
    pub cancellation: Option<Value>,
    pub provider_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for `payment_events`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PaymentEventRow {
    pub event_id: Uuid,
    pub payment_id: Uuid,
    pub event_type: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub source: String,
    pub webhook_event_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<Option<PaymentRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_active(&self, booking_id: Uuid) -> Result<Option<PaymentRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE booking_id = $1 AND status = ANY($2)",
        )
        .bind(booking_id)
        .bind(&ACTIVE_STATUSES[..])
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_for_booking(&self, booking_id: Uuid) -> Result<Vec<PaymentRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE booking_id = $1 ORDER BY created_at, payment_id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn find_by_correlation_key(
        &self,
        provider: &str,
        correlation_key: &str,
    ) -> Result<Option<PaymentRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE provider = $1 AND correlation_key = $2",
        )
        .bind(provider)
        .bind(correlation_key)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_events(&self, payment_id: Uuid) -> Result<Vec<PaymentEventRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentEventRow>(
            "SELECT * FROM payment_events WHERE payment_id = $1 ORDER BY created_at, event_id",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Locks every payment of a booking for the rest of the transaction
    pub async fn lock_for_booking(
        conn: &mut PgConnection,
        booking_id: Uuid,
    ) -> Result<Vec<PaymentRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE booking_id = $1 ORDER BY created_at, payment_id FOR UPDATE",
        )
        .bind(booking_id)
        .fetch_all(conn)
        .await?)
    }

    pub async fn exists<'e>(
        executor: impl PgExecutor<'e>,
        payment_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM payments WHERE payment_id = $1)")
                .bind(payment_id)
                .fetch_one(executor)
                .await?,
        )
    }

    pub async fn insert<'e>(executor: impl PgExecutor<'e>, row: &PaymentRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, booking_id, provider, status,
                amount_minor, captured_minor, refunded_minor, currency,
                correlation_key, provider_ref, cancellation, provider_metadata,
                created_at, confirmed_at, paid_at, cancelled_at, refunded_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(row.payment_id)
        .bind(row.booking_id)
        .bind(&row.provider)
        .bind(&row.status)
        .bind(row.amount_minor)
        .bind(row.captured_minor)
        .bind(row.refunded_minor)
        .bind(&row.currency)
        .bind(&row.correlation_key)
        .bind(&row.provider_ref)
        .bind(&row.cancellation)
        .bind(&row.provider_metadata)
        .bind(row.created_at)
        .bind(row.confirmed_at)
        .bind(row.paid_at)
        .bind(row.cancelled_at)
        .bind(row.refunded_at)
        .bind(row.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Writes every mutable column if the stored status still equals `expected`
    pub async fn update_guarded<'e>(
        executor: impl PgExecutor<'e>,
        row: &PaymentRow,
        expected: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = $2,
                captured_minor = $3,
                refunded_minor = $4,
                correlation_key = $5,
                provider_ref = $6,
                cancellation = $7,
                provider_metadata = $8,
                confirmed_at = $9,
                paid_at = $10,
                cancelled_at = $11,
                refunded_at = $12,
                updated_at = $13
            WHERE payment_id = $1 AND status = $14
            "#,
        )
        .bind(row.payment_id)
        .bind(&row.status)
        .bind(row.captured_minor)
        .bind(row.refunded_minor)
        .bind(&row.correlation_key)
        .bind(&row.provider_ref)
        .bind(&row.cancellation)
        .bind(&row.provider_metadata)
        .bind(row.confirmed_at)
        .bind(row.paid_at)
        .bind(row.cancelled_at)
        .bind(row.refunded_at)
        .bind(row.updated_at)
        .bind(expected)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Cancels every pending payment of a booking, returning the cancelled rows
    pub async fn cancel_pending(
        conn: &mut PgConnection,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<PaymentRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentRow>(
            r#"
            UPDATE payments
            SET status = 'cancelled', cancelled_at = $2, updated_at = $2
            WHERE booking_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(at)
        .fetch_all(conn)
        .await?)
    }

    pub async fn insert_event<'e>(
        executor: impl PgExecutor<'e>,
        row: &PaymentEventRow,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payment_events (
                event_id, payment_id, event_type, from_status, to_status,
                source, webhook_event_id, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(row.event_id)
        .bind(row.payment_id)
        .bind(&row.event_type)
        .bind(&row.from_status)
        .bind(&row.to_status)
        .bind(&row.source)
        .bind(&row.webhook_event_id)
        .bind(&row.metadata)
        .bind(row.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Deletes a booking's payments together with their events
    pub async fn delete_for_booking(
        conn: &mut PgConnection,
        booking_id: Uuid,
    ) -> Result<u64, DatabaseError> {
        sqlx::query(
            "DELETE FROM payment_events WHERE payment_id IN (SELECT payment_id FROM payments WHERE booking_id = $1)",
        )
        .bind(booking_id)
        .execute(&mut *conn)
        .await?;
        let result = sqlx::query("DELETE FROM payments WHERE booking_id = $1")
            .bind(booking_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

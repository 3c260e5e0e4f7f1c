//! Webhook inbox and reconciliation alert repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;

/// Database row for `reconciliation_alerts`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AlertRow {
    pub alert_id: Uuid,
    pub kind: String,
    pub payment_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub provider: Option<String>,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationRepository {
    pool: PgPool,
}

impl ReconciliationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn inbox_contains(&self, provider: &str, event_id: &str) -> Result<bool, DatabaseError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM webhook_inbox WHERE provider = $1 AND event_id = $2)",
        )
        .bind(provider)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Returns false if the event id was already recorded
    pub async fn record_inbox(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_inbox (provider, event_id, event_type, outcome)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, event_id) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(event_id)
        .bind(event_type)
        .bind(outcome)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_alert(&self, row: &AlertRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_alerts (
                alert_id, kind, payment_id, booking_id, provider, detail, raised_at, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.alert_id)
        .bind(&row.kind)
        .bind(row.payment_id)
        .bind(row.booking_id)
        .bind(&row.provider)
        .bind(&row.detail)
        .bind(row.raised_at)
        .bind(row.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn open_alerts(&self) -> Result<Vec<AlertRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM reconciliation_alerts WHERE resolved_at IS NULL ORDER BY raised_at, alert_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }
}

//! PostgreSQL Payment Store
//!
//! Implements the booking, payment and reconciliation ports of
//! `domain_payment` on top of the repositories.
//!
//! # Guarded writes
//!
//! Every update carries the status the caller read. A write that matches no
//! row is reported as `GuardedWrite::PreconditionFailed` (or `NotFound` if the
//! row does not exist at all), never as an error. Multi-row operations run in
//! one transaction; returning early drops the transaction, which rolls it back.
//!
//! # Single active payment
//!
//! `insert_superseding` locks the booking row with `SELECT ... FOR UPDATE`
//! before looking at its payments, so concurrent payment creations for one
//! booking serialize. The partial unique index on active payments backs this
//! up at the schema level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use core_kernel::{
    AdapterHealth, AlertId, BookingId, Currency, DomainPort, GuardedWrite, HealthCheckResult,
    HealthCheckable, Money, PaymentEventId, PaymentId, PortError, UserId,
};
use domain_booking::Booking;
use domain_payment::{
    AlertKind, BookingChange, BookingPort, EventSource, InboxEntry, Payment, PaymentEvent,
    PaymentEventType, PaymentPort, PaymentProvider, PaymentStatus, PaymentTransition,
    ReconciliationAlert, ReconciliationPort, SupersedeOutcome, UnpaidCleanup,
};

use crate::error::DatabaseError;
use crate::repositories::{
    AlertRow, BookingRepository, BookingRow, PaymentEventRow, PaymentRepository, PaymentRow,
    ReconciliationRepository,
};

const ADAPTER_ID: &str = "postgres-payment-store";

/// PostgreSQL-backed implementation of the payment domain's store ports
#[derive(Debug, Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
    bookings: BookingRepository,
    payments: PaymentRepository,
    reconciliation: ReconciliationRepository,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            bookings: BookingRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            reconciliation: ReconciliationRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, PortError> {
        self.pool
            .begin()
            .await
            .map_err(|e| PortError::from(DatabaseError::from(e)))
    }
}

impl DomainPort for PostgresPaymentStore {}

#[async_trait]
impl HealthCheckable for PostgresPaymentStore {
    /// Runs `SELECT 1` against the pool
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(_) => (AdapterHealth::Healthy, None),
            Err(e) => (AdapterHealth::Unhealthy, Some(format!("Database error: {}", e))),
        };
        HealthCheckResult {
            adapter_id: ADAPTER_ID.to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

// ============================================================================
// BookingPort
// ============================================================================

#[async_trait]
impl BookingPort for PostgresPaymentStore {
    #[instrument(skip(self), fields(booking_id = %id))]
    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError> {
        let row = self.bookings.get(uuid(id)).await?;
        row.map(row_to_booking)
            .transpose()?
            .ok_or_else(|| PortError::not_found("Booking", id))
    }

    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn insert_booking(&self, booking: &Booking) -> Result<(), PortError> {
        let row = booking_to_row(booking)?;
        match self.bookings.insert(&row).await {
            Ok(()) => Ok(()),
            Err(DatabaseError::DuplicateEntry(_)) => Err(PortError::Conflict {
                message: format!("booking {} already exists", booking.id),
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, change), fields(booking_id = %change.booking.id, expected = %change.expected))]
    async fn update_booking(&self, change: BookingChange) -> Result<GuardedWrite<Booking>, PortError> {
        let row = booking_to_row(&change.booking)?;
        if BookingRepository::update_guarded(&self.pool, &row, change.expected.as_str()).await? {
            return Ok(GuardedWrite::Applied(change.booking));
        }
        if BookingRepository::exists(&self.pool, row.booking_id).await? {
            debug!("Booking status guard did not match");
            Ok(GuardedWrite::PreconditionFailed)
        } else {
            Err(PortError::not_found("Booking", change.booking.id))
        }
    }

    #[instrument(skip(self), fields(booking_id = %id))]
    async fn delete_unpaid_booking(&self, id: BookingId) -> Result<GuardedWrite<UnpaidCleanup>, PortError> {
        let mut tx = self.begin().await?;

        let booking = BookingRepository::lock(&mut tx, uuid(id))
            .await?
            .ok_or_else(|| PortError::not_found("Booking", id))?;
        if booking.status != "pending_payment" {
            return Ok(GuardedWrite::PreconditionFailed);
        }

        let rows = PaymentRepository::lock_for_booking(&mut tx, uuid(id)).await?;
        let ever_authorized = rows
            .iter()
            .any(|p| !matches!(p.status.as_str(), "pending" | "cancelled" | "failed"));
        if ever_authorized {
            return Ok(GuardedWrite::PreconditionFailed);
        }

        PaymentRepository::delete_for_booking(&mut tx, uuid(id)).await?;
        if !BookingRepository::delete_pending_payment(&mut tx, uuid(id)).await? {
            return Ok(GuardedWrite::PreconditionFailed);
        }
        tx.commit().await.map_err(DatabaseError::from)?;

        let deleted_payments = rows.into_iter().map(row_to_payment).collect::<Result<Vec<_>, _>>()?;
        debug!(deleted = deleted_payments.len(), "Unpaid booking deleted");
        Ok(GuardedWrite::Applied(UnpaidCleanup {
            booking_id: id,
            deleted_payments,
        }))
    }
}

// ============================================================================
// PaymentPort
// ============================================================================

#[async_trait]
impl PaymentPort for PostgresPaymentStore {
    #[instrument(skip(self), fields(payment_id = %id))]
    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
        self.payments
            .get(uuid(id))
            .await?
            .map(row_to_payment)
            .transpose()?
            .ok_or_else(|| PortError::not_found("Payment", id))
    }

    #[instrument(skip(self), fields(booking_id = %booking_id))]
    async fn find_active_payment(&self, booking_id: BookingId) -> Result<Option<Payment>, PortError> {
        self.payments
            .find_active(uuid(booking_id))
            .await?
            .map(row_to_payment)
            .transpose()
    }

    async fn list_payments(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError> {
        self.payments
            .list_for_booking(uuid(booking_id))
            .await?
            .into_iter()
            .map(row_to_payment)
            .collect()
    }

    #[instrument(skip(self))]
    async fn find_by_correlation_key(
        &self,
        provider: PaymentProvider,
        correlation_key: &str,
    ) -> Result<Option<Payment>, PortError> {
        self.payments
            .find_by_correlation_key(provider.as_str(), correlation_key)
            .await?
            .map(row_to_payment)
            .transpose()
    }

    #[instrument(skip(self, payment, created), fields(payment_id = %payment.id, booking_id = %payment.booking_id))]
    async fn insert_superseding(
        &self,
        payment: &Payment,
        created: &PaymentEvent,
        at: DateTime<Utc>,
    ) -> Result<SupersedeOutcome, PortError> {
        let mut tx = self.begin().await?;
        let booking_id = uuid(payment.booking_id);

        BookingRepository::lock(&mut tx, booking_id)
            .await?
            .ok_or_else(|| PortError::not_found("Booking", payment.booking_id))?;

        let existing = PaymentRepository::lock_for_booking(&mut tx, booking_id).await?;
        if let Some(active) = existing
            .into_iter()
            .find(|p| matches!(p.status.as_str(), "held" | "paid" | "partially_captured"))
        {
            return Ok(SupersedeOutcome::ActivePaymentExists(row_to_payment(active)?));
        }

        let cancelled = PaymentRepository::cancel_pending(&mut tx, booking_id, at).await?;
        let mut superseded = Vec::with_capacity(cancelled.len());
        for row in cancelled {
            let stale = row_to_payment(row)?;
            let event = PaymentEvent::new(
                stale.id,
                PaymentEventType::Cancelled,
                Some(PaymentStatus::Pending),
                PaymentStatus::Cancelled,
                EventSource::System,
                at,
            )
            .with_metadata(serde_json::json!({ "reason": "superseded", "superseded_by": payment.id }));
            PaymentRepository::insert_event(&mut *tx, &event_to_row(&event)).await?;
            superseded.push(stale);
        }

        PaymentRepository::insert(&mut *tx, &payment_to_row(payment)?).await?;
        PaymentRepository::insert_event(&mut *tx, &event_to_row(created)).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        if !superseded.is_empty() {
            debug!(count = superseded.len(), "Superseded pending payments");
        }
        Ok(SupersedeOutcome::Inserted { superseded })
    }

    #[instrument(
        skip(self, transition),
        fields(payment_id = %transition.payment.id, expected = %transition.expected, to = %transition.payment.status)
    )]
    async fn apply_transition(&self, transition: PaymentTransition) -> Result<GuardedWrite<Payment>, PortError> {
        let mut tx = self.begin().await?;
        let row = payment_to_row(&transition.payment)?;

        if !PaymentRepository::update_guarded(&mut *tx, &row, transition.expected.as_str()).await? {
            if PaymentRepository::exists(&mut *tx, row.payment_id).await? {
                debug!("Payment status guard did not match");
                return Ok(GuardedWrite::PreconditionFailed);
            }
            return Err(PortError::not_found("Payment", transition.payment.id));
        }

        if let Some(change) = &transition.booking {
            let booking_row = booking_to_row(&change.booking)?;
            if !BookingRepository::update_guarded(&mut *tx, &booking_row, change.expected.as_str()).await? {
                debug!(booking_id = %change.booking.id, "Booking status guard did not match");
                return Ok(GuardedWrite::PreconditionFailed);
            }
        }

        PaymentRepository::insert_event(&mut *tx, &event_to_row(&transition.event)).await?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(GuardedWrite::Applied(transition.payment))
    }

    async fn list_events(&self, payment_id: PaymentId) -> Result<Vec<PaymentEvent>, PortError> {
        self.payments
            .list_events(uuid(payment_id))
            .await?
            .into_iter()
            .map(row_to_event)
            .collect()
    }
}

// ============================================================================
// ReconciliationPort
// ============================================================================

#[async_trait]
impl ReconciliationPort for PostgresPaymentStore {
    async fn has_processed_webhook(&self, provider: PaymentProvider, event_id: &str) -> Result<bool, PortError> {
        Ok(self.reconciliation.inbox_contains(provider.as_str(), event_id).await?)
    }

    #[instrument(skip(self))]
    async fn record_webhook(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<InboxEntry, PortError> {
        let recorded = self
            .reconciliation
            .record_inbox(provider.as_str(), event_id, event_type, outcome)
            .await?;
        Ok(if recorded {
            InboxEntry::Recorded
        } else {
            InboxEntry::Duplicate
        })
    }

    async fn raise_alert(&self, alert: &ReconciliationAlert) -> Result<(), PortError> {
        let row = AlertRow {
            alert_id: uuid(alert.id),
            kind: alert.kind.as_str().to_string(),
            payment_id: alert.payment_id.map(uuid),
            booking_id: alert.booking_id.map(uuid),
            provider: alert.provider.map(|p| p.as_str().to_string()),
            detail: alert.detail.clone(),
            raised_at: alert.raised_at,
            resolved_at: alert.resolved_at,
        };
        self.reconciliation.insert_alert(&row).await.map_err(|e| {
            warn!(alert_id = %alert.id, error = %e, "Failed to persist reconciliation alert");
            PortError::from(e)
        })
    }

    async fn open_alerts(&self) -> Result<Vec<ReconciliationAlert>, PortError> {
        self.reconciliation
            .open_alerts()
            .await?
            .into_iter()
            .map(row_to_alert)
            .collect()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn uuid<T: Into<Uuid>>(id: T) -> Uuid {
    id.into()
}

fn corrupt(what: &str, error: impl std::fmt::Display) -> PortError {
    DatabaseError::serialization(what, error).into()
}

fn money(minor: i64, currency: Currency) -> Money {
    Money::from_minor(minor, currency)
}

fn minor(amount: &Money, what: &str) -> Result<i64, PortError> {
    amount.to_minor().map_err(|e| corrupt(what, e))
}

fn parse<T>(value: &str, what: &str) -> Result<T, PortError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| corrupt(what, e))
}

pub(crate) fn booking_to_row(booking: &Booking) -> Result<BookingRow, PortError> {
    Ok(BookingRow {
        booking_id: uuid(booking.id),
        customer_id: uuid(booking.customer_id),
        trainer_id: booking.trainer_id.map(uuid),
        kind: booking.kind.as_str().to_string(),
        status: booking.status.as_str().to_string(),
        scheduled_at: booking.scheduled_at,
        ends_at: booking.ends_at,
        total_price_minor: minor(&booking.total_price, "booking total")?,
        currency: booking.total_price.currency().code().to_string(),
        cancellation_reason: booking.cancellation_reason.clone(),
        created_at: booking.created_at,
        matched_at: booking.matched_at,
        confirmed_at: booking.confirmed_at,
        started_at: booking.started_at,
        completed_at: booking.completed_at,
        cancelled_at: booking.cancelled_at,
        updated_at: booking.updated_at,
    })
}

pub(crate) fn row_to_booking(row: BookingRow) -> Result<Booking, PortError> {
    let currency: Currency = parse(row.currency.trim(), "booking currency")?;
    Ok(Booking {
        id: BookingId::from(row.booking_id),
        customer_id: UserId::from(row.customer_id),
        trainer_id: row.trainer_id.map(UserId::from),
        kind: parse(&row.kind, "booking kind")?,
        status: parse(&row.status, "booking status")?,
        scheduled_at: row.scheduled_at,
        ends_at: row.ends_at,
        total_price: money(row.total_price_minor, currency),
        cancellation_reason: row.cancellation_reason,
        created_at: row.created_at,
        matched_at: row.matched_at,
        confirmed_at: row.confirmed_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
        cancelled_at: row.cancelled_at,
        updated_at: row.updated_at,
    })
}

pub(crate) fn payment_to_row(payment: &Payment) -> Result<PaymentRow, PortError> {
    let cancellation = payment
        .cancellation
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| corrupt("cancellation", e))?;
    Ok(PaymentRow {
        payment_id: uuid(payment.id),
        booking_id: uuid(payment.booking_id),
        provider: payment.provider.as_str().to_string(),
        status: payment.status.as_str().to_string(),
        amount_minor: minor(&payment.amount, "payment amount")?,
        captured_minor: minor(&payment.captured_amount, "captured amount")?,
        refunded_minor: minor(&payment.refunded_amount, "refunded amount")?,
        currency: payment.amount.currency().code().to_string(),
        correlation_key: payment.correlation_key().to_string(),
        provider_ref: serde_json::to_value(&payment.provider_ref).map_err(|e| corrupt("provider_ref", e))?,
        cancellation,
        provider_metadata: payment.provider_metadata.clone(),
        created_at: payment.created_at,
        confirmed_at: payment.confirmed_at,
        paid_at: payment.paid_at,
        cancelled_at: payment.cancelled_at,
        refunded_at: payment.refunded_at,
        updated_at: payment.updated_at,
    })
}

pub(crate) fn row_to_payment(row: PaymentRow) -> Result<Payment, PortError> {
    let currency: Currency = parse(row.currency.trim(), "payment currency")?;
    Ok(Payment {
        id: PaymentId::from(row.payment_id),
        booking_id: BookingId::from(row.booking_id),
        amount: money(row.amount_minor, currency),
        provider: parse(&row.provider, "provider")?,
        provider_ref: serde_json::from_value(row.provider_ref).map_err(|e| corrupt("provider_ref", e))?,
        status: parse(&row.status, "payment status")?,
        captured_amount: money(row.captured_minor, currency),
        refunded_amount: money(row.refunded_minor, currency),
        cancellation: row
            .cancellation
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt("cancellation", e))?,
        provider_metadata: row.provider_metadata,
        created_at: row.created_at,
        confirmed_at: row.confirmed_at,
        paid_at: row.paid_at,
        cancelled_at: row.cancelled_at,
        refunded_at: row.refunded_at,
        updated_at: row.updated_at,
    })
}

pub(crate) fn event_to_row(event: &PaymentEvent) -> PaymentEventRow {
    let source = match &event.source {
        EventSource::Api => "api",
        EventSource::Webhook { .. } => "webhook",
        EventSource::System => "system",
    };
    PaymentEventRow {
        event_id: uuid(event.id),
        payment_id: uuid(event.payment_id),
        event_type: event.event_type.as_str().to_string(),
        from_status: event.from_status.map(|s| s.as_str().to_string()),
        to_status: event.to_status.as_str().to_string(),
        source: source.to_string(),
        webhook_event_id: event.webhook_event_id().map(str::to_string),
        metadata: event.metadata.clone(),
        created_at: event.created_at,
    }
}

pub(crate) fn row_to_event(row: PaymentEventRow) -> Result<PaymentEvent, PortError> {
    let source = match (row.source.as_str(), row.webhook_event_id) {
        ("api", _) => EventSource::Api,
        ("system", _) => EventSource::System,
        ("webhook", Some(event_id)) => EventSource::Webhook { event_id },
        (other, _) => return Err(corrupt("event source", other)),
    };
    Ok(PaymentEvent {
        id: PaymentEventId::from(row.event_id),
        payment_id: PaymentId::from(row.payment_id),
        event_type: parse(&row.event_type, "event type")?,
        from_status: row
            .from_status
            .as_deref()
            .map(|s| parse::<PaymentStatus>(s, "from status"))
            .transpose()?,
        to_status: parse(&row.to_status, "to status")?,
        source,
        metadata: row.metadata,
        created_at: row.created_at,
    })
}

fn row_to_alert(row: AlertRow) -> Result<ReconciliationAlert, PortError> {
    let kind = match row.kind.as_str() {
        "persistence_failed" => AlertKind::PersistenceFailed,
        "confirmation_on_inactive_payment" => AlertKind::ConfirmationOnInactivePayment,
        "amount_mismatch" => AlertKind::AmountMismatch,
        "hold_released_before_settlement" => AlertKind::HoldReleasedBeforeSettlement,
        other => return Err(corrupt("alert kind", other)),
    };
    Ok(ReconciliationAlert {
        id: AlertId::from(row.alert_id),
        kind,
        payment_id: row.payment_id.map(PaymentId::from),
        booking_id: row.booking_id.map(BookingId::from),
        provider: row
            .provider
            .as_deref()
            .map(|p| parse::<PaymentProvider>(p, "alert provider"))
            .transpose()?,
        detail: row.detail,
        raised_at: row.raised_at,
        resolved_at: row.resolved_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use domain_booking::BookingKind;
    use domain_payment::ProviderRef;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 3, 0, 0).unwrap()
    }

    fn booking() -> Booking {
        Booking::new(
            UserId::new(),
            BookingKind::Direct,
            at() + Duration::days(3),
            at() + Duration::days(3) + Duration::minutes(50),
            Money::krw(80_000),
            at(),
        )
        .unwrap()
        .with_trainer(UserId::new())
    }

    #[test]
    fn test_booking_row_mapping_preserves_fields() {
        let booking = booking();
        let row = booking_to_row(&booking).unwrap();
        assert_eq!(row.status, "pending_payment");
        assert_eq!(row.total_price_minor, 80_000);
        assert_eq!(row.currency, "KRW");
        assert_eq!(row_to_booking(row).unwrap(), booking);
    }

    #[test]
    fn test_payment_row_mapping_preserves_fields() {
        let booking = booking();
        let payment = Payment::new(
            PaymentId::new_v7(),
            &booking,
            PaymentProvider::Stripe,
            ProviderRef::ManualCapture {
                intent_id: "pi_1".to_string(),
                client_secret: Some("pi_1_secret".to_string()),
            },
            at(),
        );
        let row = payment_to_row(&payment).unwrap();
        assert_eq!(row.correlation_key, "pi_1");
        assert_eq!(row.provider, "stripe");
        assert_eq!(row_to_payment(row).unwrap(), payment);
    }

    #[test]
    fn test_event_source_round_trip() {
        let event = PaymentEvent::new(
            PaymentId::new_v7(),
            PaymentEventType::Confirmed,
            Some(PaymentStatus::Pending),
            PaymentStatus::Held,
            EventSource::webhook("evt_1"),
            at(),
        );
        let row = event_to_row(&event);
        assert_eq!(row.source, "webhook");
        assert_eq!(row.webhook_event_id.as_deref(), Some("evt_1"));
        assert_eq!(row_to_event(row).unwrap(), event);
    }

    #[test]
    fn test_unknown_status_is_transformation_error() {
        let mut row = booking_to_row(&booking()).unwrap();
        row.status = "archived".to_string();
        assert!(matches!(row_to_booking(row), Err(PortError::Transformation { .. })));
    }
}

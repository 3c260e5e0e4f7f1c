//! Payment Domain Ports
//!
//! Persistence and side-effect interfaces the payment services depend on.
//!
//! # Architecture
//!
//! - **Internal Adapter**: PostgreSQL (infra_db) implements the store ports
//! - **Mock Adapter**: in-memory, for service tests without a database
//!
//! Every mutation of a booking or payment row is status-guarded: the caller
//! names the status it read, and the adapter writes only if the row is still
//! in that status, returning [`GuardedWrite::PreconditionFailed`] otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AlertId, BookingId, DomainPort, GuardedWrite, PaymentId, PortError, UserId};
use domain_booking::{Booking, BookingStatus};

use crate::event::PaymentEvent;
use crate::payment::{Payment, PaymentProvider, PaymentStatus};

/// A booking write guarded on the status it was read in
#[derive(Debug, Clone, PartialEq)]
pub struct BookingChange {
    /// The booking as it should be written
    pub booking: Booking,
    /// Status the row must currently be in
    pub expected: BookingStatus,
}

/// One atomic unit of work on a payment
///
/// The payment update, its event and the optional booking update commit
/// together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentTransition {
    pub payment: Payment,
    pub expected: PaymentStatus,
    pub event: PaymentEvent,
    pub booking: Option<BookingChange>,
}

/// Result of inserting a new payment for a booking
#[derive(Debug, Clone, PartialEq)]
pub enum SupersedeOutcome {
    /// Inserted; any stale pending payments were cancelled first
    Inserted { superseded: Vec<Payment> },
    /// The booking already has an authorized or captured payment
    ActivePaymentExists(Payment),
}

/// What an unpaid-booking cleanup removed
#[derive(Debug, Clone, PartialEq)]
pub struct UnpaidCleanup {
    pub booking_id: BookingId,
    pub deleted_payments: Vec<Payment>,
}

/// Whether a webhook id was newly recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxEntry {
    Recorded,
    Duplicate,
}

/// Why an operator must look at a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The provider moved money but the local write failed or lost its guard
    PersistenceFailed,
    /// The provider confirmed a payment the system had already superseded
    ConfirmationOnInactivePayment,
    /// The provider reported an amount that disagrees with the local record
    AmountMismatch,
    /// The provider released a hold while the booking was still live
    HoldReleasedBeforeSettlement,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::PersistenceFailed => "persistence_failed",
            AlertKind::ConfirmationOnInactivePayment => "confirmation_on_inactive_payment",
            AlertKind::AmountMismatch => "amount_mismatch",
            AlertKind::HoldReleasedBeforeSettlement => "hold_released_before_settlement",
        }
    }
}

/// A reconciliation-required condition awaiting manual or automated repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationAlert {
    pub id: AlertId,
    pub kind: AlertKind,
    pub payment_id: Option<PaymentId>,
    pub booking_id: Option<BookingId>,
    pub provider: Option<PaymentProvider>,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationAlert {
    pub fn new(kind: AlertKind, detail: impl Into<String>, raised_at: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new_v7(),
            kind,
            payment_id: None,
            booking_id: None,
            provider: None,
            detail: detail.into(),
            raised_at,
            resolved_at: None,
        }
    }

    pub fn for_payment(mut self, payment: &Payment) -> Self {
        self.payment_id = Some(payment.id);
        self.booking_id = Some(payment.booking_id);
        self.provider = Some(payment.provider);
        self
    }
}

/// Category of a user notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingRequest,
    BookingConfirmed,
    BookingRejected,
    BookingCancelled,
    BookingCompleted,
    NoShow,
    PaymentCompleted,
}

/// A message for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub link: Option<String>,
}

/// Booking persistence
#[async_trait]
pub trait BookingPort: DomainPort {
    /// Retrieves a booking, or `PortError::NotFound`
    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError>;

    /// Inserts a new booking
    async fn insert_booking(&self, booking: &Booking) -> Result<(), PortError>;

    /// Writes a booking if its stored status still equals `change.expected`
    async fn update_booking(&self, change: BookingChange) -> Result<GuardedWrite<Booking>, PortError>;

    /// Deletes a `pending_payment` booking with its never-authorized payments
    /// and their events
    ///
    /// Precondition fails if the booking left `pending_payment` or any of
    /// its payments was ever held, captured or refunded.
    async fn delete_unpaid_booking(
        &self,
        id: BookingId,
    ) -> Result<GuardedWrite<UnpaidCleanup>, PortError>;
}

/// Payment persistence
#[async_trait]
pub trait PaymentPort: DomainPort {
    /// Retrieves a payment, or `PortError::NotFound`
    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError>;

    /// The booking's payment in an active status, if any
    async fn find_active_payment(&self, booking_id: BookingId) -> Result<Option<Payment>, PortError>;

    /// All payments ever made for a booking, oldest first
    async fn list_payments(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError>;

    /// Looks a payment up by its provider correlation key
    async fn find_by_correlation_key(
        &self,
        provider: PaymentProvider,
        correlation_key: &str,
    ) -> Result<Option<Payment>, PortError>;

    /// Atomically cancels the booking's pending payments and inserts `payment`
    ///
    /// Each superseded payment gets a `cancelled` event. If the booking has a
    /// held or captured payment nothing is written.
    async fn insert_superseding(
        &self,
        payment: &Payment,
        created: &PaymentEvent,
        at: DateTime<Utc>,
    ) -> Result<SupersedeOutcome, PortError>;

    /// Applies a payment transition as one unit of work
    async fn apply_transition(
        &self,
        transition: PaymentTransition,
    ) -> Result<GuardedWrite<Payment>, PortError>;

    /// A payment's events in creation order
    async fn list_events(&self, payment_id: PaymentId) -> Result<Vec<PaymentEvent>, PortError>;
}

/// Webhook inbox and reconciliation alerts
#[async_trait]
pub trait ReconciliationPort: DomainPort {
    /// True if this provider event id was already processed
    async fn has_processed_webhook(
        &self,
        provider: PaymentProvider,
        event_id: &str,
    ) -> Result<bool, PortError>;

    /// Records a processed provider event id
    async fn record_webhook(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        event_type: &str,
        outcome: &str,
    ) -> Result<InboxEntry, PortError>;

    /// Persists an alert for the operational alert path
    async fn raise_alert(&self, alert: &ReconciliationAlert) -> Result<(), PortError>;

    /// Alerts not yet resolved, oldest first
    async fn open_alerts(&self) -> Result<Vec<ReconciliationAlert>, PortError>;
}

/// Fire-and-forget user notifications
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, notification: Notification) -> Result<(), PortError>;
}

/// Kicks off trainer matching for a paid recommended booking
#[async_trait]
pub trait MatchingTrigger: Send + Sync + 'static {
    async fn request_matching(&self, booking_id: BookingId) -> Result<(), PortError>;
}

/// Mock implementations of the payment ports for testing
///
/// All state lives behind one lock so each operation is atomic, the same
/// way the database adapter runs each operation in one transaction.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::RwLock;

    use crate::event::{EventSource, PaymentEventType};

    #[derive(Debug, Default)]
    struct State {
        bookings: HashMap<BookingId, Booking>,
        payments: Vec<Payment>,
        events: Vec<PaymentEvent>,
        inbox: HashSet<(PaymentProvider, String)>,
        alerts: Vec<ReconciliationAlert>,
    }

    /// In-memory store implementing the booking, payment and reconciliation ports
    #[derive(Debug, Default)]
    pub struct MockStore {
        state: RwLock<State>,
        fail_transitions: RwLock<bool>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-populates with bookings for testing
        pub async fn with_bookings(bookings: Vec<Booking>) -> Self {
            let store = Self::new();
            {
                let mut state = store.state.write().await;
                for booking in bookings {
                    state.bookings.insert(booking.id, booking);
                }
            }
            store
        }

        /// Inserts a payment as-is, bypassing the supersede logic
        pub async fn seed_payment(&self, payment: Payment) {
            self.state.write().await.payments.push(payment);
        }

        /// Makes `apply_transition` fail with a connection error until reset
        pub async fn fail_transitions(&self, fail: bool) {
            *self.fail_transitions.write().await = fail;
        }

        pub async fn booking(&self, id: BookingId) -> Option<Booking> {
            self.state.read().await.bookings.get(&id).cloned()
        }

        pub async fn payments_for(&self, booking_id: BookingId) -> Vec<Payment> {
            self.state
                .read()
                .await
                .payments
                .iter()
                .filter(|p| p.booking_id == booking_id)
                .cloned()
                .collect()
        }

        pub async fn events_of_type(
            &self,
            payment_id: PaymentId,
            event_type: PaymentEventType,
        ) -> Vec<PaymentEvent> {
            self.state
                .read()
                .await
                .events
                .iter()
                .filter(|e| e.payment_id == payment_id && e.event_type == event_type)
                .cloned()
                .collect()
        }

        pub async fn alerts(&self) -> Vec<ReconciliationAlert> {
            self.state.read().await.alerts.clone()
        }
    }

    impl DomainPort for MockStore {}

    #[async_trait]
    impl BookingPort for MockStore {
        async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError> {
            self.state
                .read()
                .await
                .bookings
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Booking", id))
        }

        async fn insert_booking(&self, booking: &Booking) -> Result<(), PortError> {
            let mut state = self.state.write().await;
            if state.bookings.contains_key(&booking.id) {
                return Err(PortError::Conflict {
                    message: format!("booking {} already exists", booking.id),
                });
            }
            state.bookings.insert(booking.id, booking.clone());
            Ok(())
        }

        async fn update_booking(
            &self,
            change: BookingChange,
        ) -> Result<GuardedWrite<Booking>, PortError> {
            let mut state = self.state.write().await;
            let current = state
                .bookings
                .get_mut(&change.booking.id)
                .ok_or_else(|| PortError::not_found("Booking", change.booking.id))?;
            if current.status != change.expected {
                return Ok(GuardedWrite::PreconditionFailed);
            }
            *current = change.booking.clone();
            Ok(GuardedWrite::Applied(change.booking))
        }

        async fn delete_unpaid_booking(
            &self,
            id: BookingId,
        ) -> Result<GuardedWrite<UnpaidCleanup>, PortError> {
            let mut state = self.state.write().await;
            let booking = state
                .bookings
                .get(&id)
                .ok_or_else(|| PortError::not_found("Booking", id))?;
            if booking.status != BookingStatus::PendingPayment {
                return Ok(GuardedWrite::PreconditionFailed);
            }
            let ever_authorized = state.payments.iter().any(|p| {
                p.booking_id == id
                    && !matches!(p.status, PaymentStatus::Pending | PaymentStatus::Cancelled | PaymentStatus::Failed)
            });
            if ever_authorized {
                return Ok(GuardedWrite::PreconditionFailed);
            }

            let (deleted, kept): (Vec<Payment>, Vec<Payment>) =
                state.payments.drain(..).partition(|p| p.booking_id == id);
            state.payments = kept;
            let deleted_ids: HashSet<PaymentId> = deleted.iter().map(|p| p.id).collect();
            state.events.retain(|e| !deleted_ids.contains(&e.payment_id));
            state.bookings.remove(&id);

            Ok(GuardedWrite::Applied(UnpaidCleanup {
                booking_id: id,
                deleted_payments: deleted,
            }))
        }
    }

    #[async_trait]
    impl PaymentPort for MockStore {
        async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
            self.state
                .read()
                .await
                .payments
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Payment", id))
        }

        async fn find_active_payment(
            &self,
            booking_id: BookingId,
        ) -> Result<Option<Payment>, PortError> {
            Ok(self
                .state
                .read()
                .await
                .payments
                .iter()
                .find(|p| p.booking_id == booking_id && p.status.is_active())
                .cloned())
        }

        async fn list_payments(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError> {
            Ok(self.payments_for(booking_id).await)
        }

        async fn find_by_correlation_key(
            &self,
            provider: PaymentProvider,
            correlation_key: &str,
        ) -> Result<Option<Payment>, PortError> {
            Ok(self
                .state
                .read()
                .await
                .payments
                .iter()
                .find(|p| p.provider == provider && p.correlation_key() == correlation_key)
                .cloned())
        }

        async fn insert_superseding(
            &self,
            payment: &Payment,
            created: &PaymentEvent,
            at: DateTime<Utc>,
        ) -> Result<SupersedeOutcome, PortError> {
            let mut state = self.state.write().await;
            if !state.bookings.contains_key(&payment.booking_id) {
                return Err(PortError::not_found("Booking", payment.booking_id));
            }
            if let Some(active) = state
                .payments
                .iter()
                .find(|p| p.booking_id == payment.booking_id && p.status.is_active() && p.status != PaymentStatus::Pending)
            {
                return Ok(SupersedeOutcome::ActivePaymentExists(active.clone()));
            }

            let mut superseded = Vec::new();
            let mut events = Vec::new();
            for existing in state
                .payments
                .iter_mut()
                .filter(|p| p.booking_id == payment.booking_id && p.status == PaymentStatus::Pending)
            {
                existing.status = PaymentStatus::Cancelled;
                existing.cancelled_at = Some(at);
                existing.updated_at = at;
                events.push(
                    PaymentEvent::new(
                        existing.id,
                        PaymentEventType::Cancelled,
                        Some(PaymentStatus::Pending),
                        PaymentStatus::Cancelled,
                        EventSource::System,
                        at,
                    )
                    .with_metadata(serde_json::json!({ "reason": "superseded", "superseded_by": payment.id })),
                );
                superseded.push(existing.clone());
            }
            state.events.extend(events);
            state.payments.push(payment.clone());
            state.events.push(created.clone());

            Ok(SupersedeOutcome::Inserted { superseded })
        }

        async fn apply_transition(
            &self,
            transition: PaymentTransition,
        ) -> Result<GuardedWrite<Payment>, PortError> {
            if *self.fail_transitions.read().await {
                return Err(PortError::connection("mock store unavailable"));
            }
            let mut state = self.state.write().await;

            let payment_guard = state
                .payments
                .iter()
                .find(|p| p.id == transition.payment.id)
                .map(|p| p.status == transition.expected)
                .ok_or_else(|| PortError::not_found("Payment", transition.payment.id))?;
            if !payment_guard {
                return Ok(GuardedWrite::PreconditionFailed);
            }
            if let Some(change) = &transition.booking {
                let booking_guard = state
                    .bookings
                    .get(&change.booking.id)
                    .map(|b| b.status == change.expected)
                    .ok_or_else(|| PortError::not_found("Booking", change.booking.id))?;
                if !booking_guard {
                    return Ok(GuardedWrite::PreconditionFailed);
                }
                state.bookings.insert(change.booking.id, change.booking.clone());
            }

            if let Some(slot) = state.payments.iter_mut().find(|p| p.id == transition.payment.id) {
                *slot = transition.payment.clone();
            }
            state.events.push(transition.event);
            Ok(GuardedWrite::Applied(transition.payment))
        }

        async fn list_events(&self, payment_id: PaymentId) -> Result<Vec<PaymentEvent>, PortError> {
            Ok(self
                .state
                .read()
                .await
                .events
                .iter()
                .filter(|e| e.payment_id == payment_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl ReconciliationPort for MockStore {
        async fn has_processed_webhook(
            &self,
            provider: PaymentProvider,
            event_id: &str,
        ) -> Result<bool, PortError> {
            Ok(self
                .state
                .read()
                .await
                .inbox
                .contains(&(provider, event_id.to_string())))
        }

        async fn record_webhook(
            &self,
            provider: PaymentProvider,
            event_id: &str,
            _event_type: &str,
            _outcome: &str,
        ) -> Result<InboxEntry, PortError> {
            let inserted = self
                .state
                .write()
                .await
                .inbox
                .insert((provider, event_id.to_string()));
            Ok(if inserted {
                InboxEntry::Recorded
            } else {
                InboxEntry::Duplicate
            })
        }

        async fn raise_alert(&self, alert: &ReconciliationAlert) -> Result<(), PortError> {
            self.state.write().await.alerts.push(alert.clone());
            Ok(())
        }

        async fn open_alerts(&self) -> Result<Vec<ReconciliationAlert>, PortError> {
            Ok(self
                .state
                .read()
                .await
                .alerts
                .iter()
                .filter(|a| a.resolved_at.is_none())
                .cloned()
                .collect())
        }
    }

    /// Records notifications instead of sending them
    #[derive(Debug, Default)]
    pub struct MockNotifier {
        sent: RwLock<Vec<Notification>>,
        fail: RwLock<bool>,
    }

    impl MockNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every delivery fail
        pub async fn fail_all(&self, fail: bool) {
            *self.fail.write().await = fail;
        }

        pub async fn sent(&self) -> Vec<Notification> {
            self.sent.read().await.clone()
        }

        pub async fn sent_to(&self, user_id: UserId) -> Vec<Notification> {
            self.sent
                .read()
                .await
                .iter()
                .filter(|n| n.user_id == user_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl NotificationSink for MockNotifier {
        async fn notify(&self, notification: Notification) -> Result<(), PortError> {
            if *self.fail.read().await {
                return Err(PortError::ServiceUnavailable {
                    service: "notifications".to_string(),
                });
            }
            self.sent.write().await.push(notification);
            Ok(())
        }
    }

    /// Records matching requests
    #[derive(Debug, Default)]
    pub struct MockMatcher {
        requested: RwLock<Vec<BookingId>>,
    }

    impl MockMatcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn requested(&self) -> Vec<BookingId> {
            self.requested.read().await.clone()
        }
    }

    #[async_trait]
    impl MatchingTrigger for MockMatcher {
        async fn request_matching(&self, booking_id: BookingId) -> Result<(), PortError> {
            self.requested.write().await.push(booking_id);
            Ok(())
        }
    }
}

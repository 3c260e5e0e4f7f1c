//! Payment domain services
//!
//! The services orchestrate bookings, payments and provider calls:
//!
//! - [`LifecycleService`]: payment creation, confirmation, capture and the
//!   booking transitions that touch money
//! - [`CancellationService`]: fee-bearing cancellation
//! - [`WebhookReconciler`]: provider callbacks
//!
//! A provider call that moves money is the point of no return. Anything that
//! fails after it is a reconciliation-required condition: logged on the
//! `reconciliation` target and persisted as an alert, never swallowed.

mod cancellation;
mod lifecycle;
mod reconciler;

pub use cancellation::{CancelRequest, CancellationBranch, CancellationResult, CancellationService};
pub use lifecycle::{
    CaptureResult, ConfirmOutcome, ConfirmRequest, Confirmation, CreatePaymentRequest,
    LifecycleService, PaymentCreated, RejectionResult,
};
pub use reconciler::{ProviderEvent, ProviderEventKind, ReconcileOutcome, WebhookReconciler};

use std::sync::Arc;

use core_kernel::{AlertId, BookingId, Clock, GuardedWrite, PaymentId};
use domain_booking::{Booking, PaymentWindows};

use crate::error::{not_found_or_store, PaymentError};
use crate::gateway::PaymentGateways;
use crate::payment::Payment;
use crate::ports::{
    AlertKind, BookingPort, MatchingTrigger, Notification, NotificationSink, PaymentPort,
    PaymentTransition, ReconciliationAlert, ReconciliationPort,
};

/// Everything the services need, shared behind `Arc`s
#[derive(Clone)]
pub struct PaymentDeps {
    pub bookings: Arc<dyn BookingPort>,
    pub payments: Arc<dyn PaymentPort>,
    pub reconciliation: Arc<dyn ReconciliationPort>,
    pub gateways: PaymentGateways,
    pub notifier: Arc<dyn NotificationSink>,
    pub matcher: Arc<dyn MatchingTrigger>,
    pub clock: Arc<dyn Clock>,
    pub windows: PaymentWindows,
}

impl PaymentDeps {
    pub(crate) async fn load_booking(&self, id: BookingId) -> Result<Booking, PaymentError> {
        self.bookings
            .get_booking(id)
            .await
            .map_err(|e| not_found_or_store(e, "booking", id))
    }

    pub(crate) async fn load_payment(&self, id: PaymentId) -> Result<Payment, PaymentError> {
        self.payments
            .get_payment(id)
            .await
            .map_err(|e| not_found_or_store(e, "payment", id))
    }

    /// Sends a notification; failures are logged and dropped
    pub(crate) async fn notify(&self, notification: Notification) {
        let user_id = notification.user_id;
        let kind = notification.kind;
        if let Err(e) = self.notifier.notify(notification).await {
            tracing::warn!(
                user_id = %user_id,
                kind = ?kind,
                error = %e,
                "Notification delivery failed"
            );
        }
    }

    /// Logs and persists a reconciliation alert, returning its id
    pub(crate) async fn raise_alert(&self, alert: ReconciliationAlert) -> AlertId {
        tracing::error!(
            target: "reconciliation",
            alert_id = %alert.id,
            kind = alert.kind.as_str(),
            payment_id = ?alert.payment_id,
            booking_id = ?alert.booking_id,
            detail = %alert.detail,
            "Reconciliation required"
        );
        if let Err(e) = self.reconciliation.raise_alert(&alert).await {
            tracing::error!(
                target: "reconciliation",
                alert_id = %alert.id,
                error = %e,
                "Failed to persist reconciliation alert"
            );
        }
        alert.id
    }

    /// Records a transition that follows a successful provider call
    ///
    /// The provider has already moved money, so a lost guard or a failed
    /// write cannot be reported as a plain error: it raises an alert and
    /// surfaces `ReconciliationRequired`. The one exception is a provider
    /// webhook that recorded the same payment outcome while the call was in
    /// flight; the booking change and the audit event are then written on
    /// top of the webhook's record.
    pub(crate) async fn commit_after_provider(
        &self,
        transition: PaymentTransition,
        operation: &str,
    ) -> Result<Payment, PaymentError> {
        let snapshot = transition.payment.clone();
        let detail = match self.payments.apply_transition(transition.clone()).await {
            Ok(GuardedWrite::Applied(payment)) => return Ok(payment),
            Ok(GuardedWrite::PreconditionFailed) => {
                if let Some(payment) = self.converge_with_webhook(transition, operation).await {
                    return Ok(payment);
                }
                format!(
                    "{} succeeded at the provider but the payment or booking changed before it was recorded",
                    operation
                )
            }
            Err(e) => format!(
                "{} succeeded at the provider but recording it failed: {}",
                operation, e
            ),
        };
        let alert = ReconciliationAlert::new(AlertKind::PersistenceFailed, detail.clone(), self.clock.now())
            .for_payment(&snapshot);
        let alert_id = self.raise_alert(alert).await;
        Err(PaymentError::ReconciliationRequired {
            alert_id,
            message: detail,
        })
    }

    /// Retries a lost-guard write when the stored payment already shows the
    /// status the provider call produced
    ///
    /// The write is repeated against the status the webhook left, so the
    /// booking change and the audit event land on top of it. Returns `None`
    /// when the payment diverged or the retry also loses its guard.
    async fn converge_with_webhook(&self, transition: PaymentTransition, operation: &str) -> Option<Payment> {
        let current = self.payments.get_payment(transition.payment.id).await.ok()?;
        if current.status != transition.payment.status || current.status == transition.expected {
            return None;
        }
        let mut event = transition.event;
        event.from_status = Some(current.status);
        event.to_status = current.status;
        let retry = PaymentTransition {
            payment: transition.payment,
            expected: current.status,
            event,
            booking: transition.booking,
        };
        match self.payments.apply_transition(retry).await {
            Ok(GuardedWrite::Applied(payment)) => {
                tracing::info!(
                    payment_id = %payment.id,
                    booking_id = %payment.booking_id,
                    status = %payment.status,
                    operation,
                    "Provider webhook already recorded the outcome; booking change applied"
                );
                Some(payment)
            }
            Ok(GuardedWrite::PreconditionFailed) => None,
            Err(e) => {
                tracing::warn!(payment_id = %current.id, error = %e, "Convergence write failed");
                None
            }
        }
    }
}

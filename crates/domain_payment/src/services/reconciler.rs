//! Webhook reconciliation
//!
//! Provider events are matched to payments by correlation key and applied
//! through the same guarded transitions the synchronous paths use. Each
//! delivery is checked against the inbox, processed, then recorded, so a
//! redelivered event is acknowledged without touching state.

use serde::{Deserialize, Serialize};

use core_kernel::{AlertId, GuardedWrite, Money};
use domain_booking::BookingStatus;

use crate::error::PaymentError;
use crate::event::{EventSource, PaymentEvent, PaymentEventType};
use crate::payment::{CaptureMode, Payment, PaymentProvider, PaymentStatus};
use crate::ports::{AlertKind, PaymentTransition, ReconciliationAlert};

use super::lifecycle::{ConfirmOutcome, Confirmation, LifecycleService};
use super::PaymentDeps;

/// What a provider says happened to a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderEventKind {
    /// Hold in place, awaiting capture
    Authorized,
    /// Funds charged
    Captured { amount: Money },
    /// Charge or authorization attempt failed
    Failed { reason: String },
    /// Checkout window lapsed at the provider
    Expired,
    /// Hold released or charge fully cancelled at the provider
    Cancelled,
    /// Charge refunded; `amount` is the cumulative refunded amount
    Refunded { amount: Money },
}

impl ProviderEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEventKind::Authorized => "authorized",
            ProviderEventKind::Captured { .. } => "captured",
            ProviderEventKind::Failed { .. } => "failed",
            ProviderEventKind::Expired => "expired",
            ProviderEventKind::Cancelled => "cancelled",
            ProviderEventKind::Refunded { .. } => "refunded",
        }
    }
}

/// A verified, provider-neutral webhook event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider: PaymentProvider,
    /// Provider's unique id for this delivery
    pub event_id: String,
    /// Intent id or order id the payment was created with
    pub correlation_key: String,
    pub kind: ProviderEventKind,
    /// Charge key, when the provider reports one
    pub payment_key: Option<String>,
    /// Original payload, kept for audit
    pub raw: serde_json::Value,
}

/// Result of handling one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local state was updated
    Applied,
    /// Local state already reflected the event
    AlreadyApplied,
    /// No payment carries this correlation key
    Unmatched,
    /// The event has no bearing on local state
    Ignored,
    /// Provider state needs a manual repair; an alert was raised
    ReconciliationRequired { alert_id: AlertId },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::AlreadyApplied => "already_applied",
            ReconcileOutcome::Unmatched => "unmatched",
            ReconcileOutcome::Ignored => "ignored",
            ReconcileOutcome::ReconciliationRequired { .. } => "reconciliation_required",
        }
    }
}

impl From<ConfirmOutcome> for ReconcileOutcome {
    fn from(outcome: ConfirmOutcome) -> Self {
        match outcome {
            ConfirmOutcome::Applied(_) => ReconcileOutcome::Applied,
            ConfirmOutcome::AlreadyApplied(_) => ReconcileOutcome::AlreadyApplied,
            ConfirmOutcome::ReconciliationRequired { alert_id, .. } => {
                ReconcileOutcome::ReconciliationRequired { alert_id }
            }
        }
    }
}

/// Applies provider webhooks to local payment state
#[derive(Clone)]
pub struct WebhookReconciler {
    deps: PaymentDeps,
    lifecycle: LifecycleService,
}

impl WebhookReconciler {
    pub fn new(deps: PaymentDeps) -> Self {
        let lifecycle = LifecycleService::new(deps.clone());
        Self { deps, lifecycle }
    }

    /// Handles one verified provider event
    ///
    /// Every outcome is an acknowledgement; only store failures are errors,
    /// and those leave the event unrecorded so the provider retries it.
    pub async fn handle(&self, event: ProviderEvent) -> Result<ReconcileOutcome, PaymentError> {
        let reconciliation = &self.deps.reconciliation;
        if reconciliation
            .has_processed_webhook(event.provider, &event.event_id)
            .await?
        {
            tracing::debug!(
                provider = %event.provider,
                event_id = %event.event_id,
                "Webhook already processed"
            );
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let outcome = match self
            .deps
            .payments
            .find_by_correlation_key(event.provider, &event.correlation_key)
            .await?
        {
            Some(payment) => self.dispatch(&payment, &event).await?,
            None => {
                tracing::warn!(
                    provider = %event.provider,
                    event_id = %event.event_id,
                    correlation_key = %event.correlation_key,
                    "Webhook does not match any payment"
                );
                ReconcileOutcome::Unmatched
            }
        };

        reconciliation
            .record_webhook(
                event.provider,
                &event.event_id,
                event.kind.as_str(),
                outcome.as_str(),
            )
            .await?;
        tracing::info!(
            provider = %event.provider,
            event_id = %event.event_id,
            kind = event.kind.as_str(),
            outcome = outcome.as_str(),
            "Webhook processed"
        );
        Ok(outcome)
    }

    async fn dispatch(
        &self,
        payment: &Payment,
        event: &ProviderEvent,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let source = EventSource::webhook(event.event_id.clone());
        match &event.kind {
            ProviderEventKind::Authorized => match payment.capture_mode() {
                CaptureMode::Manual => Ok(self
                    .lifecycle
                    .apply_payment_confirmed(
                        payment.id,
                        Confirmation::Authorized,
                        source,
                        Some(event.raw.clone()),
                    )
                    .await?
                    .into()),
                CaptureMode::Immediate => Ok(ReconcileOutcome::Ignored),
            },

            ProviderEventKind::Captured { amount } => self.on_captured(payment, *amount, event, source).await,

            ProviderEventKind::Failed { reason } => match payment.status {
                PaymentStatus::Pending => {
                    let next = payment
                        .transitioned(PaymentStatus::Failed, self.deps.clock.now())?
                        .with_provider_metadata(event.raw.clone());
                    self.apply(payment, next, PaymentEventType::Failed, source, serde_json::json!({ "reason": reason }))
                        .await
                }
                PaymentStatus::Failed => Ok(ReconcileOutcome::AlreadyApplied),
                _ => Ok(ReconcileOutcome::Ignored),
            },

            ProviderEventKind::Expired | ProviderEventKind::Cancelled => match payment.status {
                PaymentStatus::Pending => {
                    let next = payment
                        .transitioned(PaymentStatus::Cancelled, self.deps.clock.now())?
                        .with_provider_metadata(event.raw.clone());
                    self.apply(payment, next, PaymentEventType::Cancelled, source, serde_json::json!({ "reason": event.kind.as_str() }))
                        .await
                }
                PaymentStatus::Held => self.on_hold_released(payment, event, source).await,
                PaymentStatus::Paid if payment.capture_mode() == CaptureMode::Immediate => {
                    let now = self.deps.clock.now();
                    let next = payment
                        .transitioned(PaymentStatus::Cancelled, now)?
                        .with_refunded(payment.amount, now)
                        .with_provider_metadata(event.raw.clone());
                    self.apply(payment, next, PaymentEventType::Refunded, source, serde_json::json!({ "refunded_amount": payment.amount }))
                        .await
                }
                PaymentStatus::Cancelled | PaymentStatus::Failed | PaymentStatus::Refunded | PaymentStatus::PartiallyCaptured => {
                    Ok(ReconcileOutcome::AlreadyApplied)
                }
                PaymentStatus::Paid => Ok(ReconcileOutcome::Ignored),
            },

            ProviderEventKind::Refunded { amount } => match payment.status {
                PaymentStatus::Paid => {
                    let now = self.deps.clock.now();
                    let target = if amount.amount() >= payment.amount.amount() {
                        PaymentStatus::Cancelled
                    } else {
                        PaymentStatus::Refunded
                    };
                    let next = payment
                        .transitioned(target, now)?
                        .with_refunded(*amount, now)
                        .with_provider_metadata(event.raw.clone());
                    self.apply(payment, next, PaymentEventType::Refunded, source, serde_json::json!({ "refunded_amount": amount }))
                        .await
                }
                PaymentStatus::Refunded | PaymentStatus::Cancelled => Ok(ReconcileOutcome::AlreadyApplied),
                _ => Ok(ReconcileOutcome::Ignored),
            },
        }
    }

    async fn on_captured(
        &self,
        payment: &Payment,
        amount: Money,
        event: &ProviderEvent,
        source: EventSource,
    ) -> Result<ReconcileOutcome, PaymentError> {
        match payment.status {
            PaymentStatus::Pending => {
                if payment.capture_mode() == CaptureMode::Immediate && amount != payment.amount {
                    let alert = ReconciliationAlert::new(
                        AlertKind::AmountMismatch,
                        format!(
                            "provider charged {} but payment {} expects {}",
                            amount, payment.id, payment.amount
                        ),
                        self.deps.clock.now(),
                    )
                    .for_payment(payment);
                    let alert_id = self.deps.raise_alert(alert).await;
                    return Ok(ReconcileOutcome::ReconciliationRequired { alert_id });
                }
                let confirmation = Confirmation::Charged {
                    payment_key: event.payment_key.clone(),
                    amount,
                };
                Ok(self
                    .lifecycle
                    .apply_payment_confirmed(payment.id, confirmation, source, Some(event.raw.clone()))
                    .await?
                    .into())
            }
            // Capture made by this system whose local write was lost
            PaymentStatus::Held => {
                let target = if amount.amount() < payment.amount.amount() {
                    PaymentStatus::PartiallyCaptured
                } else {
                    PaymentStatus::Paid
                };
                let next = payment
                    .transitioned(target, self.deps.clock.now())?
                    .with_captured(amount)
                    .with_provider_metadata(event.raw.clone());
                self.apply(payment, next, PaymentEventType::Captured, source, serde_json::json!({ "captured_amount": amount }))
                    .await
            }
            PaymentStatus::Paid | PaymentStatus::PartiallyCaptured | PaymentStatus::Refunded => {
                Ok(ReconcileOutcome::AlreadyApplied)
            }
            PaymentStatus::Cancelled | PaymentStatus::Failed => Ok(self
                .lifecycle
                .apply_payment_confirmed(
                    payment.id,
                    Confirmation::Charged {
                        payment_key: event.payment_key.clone(),
                        amount,
                    },
                    source,
                    Some(event.raw.clone()),
                )
                .await?
                .into()),
        }
    }

    /// A hold the provider released or let lapse
    ///
    /// The payment is marked cancelled either way. If the booking still
    /// expects to be paid, nothing will capture it any more, so an alert is
    /// raised for the booking to be settled by hand.
    async fn on_hold_released(
        &self,
        payment: &Payment,
        event: &ProviderEvent,
        source: EventSource,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let next = payment
            .transitioned(PaymentStatus::Cancelled, self.deps.clock.now())?
            .with_provider_metadata(event.raw.clone());
        let outcome = self
            .apply(payment, next, PaymentEventType::Cancelled, source, serde_json::json!({ "reason": event.kind.as_str() }))
            .await?;
        if outcome != ReconcileOutcome::Applied {
            return Ok(outcome);
        }

        let booking = self.deps.load_booking(payment.booking_id).await?;
        if !matches!(
            booking.status,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress
        ) {
            return Ok(outcome);
        }
        let alert = ReconciliationAlert::new(
            AlertKind::HoldReleasedBeforeSettlement,
            format!(
                "provider reported {} for held payment {} while booking {} is {}",
                event.kind.as_str(),
                payment.id,
                booking.id,
                booking.status
            ),
            self.deps.clock.now(),
        )
        .for_payment(payment);
        let alert_id = self.deps.raise_alert(alert).await;
        Ok(ReconcileOutcome::ReconciliationRequired { alert_id })
    }

    /// Writes a webhook-driven transition guarded on the status read
    async fn apply(
        &self,
        current: &Payment,
        next: Payment,
        event_type: PaymentEventType,
        source: EventSource,
        metadata: serde_json::Value,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let event = PaymentEvent::new(
            current.id,
            event_type,
            Some(current.status),
            next.status,
            source,
            next.updated_at,
        )
        .with_metadata(metadata);
        match self
            .deps
            .payments
            .apply_transition(PaymentTransition {
                payment: next,
                expected: current.status,
                event,
                booking: None,
            })
            .await?
        {
            GuardedWrite::Applied(updated) => {
                tracing::info!(
                    payment_id = %updated.id,
                    from = %current.status,
                    to = %updated.status,
                    "Payment reconciled from webhook"
                );
                Ok(ReconcileOutcome::Applied)
            }
            GuardedWrite::PreconditionFailed => {
                tracing::debug!(payment_id = %current.id, "Payment changed concurrently; webhook is a no-op");
                Ok(ReconcileOutcome::AlreadyApplied)
            }
        }
    }
}

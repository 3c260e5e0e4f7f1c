//! Booking-payment state machine
//!
//! Maps booking transitions onto payment operations:
//!
//! ```text
//! create_payment      pending_payment        hold opened / order issued
//! confirm             pending_payment -> pending   hold authorized / charge captured
//! approve             pending -> confirmed    no money moves
//! start               confirmed -> in_progress
//! complete            -> completed            hold captured in full
//! reject              pending -> rejected     hold released / charge refunded
//! no_show             -> no_show              hold captured in full / no refund
//! ```
//!
//! Synchronous confirmation and webhooks both converge on
//! [`LifecycleService::apply_payment_confirmed`], so whichever arrives first
//! performs the transition and the other is a verified no-op.

use serde::{Deserialize, Serialize};

use core_kernel::{BookingId, GuardedWrite, Money, PaymentId};
use domain_booking::{Actor, Booking, BookingError, BookingKind, BookingStatus};

use crate::error::PaymentError;
use crate::event::{EventSource, PaymentEvent, PaymentEventType};
use crate::gateway::{ChargeRequest, HoldRequest, IntentStatus, RefundRequest};
use crate::payment::{idempotency_key, CaptureMode, Payment, PaymentProvider, PaymentStatus, ProviderRef};
use crate::ports::{
    AlertKind, BookingChange, Notification, NotificationKind, PaymentTransition,
    ReconciliationAlert, SupersedeOutcome, UnpaidCleanup,
};

use super::PaymentDeps;

/// Request to start paying for a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    /// Defaults to the configured provider
    pub provider: Option<PaymentProvider>,
    /// Must equal the booking's total price
    pub amount: Money,
    /// Shown to the customer at checkout
    pub order_name: String,
}

/// A newly opened payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub payment_id: PaymentId,
    pub provider: PaymentProvider,
    /// Intent id or order id, used by the client to complete checkout
    pub provider_order_ref: String,
    pub client_secret: Option<String>,
    pub amount: Money,
    /// Stale pending payments cancelled to make room for this one
    pub superseded: Vec<PaymentId>,
}

/// Client-side checkout result, for the immediate-capture provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub payment_key: Option<String>,
    pub amount: Option<Money>,
}

/// What the provider says happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// A manual-capture hold is in place
    Authorized,
    /// Funds were charged
    Charged {
        payment_key: Option<String>,
        amount: Money,
    },
}

impl Confirmation {
    fn target_status(&self) -> PaymentStatus {
        match self {
            Confirmation::Authorized => PaymentStatus::Held,
            Confirmation::Charged { .. } => PaymentStatus::Paid,
        }
    }
}

/// Result of applying a confirmation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// This call moved the payment out of `pending`
    Applied(Payment),
    /// Already confirmed; nothing written
    AlreadyApplied(Payment),
    /// Confirmation arrived for a payment no longer active
    ReconciliationRequired {
        payment: Payment,
        alert_id: core_kernel::AlertId,
    },
}

impl ConfirmOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            ConfirmOutcome::Applied(p)
            | ConfirmOutcome::AlreadyApplied(p)
            | ConfirmOutcome::ReconciliationRequired { payment: p, .. } => p,
        }
    }
}

/// Result of a capture or settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub payment_id: PaymentId,
    pub captured_amount: Money,
    pub status: PaymentStatus,
    /// No provider call was made because funds were already captured
    pub already_captured: bool,
}

/// Result of a trainer rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionResult {
    pub booking_id: BookingId,
    pub payment_id: Option<PaymentId>,
    /// Released or refunded to the customer
    pub refund_amount: Money,
}

/// Drives booking transitions that involve payments
#[derive(Clone)]
pub struct LifecycleService {
    deps: PaymentDeps,
}

impl LifecycleService {
    pub fn new(deps: PaymentDeps) -> Self {
        Self { deps }
    }

    /// Opens a payment for a booking awaiting payment
    ///
    /// The provider hold is created before anything is written, so a
    /// provider failure leaves no trace locally. Any pending payment for
    /// the booking is cancelled in the same transaction that inserts the new
    /// one.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller owns the booking, `InvalidState` if the
    /// booking is not awaiting payment, its window has closed, or it is
    /// already paid.
    pub async fn create_payment(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_pay(&booking)?;

        if booking.status != BookingStatus::PendingPayment {
            return Err(PaymentError::invalid_state(format!(
                "booking is {} and no longer awaits payment",
                booking.status
            )));
        }
        let now = self.deps.clock.now();
        if self.deps.windows.is_expired(&booking, now) {
            return Err(BookingError::PaymentWindowExpired {
                deadline: self.deps.windows.deadline(&booking).to_rfc3339(),
            }
            .into());
        }
        if request.amount != booking.total_price {
            return Err(PaymentError::Validation(format!(
                "amount {} does not match the booking price {}",
                request.amount, booking.total_price
            )));
        }
        if let Some(active) = self.deps.payments.find_active_payment(booking_id).await? {
            if active.status != PaymentStatus::Pending {
                return Err(PaymentError::invalid_state(format!(
                    "booking already has a {} payment",
                    active.status
                )));
            }
        }

        let provider = request.provider.unwrap_or(self.deps.gateways.default_provider);
        let payment_id = PaymentId::new_v7();
        let (provider_ref, raw) = match provider.capture_mode() {
            CaptureMode::Manual => {
                let hold = self
                    .deps
                    .gateways
                    .manual
                    .create_hold(HoldRequest {
                        payment_id,
                        booking_id,
                        amount: booking.total_price,
                        description: request.order_name.clone(),
                        idempotency_key: idempotency_key(payment_id, "create"),
                    })
                    .await?;
                (
                    ProviderRef::ManualCapture {
                        intent_id: hold.intent_id,
                        client_secret: hold.client_secret,
                    },
                    hold.raw,
                )
            }
            CaptureMode::Immediate => (
                ProviderRef::ImmediateCapture {
                    order_id: payment_id.as_uuid().to_string(),
                    payment_key: None,
                },
                serde_json::Value::Null,
            ),
        };

        let payment = Payment::new(payment_id, &booking, provider, provider_ref, now)
            .with_provider_metadata(raw);
        let created = PaymentEvent::new(
            payment.id,
            PaymentEventType::Created,
            None,
            PaymentStatus::Pending,
            EventSource::Api,
            now,
        )
        .with_metadata(serde_json::json!({
            "amount": payment.amount,
            "provider": provider,
            "order_name": request.order_name,
            "correlation_key": payment.correlation_key(),
        }));

        match self.deps.payments.insert_superseding(&payment, &created, now).await {
            Ok(SupersedeOutcome::Inserted { superseded }) => {
                for stale in &superseded {
                    self.release_stale(stale).await;
                }
                tracing::info!(
                    booking_id = %booking_id,
                    payment_id = %payment.id,
                    provider = %provider,
                    superseded = superseded.len(),
                    "Payment created"
                );
                Ok(PaymentCreated {
                    payment_id: payment.id,
                    provider,
                    provider_order_ref: payment.correlation_key().to_string(),
                    client_secret: match &payment.provider_ref {
                        ProviderRef::ManualCapture { client_secret, .. } => client_secret.clone(),
                        ProviderRef::ImmediateCapture { .. } => None,
                    },
                    amount: payment.amount,
                    superseded: superseded.iter().map(|p| p.id).collect(),
                })
            }
            Ok(SupersedeOutcome::ActivePaymentExists(active)) => {
                self.release_stale(&payment).await;
                Err(PaymentError::invalid_state(format!(
                    "booking already has a {} payment",
                    active.status
                )))
            }
            Err(e) => {
                self.release_stale(&payment).await;
                Err(e.into())
            }
        }
    }

    /// Confirms a payment from the customer's checkout redirect
    ///
    /// For the manual-capture provider the intent is read back from the
    /// provider; for the immediate-capture provider the charge is confirmed
    /// here after checking the amount the client reports.
    pub async fn confirm_payment(
        &self,
        actor: &Actor,
        payment_id: PaymentId,
        request: ConfirmRequest,
    ) -> Result<ConfirmOutcome, PaymentError> {
        let payment = self.deps.load_payment(payment_id).await?;
        let booking = self.deps.load_booking(payment.booking_id).await?;
        actor.ensure_can_pay(&booking)?;

        match payment.status {
            PaymentStatus::Held | PaymentStatus::Paid | PaymentStatus::PartiallyCaptured => {
                return Ok(ConfirmOutcome::AlreadyApplied(payment));
            }
            PaymentStatus::Pending => {}
            other => {
                return Err(PaymentError::invalid_state(format!(
                    "payment is {} and cannot be confirmed",
                    other
                )));
            }
        }

        let outcome = match &payment.provider_ref {
            ProviderRef::ManualCapture { intent_id, .. } => {
                let snapshot = self.deps.gateways.manual.retrieve(intent_id).await?;
                let confirmation = match snapshot.status {
                    IntentStatus::RequiresCapture => Confirmation::Authorized,
                    IntentStatus::Succeeded => Confirmation::Charged {
                        payment_key: None,
                        amount: snapshot.amount_received,
                    },
                    other => {
                        return Err(PaymentError::invalid_state(format!(
                            "authorization has not completed (intent is {:?})",
                            other
                        )));
                    }
                };
                self.apply_payment_confirmed(payment.id, confirmation, EventSource::Api, Some(snapshot.raw))
                    .await?
            }
            ProviderRef::ImmediateCapture { order_id, .. } => {
                let payment_key = request
                    .payment_key
                    .ok_or_else(|| PaymentError::Validation("payment_key is required".to_string()))?;
                let amount = request
                    .amount
                    .ok_or_else(|| PaymentError::Validation("amount is required".to_string()))?;
                if amount != payment.amount {
                    tracing::warn!(
                        payment_id = %payment.id,
                        expected = %payment.amount,
                        reported = %amount,
                        "Confirmation amount does not match payment"
                    );
                    return Err(PaymentError::Validation(
                        "confirmed amount does not match the payment amount".to_string(),
                    ));
                }

                let receipt = self
                    .deps
                    .gateways
                    .immediate
                    .confirm_charge(ChargeRequest {
                        payment_key,
                        order_id: order_id.clone(),
                        amount,
                        idempotency_key: payment.idempotency_key("confirm"),
                    })
                    .await?;

                let confirmation = Confirmation::Charged {
                    payment_key: Some(receipt.payment_key.clone()),
                    amount: receipt.approved_amount,
                };
                match self
                    .apply_payment_confirmed(payment.id, confirmation, EventSource::Api, Some(receipt.raw))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let detail = format!("charge confirmed at the provider but not recorded: {}", e);
                        let alert = ReconciliationAlert::new(
                            AlertKind::PersistenceFailed,
                            detail.clone(),
                            self.deps.clock.now(),
                        )
                        .for_payment(&payment);
                        let alert_id = self.deps.raise_alert(alert).await;
                        return Err(PaymentError::ReconciliationRequired {
                            alert_id,
                            message: detail,
                        });
                    }
                }
            }
        };

        match outcome {
            ConfirmOutcome::ReconciliationRequired { alert_id, .. } => {
                Err(PaymentError::ReconciliationRequired {
                    alert_id,
                    message: "payment was confirmed after it had been superseded".to_string(),
                })
            }
            other => Ok(other),
        }
    }

    /// Moves a pending payment to held or paid
    ///
    /// Idempotent: a payment already in (or past) the target status is left
    /// alone. The booking leaves `pending_payment` in the same unit of work,
    /// and the trainer notification or matching request fires only when this
    /// call performed the transition.
    pub async fn apply_payment_confirmed(
        &self,
        payment_id: PaymentId,
        confirmation: Confirmation,
        source: EventSource,
        raw: Option<serde_json::Value>,
    ) -> Result<ConfirmOutcome, PaymentError> {
        let payment = self.deps.load_payment(payment_id).await?;
        if let Some(outcome) = self.classify_confirmed(&payment, &source).await {
            return Ok(outcome);
        }

        let now = self.deps.clock.now();
        let target = confirmation.target_status();
        let mut next = payment.transitioned(target, now)?;
        if let Confirmation::Charged { payment_key, amount } = &confirmation {
            next = next.with_captured(*amount);
            if let (ProviderRef::ImmediateCapture { payment_key: slot, .. }, Some(key)) =
                (&mut next.provider_ref, payment_key)
            {
                *slot = Some(key.clone());
            }
        }
        if let Some(raw) = raw {
            next = next.with_provider_metadata(raw);
        }

        let booking = self.deps.load_booking(payment.booking_id).await?;
        let booking_change = if booking.status == BookingStatus::PendingPayment {
            let mut paid = booking.clone();
            paid.transition_to(BookingStatus::Pending, now)?;
            Some(BookingChange {
                booking: paid,
                expected: BookingStatus::PendingPayment,
            })
        } else {
            None
        };

        let event = PaymentEvent::new(
            payment.id,
            PaymentEventType::Confirmed,
            Some(PaymentStatus::Pending),
            target,
            source.clone(),
            now,
        )
        .with_metadata(serde_json::json!({
            "captured_amount": next.captured_amount,
            "webhook_event_id": source.webhook_event_id(),
        }));

        let write = self
            .deps
            .payments
            .apply_transition(PaymentTransition {
                payment: next,
                expected: PaymentStatus::Pending,
                event,
                booking: booking_change.clone(),
            })
            .await?;

        match write {
            GuardedWrite::Applied(updated) => {
                tracing::info!(
                    payment_id = %updated.id,
                    booking_id = %updated.booking_id,
                    status = %updated.status,
                    source = ?source,
                    "Payment confirmed"
                );
                if let Some(change) = booking_change {
                    self.after_payment_confirmed(&change.booking).await;
                }
                Ok(ConfirmOutcome::Applied(updated))
            }
            GuardedWrite::PreconditionFailed => {
                let current = self.deps.load_payment(payment_id).await?;
                match self.classify_confirmed(&current, &source).await {
                    Some(outcome) => Ok(outcome),
                    None => Err(PaymentError::invalid_state(
                        "booking changed while the payment was being confirmed",
                    )),
                }
            }
        }
    }

    /// Outcome for a payment that is no longer pending, or `None` if it is
    async fn classify_confirmed(
        &self,
        payment: &Payment,
        source: &EventSource,
    ) -> Option<ConfirmOutcome> {
        match payment.status {
            PaymentStatus::Pending => None,
            PaymentStatus::Held | PaymentStatus::Paid | PaymentStatus::PartiallyCaptured | PaymentStatus::Refunded => {
                Some(ConfirmOutcome::AlreadyApplied(payment.clone()))
            }
            PaymentStatus::Cancelled | PaymentStatus::Failed => {
                // A payment that was confirmed before being released is just a late event
                if payment.confirmed_at.is_some() {
                    return Some(ConfirmOutcome::AlreadyApplied(payment.clone()));
                }
                let alert = ReconciliationAlert::new(
                    AlertKind::ConfirmationOnInactivePayment,
                    format!(
                        "provider confirmed payment {} which is locally {} ({:?})",
                        payment.id, payment.status, source
                    ),
                    self.deps.clock.now(),
                )
                .for_payment(payment);
                let alert_id = self.deps.raise_alert(alert).await;
                Some(ConfirmOutcome::ReconciliationRequired {
                    payment: payment.clone(),
                    alert_id,
                })
            }
        }
    }

    async fn after_payment_confirmed(&self, booking: &Booking) {
        match booking.kind {
            BookingKind::Direct => {
                if let Some(trainer_id) = booking.trainer_id {
                    self.deps
                        .notify(Notification {
                            user_id: trainer_id,
                            title: "New booking request".to_string(),
                            message: "A customer has paid for a session. Please review and approve it.".to_string(),
                            kind: NotificationKind::BookingRequest,
                            link: Some(format!("/trainer/bookings/{}", booking.id.as_uuid())),
                        })
                        .await;
                }
            }
            BookingKind::Recommended => {
                if let Err(e) = self.deps.matcher.request_matching(booking.id).await {
                    tracing::warn!(booking_id = %booking.id, error = %e, "Matching request failed");
                }
            }
        }
    }

    /// Trainer approval: `pending -> confirmed`
    ///
    /// Requires a held or charged payment; no money moves.
    pub async fn approve(&self, actor: &Actor, booking_id: BookingId) -> Result<Booking, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_manage(&booking)?;
        if booking.status != BookingStatus::Pending {
            return Err(PaymentError::invalid_state(format!(
                "booking is {}; only pending bookings can be approved",
                booking.status
            )));
        }
        let payment = self.deps.payments.find_active_payment(booking_id).await?;
        match payment {
            Some(p) if p.status.is_secured() => {}
            Some(p) => {
                return Err(PaymentError::invalid_state(format!(
                    "payment is {} and not yet confirmed",
                    p.status
                )));
            }
            None => return Err(PaymentError::invalid_state("booking has no confirmed payment")),
        }

        let now = self.deps.clock.now();
        let mut confirmed = booking.clone();
        confirmed.transition_to(BookingStatus::Confirmed, now)?;
        let updated = self.write_booking(confirmed, BookingStatus::Pending).await?;

        self.deps
            .notify(Notification {
                user_id: updated.customer_id,
                title: "Booking confirmed".to_string(),
                message: "Your trainer has approved the session.".to_string(),
                kind: NotificationKind::BookingConfirmed,
                link: Some(format!("/bookings/{}", updated.id.as_uuid())),
            })
            .await;
        Ok(updated)
    }

    /// Session start: `confirmed -> in_progress`
    pub async fn start(&self, actor: &Actor, booking_id: BookingId) -> Result<Booking, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_manage(&booking)?;
        let mut started = booking.clone();
        started.transition_to(BookingStatus::InProgress, self.deps.clock.now())?;
        self.write_booking(started, booking.status).await
    }

    /// Trainer rejection: `pending -> rejected`
    ///
    /// Releases the hold or refunds the charge in full; no fee is taken.
    pub async fn reject(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        reason: Option<String>,
    ) -> Result<RejectionResult, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_manage(&booking)?;
        if !booking.status.can_transition_to(BookingStatus::Rejected) {
            return Err(PaymentError::invalid_state(format!(
                "booking is {}; only pending bookings can be rejected",
                booking.status
            )));
        }

        let now = self.deps.clock.now();
        let mut rejected = booking.clone();
        rejected.reject(reason.clone(), now)?;
        let change = BookingChange {
            booking: rejected,
            expected: booking.status,
        };

        let Some(payment) = self.deps.payments.find_active_payment(booking_id).await? else {
            self.write_booking(change.booking, change.expected).await?;
            return Ok(RejectionResult {
                booking_id,
                payment_id: None,
                refund_amount: Money::zero(booking.total_price.currency()),
            });
        };

        let next = match (&payment.provider_ref, payment.status) {
            (ProviderRef::ManualCapture { intent_id, .. }, PaymentStatus::Held) => {
                let release = self
                    .deps
                    .gateways
                    .manual
                    .cancel_hold(intent_id, &payment.idempotency_key("cancel"))
                    .await?;
                tracing::debug!(payment_id = %payment.id, release = ?release, "Hold released on rejection");
                payment.transitioned(PaymentStatus::Cancelled, now)?
            }
            (ProviderRef::ImmediateCapture { .. }, PaymentStatus::Paid) => {
                let payment_key = payment.provider_ref.payment_key().ok_or_else(|| {
                    PaymentError::invalid_state("charged payment has no payment key")
                })?;
                let receipt = self
                    .deps
                    .gateways
                    .immediate
                    .refund(RefundRequest {
                        payment_key: payment_key.to_string(),
                        amount: payment.amount,
                        reason: "Booking rejected by trainer".to_string(),
                        idempotency_key: payment.idempotency_key("refund"),
                    })
                    .await?;
                payment
                    .transitioned(PaymentStatus::Cancelled, now)?
                    .with_refunded(receipt.refunded_amount, now)
                    .with_provider_metadata(receipt.raw)
            }
            (_, status) => {
                return Err(PaymentError::invalid_state(format!(
                    "payment is {} and cannot be released",
                    status
                )));
            }
        };

        let event = PaymentEvent::new(
            payment.id,
            PaymentEventType::Cancelled,
            Some(payment.status),
            PaymentStatus::Cancelled,
            EventSource::Api,
            now,
        )
        .with_metadata(serde_json::json!({
            "branch": "rejected",
            "actor": actor,
            "reason": reason,
            "refund_amount": payment.amount,
        }));
        let updated = self
            .deps
            .commit_after_provider(
                PaymentTransition {
                    payment: next,
                    expected: payment.status,
                    event,
                    booking: Some(change),
                },
                "rejection release",
            )
            .await?;

        tracing::info!(booking_id = %booking_id, payment_id = %updated.id, "Booking rejected");
        self.deps
            .notify(Notification {
                user_id: booking.customer_id,
                title: "Booking declined".to_string(),
                message: format!(
                    "Your trainer could not take this session. {} has been returned in full.",
                    payment.amount
                ),
                kind: NotificationKind::BookingRejected,
                link: Some(format!("/bookings/{}", booking_id.as_uuid())),
            })
            .await;

        Ok(RejectionResult {
            booking_id,
            payment_id: Some(updated.id),
            refund_amount: payment.amount,
        })
    }

    /// Service completion: captures the hold in full
    pub async fn complete(&self, actor: &Actor, booking_id: BookingId) -> Result<CaptureResult, PaymentError> {
        let result = self
            .settle_booking(actor, booking_id, BookingStatus::Completed, "completed")
            .await?;
        if let Ok(booking) = self.deps.load_booking(booking_id).await {
            self.deps
                .notify(Notification {
                    user_id: booking.customer_id,
                    title: "Session completed".to_string(),
                    message: "Thank you for your session. Your payment has been settled.".to_string(),
                    kind: NotificationKind::BookingCompleted,
                    link: Some(format!("/bookings/{}", booking_id.as_uuid())),
                })
                .await;
        }
        Ok(result)
    }

    /// Customer did not attend: forfeits the full amount
    pub async fn no_show(&self, actor: &Actor, booking_id: BookingId) -> Result<CaptureResult, PaymentError> {
        let result = self
            .settle_booking(actor, booking_id, BookingStatus::NoShow, "no_show")
            .await?;
        if let Ok(booking) = self.deps.load_booking(booking_id).await {
            self.deps
                .notify(Notification {
                    user_id: booking.customer_id,
                    title: "Missed session".to_string(),
                    message: "You were marked as absent. The session fee is not refundable.".to_string(),
                    kind: NotificationKind::NoShow,
                    link: Some(format!("/bookings/{}", booking_id.as_uuid())),
                })
                .await;
        }
        Ok(result)
    }

    /// Capture entry point for the completion flow
    ///
    /// A confirmed or in-progress booking is moved to `Completed` together
    /// with the capture; a completed booking only has its payment captured.
    /// Any other booking status is refused before the provider is called.
    /// Short-circuits with `already_captured` instead of calling the
    /// provider a second time.
    pub async fn capture(&self, actor: &Actor, payment_id: PaymentId) -> Result<CaptureResult, PaymentError> {
        let payment = self.deps.load_payment(payment_id).await?;
        let booking = self.deps.load_booking(payment.booking_id).await?;
        actor.ensure_can_manage(&booking)?;
        match booking.status {
            BookingStatus::Confirmed | BookingStatus::InProgress => {
                let mut completed = booking.clone();
                completed.transition_to(BookingStatus::Completed, self.deps.clock.now())?;
                let change = BookingChange {
                    booking: completed,
                    expected: booking.status,
                };
                self.capture_in_full(&payment, Some(change), "completed").await
            }
            BookingStatus::Completed => self.capture_in_full(&payment, None, "capture").await,
            status => Err(PaymentError::invalid_state(format!(
                "booking is {}; payment is captured only when the session is completed",
                status
            ))),
        }
    }

    /// Deletes a booking whose payment window lapsed without payment
    pub async fn expire_unpaid(
        &self,
        actor: &Actor,
        booking_id: BookingId,
    ) -> Result<UnpaidCleanup, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_expire(&booking)?;
        if booking.status != BookingStatus::PendingPayment {
            return Err(PaymentError::invalid_state(format!(
                "booking is {}; only unpaid bookings expire",
                booking.status
            )));
        }
        let now = self.deps.clock.now();
        if !self.deps.windows.is_expired(&booking, now) {
            return Err(PaymentError::invalid_state(format!(
                "payment window is open until {}",
                self.deps.windows.deadline(&booking).to_rfc3339()
            )));
        }

        match self.deps.bookings.delete_unpaid_booking(booking_id).await? {
            GuardedWrite::Applied(cleanup) => {
                for payment in cleanup
                    .deleted_payments
                    .iter()
                    .filter(|p| p.status == PaymentStatus::Pending)
                {
                    self.release_stale(payment).await;
                }
                tracing::info!(
                    booking_id = %booking_id,
                    deleted_payments = cleanup.deleted_payments.len(),
                    "Expired unpaid booking removed"
                );
                Ok(cleanup)
            }
            GuardedWrite::PreconditionFailed => Err(PaymentError::invalid_state(
                "booking has an authorized payment and cannot be deleted",
            )),
        }
    }

    async fn settle_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        target: BookingStatus,
        reason: &str,
    ) -> Result<CaptureResult, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_manage(&booking)?;
        if !booking.status.can_transition_to(target) {
            return Err(PaymentError::invalid_state(format!(
                "booking is {} and cannot move to {}",
                booking.status, target
            )));
        }
        let payment = self
            .deps
            .payments
            .find_active_payment(booking_id)
            .await?
            .ok_or_else(|| PaymentError::invalid_state("booking has no payment to settle"))?;

        let mut settled = booking.clone();
        settled.transition_to(target, self.deps.clock.now())?;
        self.capture_in_full(
            &payment,
            Some(BookingChange {
                booking: settled,
                expected: booking.status,
            }),
            reason,
        )
        .await
    }

    /// Captures a held payment in full, optionally moving the booking with it
    async fn capture_in_full(
        &self,
        payment: &Payment,
        booking_change: Option<BookingChange>,
        reason: &str,
    ) -> Result<CaptureResult, PaymentError> {
        match (payment.capture_mode(), payment.status) {
            (_, status) if status.is_captured() => {
                self.settle_without_capture(payment, booking_change).await
            }
            (CaptureMode::Manual, PaymentStatus::Held) => {
                let intent_id = payment
                    .provider_ref
                    .intent_id()
                    .ok_or_else(|| PaymentError::invalid_state("held payment has no intent"))?;
                let receipt = self
                    .deps
                    .gateways
                    .manual
                    .capture_full(intent_id, &payment.idempotency_key("capture"))
                    .await?;

                let now = self.deps.clock.now();
                let next = payment
                    .transitioned(PaymentStatus::Paid, now)?
                    .with_captured(receipt.captured_amount)
                    .with_provider_metadata(receipt.raw);
                let event = PaymentEvent::new(
                    payment.id,
                    PaymentEventType::Captured,
                    Some(PaymentStatus::Held),
                    PaymentStatus::Paid,
                    EventSource::Api,
                    now,
                )
                .with_metadata(serde_json::json!({
                    "captured_amount": receipt.captured_amount,
                    "reason": reason,
                }));

                let transition = PaymentTransition {
                    payment: next,
                    expected: PaymentStatus::Held,
                    event,
                    booking: booking_change.clone(),
                };
                let updated = match self.deps.payments.apply_transition(transition.clone()).await {
                    Ok(GuardedWrite::Applied(updated)) => updated,
                    Ok(GuardedWrite::PreconditionFailed) => {
                        // A concurrent capture with the same idempotency key won the guard
                        let current = self.deps.load_payment(payment.id).await?;
                        if current.status.is_captured() {
                            return self.settle_without_capture(&current, booking_change).await;
                        }
                        self.deps.commit_after_provider(transition, "capture").await?
                    }
                    Err(e) => {
                        tracing::warn!(payment_id = %payment.id, error = %e, "Capture write failed, retrying once");
                        self.deps.commit_after_provider(transition, "capture").await?
                    }
                };
                tracing::info!(
                    payment_id = %updated.id,
                    captured = %updated.captured_amount,
                    reason,
                    "Payment captured"
                );
                Ok(CaptureResult {
                    payment_id: updated.id,
                    captured_amount: updated.captured_amount,
                    status: updated.status,
                    already_captured: false,
                })
            }
            (CaptureMode::Immediate, PaymentStatus::Paid) => {
                self.settle_without_capture(payment, booking_change).await
            }
            (_, status) => Err(PaymentError::invalid_state(format!(
                "payment is {} and cannot be captured",
                status
            ))),
        }
    }

    /// Funds are already captured; only the booking moves
    async fn settle_without_capture(
        &self,
        payment: &Payment,
        booking_change: Option<BookingChange>,
    ) -> Result<CaptureResult, PaymentError> {
        if let Some(change) = booking_change {
            self.write_booking(change.booking, change.expected).await?;
        }
        Ok(CaptureResult {
            payment_id: payment.id,
            captured_amount: payment.captured_amount,
            status: payment.status,
            already_captured: true,
        })
    }

    async fn write_booking(
        &self,
        booking: Booking,
        expected: BookingStatus,
    ) -> Result<Booking, PaymentError> {
        match self
            .deps
            .bookings
            .update_booking(BookingChange { booking, expected })
            .await?
        {
            GuardedWrite::Applied(updated) => Ok(updated),
            GuardedWrite::PreconditionFailed => Err(PaymentError::invalid_state(
                "booking was modified by another request",
            )),
        }
    }

    /// Best-effort release of a superseded or orphaned hold
    async fn release_stale(&self, payment: &Payment) {
        let Some(intent_id) = payment.provider_ref.intent_id() else {
            return;
        };
        match self
            .deps
            .gateways
            .manual
            .cancel_hold(intent_id, &payment.idempotency_key("cancel"))
            .await
        {
            Ok(release) => {
                tracing::debug!(payment_id = %payment.id, release = ?release, "Stale hold released")
            }
            Err(e) => tracing::warn!(
                payment_id = %payment.id,
                intent_id,
                error = %e,
                "Failed to release stale hold"
            ),
        }
    }
}

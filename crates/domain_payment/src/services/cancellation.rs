//! Fee-bearing cancellation
//!
//! The fee schedule decides how much of the payment is kept; the provider's
//! capture mode decides how that is executed:
//!
//! | | fee 0 | 0 < fee < total | fee = total |
//! |---|---|---|---|
//! | manual capture (held) | release hold | capture fee only | capture in full |
//! | immediate capture (paid) | refund in full | refund total - fee | keep, no call |
//!
//! Every refusal happens before the provider call. Once the provider has
//! moved money, a failed write becomes a reconciliation alert rather than an
//! ordinary error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{BookingId, GuardedWrite, Money, PaymentId};
use domain_booking::{Actor, Booking, BookingStatus};

use crate::error::PaymentError;
use crate::event::{EventSource, PaymentEvent, PaymentEventType};
use crate::fee::{cancellation_fee, CancellationFee};
use crate::gateway::RefundRequest;
use crate::payment::{CaptureMode, Payment, PaymentStatus};
use crate::ports::{BookingChange, Notification, NotificationKind, PaymentTransition};

use super::PaymentDeps;

/// Cancellation input from the customer or an admin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Which settlement path a cancellation took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationBranch {
    /// Payment was never authorized
    NothingToRelease,
    HoldReleased,
    PartialCapture,
    FullCapture,
    FullRefund,
    PartialRefund,
    /// Immediate charge kept in full; no provider call
    FeeRetained,
}

impl CancellationBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationBranch::NothingToRelease => "nothing_to_release",
            CancellationBranch::HoldReleased => "hold_released",
            CancellationBranch::PartialCapture => "partial_capture",
            CancellationBranch::FullCapture => "full_capture",
            CancellationBranch::FullRefund => "full_refund",
            CancellationBranch::PartialRefund => "partial_refund",
            CancellationBranch::FeeRetained => "fee_retained",
        }
    }

    fn calls_provider(&self) -> bool {
        !matches!(
            self,
            CancellationBranch::NothingToRelease | CancellationBranch::FeeRetained
        )
    }
}

/// Outcome of a completed cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
    /// Full fee computation, as evaluated at cancellation time
    pub fee: CancellationFee,
    /// Released or refunded to the customer
    pub refund_amount: Money,
    /// Kept as the cancellation fee
    pub fee_amount: Money,
    pub branch: CancellationBranch,
    /// User-facing summary of what happened to the money
    pub message: String,
}

/// Cancels bookings and settles their payments per the fee schedule
#[derive(Clone)]
pub struct CancellationService {
    deps: PaymentDeps,
}

impl CancellationService {
    pub fn new(deps: PaymentDeps) -> Self {
        Self { deps }
    }

    /// Previews the fee a cancellation would incur right now
    pub async fn quote(&self, actor: &Actor, booking_id: BookingId) -> Result<CancellationFee, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_cancel(&booking)?;
        let total = match self.deps.payments.find_active_payment(booking_id).await? {
            Some(payment) => payment.amount,
            None => booking.total_price,
        };
        Ok(cancellation_fee(booking.scheduled_at, total, self.deps.clock.now()))
    }

    /// Cancels a booking, settling its payment per the fee schedule
    ///
    /// # Errors
    ///
    /// - `Forbidden` unless the caller owns the booking or is an admin
    /// - `NotFound` if the booking or its active payment is missing
    /// - `InvalidState` if the booking is already completed or cancelled
    /// - `CannotCancel` once the session has started
    /// - `Provider` / `AmountExceedsHold` if the provider call fails; nothing
    ///   is written in that case
    /// - `ReconciliationRequired` if the provider call succeeded but the
    ///   result could not be recorded
    pub async fn cancel_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        request: CancelRequest,
    ) -> Result<CancellationResult, PaymentError> {
        let booking = self.deps.load_booking(booking_id).await?;
        actor.ensure_can_cancel(&booking)?;

        // A cancelled booking has no active payment left, so the status is
        // checked before the payment lookup.
        match booking.status {
            BookingStatus::Completed => {
                return Err(PaymentError::invalid_state("completed bookings cannot be cancelled"))
            }
            BookingStatus::Cancelled => {
                return Err(PaymentError::invalid_state("booking is already cancelled"))
            }
            status if !status.can_transition_to(BookingStatus::Cancelled) => {
                return Err(PaymentError::invalid_state(format!(
                    "booking is {} and cannot be cancelled",
                    status
                )))
            }
            _ => {}
        }

        let payment = self
            .deps
            .payments
            .find_active_payment(booking_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("payment for booking", booking_id))?;

        let now = self.deps.clock.now();
        let fee = cancellation_fee(booking.scheduled_at, payment.amount, now);
        if !fee.can_cancel {
            return Err(PaymentError::CannotCancel {
                reason: fee.reason.clone().unwrap_or_else(|| fee.tier.describe().to_string()),
            });
        }

        let branch = choose_branch(&payment, &fee)?;
        tracing::info!(
            booking_id = %booking_id,
            payment_id = %payment.id,
            provider = %payment.provider,
            tier = ?fee.tier,
            fee = %fee.fee_amount,
            refund = %fee.refund_amount,
            branch = branch.as_str(),
            "Cancelling booking"
        );

        let mut cancelled = booking.clone();
        cancelled.cancel(request.reason.clone(), now)?;

        let settled = self.execute(&payment, &fee, branch, now).await?;
        let (fee_amount, refund_amount) = settled_amounts(&payment, &fee, branch);

        let event = PaymentEvent::new(
            payment.id,
            PaymentEventType::Cancelled,
            Some(payment.status),
            settled.status,
            EventSource::Api,
            now,
        )
        .with_metadata(audit_metadata(&booking, &payment, &fee, branch, actor, &request, now));

        let transition = PaymentTransition {
            payment: settled.with_cancellation(fee.clone()),
            expected: payment.status,
            event,
            booking: Some(BookingChange {
                booking: cancelled,
                expected: booking.status,
            }),
        };

        let updated = if branch.calls_provider() {
            self.deps
                .commit_after_provider(transition, &format!("cancellation {}", branch.as_str()))
                .await?
        } else {
            match self.deps.payments.apply_transition(transition).await? {
                GuardedWrite::Applied(updated) => updated,
                GuardedWrite::PreconditionFailed => {
                    return Err(PaymentError::invalid_state(
                        "booking or payment changed during cancellation; please retry",
                    ))
                }
            }
        };

        if branch == CancellationBranch::NothingToRelease {
            self.release_unauthorized(&payment).await;
        }

        tracing::info!(
            booking_id = %booking_id,
            payment_id = %updated.id,
            status = %updated.status,
            branch = branch.as_str(),
            "Booking cancelled"
        );
        self.notify_counterparties(actor, &booking, request.reason.as_deref()).await;

        Ok(CancellationResult {
            booking_id,
            payment_id: updated.id,
            fee,
            refund_amount,
            fee_amount,
            branch,
            message: branch_message(branch, fee_amount, refund_amount),
        })
    }

    /// Performs the provider call for `branch` and returns the payment as it
    /// should be recorded
    async fn execute(
        &self,
        payment: &Payment,
        fee: &CancellationFee,
        branch: CancellationBranch,
        now: DateTime<Utc>,
    ) -> Result<Payment, PaymentError> {
        let intent_id = || {
            payment
                .provider_ref
                .intent_id()
                .ok_or_else(|| PaymentError::invalid_state("held payment has no intent"))
        };
        let payment_key = || {
            payment
                .provider_ref
                .payment_key()
                .map(str::to_string)
                .ok_or_else(|| PaymentError::invalid_state("charged payment has no payment key"))
        };

        match branch {
            CancellationBranch::NothingToRelease => Ok(payment.transitioned(PaymentStatus::Cancelled, now)?),
            CancellationBranch::FeeRetained => Ok(payment.transitioned(PaymentStatus::Paid, now)?),
            CancellationBranch::HoldReleased => {
                let release = self
                    .deps
                    .gateways
                    .manual
                    .cancel_hold(intent_id()?, &payment.idempotency_key("cancel"))
                    .await?;
                tracing::debug!(payment_id = %payment.id, release = ?release, "Hold released");
                Ok(payment.transitioned(PaymentStatus::Cancelled, now)?)
            }
            CancellationBranch::FullCapture => {
                let receipt = self
                    .deps
                    .gateways
                    .manual
                    .capture_full(intent_id()?, &payment.idempotency_key("capture"))
                    .await?;
                Ok(payment
                    .transitioned(PaymentStatus::Paid, now)?
                    .with_captured(receipt.captured_amount)
                    .with_provider_metadata(receipt.raw))
            }
            CancellationBranch::PartialCapture => {
                let receipt = self
                    .deps
                    .gateways
                    .manual
                    .capture_partial(intent_id()?, fee.fee_amount, &payment.idempotency_key("capture"))
                    .await?;
                Ok(payment
                    .transitioned(PaymentStatus::PartiallyCaptured, now)?
                    .with_captured(receipt.captured_amount)
                    .with_provider_metadata(receipt.raw))
            }
            CancellationBranch::FullRefund | CancellationBranch::PartialRefund => {
                let receipt = self
                    .deps
                    .gateways
                    .immediate
                    .refund(RefundRequest {
                        payment_key: payment_key()?,
                        amount: fee.refund_amount,
                        reason: format!("Booking cancelled ({})", fee.tier.describe()),
                        idempotency_key: payment.idempotency_key("refund"),
                    })
                    .await?;
                let target = if branch == CancellationBranch::FullRefund {
                    PaymentStatus::Cancelled
                } else {
                    PaymentStatus::Refunded
                };
                Ok(payment
                    .transitioned(target, now)?
                    .with_refunded(receipt.refunded_amount, now)
                    .with_provider_metadata(receipt.raw))
            }
        }
    }

    /// Best-effort release of a never-authorized intent
    async fn release_unauthorized(&self, payment: &Payment) {
        if let Some(intent_id) = payment.provider_ref.intent_id() {
            if let Err(e) = self
                .deps
                .gateways
                .manual
                .cancel_hold(intent_id, &payment.idempotency_key("cancel"))
                .await
            {
                tracing::warn!(payment_id = %payment.id, error = %e, "Failed to cancel unauthorized intent");
            }
        }
    }

    async fn notify_counterparties(&self, actor: &Actor, booking: &Booking, reason: Option<&str>) {
        let message = match reason {
            Some(reason) => format!("A booking has been cancelled. Reason: {}", reason),
            None => "A booking has been cancelled.".to_string(),
        };
        let mut recipients = Vec::new();
        if let Some(trainer_id) = booking.trainer_id {
            recipients.push((trainer_id, format!("/trainer/bookings/{}", booking.id.as_uuid())));
        }
        if actor.is_admin() {
            recipients.push((booking.customer_id, format!("/bookings/{}", booking.id.as_uuid())));
        }
        for (user_id, link) in recipients {
            self.deps
                .notify(Notification {
                    user_id,
                    title: "Booking cancelled".to_string(),
                    message: message.clone(),
                    kind: NotificationKind::BookingCancelled,
                    link: Some(link),
                })
                .await;
        }
    }
}

/// Picks the settlement path from capture mode, payment status and fee
fn choose_branch(payment: &Payment, fee: &CancellationFee) -> Result<CancellationBranch, PaymentError> {
    match (payment.capture_mode(), payment.status) {
        (_, PaymentStatus::Pending) => Ok(CancellationBranch::NothingToRelease),
        (CaptureMode::Manual, PaymentStatus::Held) => Ok(if fee.is_free() {
            CancellationBranch::HoldReleased
        } else if fee.is_full_fee() || fee.refund_amount.is_zero() {
            CancellationBranch::FullCapture
        } else {
            CancellationBranch::PartialCapture
        }),
        (CaptureMode::Immediate, PaymentStatus::Paid) => Ok(if fee.is_free() {
            CancellationBranch::FullRefund
        } else if fee.refund_amount.is_zero() {
            CancellationBranch::FeeRetained
        } else {
            CancellationBranch::PartialRefund
        }),
        (_, status) => Err(PaymentError::invalid_state(format!(
            "payment is {} and cannot be settled by cancellation",
            status
        ))),
    }
}

/// (fee kept, amount returned) for the branch taken
fn settled_amounts(payment: &Payment, fee: &CancellationFee, branch: CancellationBranch) -> (Money, Money) {
    let zero = Money::zero(payment.amount.currency());
    match branch {
        CancellationBranch::NothingToRelease => (zero, zero),
        CancellationBranch::FullCapture | CancellationBranch::FeeRetained => (payment.amount, zero),
        _ => (fee.fee_amount, fee.refund_amount),
    }
}

fn audit_metadata(
    booking: &Booking,
    payment: &Payment,
    fee: &CancellationFee,
    branch: CancellationBranch,
    actor: &Actor,
    request: &CancelRequest,
    now: DateTime<Utc>,
) -> serde_json::Value {
    serde_json::json!({
        "inputs": {
            "scheduled_at": booking.scheduled_at,
            "total": payment.amount,
            "evaluated_at": now,
        },
        "outputs": {
            "tier": fee.tier,
            "fee_rate": fee.fee_rate,
            "fee_amount": fee.fee_amount,
            "refund_amount": fee.refund_amount,
            "hours_until": fee.hours_until,
            "days_until": fee.days_until,
        },
        "branch": branch,
        "actor": actor,
        "reason": request.reason,
        "notes": request.notes,
    })
}

fn branch_message(branch: CancellationBranch, fee: Money, refund: Money) -> String {
    match branch {
        CancellationBranch::NothingToRelease => {
            "Your booking has been cancelled. No payment had been made.".to_string()
        }
        CancellationBranch::HoldReleased => {
            "Your booking has been cancelled. The card authorization was released and you were not charged.".to_string()
        }
        CancellationBranch::PartialCapture => format!(
            "Your booking has been cancelled. A cancellation fee of {} was charged and the remaining {} was released.",
            fee, refund
        ),
        CancellationBranch::FullCapture => format!(
            "Your booking has been cancelled. The full amount of {} was charged as a cancellation fee.",
            fee
        ),
        CancellationBranch::FullRefund => format!(
            "Your booking has been cancelled. {} will be refunded in full.",
            refund
        ),
        CancellationBranch::PartialRefund => format!(
            "Your booking has been cancelled. A cancellation fee of {} was kept and {} will be refunded.",
            fee, refund
        ),
        CancellationBranch::FeeRetained => format!(
            "Your booking has been cancelled. The full amount of {} was kept as a cancellation fee.",
            fee
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use core_kernel::UserId;
    use domain_booking::BookingKind;

    use crate::payment::{PaymentProvider, ProviderRef};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn payment(provider: PaymentProvider, status: PaymentStatus, lead: Duration) -> (Payment, CancellationFee) {
        let booking = Booking::new(
            UserId::new(),
            BookingKind::Direct,
            now() + lead,
            now() + lead + Duration::hours(1),
            Money::krw(100_000),
            now() - Duration::days(30),
        )
        .unwrap();
        let provider_ref = match provider {
            PaymentProvider::Stripe => ProviderRef::ManualCapture {
                intent_id: "pi_1".to_string(),
                client_secret: None,
            },
            PaymentProvider::Toss => ProviderRef::ImmediateCapture {
                order_id: "order-1".to_string(),
                payment_key: Some("pk_1".to_string()),
            },
        };
        let mut payment = Payment::new(PaymentId::new_v7(), &booking, provider, provider_ref, now());
        payment.status = status;
        let fee = cancellation_fee(booking.scheduled_at, payment.amount, now());
        (payment, fee)
    }

    #[test]
    fn test_manual_capture_branches() {
        let (p, fee) = payment(PaymentProvider::Stripe, PaymentStatus::Held, Duration::days(10));
        assert_eq!(choose_branch(&p, &fee).unwrap(), CancellationBranch::HoldReleased);

        let (p, fee) = payment(PaymentProvider::Stripe, PaymentStatus::Held, Duration::days(5));
        assert_eq!(choose_branch(&p, &fee).unwrap(), CancellationBranch::PartialCapture);
    }

    #[test]
    fn test_immediate_capture_branches() {
        let (p, fee) = payment(PaymentProvider::Toss, PaymentStatus::Paid, Duration::days(10));
        assert_eq!(choose_branch(&p, &fee).unwrap(), CancellationBranch::FullRefund);

        let (p, fee) = payment(PaymentProvider::Toss, PaymentStatus::Paid, Duration::hours(12));
        assert_eq!(choose_branch(&p, &fee).unwrap(), CancellationBranch::PartialRefund);
    }

    #[test]
    fn test_pending_payment_releases_nothing() {
        let (p, fee) = payment(PaymentProvider::Stripe, PaymentStatus::Pending, Duration::hours(2));
        let branch = choose_branch(&p, &fee).unwrap();
        assert_eq!(branch, CancellationBranch::NothingToRelease);
        let (fee_amount, refund) = settled_amounts(&p, &fee, branch);
        assert!(fee_amount.is_zero());
        assert!(refund.is_zero());
    }

    #[test]
    fn test_captured_manual_payment_is_refused() {
        let (p, fee) = payment(PaymentProvider::Stripe, PaymentStatus::Paid, Duration::days(10));
        assert!(matches!(choose_branch(&p, &fee), Err(PaymentError::InvalidState(_))));
    }

    #[test]
    fn test_only_settling_branches_call_provider() {
        assert!(!CancellationBranch::NothingToRelease.calls_provider());
        assert!(!CancellationBranch::FeeRetained.calls_provider());
        assert!(CancellationBranch::PartialCapture.calls_provider());
        assert!(CancellationBranch::PartialRefund.calls_provider());
    }

    #[test]
    fn test_messages_mention_amounts() {
        let msg = branch_message(CancellationBranch::PartialCapture, Money::krw(30_000), Money::krw(70_000));
        assert!(msg.contains("30000"));
        assert!(msg.contains("70000"));
    }
}

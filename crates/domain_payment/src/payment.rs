//! Payment aggregate
//!
//! A payment is one attempt to pay for a booking through one provider. A
//! booking accumulates payments over retries; at most one of them is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{BookingId, Money, PaymentId};
use domain_booking::Booking;

use crate::error::PaymentError;
use crate::fee::CancellationFee;

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, not yet authorized or charged
    Pending,
    /// Authorization hold in place (manual capture)
    Held,
    /// Funds captured in full
    Paid,
    /// Only a cancellation fee was captured from the hold
    PartiallyCaptured,
    /// Released, fully refunded or superseded
    Cancelled,
    /// Declined or errored before any funds moved
    Failed,
    /// Partially refunded after a charge; the fee was retained
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 7] = [
        PaymentStatus::Pending,
        PaymentStatus::Held,
        PaymentStatus::Paid,
        PaymentStatus::PartiallyCaptured,
        PaymentStatus::Cancelled,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Held => "held",
            PaymentStatus::Paid => "paid",
            PaymentStatus::PartiallyCaptured => "partially_captured",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Statuses that count toward the one-active-payment-per-booking rule
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending
                | PaymentStatus::Held
                | PaymentStatus::Paid
                | PaymentStatus::PartiallyCaptured
        )
    }

    /// Money has been authorized or charged
    pub fn is_secured(&self) -> bool {
        matches!(self, PaymentStatus::Held | PaymentStatus::Paid)
    }

    /// Some amount has been captured
    pub fn is_captured(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::PartiallyCaptured)
    }

    /// Checks if transition is valid
    ///
    /// Self-transitions are allowed for `Paid` so a fee-retaining cancellation
    /// with no refund can still be written through the status guard.
    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (*self, target),
            (Pending, Held) |
            (Pending, Paid) |
            (Pending, Cancelled) |
            (Pending, Failed) |
            (Held, Paid) |
            (Held, PartiallyCaptured) |
            (Held, Cancelled) |
            (Paid, Paid) |
            (Paid, Cancelled) |
            (Paid, Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| PaymentError::Validation(format!("unknown payment status: {}", s)))
    }
}

/// How a provider settles funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Authorize first, capture any amount up to the hold later
    Manual,
    /// Charge at confirmation; reversal is a refund
    Immediate,
}

/// Supported payment providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
    Toss,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Toss => "toss",
        }
    }

    pub fn capture_mode(&self) -> CaptureMode {
        match self {
            PaymentProvider::Stripe => CaptureMode::Manual,
            PaymentProvider::Toss => CaptureMode::Immediate,
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(PaymentProvider::Stripe),
            "toss" => Ok(PaymentProvider::Toss),
            other => Err(PaymentError::Validation(format!("unknown provider: {}", other))),
        }
    }
}

/// Provider-side handle for a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderRef {
    /// A payment intent created with `capture_method=manual`
    ManualCapture {
        intent_id: String,
        client_secret: Option<String>,
    },
    /// An order the client checks out against; the payment key arrives on confirmation
    ImmediateCapture {
        order_id: String,
        payment_key: Option<String>,
    },
}

impl ProviderRef {
    /// The key provider webhooks are matched on
    pub fn correlation_key(&self) -> &str {
        match self {
            ProviderRef::ManualCapture { intent_id, .. } => intent_id,
            ProviderRef::ImmediateCapture { order_id, .. } => order_id,
        }
    }

    pub fn intent_id(&self) -> Option<&str> {
        match self {
            ProviderRef::ManualCapture { intent_id, .. } => Some(intent_id),
            ProviderRef::ImmediateCapture { .. } => None,
        }
    }

    pub fn payment_key(&self) -> Option<&str> {
        match self {
            ProviderRef::ImmediateCapture { payment_key, .. } => payment_key.as_deref(),
            ProviderRef::ManualCapture { .. } => None,
        }
    }
}

/// A payment attempt for a booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    /// Amount authorized or charged
    pub amount: Money,
    pub provider: PaymentProvider,
    pub provider_ref: ProviderRef,
    pub status: PaymentStatus,
    /// Amount captured so far
    pub captured_amount: Money,
    /// Amount refunded so far
    pub refunded_amount: Money,
    /// Fee breakdown recorded at cancellation
    pub cancellation: Option<CancellationFee>,
    /// Last raw provider response, kept for audit only
    pub provider_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment for the full booking price
    pub fn new(
        id: PaymentId,
        booking: &Booking,
        provider: PaymentProvider,
        provider_ref: ProviderRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        let currency = booking.total_price.currency();
        Self {
            id,
            booking_id: booking.id,
            amount: booking.total_price,
            provider,
            provider_ref,
            status: PaymentStatus::Pending,
            captured_amount: Money::zero(currency),
            refunded_amount: Money::zero(currency),
            cancellation: None,
            provider_metadata: serde_json::Value::Null,
            created_at,
            confirmed_at: None,
            paid_at: None,
            cancelled_at: None,
            refunded_at: None,
            updated_at: created_at,
        }
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.provider.capture_mode()
    }

    pub fn correlation_key(&self) -> &str {
        self.provider_ref.correlation_key()
    }

    /// Idempotency key for a provider operation on this payment
    pub fn idempotency_key(&self, operation: &str) -> String {
        idempotency_key(self.id, operation)
    }

    /// Returns a copy moved to `target`, or an invalid-state error
    pub fn transitioned(
        &self,
        target: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment, PaymentError> {
        if !self.status.can_transition_to(target) {
            return Err(PaymentError::InvalidState(format!(
                "payment cannot move from {} to {}",
                self.status, target
            )));
        }
        let mut next = self.clone();
        match target {
            PaymentStatus::Held => next.confirmed_at = Some(at),
            PaymentStatus::Paid | PaymentStatus::PartiallyCaptured => {
                next.confirmed_at.get_or_insert(at);
                next.paid_at.get_or_insert(at);
            }
            PaymentStatus::Cancelled | PaymentStatus::Failed => next.cancelled_at = Some(at),
            PaymentStatus::Refunded => next.refunded_at = Some(at),
            PaymentStatus::Pending => {}
        }
        next.status = target;
        next.updated_at = at;
        Ok(next)
    }

    pub fn with_captured(mut self, amount: Money) -> Self {
        self.captured_amount = amount;
        self
    }

    pub fn with_refunded(mut self, amount: Money, at: DateTime<Utc>) -> Self {
        self.refunded_amount = amount;
        if amount.is_positive() {
            self.refunded_at = Some(at);
        }
        self
    }

    /// Records the fee breakdown applied at cancellation
    pub fn with_cancellation(mut self, fee: CancellationFee) -> Self {
        self.cancellation = Some(fee);
        self
    }

    pub fn with_provider_metadata(mut self, raw: serde_json::Value) -> Self {
        self.provider_metadata = raw;
        self
    }
}

/// Idempotency key for a provider operation
pub fn idempotency_key(payment_id: PaymentId, operation: &str) -> String {
    format!("{}:{}", payment_id.as_uuid(), operation)
}

//! Payment gateway ports
//!
//! The two provider families settle money in structurally different ways,
//! so each gets its own port rather than one lowest-common-denominator
//! interface:
//!
//! - [`ManualCaptureGateway`]: authorize, then capture up to the hold or release it
//! - [`ImmediateCaptureGateway`]: charge at confirmation, reverse with refunds
//!
//! Every mutating call carries an idempotency key so a retried request never
//! moves money twice.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use core_kernel::{BookingId, Money, PaymentId};

use crate::payment::PaymentProvider;

/// Errors returned by gateway adapters
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider refused the operation (declined card, invalid amount)
    #[error("Declined by provider ({code}): {message}")]
    Declined { code: String, message: String },

    /// Network failure, timeout, 5xx or rate limiting; safe to retry
    #[error("Provider temporarily unavailable: {message}")]
    Transient { message: String },

    #[error("Capture of {requested} exceeds the held amount {held}")]
    AmountExceedsHold { requested: Money, held: Money },

    /// The provider object is not in a state that allows the operation
    #[error("Invalid provider state: {message}")]
    InvalidState { message: String },

    #[error("Provider object not found: {0}")]
    NotFound(String),

    #[error("Webhook signature verification failed: {0}")]
    Signature(String),

    #[error("Malformed provider payload: {0}")]
    Malformed(String),

    #[error("Gateway misconfigured: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient { .. })
    }

    /// Short machine-readable code for logs and API responses
    pub fn code(&self) -> String {
        match self {
            GatewayError::Declined { code, .. } => code.clone(),
            GatewayError::Transient { .. } => "provider_unavailable".to_string(),
            GatewayError::AmountExceedsHold { .. } => "amount_exceeds_hold".to_string(),
            GatewayError::InvalidState { .. } => "invalid_provider_state".to_string(),
            GatewayError::NotFound(_) => "provider_object_not_found".to_string(),
            GatewayError::Signature(_) => "invalid_signature".to_string(),
            GatewayError::Malformed(_) => "malformed_payload".to_string(),
            GatewayError::Configuration(_) => "gateway_configuration".to_string(),
        }
    }
}

/// Request to place an authorization hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRequest {
    pub payment_id: PaymentId,
    pub booking_id: BookingId,
    pub amount: Money,
    /// Shown to the customer on their statement / checkout page
    pub description: String,
    pub idempotency_key: String,
}

/// A hold as created by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub intent_id: String,
    /// Handed to the client to complete card authentication
    pub client_secret: Option<String>,
    pub raw: serde_json::Value,
}

/// Provider-side status of a manual-capture intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Customer has not completed authorization yet
    AwaitingAuthorization,
    /// Hold in place, awaiting capture
    RequiresCapture,
    Processing,
    Succeeded,
    Canceled,
}

/// Current provider view of an intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSnapshot {
    pub intent_id: String,
    pub status: IntentStatus,
    pub amount: Money,
    pub amount_capturable: Money,
    pub amount_received: Money,
    pub raw: serde_json::Value,
}

/// Outcome of releasing a hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldRelease {
    Released,
    /// The hold was already cancelled; nothing to do
    AlreadyReleased,
}

/// Funds captured from a hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureReceipt {
    pub intent_id: String,
    pub captured_amount: Money,
    pub raw: serde_json::Value,
}

/// Manual-capture provider (hold, capture, release)
#[async_trait]
pub trait ManualCaptureGateway: Send + Sync + 'static {
    /// Places an authorization hold without charging
    async fn create_hold(&self, request: HoldRequest) -> Result<Hold, GatewayError>;

    /// Releases an uncaptured hold
    ///
    /// Already-cancelled holds return `AlreadyReleased`; captured ones fail
    /// with `InvalidState` and must be refunded instead.
    async fn cancel_hold(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> Result<HoldRelease, GatewayError>;

    /// Captures the full held amount
    async fn capture_full(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> Result<CaptureReceipt, GatewayError>;

    /// Captures part of the hold; the remainder is released by the provider
    async fn capture_partial(
        &self,
        intent_id: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<CaptureReceipt, GatewayError>;

    /// Reads the provider's current view of the intent
    async fn retrieve(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError>;
}

/// Request to confirm a client-side checkout into a charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub payment_key: String,
    pub order_id: String,
    pub amount: Money,
    pub idempotency_key: String,
}

/// A completed charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub payment_key: String,
    pub order_id: String,
    pub approved_amount: Money,
    pub raw: serde_json::Value,
}

/// Request to refund all or part of a charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub payment_key: String,
    pub amount: Money,
    pub reason: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub payment_key: String,
    pub refunded_amount: Money,
    pub raw: serde_json::Value,
}

/// Immediate-capture provider (charge, refund)
#[async_trait]
pub trait ImmediateCaptureGateway: Send + Sync + 'static {
    /// Confirms the checkout, charging the full amount
    async fn confirm_charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, GatewayError>;

    /// Refunds `amount` of the charge; may be less than the original charge
    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError>;
}

/// The configured gateways, one per capture mode
#[derive(Clone)]
pub struct PaymentGateways {
    pub manual: Arc<dyn ManualCaptureGateway>,
    pub immediate: Arc<dyn ImmediateCaptureGateway>,
    /// Used when a payment request does not name a provider
    pub default_provider: PaymentProvider,
}

impl PaymentGateways {
    pub fn new(
        manual: Arc<dyn ManualCaptureGateway>,
        immediate: Arc<dyn ImmediateCaptureGateway>,
        default_provider: PaymentProvider,
    ) -> Self {
        Self {
            manual,
            immediate,
            default_provider,
        }
    }
}

/// Scripted gateways for testing
///
/// Hold and charge state is kept in memory and every provider call is
/// counted, so tests can assert that a path made no provider call at all.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Debug, Clone)]
    struct MockIntent {
        amount: Money,
        status: IntentStatus,
        captured: Money,
    }

    /// In-memory manual-capture gateway
    #[derive(Debug, Default)]
    pub struct MockManualGateway {
        intents: RwLock<HashMap<String, MockIntent>>,
        calls: RwLock<Vec<String>>,
        fail_next: RwLock<Option<GatewayError>>,
    }

    impl MockManualGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next provider call fail with `error`
        pub async fn fail_next(&self, error: GatewayError) {
            *self.fail_next.write().await = Some(error);
        }

        /// Simulates the customer completing card authentication
        pub async fn authorize(&self, intent_id: &str) {
            if let Some(intent) = self.intents.write().await.get_mut(intent_id) {
                intent.status = IntentStatus::RequiresCapture;
            }
        }

        /// Provider calls made so far, as `op:intent_id`
        pub async fn calls(&self) -> Vec<String> {
            self.calls.read().await.clone()
        }

        /// Number of calls for one operation
        pub async fn call_count(&self, operation: &str) -> usize {
            self.calls
                .read()
                .await
                .iter()
                .filter(|c| c.split(':').next() == Some(operation))
                .count()
        }

        pub async fn intent_status(&self, intent_id: &str) -> Option<IntentStatus> {
            self.intents.read().await.get(intent_id).map(|i| i.status)
        }

        pub async fn captured(&self, intent_id: &str) -> Option<Money> {
            self.intents.read().await.get(intent_id).map(|i| i.captured)
        }

        async fn begin(&self, call: String) -> Result<(), GatewayError> {
            self.calls.write().await.push(call);
            match self.fail_next.write().await.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn capture(
            &self,
            intent_id: &str,
            amount: Option<Money>,
        ) -> Result<CaptureReceipt, GatewayError> {
            let mut intents = self.intents.write().await;
            let intent = intents
                .get_mut(intent_id)
                .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))?;
            if intent.status != IntentStatus::RequiresCapture {
                return Err(GatewayError::InvalidState {
                    message: format!("intent is {:?}", intent.status),
                });
            }
            let requested = amount.unwrap_or(intent.amount);
            if requested.amount() > intent.amount.amount() {
                return Err(GatewayError::AmountExceedsHold {
                    requested,
                    held: intent.amount,
                });
            }
            intent.status = IntentStatus::Succeeded;
            intent.captured = requested;
            Ok(CaptureReceipt {
                intent_id: intent_id.to_string(),
                captured_amount: requested,
                raw: serde_json::json!({ "id": intent_id, "status": "succeeded" }),
            })
        }
    }

    #[async_trait]
    impl ManualCaptureGateway for MockManualGateway {
        async fn create_hold(&self, request: HoldRequest) -> Result<Hold, GatewayError> {
            self.begin(format!("create_hold:{}", request.payment_id)).await?;
            let intent_id = format!("pi_{}", request.payment_id.as_uuid().simple());
            self.intents.write().await.insert(
                intent_id.clone(),
                MockIntent {
                    amount: request.amount,
                    status: IntentStatus::AwaitingAuthorization,
                    captured: Money::zero(request.amount.currency()),
                },
            );
            Ok(Hold {
                client_secret: Some(format!("{}_secret", intent_id)),
                raw: serde_json::json!({ "id": intent_id, "status": "requires_payment_method" }),
                intent_id,
            })
        }

        async fn cancel_hold(
            &self,
            intent_id: &str,
            _idempotency_key: &str,
        ) -> Result<HoldRelease, GatewayError> {
            self.begin(format!("cancel_hold:{}", intent_id)).await?;
            let mut intents = self.intents.write().await;
            let intent = intents
                .get_mut(intent_id)
                .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))?;
            match intent.status {
                IntentStatus::Canceled => Ok(HoldRelease::AlreadyReleased),
                IntentStatus::Succeeded => Err(GatewayError::InvalidState {
                    message: "intent already captured; refund instead".to_string(),
                }),
                _ => {
                    intent.status = IntentStatus::Canceled;
                    Ok(HoldRelease::Released)
                }
            }
        }

        async fn capture_full(
            &self,
            intent_id: &str,
            _idempotency_key: &str,
        ) -> Result<CaptureReceipt, GatewayError> {
            self.begin(format!("capture:{}", intent_id)).await?;
            self.capture(intent_id, None).await
        }

        async fn capture_partial(
            &self,
            intent_id: &str,
            amount: Money,
            _idempotency_key: &str,
        ) -> Result<CaptureReceipt, GatewayError> {
            self.begin(format!("capture:{}", intent_id)).await?;
            self.capture(intent_id, Some(amount)).await
        }

        async fn retrieve(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError> {
            let intents = self.intents.read().await;
            let intent = intents
                .get(intent_id)
                .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))?;
            let capturable = if intent.status == IntentStatus::RequiresCapture {
                intent.amount
            } else {
                Money::zero(intent.amount.currency())
            };
            Ok(IntentSnapshot {
                intent_id: intent_id.to_string(),
                status: intent.status,
                amount: intent.amount,
                amount_capturable: capturable,
                amount_received: intent.captured,
                raw: serde_json::Value::Null,
            })
        }
    }

    /// In-memory immediate-capture gateway
    #[derive(Debug, Default)]
    pub struct MockImmediateGateway {
        refunds: RwLock<HashMap<String, Money>>,
        calls: RwLock<Vec<String>>,
        fail_next: RwLock<Option<GatewayError>>,
    }

    impl MockImmediateGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn fail_next(&self, error: GatewayError) {
            *self.fail_next.write().await = Some(error);
        }

        pub async fn calls(&self) -> Vec<String> {
            self.calls.read().await.clone()
        }

        pub async fn call_count(&self, operation: &str) -> usize {
            self.calls
                .read()
                .await
                .iter()
                .filter(|c| c.split(':').next() == Some(operation))
                .count()
        }

        /// Total refunded against a payment key
        pub async fn refunded(&self, payment_key: &str) -> Option<Money> {
            self.refunds.read().await.get(payment_key).copied()
        }

        async fn begin(&self, call: String) -> Result<(), GatewayError> {
            self.calls.write().await.push(call);
            match self.fail_next.write().await.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ImmediateCaptureGateway for MockImmediateGateway {
        async fn confirm_charge(
            &self,
            request: ChargeRequest,
        ) -> Result<ChargeReceipt, GatewayError> {
            self.begin(format!("confirm:{}", request.order_id)).await?;
            Ok(ChargeReceipt {
                raw: serde_json::json!({ "paymentKey": request.payment_key, "status": "DONE" }),
                payment_key: request.payment_key,
                order_id: request.order_id,
                approved_amount: request.amount,
            })
        }

        async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
            self.begin(format!("refund:{}", request.payment_key)).await?;
            let mut refunds = self.refunds.write().await;
            let total = refunds
                .entry(request.payment_key.clone())
                .or_insert_with(|| Money::zero(request.amount.currency()));
            *total = total
                .checked_add(&request.amount)
                .map_err(|e| GatewayError::Malformed(e.to_string()))?;
            Ok(RefundReceipt {
                payment_key: request.payment_key,
                refunded_amount: request.amount,
                raw: serde_json::json!({ "status": "CANCELED" }),
            })
        }
    }
}

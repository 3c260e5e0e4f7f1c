//! Webhook signature verification and event normalisation
//!
//! Each provider signs deliveries differently:
//!
//! | Provider | Header | Signed message | Encoding |
//! |---|---|---|---|
//! | Stripe | `Stripe-Signature: t=…,v1=…` | `"{t}.{body}"` | hex |
//! | Toss | `tosspayments-webhook-signature: v1:…[,v1:…]` | `"{body}:{transmission-time}"` | base64 |
//!
//! Both use HMAC-SHA256. Comparison goes through `Mac::verify_slice`, which
//! is constant-time. Verification must succeed before a payload is parsed.
//!
//! Parsed events come out as provider-neutral [`ProviderEvent`]s. Event types
//! with no bearing on payment state parse to `None`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use core_kernel::Money;
use domain_payment::{GatewayError, PaymentProvider, ProviderEvent, ProviderEventKind};

use crate::client::{currency_field, money_field, str_field};

type HmacSha256 = Hmac<Sha256>;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const TOSS_SIGNATURE_HEADER: &str = "tosspayments-webhook-signature";
pub const TOSS_TRANSMISSION_TIME_HEADER: &str = "tosspayments-webhook-transmission-time";
pub const TOSS_TRANSMISSION_ID_HEADER: &str = "tosspayments-webhook-transmission-id";

fn keyed_mac(secret: &str) -> Result<HmacSha256, GatewayError> {
    if secret.is_empty() {
        return Err(GatewayError::Configuration(
            "webhook signing secret is not set".to_string(),
        ));
    }
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Configuration(format!("webhook signing secret: {e}")))
}

fn parse_json(payload: &[u8]) -> Result<Value, GatewayError> {
    serde_json::from_slice(payload).map_err(|e| GatewayError::Malformed(format!("webhook body: {e}")))
}

// ============================================================================
// Stripe
// ============================================================================

/// Verifies `Stripe-Signature` headers
#[derive(Debug, Clone)]
pub struct StripeWebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl StripeWebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<(), GatewayError> {
        let (timestamp, signatures) = parse_stripe_header(header)?;

        if (now.timestamp() - timestamp).abs() > self.tolerance_secs {
            return Err(GatewayError::Signature(format!(
                "timestamp {timestamp} outside the {}s tolerance",
                self.tolerance_secs
            )));
        }

        let mut mac = keyed_mac(&self.secret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        let matched = signatures.iter().any(|signature| {
            hex::decode(signature)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });
        if matched {
            Ok(())
        } else {
            Err(GatewayError::Signature("no matching v1 signature".to_string()))
        }
    }
}

/// Splits `t=…,v1=…,v1=…` into the timestamp and the v1 signatures
fn parse_stripe_header(header: &str) -> Result<(i64, Vec<&str>), GatewayError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    GatewayError::Signature(format!("invalid timestamp `{value}`"))
                })?);
            }
            Some(("v1", value)) => signatures.push(value),
            // v0 and future schemes are ignored
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| GatewayError::Signature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(GatewayError::Signature("missing v1 signature".to_string()));
    }
    Ok((timestamp, signatures))
}

/// Normalises a verified Stripe event
pub fn parse_stripe_event(payload: &[u8]) -> Result<Option<ProviderEvent>, GatewayError> {
    let raw = parse_json(payload)?;
    let event_id = str_field(&raw, "id")?.to_string();
    let event_type = str_field(&raw, "type")?;
    let object = raw
        .get("data")
        .and_then(|data| data.get("object"))
        .ok_or_else(|| GatewayError::Malformed("missing data.object".to_string()))?;

    let intent_ref = |field: &str| object.get(field).and_then(Value::as_str).map(str::to_string);

    let (correlation_key, kind) = match event_type {
        "payment_intent.amount_capturable_updated" => {
            (intent_ref("id"), ProviderEventKind::Authorized)
        }
        "payment_intent.succeeded" => {
            let currency = currency_field(object, "currency")?;
            let amount = money_field(object, "amount_received", currency)?;
            (intent_ref("id"), ProviderEventKind::Captured { amount })
        }
        "payment_intent.payment_failed" => {
            let error = object.get("last_payment_error");
            let reason = error
                .and_then(|e| e.get("message").or_else(|| e.get("code")))
                .and_then(Value::as_str)
                .unwrap_or("payment_failed")
                .to_string();
            (intent_ref("id"), ProviderEventKind::Failed { reason })
        }
        "payment_intent.canceled" => (intent_ref("id"), ProviderEventKind::Cancelled),
        "checkout.session.completed" => (intent_ref("payment_intent"), ProviderEventKind::Authorized),
        "checkout.session.expired" => (intent_ref("payment_intent"), ProviderEventKind::Expired),
        "charge.refunded" => {
            let currency = currency_field(object, "currency")?;
            let amount = money_field(object, "amount_refunded", currency)?;
            (intent_ref("payment_intent"), ProviderEventKind::Refunded { amount })
        }
        other => {
            tracing::debug!(event_id = %event_id, event_type = other, "Ignoring Stripe event type");
            return Ok(None);
        }
    };

    // Sessions that never created an intent have nothing to correlate with
    let Some(correlation_key) = correlation_key else {
        tracing::debug!(event_id = %event_id, event_type, "Stripe event without a PaymentIntent");
        return Ok(None);
    };

    Ok(Some(ProviderEvent {
        provider: PaymentProvider::Stripe,
        event_id,
        correlation_key,
        kind,
        payment_key: None,
        raw,
    }))
}

// ============================================================================
// Toss
// ============================================================================

/// Verifies `tosspayments-webhook-signature` headers
#[derive(Debug, Clone)]
pub struct TossWebhookVerifier {
    secret: String,
}

impl TossWebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: &str,
        transmission_time: &str,
    ) -> Result<(), GatewayError> {
        let mut mac = keyed_mac(&self.secret)?;
        mac.update(payload);
        mac.update(b":");
        mac.update(transmission_time.as_bytes());

        let matched = signature_header
            .split(',')
            .filter_map(|part| part.trim().strip_prefix("v1:"))
            .any(|signature| {
                STANDARD
                    .decode(signature)
                    .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                    .unwrap_or(false)
            });
        if matched {
            Ok(())
        } else {
            Err(GatewayError::Signature("no matching v1 signature".to_string()))
        }
    }
}

/// Normalises a verified Toss `PAYMENT_STATUS_CHANGED` delivery
///
/// Toss payloads carry no delivery id of their own, so the transmission id
/// header is used when present; otherwise one is derived from the payment
/// key, status and event time.
pub fn parse_toss_event(
    payload: &[u8],
    transmission_id: Option<&str>,
) -> Result<Option<ProviderEvent>, GatewayError> {
    let raw = parse_json(payload)?;
    let event_type = str_field(&raw, "eventType")?;
    if event_type != "PAYMENT_STATUS_CHANGED" {
        tracing::debug!(event_type, "Ignoring Toss event type");
        return Ok(None);
    }

    let data = raw
        .get("data")
        .ok_or_else(|| GatewayError::Malformed("missing data".to_string()))?;
    let order_id = str_field(data, "orderId")?.to_string();
    let payment_key = data.get("paymentKey").and_then(Value::as_str).map(str::to_string);
    let status = str_field(data, "status")?;

    let kind = match status {
        "DONE" => {
            let currency = currency_field(data, "currency")?;
            ProviderEventKind::Captured {
                amount: money_field(data, "totalAmount", currency)?,
            }
        }
        "CANCELED" => ProviderEventKind::Cancelled,
        "PARTIAL_CANCELED" => ProviderEventKind::Refunded {
            amount: refunded_so_far(data)?,
        },
        "ABORTED" => ProviderEventKind::Failed {
            reason: data
                .get("failure")
                .and_then(|f| f.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("ABORTED")
                .to_string(),
        },
        "EXPIRED" => ProviderEventKind::Expired,
        other => {
            tracing::debug!(order_id = %order_id, status = other, "Ignoring Toss payment status");
            return Ok(None);
        }
    };

    let event_id = match transmission_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let at = raw.get("createdAt").and_then(Value::as_str).unwrap_or_default();
            format!(
                "{}:{status}:{at}",
                payment_key.as_deref().unwrap_or(order_id.as_str())
            )
        }
    };

    Ok(Some(ProviderEvent {
        provider: PaymentProvider::Toss,
        event_id,
        correlation_key: order_id,
        kind,
        payment_key,
        raw,
    }))
}

/// Cumulative refund on a partially cancelled payment
fn refunded_so_far(data: &Value) -> Result<Money, GatewayError> {
    let currency = currency_field(data, "currency")?;
    let total = money_field(data, "totalAmount", currency)?;
    if let Ok(balance) = money_field(data, "balanceAmount", currency) {
        return total
            .checked_sub(&balance)
            .map_err(|e| GatewayError::Malformed(e.to_string()));
    }
    let cancels = data
        .get("cancels")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Malformed("missing balanceAmount and cancels".to_string()))?;
    cancels.iter().try_fold(Money::zero(currency), |sum, cancel| {
        let amount = money_field(cancel, "cancelAmount", currency)?;
        sum.checked_add(&amount)
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    })
}

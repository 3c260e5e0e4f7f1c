//! Stripe PaymentIntents adapter (manual capture)
//!
//! Intents are created with `capture_method=manual`: confirming the intent on
//! the client places an authorization hold, and funds only move when the
//! server captures. Partial captures go through `amount_to_capture`, after
//! which Stripe releases the remainder of the hold itself.
//!
//! # Error Handling
//!
//! Stripe error bodies (`{"error": {"type", "code", "message"}}`) are mapped
//! to `GatewayError`:
//! - 401/403 -> `Configuration`
//! - 404 / `resource_missing` -> `NotFound`
//! - `card_error` / 402 -> `Declined`
//! - `payment_intent_unexpected_state` -> `InvalidState`
//! - capture above the capturable amount -> `AmountExceedsHold`
//! - 429 / 5xx / network -> `Transient` (after retries)

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::Value;

use core_kernel::{AdapterHealth, Currency, HealthCheckResult, HealthCheckable, Money};
use domain_payment::{
    CaptureReceipt, GatewayError, Hold, HoldRelease, HoldRequest, IntentSnapshot, IntentStatus,
    ManualCaptureGateway,
};

use crate::client::{
    currency_field, minor_units, money_field, str_field, CircuitBreakerConfig, ProviderClient,
    ProviderResponse,
};

const ADAPTER_ID: &str = "stripe-gateway";

/// Connection settings for the Stripe API
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Overridable for test servers
    pub base_url: String,
    /// Secret API key (`sk_live_…` / `sk_test_…`)
    pub secret_key: String,
    /// Signing secret of the webhook endpoint (`whsec_…`)
    pub webhook_secret: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    /// Maximum age of a webhook signature timestamp
    pub webhook_tolerance_secs: i64,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.stripe.com".to_string(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            timeout_secs: 30,
            retry_attempts: 2,
            webhook_tolerance_secs: 300,
            circuit_breaker: Some(CircuitBreakerConfig::default()),
        }
    }
}

/// Manual-capture gateway backed by Stripe PaymentIntents
///
/// ```rust,ignore
/// let gateway = StripeGateway::new(StripeConfig {
///     secret_key: std::env::var("STRIPE_SECRET_KEY")?,
///     ..Default::default()
/// })?;
/// let hold = gateway.create_hold(request).await?;
/// ```
#[derive(Debug)]
pub struct StripeGateway {
    config: StripeConfig,
    client: ProviderClient,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        if config.secret_key.is_empty() {
            return Err(GatewayError::Configuration(
                "Stripe secret key is not set".to_string(),
            ));
        }
        let client = ProviderClient::new(
            "stripe",
            config.timeout_secs,
            config.retry_attempts,
            config.circuit_breaker,
        )?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_form(
        &self,
        operation: &str,
        path: &str,
        params: &[(String, String)],
        idempotency_key: &str,
    ) -> Result<Value, GatewayError> {
        let url = self.url(path);
        let response = self
            .client
            .execute(operation, |http| {
                http.post(&url)
                    .bearer_auth(&self.config.secret_key)
                    .header("Idempotency-Key", idempotency_key)
                    .form(&params)
            })
            .await?;
        into_body(response)
    }

    async fn get(&self, operation: &str, path: &str) -> Result<Value, GatewayError> {
        let url = self.url(path);
        let response = self
            .client
            .execute(operation, |http| http.get(&url).bearer_auth(&self.config.secret_key))
            .await?;
        into_body(response)
    }

    async fn capture(
        &self,
        intent_id: &str,
        amount: Option<Money>,
        idempotency_key: &str,
    ) -> Result<CaptureReceipt, GatewayError> {
        let mut params = Vec::new();
        if let Some(amount) = amount {
            params.push(("amount_to_capture".to_string(), minor_units(&amount)?.to_string()));
        }

        let body = self
            .post_form(
                "capture",
                &format!("payment_intents/{intent_id}/capture"),
                &params,
                idempotency_key,
            )
            .await;
        let body = match (body, amount) {
            (Err(GatewayError::AmountExceedsHold { held, .. }), Some(requested)) => {
                let held = if held.is_zero() {
                    self.retrieve(intent_id).await?.amount_capturable
                } else {
                    held
                };
                return Err(GatewayError::AmountExceedsHold { requested, held });
            }
            (result, _) => result?,
        };

        let snapshot = parse_intent(&body)?;
        tracing::info!(
            intent_id,
            captured = %snapshot.amount_received,
            "Stripe hold captured"
        );
        Ok(CaptureReceipt {
            intent_id: snapshot.intent_id,
            captured_amount: snapshot.amount_received,
            raw: body,
        })
    }
}

#[async_trait]
impl ManualCaptureGateway for StripeGateway {
    async fn create_hold(&self, request: HoldRequest) -> Result<Hold, GatewayError> {
        let params = vec![
            ("amount".to_string(), minor_units(&request.amount)?.to_string()),
            ("currency".to_string(), request.amount.currency().lowercase_code()),
            ("capture_method".to_string(), "manual".to_string()),
            ("description".to_string(), request.description.clone()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
            ("metadata[payment_id]".to_string(), request.payment_id.to_string()),
            ("metadata[booking_id]".to_string(), request.booking_id.to_string()),
        ];

        let body = self
            .post_form("create_hold", "payment_intents", &params, &request.idempotency_key)
            .await?;
        let intent_id = str_field(&body, "id")?.to_string();
        let client_secret = body
            .get("client_secret")
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::info!(
            payment_id = %request.payment_id,
            intent_id = %intent_id,
            amount = %request.amount,
            "Stripe hold intent created"
        );
        Ok(Hold {
            intent_id,
            client_secret,
            raw: body,
        })
    }

    async fn cancel_hold(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> Result<HoldRelease, GatewayError> {
        let current = self.retrieve(intent_id).await?;
        match current.status {
            IntentStatus::Canceled => return Ok(HoldRelease::AlreadyReleased),
            IntentStatus::Succeeded => {
                return Err(GatewayError::InvalidState {
                    message: format!("intent {intent_id} is already captured"),
                })
            }
            _ => {}
        }

        let params = [("cancellation_reason".to_string(), "requested_by_customer".to_string())];
        match self
            .post_form(
                "cancel_hold",
                &format!("payment_intents/{intent_id}/cancel"),
                &params,
                idempotency_key,
            )
            .await
        {
            Ok(_) => {
                tracing::info!(intent_id, "Stripe hold released");
                Ok(HoldRelease::Released)
            }
            // Lost a race with another release
            Err(GatewayError::InvalidState { .. })
                if self.retrieve(intent_id).await?.status == IntentStatus::Canceled =>
            {
                Ok(HoldRelease::AlreadyReleased)
            }
            Err(e) => Err(e),
        }
    }

    async fn capture_full(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> Result<CaptureReceipt, GatewayError> {
        self.capture(intent_id, None, idempotency_key).await
    }

    async fn capture_partial(
        &self,
        intent_id: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<CaptureReceipt, GatewayError> {
        self.capture(intent_id, Some(amount), idempotency_key).await
    }

    async fn retrieve(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError> {
        let body = self
            .get("retrieve", &format!("payment_intents/{intent_id}"))
            .await?;
        parse_intent(&body)
    }
}

#[async_trait]
impl HealthCheckable for StripeGateway {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        if self.client.is_circuit_open() {
            return HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Degraded,
                latency_ms: 0,
                message: Some("Circuit breaker is open".to_string()),
                checked_at: Utc::now(),
            };
        }

        let result = self.get("health", "balance").await;
        let latency_ms = start.elapsed().as_millis() as u64;
        let (status, message) = match result {
            Ok(_) => (AdapterHealth::Healthy, None),
            Err(GatewayError::Transient { message }) => (AdapterHealth::Degraded, Some(message)),
            Err(e) => (AdapterHealth::Unhealthy, Some(e.to_string())),
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

fn into_body(response: ProviderResponse) -> Result<Value, GatewayError> {
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(map_error(response.status, &response.body))
    }
}

/// Maps a PaymentIntent status string
pub(crate) fn intent_status(status: &str) -> Result<IntentStatus, GatewayError> {
    match status {
        "requires_payment_method" | "requires_confirmation" | "requires_action" => {
            Ok(IntentStatus::AwaitingAuthorization)
        }
        "requires_capture" => Ok(IntentStatus::RequiresCapture),
        "processing" => Ok(IntentStatus::Processing),
        "succeeded" => Ok(IntentStatus::Succeeded),
        "canceled" => Ok(IntentStatus::Canceled),
        other => Err(GatewayError::Malformed(format!(
            "unknown PaymentIntent status `{other}`"
        ))),
    }
}

pub(crate) fn parse_intent(body: &Value) -> Result<IntentSnapshot, GatewayError> {
    let currency: Currency = currency_field(body, "currency")?;
    Ok(IntentSnapshot {
        intent_id: str_field(body, "id")?.to_string(),
        status: intent_status(str_field(body, "status")?)?,
        amount: money_field(body, "amount", currency)?,
        amount_capturable: money_field(body, "amount_capturable", currency)
            .unwrap_or_else(|_| Money::zero(currency)),
        amount_received: money_field(body, "amount_received", currency)
            .unwrap_or_else(|_| Money::zero(currency)),
        raw: body.clone(),
    })
}

pub(crate) fn map_error(status: StatusCode, body: &Value) -> GatewayError {
    let error = body.get("error").cloned().unwrap_or(Value::Null);
    let field = |name: &str| error.get(name).and_then(Value::as_str).map(str::to_string);
    let message = field("message").unwrap_or_else(|| format!("Stripe returned {status}"));
    let code = field("code");
    let kind = field("type");

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return GatewayError::Transient { message };
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return GatewayError::Configuration(message);
    }
    if status == StatusCode::NOT_FOUND || code.as_deref() == Some("resource_missing") {
        return GatewayError::NotFound(message);
    }
    if kind.as_deref() == Some("card_error") || status == StatusCode::PAYMENT_REQUIRED {
        return GatewayError::Declined {
            code: field("decline_code")
                .or(code)
                .unwrap_or_else(|| "card_declined".to_string()),
            message,
        };
    }
    if code.as_deref() == Some("amount_too_large") || field("param").as_deref() == Some("amount_to_capture") {
        let held = error
            .get("payment_intent")
            .and_then(|intent| {
                let currency = currency_field(intent, "currency").ok()?;
                money_field(intent, "amount_capturable", currency).ok()
            })
            .unwrap_or_else(|| Money::zero(Currency::KRW));
        // Capture fills in `requested`, and `held` when the body lacks it
        return GatewayError::AmountExceedsHold {
            requested: held,
            held,
        };
    }
    if code.as_deref() == Some("payment_intent_unexpected_state")
        || kind.as_deref() == Some("idempotency_error")
    {
        return GatewayError::InvalidState { message };
    }
    GatewayError::Declined {
        code: code.unwrap_or_else(|| "invalid_request".to_string()),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent(status: &str) -> Value {
        json!({
            "id": "pi_123",
            "object": "payment_intent",
            "status": status,
            "amount": 100000,
            "amount_capturable": 100000,
            "amount_received": 0,
            "currency": "krw",
            "client_secret": "pi_123_secret_abc"
        })
    }

    // ========================================================================
    // Intent Parsing Tests
    // ========================================================================

    mod intent_tests {
        use super::*;

        #[test]
        fn test_parse_requires_capture_intent() {
            let snapshot = parse_intent(&intent("requires_capture")).unwrap();
            assert_eq!(snapshot.intent_id, "pi_123");
            assert_eq!(snapshot.status, IntentStatus::RequiresCapture);
            assert_eq!(snapshot.amount, Money::krw(100_000));
            assert_eq!(snapshot.amount_capturable, Money::krw(100_000));
            assert!(snapshot.amount_received.is_zero());
        }

        #[test]
        fn test_awaiting_states_collapse() {
            for status in ["requires_payment_method", "requires_confirmation", "requires_action"] {
                assert_eq!(intent_status(status).unwrap(), IntentStatus::AwaitingAuthorization);
            }
            assert!(intent_status("something_new").is_err());
        }

        #[test]
        fn test_usd_minor_units() {
            let mut body = intent("succeeded");
            body["currency"] = json!("usd");
            body["amount_received"] = json!(4999);
            let snapshot = parse_intent(&body).unwrap();
            assert_eq!(
                snapshot.amount_received,
                Money::from_minor(4999, Currency::USD)
            );
        }
    }

    // ========================================================================
    // Error Mapping Tests
    // ========================================================================

    mod error_tests {
        use super::*;

        #[test]
        fn test_card_error_is_declined() {
            let body = json!({"error": {
                "type": "card_error",
                "code": "card_declined",
                "decline_code": "insufficient_funds",
                "message": "Your card has insufficient funds."
            }});
            let error = map_error(StatusCode::PAYMENT_REQUIRED, &body);
            assert_eq!(
                error,
                GatewayError::Declined {
                    code: "insufficient_funds".to_string(),
                    message: "Your card has insufficient funds.".to_string(),
                }
            );
            assert!(!error.is_retryable());
        }

        #[test]
        fn test_unexpected_state_is_invalid_state() {
            let body = json!({"error": {
                "type": "invalid_request_error",
                "code": "payment_intent_unexpected_state",
                "message": "This PaymentIntent could not be captured because it has a status of canceled."
            }});
            assert!(matches!(
                map_error(StatusCode::BAD_REQUEST, &body),
                GatewayError::InvalidState { .. }
            ));
        }

        #[test]
        fn test_capture_above_hold() {
            let body = json!({"error": {
                "type": "invalid_request_error",
                "param": "amount_to_capture",
                "message": "amount_to_capture must be less than or equal to the amount_capturable",
                "payment_intent": { "currency": "krw", "amount_capturable": 100000 }
            }});
            match map_error(StatusCode::BAD_REQUEST, &body) {
                GatewayError::AmountExceedsHold { held, .. } => assert_eq!(held, Money::krw(100_000)),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_status_mapping() {
            let body = json!({"error": {"message": "nope"}});
            assert!(map_error(StatusCode::SERVICE_UNAVAILABLE, &body).is_retryable());
            assert!(matches!(
                map_error(StatusCode::UNAUTHORIZED, &body),
                GatewayError::Configuration(_)
            ));
            assert!(matches!(
                map_error(StatusCode::NOT_FOUND, &body),
                GatewayError::NotFound(_)
            ));
        }
    }

    #[test]
    fn test_missing_secret_key_is_configuration_error() {
        let err = StripeGateway::new(StripeConfig::default()).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}

//! Toss Payments adapter (immediate capture)
//!
//! The widget on the client returns a `paymentKey`; confirming it on the
//! server charges the full amount at once. Refunds go through the payment
//! cancel endpoint with an optional `cancelAmount` for partial refunds.
//!
//! Authentication is HTTP Basic with the secret key as the username and an
//! empty password.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};

use chrono::Utc;

use core_kernel::{AdapterHealth, HealthCheckResult, HealthCheckable, Money};
use domain_payment::{
    ChargeReceipt, ChargeRequest, GatewayError, ImmediateCaptureGateway, RefundReceipt,
    RefundRequest,
};

use crate::client::{
    currency_field, minor_units, money_field, str_field, CircuitBreakerConfig, ProviderClient,
};

/// Connection settings for the Toss Payments API
#[derive(Debug, Clone)]
pub struct TossConfig {
    pub base_url: String,
    /// Secret key (`test_sk_…` / `live_sk_…`)
    pub secret_key: String,
    /// Security key used to sign webhook deliveries
    pub webhook_secret: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for TossConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tosspayments.com".to_string(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            timeout_secs: 30,
            retry_attempts: 2,
            circuit_breaker: Some(CircuitBreakerConfig::default()),
        }
    }
}

/// Immediate-capture gateway backed by the Toss Payments core API
#[derive(Debug)]
pub struct TossGateway {
    config: TossConfig,
    client: ProviderClient,
    authorization: String,
}

impl TossGateway {
    pub fn new(config: TossConfig) -> Result<Self, GatewayError> {
        if config.secret_key.is_empty() {
            return Err(GatewayError::Configuration(
                "Toss secret key is not set".to_string(),
            ));
        }
        let client = ProviderClient::new(
            "toss",
            config.timeout_secs,
            config.retry_attempts,
            config.circuit_breaker,
        )?;
        let authorization = basic_authorization(&config.secret_key);
        Ok(Self {
            config,
            client,
            authorization,
        })
    }

    pub fn config(&self) -> &TossConfig {
        &self.config
    }

    async fn post_json(
        &self,
        operation: &str,
        path: &str,
        body: &Value,
        idempotency_key: &str,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}/v1/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .execute(operation, |http| {
                http.post(&url)
                    .header(reqwest::header::AUTHORIZATION, &self.authorization)
                    .header("Idempotency-Key", idempotency_key)
                    .json(body)
            })
            .await?;

        if response.is_success() {
            Ok(response.body)
        } else {
            Err(map_error(response.status, &response.body))
        }
    }
}

#[async_trait]
impl ImmediateCaptureGateway for TossGateway {
    async fn confirm_charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        let body = json!({
            "paymentKey": request.payment_key,
            "orderId": request.order_id,
            "amount": minor_units(&request.amount)?,
        });
        let payment = self
            .post_json("confirm", "payments/confirm", &body, &request.idempotency_key)
            .await?;

        let status = str_field(&payment, "status")?;
        if status != "DONE" {
            return Err(GatewayError::InvalidState {
                message: format!("payment {} confirmed with status {status}", request.payment_key),
            });
        }

        let currency = currency_field(&payment, "currency")?;
        let approved_amount = money_field(&payment, "totalAmount", currency)?;
        tracing::info!(
            order_id = %request.order_id,
            payment_key = %request.payment_key,
            amount = %approved_amount,
            "Toss payment confirmed"
        );
        Ok(ChargeReceipt {
            payment_key: str_field(&payment, "paymentKey")?.to_string(),
            order_id: str_field(&payment, "orderId")?.to_string(),
            approved_amount,
            raw: payment,
        })
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        let body = json!({
            "cancelReason": request.reason,
            "cancelAmount": minor_units(&request.amount)?,
        });
        let payment = self
            .post_json(
                "refund",
                &format!("payments/{}/cancel", request.payment_key),
                &body,
                &request.idempotency_key,
            )
            .await?;

        let refunded_amount = last_cancel_amount(&payment).unwrap_or(request.amount);
        tracing::info!(
            payment_key = %request.payment_key,
            refunded = %refunded_amount,
            "Toss payment refunded"
        );
        Ok(RefundReceipt {
            payment_key: request.payment_key,
            refunded_amount,
            raw: payment,
        })
    }
}

/// Reports the circuit state only; Toss has no side-effect-free probe endpoint
#[async_trait]
impl HealthCheckable for TossGateway {
    async fn health_check(&self) -> HealthCheckResult {
        let (status, message) = if self.client.is_circuit_open() {
            (AdapterHealth::Degraded, Some("Circuit breaker is open".to_string()))
        } else {
            (AdapterHealth::Healthy, None)
        };
        HealthCheckResult {
            adapter_id: "toss-gateway".to_string(),
            status,
            latency_ms: 0,
            message,
            checked_at: Utc::now(),
        }
    }
}

fn basic_authorization(secret_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{secret_key}:")))
}

/// Amount of the most recent entry in the payment's `cancels` list
fn last_cancel_amount(payment: &Value) -> Option<Money> {
    let currency = currency_field(payment, "currency").ok()?;
    let last = payment.get("cancels")?.as_array()?.last()?;
    money_field(last, "cancelAmount", currency).ok()
}

pub(crate) fn map_error(status: StatusCode, body: &Value) -> GatewayError {
    let code = body
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Toss returned {status}"));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return GatewayError::Transient { message };
    }
    match code.as_str() {
        "UNAUTHORIZED_KEY" | "INVALID_API_KEY" | "INCORRECT_BASIC_AUTH_FORMAT" => {
            GatewayError::Configuration(message)
        }
        "NOT_FOUND_PAYMENT" | "NOT_FOUND_PAYMENT_SESSION" | "NOT_FOUND" => {
            GatewayError::NotFound(message)
        }
        "ALREADY_PROCESSED_PAYMENT"
        | "ALREADY_CANCELED_PAYMENT"
        | "NOT_CANCELABLE_PAYMENT"
        | "NOT_CANCELABLE_AMOUNT"
        | "EXCEED_CANCEL_AMOUNT_DISCOUNT_AMOUNT" => GatewayError::InvalidState { message },
        "PROVIDER_ERROR"
        | "FAILED_INTERNAL_SYSTEM_PROCESSING"
        | "FAILED_PAYMENT_INTERNAL_SYSTEM_PROCESSING"
        | "UNKNOWN_PAYMENT_ERROR" => GatewayError::Transient { message },
        _ if status == StatusCode::UNAUTHORIZED => GatewayError::Configuration(message),
        _ if status == StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        _ => GatewayError::Declined { code, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_authorization_appends_colon() {
        // base64("test_sk_abc:")
        assert_eq!(basic_authorization("test_sk_abc"), "Basic dGVzdF9za19hYmM6");
    }

    #[test]
    fn test_last_cancel_amount() {
        let payment = json!({
            "currency": "KRW",
            "cancels": [
                { "cancelAmount": 10000 },
                { "cancelAmount": 30000 }
            ]
        });
        assert_eq!(last_cancel_amount(&payment), Some(Money::krw(30_000)));
        assert_eq!(last_cancel_amount(&json!({ "currency": "KRW" })), None);
    }

    #[test]
    fn test_error_codes() {
        let err = |code: &str| map_error(StatusCode::BAD_REQUEST, &json!({ "code": code, "message": "m" }));

        assert!(matches!(err("NOT_FOUND_PAYMENT"), GatewayError::NotFound(_)));
        assert!(matches!(
            err("ALREADY_CANCELED_PAYMENT"),
            GatewayError::InvalidState { .. }
        ));
        assert!(err("PROVIDER_ERROR").is_retryable());
        assert_eq!(
            err("REJECT_CARD_COMPANY"),
            GatewayError::Declined {
                code: "REJECT_CARD_COMPANY".to_string(),
                message: "m".to_string(),
            }
        );
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(map_error(StatusCode::BAD_GATEWAY, &Value::Null).is_retryable());
        assert!(matches!(
            map_error(StatusCode::UNAUTHORIZED, &Value::Null),
            GatewayError::Configuration(_)
        ));
    }

    #[test]
    fn test_missing_secret_key_is_configuration_error() {
        assert!(matches!(
            TossGateway::new(TossConfig::default()),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_health_reports_closed_circuit_as_healthy() {
        let gateway = TossGateway::new(TossConfig {
            secret_key: "test_sk_abc".to_string(),
            ..TossConfig::default()
        })
        .unwrap();
        let result = gateway.health_check().await;
        assert_eq!(result.status, AdapterHealth::Healthy);
        assert_eq!(result.adapter_id, "toss-gateway");
    }
}

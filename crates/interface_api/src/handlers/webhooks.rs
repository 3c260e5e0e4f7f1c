//! Provider webhook handlers
//!
//! Signatures are verified over the raw body before anything is parsed.
//! A missing signature header is a 400, a bad signature a 401. Once
//! verified, every delivery is acknowledged with 200 unless storing the
//! outcome failed, in which case the error status makes the provider retry.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use tracing::{info, warn};

use domain_payment::{GatewayError, PaymentProvider, ProviderEvent};
use infra_payments::{
    parse_stripe_event, parse_toss_event, STRIPE_SIGNATURE_HEADER, TOSS_SIGNATURE_HEADER,
    TOSS_TRANSMISSION_ID_HEADER, TOSS_TRANSMISSION_TIME_HEADER,
};

use crate::dto::payments::WebhookAck;
use crate::error::ApiError;
use crate::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    header(headers, name).ok_or_else(|| ApiError::BadRequest(format!("missing {} header", name)))
}

fn verification_error(provider: PaymentProvider, err: GatewayError) -> ApiError {
    match err {
        GatewayError::Signature(detail) => {
            warn!(provider = provider.as_str(), detail = %detail, "Webhook signature rejected");
            ApiError::InvalidSignature("webhook signature verification failed".to_string())
        }
        other => ApiError::Internal(other.to_string()),
    }
}

fn parse_error(provider: PaymentProvider, err: GatewayError) -> ApiError {
    warn!(provider = provider.as_str(), error = %err, "Unparseable webhook payload");
    ApiError::BadRequest(err.to_string())
}

async fn reconcile(state: &AppState, event: Option<ProviderEvent>) -> Result<Json<WebhookAck>, ApiError> {
    let Some(event) = event else {
        return Ok(Json(WebhookAck {
            received: true,
            outcome: "ignored",
        }));
    };

    let provider = event.provider;
    let event_id = event.event_id.clone();
    let kind = event.kind.as_str();
    let outcome = state.reconciler.handle(event).await?;

    info!(
        provider = provider.as_str(),
        event_id = %event_id,
        kind,
        outcome = outcome.as_str(),
        "Webhook processed"
    );
    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str(),
    }))
}

/// `POST /webhooks/stripe`
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = required_header(&headers, STRIPE_SIGNATURE_HEADER)?;
    state
        .webhooks
        .stripe
        .verify(&body, signature, state.clock.now())
        .map_err(|e| verification_error(PaymentProvider::Stripe, e))?;

    let event = parse_stripe_event(&body).map_err(|e| parse_error(PaymentProvider::Stripe, e))?;
    reconcile(&state, event).await
}

/// `POST /webhooks/toss`
pub async fn toss_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = required_header(&headers, TOSS_SIGNATURE_HEADER)?;
    let transmission_time = required_header(&headers, TOSS_TRANSMISSION_TIME_HEADER)?;
    state
        .webhooks
        .toss
        .verify(&body, signature, transmission_time)
        .map_err(|e| verification_error(PaymentProvider::Toss, e))?;

    let event = parse_toss_event(&body, header(&headers, TOSS_TRANSMISSION_ID_HEADER))
        .map_err(|e| parse_error(PaymentProvider::Toss, e))?;
    reconcile(&state, event).await
}

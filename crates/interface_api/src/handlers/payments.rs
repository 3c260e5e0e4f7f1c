//! Payment handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthActor;
use crate::dto::payments::*;
use crate::error::ApiError;
use crate::handlers::{booking_id, payment_id};
use crate::AppState;

/// Opens a payment for a booking, superseding stale pending attempts
pub async fn create_payment(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentCreatedResponse>), ApiError> {
    let request = request.into_domain()?;
    let created = state
        .lifecycle
        .create_payment(&actor, booking_id(id), request)
        .await?;

    info!(
        booking_id = %id,
        payment_id = %created.payment_id,
        provider = created.provider.as_str(),
        superseded = created.superseded.len(),
        "Payment created"
    );
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Confirms a payment after client-side checkout
///
/// Stripe confirmations carry no body; the intent is checked at the provider.
pub async fn confirm_payment(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    request: Option<Json<ConfirmPaymentRequest>>,
) -> Result<Json<ConfirmPaymentResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default().into_domain()?;
    let outcome = state
        .lifecycle
        .confirm_payment(&actor, payment_id(id), request)
        .await?;
    Ok(Json(outcome.into()))
}

/// Captures a held payment in full, completing its confirmed or in-progress booking
pub async fn capture_payment(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let result = state.lifecycle.capture(&actor, payment_id(id)).await?;
    Ok(Json(result.into()))
}

//! Booking handlers
//!
//! Every transition here may move money, so each one goes through the
//! payment services rather than updating the booking directly.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::auth::AuthActor;
use crate::dto::bookings::*;
use crate::dto::payments::CaptureResponse;
use crate::error::ApiError;
use crate::handlers::booking_id;
use crate::AppState;

/// Previews the cancellation fee as of now
pub async fn cancellation_quote(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<CancellationQuoteResponse>, ApiError> {
    let fee = state.cancellation.quote(&actor, booking_id(id)).await?;
    Ok(Json(fee.into()))
}

/// Cancels a booking and settles its payment per the fee schedule
pub async fn cancel_booking(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    request: Option<Json<CancelBookingRequest>>,
) -> Result<Json<CancellationResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default().into_domain()?;
    let result = state
        .cancellation
        .cancel_booking(&actor, booking_id(id), request)
        .await?;
    Ok(Json(result.into()))
}

pub async fn approve_booking(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state.lifecycle.approve(&actor, booking_id(id)).await?;
    Ok(Json(booking.into()))
}

/// Rejects a pending booking, releasing or refunding its payment in full
pub async fn reject_booking(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    request: Option<Json<RejectBookingRequest>>,
) -> Result<Json<RejectionResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    validator::Validate::validate(&request)?;
    let result = state
        .lifecycle
        .reject(&actor, booking_id(id), request.reason)
        .await?;
    Ok(Json(result.into()))
}

pub async fn start_booking(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state.lifecycle.start(&actor, booking_id(id)).await?;
    Ok(Json(booking.into()))
}

/// Completes a session and captures its held funds
pub async fn complete_booking(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let result = state.lifecycle.complete(&actor, booking_id(id)).await?;
    Ok(Json(result.into()))
}

/// Marks a no-show; the full amount is kept
pub async fn no_show_booking(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let result = state.lifecycle.no_show(&actor, booking_id(id)).await?;
    Ok(Json(result.into()))
}

/// Deletes a booking whose payment window lapsed without payment
pub async fn expire_unpaid_booking(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<UnpaidCleanupResponse>, ApiError> {
    let cleanup = state.lifecycle.expire_unpaid(&actor, booking_id(id)).await?;
    Ok(Json(cleanup.into()))
}

//! Booking domain errors

use thiserror::Error;

/// Errors that can occur in the booking domain
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Payment window closed at {deadline}")]
    PaymentWindowExpired { deadline: String },

    #[error("Invalid booking: {0}")]
    Validation(String),

    #[error("Unknown booking status: {0}")]
    UnknownStatus(String),

    #[error("Unknown booking kind: {0}")]
    UnknownKind(String),
}

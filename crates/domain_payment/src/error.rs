//! Payment domain errors

use thiserror::Error;

use core_kernel::{AlertId, MoneyError, PortError};
use domain_booking::BookingError;

use crate::gateway::GatewayError;

/// Errors surfaced by the payment services
#[derive(Debug, Error)]
pub enum PaymentError {
    /// No or invalid actor
    #[error("Authentication required")]
    Unauthorized,

    /// Actor lacks rights over this booking or payment
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation not legal from the current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The fee schedule refuses the cancellation
    #[error("Cannot cancel: {reason}")]
    CannotCancel { reason: String },

    /// The payment provider rejected or failed the call
    #[error("Payment provider error ({code}): {message}")]
    Provider {
        retryable: bool,
        code: String,
        message: String,
    },

    #[error("Capture amount exceeds the held amount: {0}")]
    AmountExceedsHold(String),

    /// Money moved at the provider but local state could not record it
    #[error("Reconciliation required (alert {alert_id}): {message}")]
    ReconciliationRequired { alert_id: AlertId, message: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(#[from] PortError),
}

impl PaymentError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        PaymentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        PaymentError::InvalidState(message.into())
    }

    /// True for provider failures worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Provider { retryable, .. } => *retryable,
            PaymentError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::AmountExceedsHold { requested, held } => PaymentError::AmountExceedsHold(
                format!("requested {}, held {}", requested, held),
            ),
            GatewayError::InvalidState { message } => PaymentError::InvalidState(message),
            GatewayError::Declined { code, message } => PaymentError::Provider {
                retryable: false,
                code,
                message,
            },
            other => PaymentError::Provider {
                retryable: other.is_retryable(),
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

impl From<BookingError> for PaymentError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Forbidden(message) => PaymentError::Forbidden(message),
            BookingError::InvalidStatusTransition { from, to } => {
                PaymentError::InvalidState(format!("booking cannot move from {} to {}", from, to))
            }
            BookingError::PaymentWindowExpired { deadline } => {
                PaymentError::InvalidState(format!("payment window closed at {}", deadline))
            }
            other => PaymentError::Validation(other.to_string()),
        }
    }
}

impl From<MoneyError> for PaymentError {
    fn from(err: MoneyError) -> Self {
        PaymentError::Validation(err.to_string())
    }
}

/// Maps a port lookup failure to a domain not-found error
pub(crate) fn not_found_or_store(
    err: PortError,
    entity: &'static str,
    id: impl std::fmt::Display,
) -> PaymentError {
    if err.is_not_found() {
        PaymentError::not_found(entity, id)
    } else {
        PaymentError::Store(err)
    }
}

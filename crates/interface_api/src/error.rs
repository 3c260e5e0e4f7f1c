//! API error handling
//!
//! Every failure is rendered as `{ "error": <code>, "message": <text> }`.
//! Cancellation errors keep their specific reason, since the fee schedule is
//! information the customer needs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use core_kernel::{AlertId, PortError};
use domain_payment::PaymentError;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InvalidSignature(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    CannotCancel(String),

    #[error("{0}")]
    AmountExceedsHold(String),

    #[error("{0}")]
    Validation(String),

    /// Retryable provider failure
    #[error("{message}")]
    ProviderUnavailable { code: String, message: String },

    /// Terminal provider refusal
    #[error("{message}")]
    ProviderDeclined { code: String, message: String },

    #[error("{message}")]
    ServiceUnavailable { message: String },

    #[error("{message}")]
    ReconciliationRequired { alert_id: AlertId, message: String },

    #[error("{0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidState(_) | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::CannotCancel(_) | ApiError::AmountExceedsHold(_) | ApiError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::ProviderUnavailable { .. } | ApiError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::ProviderDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::ReconciliationRequired { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InvalidSignature(_) => "invalid_signature",
            ApiError::InvalidState(_) => "invalid_state",
            ApiError::Conflict(_) => "conflict",
            ApiError::CannotCancel(_) => "cannot_cancel",
            ApiError::AmountExceedsHold(_) => "amount_exceeds_hold",
            ApiError::Validation(_) => "validation_error",
            ApiError::ProviderUnavailable { .. } => "provider_unavailable",
            ApiError::ProviderDeclined { .. } => "provider_declined",
            ApiError::ServiceUnavailable { .. } => "service_unavailable",
            ApiError::ReconciliationRequired { .. } => "reconciliation_required",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, alert_id) = match &self {
            ApiError::ProviderUnavailable { code, .. } | ApiError::ProviderDeclined { code, .. } => {
                (Some(code.clone()), None)
            }
            ApiError::ReconciliationRequired { alert_id, .. } => (None, Some(alert_id.to_string())),
            _ => (None, None),
        };
        let message = match &self {
            // Internal details stay in the logs
            ApiError::Internal(detail) => {
                error!(detail = %detail, "Internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message,
            code,
            alert_id,
        };

        (status, Json(body)).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Unauthorized => ApiError::Unauthorized,
            PaymentError::Forbidden(message) => ApiError::Forbidden(message),
            PaymentError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} {} was not found", entity, id))
            }
            PaymentError::InvalidState(message) => ApiError::InvalidState(message),
            PaymentError::CannotCancel { reason } => ApiError::CannotCancel(reason),
            PaymentError::Provider {
                retryable: true,
                code,
                message,
            } => ApiError::ProviderUnavailable { code, message },
            PaymentError::Provider { code, message, .. } => {
                ApiError::ProviderDeclined { code, message }
            }
            PaymentError::AmountExceedsHold(message) => ApiError::AmountExceedsHold(message),
            PaymentError::ReconciliationRequired { alert_id, message } => {
                ApiError::ReconciliationRequired { alert_id, message }
            }
            PaymentError::Validation(message) => ApiError::Validation(message),
            PaymentError::Store(port) => port.into(),
        }
    }
}

impl From<PortError> for ApiError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound { entity_type, id } => {
                ApiError::NotFound(format!("{} {} was not found", entity_type, id))
            }
            PortError::Conflict { message } => ApiError::Conflict(message),
            ref transient if transient.is_transient() => ApiError::ServiceUnavailable {
                message: "The service is temporarily unavailable; please retry".to_string(),
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

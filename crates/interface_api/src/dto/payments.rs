//! Payment DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use domain_payment::{
    CaptureResult, ConfirmOutcome, ConfirmRequest, Payment, PaymentCreated, PaymentProvider,
};

use super::MoneyDto;
use crate::error::ApiError;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    /// `stripe` or `toss`; the configured default when absent
    pub provider: Option<String>,
    #[validate(nested)]
    pub amount: MoneyDto,
    #[validate(length(min = 1, max = 100, message = "order_name must be 1-100 characters"))]
    pub order_name: String,
}

impl CreatePaymentRequest {
    pub fn into_domain(self) -> Result<domain_payment::CreatePaymentRequest, ApiError> {
        self.validate()?;
        let provider = self
            .provider
            .as_deref()
            .map(str::parse::<PaymentProvider>)
            .transpose()
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        Ok(domain_payment::CreatePaymentRequest {
            provider,
            amount: self.amount.to_money()?,
            order_name: self.order_name,
        })
    }
}

/// Client-side checkout result; Toss sends `payment_key` and `amount`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1, max = 200))]
    pub payment_key: Option<String>,
    #[validate(nested)]
    pub amount: Option<MoneyDto>,
}

impl ConfirmPaymentRequest {
    pub fn into_domain(self) -> Result<ConfirmRequest, ApiError> {
        self.validate()?;
        Ok(ConfirmRequest {
            payment_key: self.payment_key,
            amount: self.amount.as_ref().map(MoneyDto::to_money).transpose()?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentCreatedResponse {
    pub payment_id: Uuid,
    pub provider: String,
    pub provider_order_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub amount: MoneyDto,
    pub superseded: Vec<Uuid>,
}

impl From<PaymentCreated> for PaymentCreatedResponse {
    fn from(created: PaymentCreated) -> Self {
        Self {
            payment_id: created.payment_id.into(),
            provider: created.provider.as_str().to_string(),
            provider_order_ref: created.provider_order_ref,
            client_secret: created.client_secret,
            amount: created.amount.into(),
            superseded: created.superseded.into_iter().map(Uuid::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub provider: String,
    pub status: String,
    pub amount: MoneyDto,
    pub captured_amount: MoneyDto,
    pub refunded_amount: MoneyDto,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id.into(),
            booking_id: payment.booking_id.into(),
            provider: payment.provider.as_str().to_string(),
            status: payment.status.as_str().to_string(),
            amount: payment.amount.into(),
            captured_amount: payment.captured_amount.into(),
            refunded_amount: payment.refunded_amount.into(),
            created_at: payment.created_at,
            confirmed_at: payment.confirmed_at,
            paid_at: payment.paid_at,
            cancelled_at: payment.cancelled_at,
            refunded_at: payment.refunded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    /// `applied`, `already_applied` or `reconciliation_required`
    pub outcome: &'static str,
    pub payment: PaymentResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
}

impl From<ConfirmOutcome> for ConfirmPaymentResponse {
    fn from(outcome: ConfirmOutcome) -> Self {
        let payment = PaymentResponse::from(outcome.payment());
        let (outcome, alert_id) = match outcome {
            ConfirmOutcome::Applied(_) => ("applied", None),
            ConfirmOutcome::AlreadyApplied(_) => ("already_applied", None),
            ConfirmOutcome::ReconciliationRequired { alert_id, .. } => {
                ("reconciliation_required", Some(alert_id.to_string()))
            }
        };
        Self {
            outcome,
            payment,
            alert_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub payment_id: Uuid,
    pub captured_amount: MoneyDto,
    pub status: String,
    pub already_captured: bool,
}

impl From<CaptureResult> for CaptureResponse {
    fn from(result: CaptureResult) -> Self {
        Self {
            payment_id: result.payment_id.into(),
            captured_amount: result.captured_amount.into(),
            status: result.status.as_str().to_string(),
            already_captured: result.already_captured,
        }
    }
}

/// Acknowledgement returned to the provider
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_request_parses_provider() {
        let request = CreatePaymentRequest {
            provider: Some("toss".to_string()),
            amount: MoneyDto {
                amount: dec!(80000),
                currency: "KRW".to_string(),
            },
            order_name: "Knee rehabilitation".to_string(),
        };
        let domain = request.into_domain().unwrap();
        assert_eq!(domain.provider, Some(PaymentProvider::Toss));
        assert_eq!(domain.amount, core_kernel::Money::krw(80_000));
    }

    #[test]
    fn test_create_request_rejects_unknown_provider_and_empty_name() {
        let unknown = CreatePaymentRequest {
            provider: Some("paypal".to_string()),
            amount: MoneyDto {
                amount: dec!(80000),
                currency: "KRW".to_string(),
            },
            order_name: "Session".to_string(),
        };
        assert!(matches!(unknown.into_domain(), Err(ApiError::Validation(_))));

        let empty = CreatePaymentRequest {
            provider: None,
            amount: MoneyDto {
                amount: dec!(80000),
                currency: "KRW".to_string(),
            },
            order_name: String::new(),
        };
        assert!(matches!(empty.into_domain(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_empty_confirm_request_is_stripe_style() {
        let confirm = ConfirmPaymentRequest::default().into_domain().unwrap();
        assert_eq!(confirm, ConfirmRequest::default());
    }
}

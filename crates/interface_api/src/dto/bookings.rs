//! Booking DTOs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use domain_booking::Booking;
use domain_payment::{CancelRequest, CancellationFee, CancellationResult, RejectionResult, UnpaidCleanup};

use super::MoneyDto;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelBookingRequest {
    #[validate(length(max = 200, message = "reason must be at most 200 characters"))]
    pub reason: Option<String>,
    #[validate(length(max = 1000, message = "notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}

impl CancelBookingRequest {
    pub fn into_domain(self) -> Result<CancelRequest, ApiError> {
        self.validate()?;
        Ok(CancelRequest {
            reason: self.reason,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RejectBookingRequest {
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub trainer_id: Option<Uuid>,
    pub kind: String,
    pub status: String,
    pub scheduled_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub total_price: MoneyDto,
    pub cancellation_reason: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id.into(),
            customer_id: booking.customer_id.into(),
            trainer_id: booking.trainer_id.map(Uuid::from),
            kind: booking.kind.as_str().to_string(),
            status: booking.status.as_str().to_string(),
            scheduled_at: booking.scheduled_at,
            ends_at: booking.ends_at,
            total_price: booking.total_price.into(),
            cancellation_reason: booking.cancellation_reason,
            confirmed_at: booking.confirmed_at,
            started_at: booking.started_at,
            completed_at: booking.completed_at,
            cancelled_at: booking.cancelled_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Fee preview; rates are percentages
#[derive(Debug, Serialize)]
pub struct CancellationQuoteResponse {
    pub tier: &'static str,
    pub tier_description: &'static str,
    pub fee_rate: Decimal,
    pub refund_rate: Decimal,
    pub fee_amount: MoneyDto,
    pub refund_amount: MoneyDto,
    pub hours_until: Decimal,
    pub days_until: Decimal,
    pub can_cancel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<CancellationFee> for CancellationQuoteResponse {
    fn from(fee: CancellationFee) -> Self {
        Self {
            tier: fee.tier.as_str(),
            tier_description: fee.tier.describe(),
            fee_rate: fee.fee_rate.as_percentage(),
            refund_rate: fee.refund_rate.as_percentage(),
            fee_amount: fee.fee_amount.into(),
            refund_amount: fee.refund_amount.into(),
            hours_until: fee.hours_until,
            days_until: fee.days_until,
            can_cancel: fee.can_cancel,
            reason: fee.reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    /// Settlement path, e.g. `hold_released` or `partial_refund`
    pub branch: &'static str,
    pub refund_amount: MoneyDto,
    pub fee_amount: MoneyDto,
    pub message: String,
    pub fee: CancellationQuoteResponse,
}

impl From<CancellationResult> for CancellationResponse {
    fn from(result: CancellationResult) -> Self {
        Self {
            booking_id: result.booking_id.into(),
            payment_id: result.payment_id.into(),
            branch: result.branch.as_str(),
            refund_amount: result.refund_amount.into(),
            fee_amount: result.fee_amount.into(),
            message: result.message,
            fee: result.fee.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RejectionResponse {
    pub booking_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub refund_amount: MoneyDto,
}

impl From<RejectionResult> for RejectionResponse {
    fn from(result: RejectionResult) -> Self {
        Self {
            booking_id: result.booking_id.into(),
            payment_id: result.payment_id.map(Uuid::from),
            refund_amount: result.refund_amount.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnpaidCleanupResponse {
    pub booking_id: Uuid,
    pub deleted_payments: Vec<Uuid>,
}

impl From<UnpaidCleanup> for UnpaidCleanupResponse {
    fn from(cleanup: UnpaidCleanup) -> Self {
        Self {
            booking_id: cleanup.booking_id.into(),
            deleted_payments: cleanup
                .deleted_payments
                .iter()
                .map(|payment| Uuid::from(payment.id))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use core_kernel::Money;
    use domain_payment::cancellation_fee;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_reports_percentages() {
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let fee = cancellation_fee(now + Duration::days(2), Money::krw(80_000), now);
        let quote = CancellationQuoteResponse::from(fee);

        assert_eq!(quote.tier, "half_fee");
        assert_eq!(quote.fee_rate, dec!(50));
        assert_eq!(quote.fee_amount.amount, dec!(40000));
        assert!(quote.can_cancel);
    }

    #[test]
    fn test_overlong_reason_is_rejected() {
        let request = CancelBookingRequest {
            reason: Some("x".repeat(201)),
            notes: None,
        };
        assert!(matches!(request.into_domain(), Err(ApiError::Validation(_))));
    }
}

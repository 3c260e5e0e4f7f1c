//! Test Data Builders
//!
//! Builders for bookings and payments in any lifecycle status. Tests specify
//! only the fields they care about; everything else gets a fixture default.
//! Statuses are set directly, bypassing the transition rules, so a test can
//! seed a store with states that would take several service calls to reach.

use chrono::{DateTime, Duration, Utc};
use core_kernel::{Money, PaymentId, UserId};
use domain_booking::{Booking, BookingKind, BookingStatus};
use domain_payment::{Payment, PaymentProvider, PaymentStatus, ProviderRef};

use crate::fixtures::{IdFixtures, MoneyFixtures, TemporalFixtures};

/// Builder for constructing test bookings
pub struct TestBookingBuilder {
    customer_id: UserId,
    trainer_id: Option<UserId>,
    kind: BookingKind,
    status: BookingStatus,
    scheduled_at: DateTime<Utc>,
    length: Duration,
    total_price: Money,
    created_at: DateTime<Utc>,
}

impl Default for TestBookingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBookingBuilder {
    /// A direct booking three days out, awaiting payment
    pub fn new() -> Self {
        Self {
            customer_id: IdFixtures::customer_id(),
            trainer_id: Some(IdFixtures::trainer_id()),
            kind: BookingKind::Direct,
            status: BookingStatus::PendingPayment,
            scheduled_at: TemporalFixtures::session_in(Duration::days(3)),
            length: TemporalFixtures::session_length(),
            total_price: MoneyFixtures::session_price(),
            created_at: TemporalFixtures::now(),
        }
    }

    pub fn with_customer(mut self, id: UserId) -> Self {
        self.customer_id = id;
        self
    }

    pub fn with_trainer(mut self, id: UserId) -> Self {
        self.trainer_id = Some(id);
        self
    }

    /// A recommended booking with no trainer matched yet
    pub fn recommended(mut self) -> Self {
        self.kind = BookingKind::Recommended;
        self.trainer_id = None;
        self
    }

    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.status = status;
        self
    }

    /// Schedules the session `lead` after the fixture "now"
    pub fn starting_in(mut self, lead: Duration) -> Self {
        self.scheduled_at = TemporalFixtures::session_in(lead);
        self
    }

    pub fn with_price(mut self, price: Money) -> Self {
        self.total_price = price;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Builds the booking
    ///
    /// # Panics
    ///
    /// Panics if the configured price or schedule is invalid.
    pub fn build(self) -> Booking {
        let mut booking = Booking::new(
            self.customer_id,
            self.kind,
            self.scheduled_at,
            self.scheduled_at + self.length,
            self.total_price,
            self.created_at,
        )
        .expect("test booking must be valid");
        booking.trainer_id = self.trainer_id;
        booking.status = self.status;
        match self.status {
            BookingStatus::Confirmed => booking.confirmed_at = Some(self.created_at),
            BookingStatus::InProgress => {
                booking.confirmed_at = Some(self.created_at);
                booking.started_at = Some(self.scheduled_at);
            }
            BookingStatus::Completed => {
                booking.confirmed_at = Some(self.created_at);
                booking.started_at = Some(self.scheduled_at);
                booking.completed_at = Some(self.scheduled_at + self.length);
            }
            BookingStatus::Cancelled | BookingStatus::Rejected => {
                booking.cancelled_at = Some(self.created_at)
            }
            _ => {}
        }
        booking
    }
}

/// Builder for constructing test payments against a booking
pub struct TestPaymentBuilder {
    id: PaymentId,
    provider: PaymentProvider,
    provider_ref: Option<ProviderRef>,
    status: PaymentStatus,
    captured: Option<Money>,
    refunded: Option<Money>,
    created_at: DateTime<Utc>,
}

impl Default for TestPaymentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPaymentBuilder {
    /// A pending Stripe payment
    pub fn new() -> Self {
        Self {
            id: PaymentId::new_v7(),
            provider: PaymentProvider::Stripe,
            provider_ref: None,
            status: PaymentStatus::Pending,
            captured: None,
            refunded: None,
            created_at: TemporalFixtures::now(),
        }
    }

    pub fn stripe(mut self) -> Self {
        self.provider = PaymentProvider::Stripe;
        self
    }

    pub fn toss(mut self) -> Self {
        self.provider = PaymentProvider::Toss;
        self
    }

    pub fn with_id(mut self, id: PaymentId) -> Self {
        self.id = id;
        self
    }

    pub fn with_provider_ref(mut self, provider_ref: ProviderRef) -> Self {
        self.provider_ref = Some(provider_ref);
        self
    }

    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_captured(mut self, amount: Money) -> Self {
        self.captured = Some(amount);
        self
    }

    pub fn with_refunded(mut self, amount: Money) -> Self {
        self.refunded = Some(amount);
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Builds the payment for `booking`
    ///
    /// Provider references default to ids derived from the payment id, so
    /// payments built in one test never share a correlation key.
    pub fn build(self, booking: &Booking) -> Payment {
        let suffix = self.id.as_uuid().simple().to_string();
        let provider_ref = self.provider_ref.unwrap_or_else(|| match self.provider {
            PaymentProvider::Stripe => ProviderRef::ManualCapture {
                intent_id: format!("pi_{}", suffix),
                client_secret: Some(format!("pi_{}_secret", suffix)),
            },
            PaymentProvider::Toss => ProviderRef::ImmediateCapture {
                order_id: format!("order_{}", suffix),
                payment_key: None,
            },
        });

        let mut payment = Payment::new(self.id, booking, self.provider, provider_ref, self.created_at);
        payment.status = self.status;
        let at = self.created_at;
        match self.status {
            PaymentStatus::Held => payment.confirmed_at = Some(at),
            PaymentStatus::Paid | PaymentStatus::PartiallyCaptured => {
                payment.confirmed_at = Some(at);
                payment.paid_at = Some(at);
                payment.captured_amount = payment.amount;
            }
            PaymentStatus::Cancelled | PaymentStatus::Failed => payment.cancelled_at = Some(at),
            PaymentStatus::Refunded => {
                payment.confirmed_at = Some(at);
                payment.paid_at = Some(at);
                payment.captured_amount = payment.amount;
                payment.refunded_amount = payment.amount;
                payment.refunded_at = Some(at);
            }
            PaymentStatus::Pending => {}
        }
        if let Some(captured) = self.captured {
            payment.captured_amount = captured;
        }
        if let Some(refunded) = self.refunded {
            payment.refunded_amount = refunded;
        }
        payment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_builder_defaults() {
        let booking = TestBookingBuilder::new().build();
        assert_eq!(booking.status, BookingStatus::PendingPayment);
        assert_eq!(booking.kind, BookingKind::Direct);
        assert_eq!(booking.trainer_id, Some(IdFixtures::trainer_id()));
        assert_eq!(booking.ends_at - booking.scheduled_at, Duration::minutes(50));
    }

    #[test]
    fn test_recommended_booking_has_no_trainer() {
        let booking = TestBookingBuilder::new().recommended().build();
        assert_eq!(booking.kind, BookingKind::Recommended);
        assert!(booking.trainer_id.is_none());
    }

    #[test]
    fn test_paid_toss_payment_is_fully_captured() {
        let booking = TestBookingBuilder::new().build();
        let payment = TestPaymentBuilder::new()
            .toss()
            .with_status(PaymentStatus::Paid)
            .build(&booking);
        assert_eq!(payment.captured_amount, booking.total_price);
        assert!(payment.correlation_key().starts_with("order_"));
    }

    #[test]
    fn test_payments_get_distinct_correlation_keys() {
        let booking = TestBookingBuilder::new().build();
        let a = TestPaymentBuilder::new().build(&booking);
        let b = TestPaymentBuilder::new().build(&booking);
        assert_ne!(a.correlation_key(), b.correlation_key());
    }
}

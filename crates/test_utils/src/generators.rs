//! Property-Based Test Generators
//!
//! Proptest strategies for generating random test data that maintains
//! domain invariants.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::{Currency, Money};
use domain_booking::BookingKind;
use domain_payment::{PaymentProvider, PaymentStatus};
use proptest::prelude::*;

/// Strategy for session prices in won, from 1,000 to 1,000,000
pub fn krw_price_strategy() -> impl Strategy<Value = Money> {
    (1_000i64..=1_000_000i64).prop_map(Money::krw)
}

/// Strategy for prices in any supported currency, in minor units
pub fn price_strategy() -> impl Strategy<Value = Money> {
    (1i64..100_000_000i64, currency_strategy())
        .prop_map(|(minor, currency)| Money::from_minor(minor, currency))
}

pub fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::KRW),
        Just(Currency::USD),
        Just(Currency::JPY),
        Just(Currency::EUR),
    ]
}

/// Strategy for lead times between 30 days before and 2 days after the session
pub fn lead_time_strategy() -> impl Strategy<Value = Duration> {
    (-2 * 24 * 3_600_000i64..30 * 24 * 3_600_000i64).prop_map(Duration::milliseconds)
}

/// Strategy for strictly positive lead times, up to 30 days
pub fn future_lead_time_strategy() -> impl Strategy<Value = Duration> {
    (1i64..30 * 24 * 3_600_000i64).prop_map(Duration::milliseconds)
}

/// Strategy for instants in 2025
pub fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 24 * 3600).prop_map(|secs| {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    })
}

pub fn booking_kind_strategy() -> impl Strategy<Value = BookingKind> {
    prop_oneof![Just(BookingKind::Direct), Just(BookingKind::Recommended)]
}

pub fn provider_strategy() -> impl Strategy<Value = PaymentProvider> {
    prop_oneof![Just(PaymentProvider::Stripe), Just(PaymentProvider::Toss)]
}

pub fn payment_status_strategy() -> impl Strategy<Value = PaymentStatus> {
    proptest::sample::select(PaymentStatus::ALL.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn krw_prices_are_positive(price in krw_price_strategy()) {
            prop_assert!(price.is_positive());
            prop_assert_eq!(price.currency(), Currency::KRW);
        }

        #[test]
        fn future_lead_times_are_positive(lead in future_lead_time_strategy()) {
            prop_assert!(lead > Duration::zero());
        }
    }
}

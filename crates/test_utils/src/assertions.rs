//! Custom Test Assertions
//!
//! Assertion helpers for money, cancellation fees and payment audit trails
//! that give more meaningful failure messages than bare `assert_eq!`.

use core_kernel::Money;
use domain_payment::{CancellationFee, Payment, PaymentEvent, PaymentEventType, PaymentStatus};

/// Asserts that two Money values have the same currency and amount
pub fn assert_money_eq(actual: &Money, expected: &Money) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );
    assert_eq!(
        actual.amount(),
        expected.amount(),
        "Money amounts differ: actual={}, expected={}",
        actual,
        expected
    );
}

/// Asserts that a Money value is zero
pub fn assert_money_zero(money: &Money) {
    assert!(money.is_zero(), "Expected zero money, got {}", money);
}

/// Asserts that money values sum to a total
pub fn assert_money_sum_equals(parts: &[Money], total: &Money) {
    let mut sum = Money::zero(total.currency());
    for part in parts {
        sum = sum
            .checked_add(part)
            .unwrap_or_else(|e| panic!("Cannot sum {} into {}: {}", part, sum, e));
    }
    assert_money_eq(&sum, total);
}

/// Asserts that a fee splits `total` exactly into fee and refund
pub fn assert_fee_splits(fee: &CancellationFee, total: &Money) {
    assert_money_sum_equals(&[fee.fee_amount, fee.refund_amount], total);
    assert_eq!(
        fee.fee_rate.as_decimal() + fee.refund_rate.as_decimal(),
        rust_decimal::Decimal::ONE,
        "Fee rate {} and refund rate {} do not sum to one",
        fee.fee_rate,
        fee.refund_rate
    );
}

/// Asserts a payment's status with its id in the failure message
pub fn assert_payment_status(payment: &Payment, expected: PaymentStatus) {
    assert_eq!(
        payment.status, expected,
        "Payment {} is {}, expected {}",
        payment.id, payment.status, expected
    );
}

/// Asserts that the audit trail holds exactly these event types, in order
pub fn assert_event_trail(events: &[PaymentEvent], expected: &[PaymentEventType]) {
    let actual: Vec<PaymentEventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(actual, expected, "Unexpected payment event trail");
}

/// Asserts that every event's `from_status` matches the previous event's `to_status`
pub fn assert_event_chain_consistent(events: &[PaymentEvent]) {
    for pair in events.windows(2) {
        assert_eq!(
            pair[1].from_status,
            Some(pair[0].to_status),
            "Event {} starts from {:?} but the previous event ended in {}",
            pair[1].id,
            pair[1].from_status,
            pair[0].to_status
        );
    }
}

/// Asserts that a result is Ok and returns the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Asserts that an error matches a specific variant
#[macro_export]
macro_rules! assert_err_variant {
    ($result:expr, $pattern:pat) => {
        match $result {
            Ok(value) => panic!("Expected Err matching {}, got Ok({:?})", stringify!($pattern), value),
            Err(ref e) => {
                assert!(
                    matches!(e, $pattern),
                    "Error {:?} does not match pattern {}",
                    e,
                    stringify!($pattern)
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::{Currency, PaymentId};
    use domain_payment::{cancellation_fee, EventSource};

    use crate::fixtures::{MoneyFixtures, TemporalFixtures};

    #[test]
    #[should_panic(expected = "Currency mismatch")]
    fn test_assert_money_eq_currency_mismatch() {
        assert_money_eq(&Money::krw(100), &Money::from_minor(10_000, Currency::USD));
    }

    #[test]
    fn test_fee_split_for_every_tier() {
        for lead in TemporalFixtures::tier_lead_times() {
            let total = MoneyFixtures::odd_price();
            let fee = cancellation_fee(
                TemporalFixtures::session_in(lead),
                total,
                TemporalFixtures::now(),
            );
            assert_fee_splits(&fee, &total);
        }
    }

    #[test]
    fn test_event_chain() {
        let id = PaymentId::new_v7();
        let at = TemporalFixtures::now();
        let events = vec![
            PaymentEvent::new(id, PaymentEventType::Created, None, PaymentStatus::Pending, EventSource::Api, at),
            PaymentEvent::new(
                id,
                PaymentEventType::Confirmed,
                Some(PaymentStatus::Pending),
                PaymentStatus::Held,
                EventSource::Api,
                at,
            ),
        ];
        assert_event_chain_consistent(&events);
        assert_event_trail(&events, &[PaymentEventType::Created, PaymentEventType::Confirmed]);
    }

    #[test]
    #[should_panic(expected = "Unexpected payment event trail")]
    fn test_event_trail_mismatch() {
        assert_event_trail(&[], &[PaymentEventType::Created]);
    }
}

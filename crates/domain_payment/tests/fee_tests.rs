//! Property tests for the cancellation fee schedule

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{Currency, Money, Rate};
use domain_payment::{cancellation_fee, FeeTier};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap()
}

// ============================================================================
// Schedule Tests
// ============================================================================

mod schedule_tests {
    use super::*;

    #[test]
    fn test_scenarios() {
        let total = Money::krw(100_000);
        let cases = [
            (Duration::days(10), 0, 100_000),
            (Duration::days(5), 30_000, 70_000),
            (Duration::days(2), 50_000, 50_000),
            (Duration::hours(12), 80_000, 20_000),
        ];
        for (lead, fee, refund) in cases {
            let result = cancellation_fee(now() + lead, total, now());
            assert_eq!(result.fee_amount, Money::krw(fee), "lead {:?}", lead);
            assert_eq!(result.refund_amount, Money::krw(refund), "lead {:?}", lead);
            assert!(result.can_cancel);
        }
    }

    #[test]
    fn test_yesterday_is_not_cancellable() {
        let result = cancellation_fee(now() - Duration::days(1), Money::krw(55_000), now());
        assert_eq!(result.tier, FeeTier::PastDue);
        assert!(!result.can_cancel);
        assert_eq!(result.fee_amount, Money::krw(55_000));
        assert!(result.refund_amount.is_zero());
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_three_days_exactly_is_thirty_percent() {
        let result = cancellation_fee(now() + Duration::days(3), Money::krw(100_000), now());
        assert_eq!(result.fee_rate, Rate::new(dec!(0.30)));
        assert_eq!(result.days_until, dec!(3.00));
    }

    #[test]
    fn test_usd_rounds_to_cents() {
        let total = Money::new(dec!(99.99), Currency::USD);
        let result = cancellation_fee(now() + Duration::days(5), total, now());
        // 30% of 99.99 = 29.997
        assert_eq!(result.fee_amount, Money::new(dec!(30.00), Currency::USD));
        assert_eq!(result.refund_amount, Money::new(dec!(69.99), Currency::USD));
    }

    #[test]
    fn test_half_won_rounds_up() {
        // 50% of 12,345 = 6,172.5
        let result = cancellation_fee(now() + Duration::days(2), Money::krw(12_345), now());
        assert_eq!(result.fee_amount, Money::krw(6_173));
        assert_eq!(result.refund_amount, Money::krw(6_172));
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_fee_plus_refund_is_total(won in 1i64..10_000_000, lead_ms in -10_000_000_000i64..2_000_000_000_000) {
        let total = Money::krw(won);
        let result = cancellation_fee(now() + Duration::milliseconds(lead_ms), total, now());
        prop_assert_eq!(result.fee_amount.amount() + result.refund_amount.amount(), total.amount());
        prop_assert!(result.fee_amount.amount() >= Decimal::ZERO);
        prop_assert!(result.refund_amount.amount() >= Decimal::ZERO);
    }

    #[test]
    fn prop_fee_rate_non_increasing_with_lead(won in 1i64..10_000_000, a in 0i64..1_000_000_000, b in 0i64..1_000_000_000) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        let total = Money::krw(won);
        let near = cancellation_fee(now() + Duration::milliseconds(near), total, now());
        let far = cancellation_fee(now() + Duration::milliseconds(far), total, now());
        prop_assert!(far.fee_rate <= near.fee_rate);
    }

    #[test]
    fn prop_past_due_charges_everything(won in 1i64..10_000_000, ago_ms in 0i64..1_000_000_000) {
        let total = Money::krw(won);
        let result = cancellation_fee(now() - Duration::milliseconds(ago_ms), total, now());
        prop_assert!(!result.can_cancel);
        prop_assert_eq!(result.fee_amount, total);
    }
}

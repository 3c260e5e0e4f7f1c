//! Unit tests for the Money module
//!
//! Focus on the behaviours payment code leans on: minor-unit conversion,
//! half-up rounding and rate application.

use core_kernel::{Currency, Money, MoneyError, Rate};
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_krw_has_no_minor_unit() {
        let m = Money::krw(100_000);
        assert_eq!(m.amount(), dec!(100000));
        assert_eq!(m.currency(), Currency::KRW);
        assert_eq!(Currency::KRW.decimal_places(), 0);
    }

    #[test]
    fn test_new_rounds_to_four_decimal_places() {
        let m = Money::new(dec!(100.123456789), Currency::USD);
        assert_eq!(m.amount(), dec!(100.1235));
    }

    #[test]
    fn test_zero() {
        let m = Money::zero(Currency::KRW);
        assert!(m.is_zero());
        assert!(!m.is_positive());
    }
}

mod minor_units {
    use super::*;

    #[test]
    fn test_to_minor_usd_cents() {
        let m = Money::new(dec!(12.34), Currency::USD);
        assert_eq!(m.to_minor().unwrap(), 1234);
    }

    #[test]
    fn test_to_minor_rounds_half_up() {
        let m = Money::new(dec!(0.5), Currency::KRW);
        assert_eq!(m.to_minor().unwrap(), 1);

        let m = Money::new(dec!(2.5), Currency::KRW);
        assert_eq!(m.to_minor().unwrap(), 3);
    }

    #[test]
    fn test_lowercase_code_for_stripe() {
        assert_eq!(Currency::KRW.lowercase_code(), "krw");
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_checked_sub() {
        let total = Money::krw(100_000);
        let fee = Money::krw(30_000);
        assert_eq!(total.checked_sub(&fee).unwrap(), Money::krw(70_000));
    }

    #[test]
    fn test_checked_sub_currency_mismatch() {
        let krw = Money::krw(100);
        let usd = Money::from_minor(100, Currency::USD);
        assert!(matches!(
            krw.checked_sub(&usd),
            Err(MoneyError::CurrencyMismatch(_, _))
        ));
    }

    #[test]
    fn test_checked_add_same_currency() {
        assert_eq!(Money::krw(1).checked_add(&Money::krw(2)).unwrap(), Money::krw(3));
    }
}

mod rates {
    use super::*;

    #[test]
    fn test_rate_display() {
        assert_eq!(Rate::new(dec!(0.30)).to_string(), "30%");
        assert_eq!(Rate::ONE.to_string(), "100%");
    }

    #[test]
    fn test_rate_apply_then_round() {
        let rate = Rate::new(dec!(0.3));
        let fee = rate.apply(&Money::krw(12_345)).round_half_up();
        // 3703.5 rounds up
        assert_eq!(fee, Money::krw(3_704));
    }

    #[test]
    fn test_rate_ordering() {
        assert!(Rate::ZERO < Rate::new(dec!(0.3)));
        assert!(Rate::new(dec!(0.8)) < Rate::ONE);
    }
}

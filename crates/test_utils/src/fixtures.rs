//! Pre-built Test Fixtures
//!
//! Consistent, predictable values for unit and integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::{Currency, Money, UserId};
use uuid::Uuid;

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// Standard price of one rehabilitation session
    pub fn session_price() -> Money {
        Money::krw(80_000)
    }

    /// A price whose percentage fees need rounding
    pub fn odd_price() -> Money {
        Money::krw(33_335)
    }

    pub fn krw_zero() -> Money {
        Money::zero(Currency::KRW)
    }

    /// A USD amount for currency mismatch tests
    pub fn usd_100() -> Money {
        Money::from_minor(10_000, Currency::USD)
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Reference "now" for fee and window calculations (2025-05-01 12:00 UTC)
    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    /// Session start `lead` after [`TemporalFixtures::now`]
    pub fn session_in(lead: Duration) -> DateTime<Utc> {
        Self::now() + lead
    }

    /// Standard session length
    pub fn session_length() -> Duration {
        Duration::minutes(50)
    }

    /// One lead time inside each fee tier, from free to past due
    pub fn tier_lead_times() -> [Duration; 5] {
        [
            Duration::days(10),
            Duration::days(5),
            Duration::days(2),
            Duration::hours(5),
            -Duration::hours(1),
        ]
    }
}

/// Fixture for identifier test data
pub struct IdFixtures;

impl IdFixtures {
    pub fn customer_id() -> UserId {
        UserId::from(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0001))
    }

    pub fn trainer_id() -> UserId {
        UserId::from(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0002))
    }

    pub fn admin_id() -> UserId {
        UserId::from(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0003))
    }
}

/// Provider-side references used by gateway mocks and webhook tests
pub struct ProviderFixtures;

impl ProviderFixtures {
    pub fn intent_id() -> &'static str {
        "pi_3PtestIntent0001"
    }

    pub fn order_id() -> &'static str {
        "order_test_0001"
    }

    pub fn payment_key() -> &'static str {
        "tpk_test_0001"
    }

    pub fn stripe_event_id() -> &'static str {
        "evt_test_0001"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_ids_are_distinct() {
        assert_ne!(IdFixtures::customer_id(), IdFixtures::trainer_id());
        assert_ne!(IdFixtures::trainer_id(), IdFixtures::admin_id());
    }

    #[test]
    fn test_tier_lead_times_are_descending() {
        let leads = TemporalFixtures::tier_lead_times();
        assert!(leads.windows(2).all(|w| w[0] > w[1]));
    }
}

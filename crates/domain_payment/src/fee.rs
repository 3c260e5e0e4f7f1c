//! Cancellation fee calculator
//!
//! Pure function of the session start, the amount paid and the evaluation
//! instant. Tiers use inclusive lower bounds on whole milliseconds so that a
//! cancellation exactly seven days out is free.
//!
//! | Time until service | Fee rate | Refund rate |
//! |---|---|---|
//! | >= 7 days | 0% | 100% |
//! | 3-7 days | 30% | 70% |
//! | 1-3 days | 50% | 50% |
//! | < 24 hours | 80% | 20% |
//! | Past due | 100% | 0% (not cancellable) |
//!
//! Fee amounts round half-up to the currency's minor unit; the refund is
//! always `total - fee`, so the two always sum to the total.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{Money, Rate};

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Fee schedule tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    /// Seven or more days out
    FullRefund,
    /// Three to seven days out
    ThirtyPercent,
    /// One to three days out
    HalfFee,
    /// Under a day out
    EightyPercent,
    /// Session already started
    PastDue,
}

impl FeeTier {
    /// Tier for a positive lead time in milliseconds
    fn for_lead_time(delta_ms: i64) -> FeeTier {
        if delta_ms <= 0 {
            FeeTier::PastDue
        } else if delta_ms >= 7 * MS_PER_DAY {
            FeeTier::FullRefund
        } else if delta_ms >= 3 * MS_PER_DAY {
            FeeTier::ThirtyPercent
        } else if delta_ms >= MS_PER_DAY {
            FeeTier::HalfFee
        } else {
            FeeTier::EightyPercent
        }
    }

    pub fn fee_rate(&self) -> Rate {
        match self {
            FeeTier::FullRefund => Rate::ZERO,
            FeeTier::ThirtyPercent => Rate::new(dec!(0.3)),
            FeeTier::HalfFee => Rate::new(dec!(0.5)),
            FeeTier::EightyPercent => Rate::new(dec!(0.8)),
            FeeTier::PastDue => Rate::ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeTier::FullRefund => "full_refund",
            FeeTier::ThirtyPercent => "thirty_percent",
            FeeTier::HalfFee => "half_fee",
            FeeTier::EightyPercent => "eighty_percent",
            FeeTier::PastDue => "past_due",
        }
    }

    /// Short user-facing description of the tier
    pub fn describe(&self) -> &'static str {
        match self {
            FeeTier::FullRefund => "7 or more days before the session: full refund",
            FeeTier::ThirtyPercent => "3 to 7 days before the session: 30% fee",
            FeeTier::HalfFee => "1 to 3 days before the session: 50% fee",
            FeeTier::EightyPercent => "less than 24 hours before the session: 80% fee",
            FeeTier::PastDue => "the session has already started",
        }
    }
}

/// Result of a fee computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationFee {
    pub tier: FeeTier,
    pub fee_rate: Rate,
    pub refund_rate: Rate,
    pub fee_amount: Money,
    pub refund_amount: Money,
    /// Whole hours until the session, truncated; zero when past due
    pub hours_until: Decimal,
    /// Days until the session, to two decimal places; zero when past due
    pub days_until: Decimal,
    pub can_cancel: bool,
    /// Why cancellation is refused, when it is
    pub reason: Option<String>,
}

impl CancellationFee {
    pub fn is_free(&self) -> bool {
        self.fee_rate.is_zero()
    }

    pub fn is_full_fee(&self) -> bool {
        self.fee_rate == Rate::ONE
    }
}

/// Computes the cancellation fee for a session starting at `scheduled_at`
pub fn cancellation_fee(
    scheduled_at: DateTime<Utc>,
    total: Money,
    now: DateTime<Utc>,
) -> CancellationFee {
    let delta_ms = (scheduled_at - now).num_milliseconds();
    let tier = FeeTier::for_lead_time(delta_ms);
    let fee_rate = tier.fee_rate();

    if tier == FeeTier::PastDue {
        return CancellationFee {
            tier,
            fee_rate,
            refund_rate: fee_rate.complement(),
            fee_amount: total,
            refund_amount: Money::zero(total.currency()),
            hours_until: Decimal::ZERO,
            days_until: Decimal::ZERO,
            can_cancel: false,
            reason: Some("The session has already started or passed and can no longer be cancelled.".to_string()),
        };
    }

    let fee_amount = fee_rate.apply(&total).round_half_up();
    let refund_amount = Money::new(total.amount() - fee_amount.amount(), total.currency());
    let hours_until = Decimal::from(delta_ms / MS_PER_HOUR);
    let days_until = (Decimal::from(delta_ms) / Decimal::from(MS_PER_DAY)).round_dp(2);

    CancellationFee {
        tier,
        fee_rate,
        refund_rate: fee_rate.complement(),
        fee_amount,
        refund_amount,
        hours_until,
        days_until,
        can_cancel: true,
        reason: None,
    }
}

//! Payment windows for unpaid bookings

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{Booking, BookingKind};

/// How long a booking may stay in `pending_payment` before it lapses
///
/// Expiry is evaluated at read time against the booking's creation instant;
/// nothing runs in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWindows {
    /// Customer picked the trainer directly
    pub direct_minutes: i64,
    /// Booking goes through matching, so the customer gets longer
    pub recommended_minutes: i64,
}

impl Default for PaymentWindows {
    fn default() -> Self {
        Self {
            direct_minutes: 15,
            recommended_minutes: 24 * 60,
        }
    }
}

impl PaymentWindows {
    pub fn new(direct_minutes: i64, recommended_minutes: i64) -> Self {
        Self {
            direct_minutes,
            recommended_minutes,
        }
    }

    /// Window length for a booking kind
    pub fn for_kind(&self, kind: BookingKind) -> Duration {
        match kind {
            BookingKind::Direct => Duration::minutes(self.direct_minutes),
            BookingKind::Recommended => Duration::minutes(self.recommended_minutes),
        }
    }

    /// The instant after which the booking can no longer be paid
    pub fn deadline(&self, booking: &Booking) -> DateTime<Utc> {
        booking.created_at + self.for_kind(booking.kind)
    }

    /// True when the booking is still unpaid and its window has closed
    pub fn is_expired(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        booking.status == crate::BookingStatus::PendingPayment && now >= self.deadline(booking)
    }
}

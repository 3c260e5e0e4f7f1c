//! Request handlers

pub mod bookings;
pub mod health;
pub mod payments;
pub mod webhooks;

use uuid::Uuid;

use core_kernel::{BookingId, PaymentId};

pub(crate) fn booking_id(id: Uuid) -> BookingId {
    BookingId::from_uuid(id)
}

pub(crate) fn payment_id(id: Uuid) -> PaymentId {
    PaymentId::from_uuid(id)
}

//! Who is acting on a booking
//!
//! Identity is resolved at the edge (JWT); the domain only sees an id and a role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::UserId;

use crate::booking::Booking;
use crate::error::BookingError;

/// Role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Trainer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Trainer => "trainer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "trainer" => Ok(Role::Trainer),
            "admin" => Ok(Role::Admin),
            other => Err(BookingError::Validation(format!("unknown role: {}", other))),
        }
    }
}

/// The authenticated caller of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn customer(id: UserId) -> Self {
        Self::new(id, Role::Customer)
    }

    pub fn trainer(id: UserId) -> Self {
        Self::new(id, Role::Trainer)
    }

    pub fn admin(id: UserId) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when this actor is the customer who made the booking
    pub fn owns(&self, booking: &Booking) -> bool {
        self.role == Role::Customer && booking.customer_id == self.id
    }

    /// True when this actor is the trainer assigned to the booking
    pub fn is_assigned_trainer(&self, booking: &Booking) -> bool {
        self.role == Role::Trainer && booking.trainer_id == Some(self.id)
    }

    /// Paying for a booking: the owning customer only
    pub fn ensure_can_pay(&self, booking: &Booking) -> Result<(), BookingError> {
        if self.owns(booking) {
            Ok(())
        } else {
            Err(BookingError::Forbidden(
                "only the booking's customer can pay for it".to_string(),
            ))
        }
    }

    /// Cancelling a booking: the owning customer or an admin
    pub fn ensure_can_cancel(&self, booking: &Booking) -> Result<(), BookingError> {
        if self.owns(booking) || self.is_admin() {
            Ok(())
        } else {
            Err(BookingError::Forbidden(
                "only the booking's customer or an admin can cancel it".to_string(),
            ))
        }
    }

    /// Approve, reject, start, complete, no-show and capture: the assigned
    /// trainer or an admin
    pub fn ensure_can_manage(&self, booking: &Booking) -> Result<(), BookingError> {
        if self.is_assigned_trainer(booking) || self.is_admin() {
            Ok(())
        } else {
            Err(BookingError::Forbidden(
                "only the assigned trainer or an admin can manage this booking".to_string(),
            ))
        }
    }

    /// Cleaning up an expired unpaid booking: the owning customer or an admin
    pub fn ensure_can_expire(&self, booking: &Booking) -> Result<(), BookingError> {
        self.ensure_can_cancel(booking)
    }
}

//! Booking aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{BookingId, Money, UserId};

use crate::error::BookingError;

/// Booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, waiting for the customer to pay
    PendingPayment,
    /// Paid (held or charged), waiting for trainer approval
    Pending,
    /// Approved by the trainer
    Confirmed,
    /// Session under way
    InProgress,
    /// Session delivered
    Completed,
    /// Cancelled by the customer or an admin
    Cancelled,
    /// Declined by the trainer
    Rejected,
    /// Customer did not attend
    NoShow,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 8] = [
        BookingStatus::PendingPayment,
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Rejected,
        BookingStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// No payment-affecting transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Cancelled
                | BookingStatus::Rejected
                | BookingStatus::NoShow
        )
    }

    /// Checks if transition is valid
    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (*self, target),
            (PendingPayment, Pending) |
            (PendingPayment, Cancelled) |
            (Pending, Confirmed) |
            (Pending, Rejected) |
            (Pending, Cancelled) |
            (Pending, NoShow) |
            (Confirmed, InProgress) |
            (Confirmed, Completed) |
            (Confirmed, Cancelled) |
            (Confirmed, NoShow) |
            (InProgress, Completed) |
            (InProgress, Cancelled) |
            (InProgress, NoShow)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BookingError::UnknownStatus(s.to_string()))
    }
}

/// How the trainer was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    /// Customer picked the trainer
    Direct,
    /// Trainer is assigned by auto-matching after payment
    Recommended,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Direct => "direct",
            BookingKind::Recommended => "recommended",
        }
    }
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingKind {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(BookingKind::Direct),
            "recommended" => Ok(BookingKind::Recommended),
            other => Err(BookingError::UnknownKind(other.to_string())),
        }
    }
}

/// A booked rehabilitation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique identifier
    pub id: BookingId,
    /// Customer who booked
    pub customer_id: UserId,
    /// Assigned trainer; empty for recommended bookings until matched
    pub trainer_id: Option<UserId>,
    /// Direct or recommended
    pub kind: BookingKind,
    /// Status
    pub status: BookingStatus,
    /// Session start
    pub scheduled_at: DateTime<Utc>,
    /// Session end
    pub ends_at: DateTime<Utc>,
    /// Total price of the session
    pub total_price: Money,
    /// Why the booking was cancelled or rejected
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Creates a booking awaiting payment
    pub fn new(
        customer_id: UserId,
        kind: BookingKind,
        scheduled_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        total_price: Money,
        created_at: DateTime<Utc>,
    ) -> Result<Self, BookingError> {
        if ends_at <= scheduled_at {
            return Err(BookingError::Validation(
                "session must end after it starts".to_string(),
            ));
        }
        if !total_price.is_positive() {
            return Err(BookingError::Validation(
                "total price must be positive".to_string(),
            ));
        }

        Ok(Self {
            id: BookingId::new_v7(),
            customer_id,
            trainer_id: None,
            kind,
            status: BookingStatus::PendingPayment,
            scheduled_at,
            ends_at,
            total_price,
            cancellation_reason: None,
            created_at,
            matched_at: None,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: created_at,
        })
    }

    /// Sets the assigned trainer
    pub fn with_trainer(mut self, trainer_id: UserId) -> Self {
        self.trainer_id = Some(trainer_id);
        self
    }

    /// Moves to `target`, stamping the matching lifecycle timestamp
    pub fn transition_to(
        &mut self,
        target: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if !self.status.can_transition_to(target) {
            return Err(BookingError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }

        match target {
            BookingStatus::Confirmed => self.confirmed_at = Some(at),
            BookingStatus::InProgress => self.started_at = Some(at),
            BookingStatus::Completed => self.completed_at = Some(at),
            BookingStatus::Cancelled | BookingStatus::Rejected => self.cancelled_at = Some(at),
            _ => {}
        }
        tracing::debug!(
            booking_id = %self.id,
            from = %self.status,
            to = %target,
            "Booking status transition"
        );
        self.status = target;
        self.updated_at = at;
        Ok(())
    }

    /// Cancels with a recorded reason
    pub fn cancel(
        &mut self,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        self.transition_to(BookingStatus::Cancelled, at)?;
        self.cancellation_reason = reason;
        Ok(())
    }

    /// Rejects with a recorded reason
    pub fn reject(
        &mut self,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        self.transition_to(BookingStatus::Rejected, at)?;
        self.cancellation_reason = reason;
        Ok(())
    }

    /// Records the trainer chosen by auto-matching
    pub fn assign_trainer(
        &mut self,
        trainer_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.kind != BookingKind::Recommended {
            return Err(BookingError::Validation(
                "only recommended bookings are matched".to_string(),
            ));
        }
        if self.status.is_terminal() {
            return Err(BookingError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: "matched".to_string(),
            });
        }
        self.trainer_id = Some(trainer_id);
        self.matched_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// True once the session start has passed
    pub fn has_started_by(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}

//! Append-only payment event log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{PaymentEventId, PaymentId};

use crate::error::PaymentError;
use crate::payment::PaymentStatus;

/// Kind of payment event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventType {
    Created,
    Confirmed,
    Captured,
    Cancelled,
    Failed,
    Refunded,
}

impl PaymentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventType::Created => "created",
            PaymentEventType::Confirmed => "confirmed",
            PaymentEventType::Captured => "captured",
            PaymentEventType::Cancelled => "cancelled",
            PaymentEventType::Failed => "failed",
            PaymentEventType::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentEventType {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PaymentEventType::Created),
            "confirmed" => Ok(PaymentEventType::Confirmed),
            "captured" => Ok(PaymentEventType::Captured),
            "cancelled" => Ok(PaymentEventType::Cancelled),
            "failed" => Ok(PaymentEventType::Failed),
            "refunded" => Ok(PaymentEventType::Refunded),
            other => Err(PaymentError::Validation(format!("unknown event type: {}", other))),
        }
    }
}

/// Where a state change came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EventSource {
    /// A synchronous API request
    Api,
    /// A provider webhook delivery
    Webhook { event_id: String },
    /// Housekeeping (superseded payments, expiry)
    System,
}

impl EventSource {
    pub fn webhook(event_id: impl Into<String>) -> Self {
        EventSource::Webhook {
            event_id: event_id.into(),
        }
    }

    pub fn webhook_event_id(&self) -> Option<&str> {
        match self {
            EventSource::Webhook { event_id } => Some(event_id),
            _ => None,
        }
    }
}

/// One entry in a payment's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: PaymentEventId,
    pub payment_id: PaymentId,
    pub event_type: PaymentEventType,
    /// Status the payment moved from
    pub from_status: Option<PaymentStatus>,
    /// Status the payment moved to
    pub to_status: PaymentStatus,
    pub source: EventSource,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(
        payment_id: PaymentId,
        event_type: PaymentEventType,
        from_status: Option<PaymentStatus>,
        to_status: PaymentStatus,
        source: EventSource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentEventId::new_v7(),
            payment_id,
            event_type,
            from_status,
            to_status,
            source,
            metadata: serde_json::Value::Null,
            created_at,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Webhook event id, when the change arrived through a webhook
    pub fn webhook_event_id(&self) -> Option<&str> {
        self.source.webhook_event_id()
    }
}

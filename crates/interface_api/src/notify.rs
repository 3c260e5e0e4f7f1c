//! Notification and matching sinks for the server binary
//!
//! Delivery channels (push, in-app inbox) and the trainer-matching engine
//! live outside this service; these implementations record the requests
//! as structured log events so downstream collectors can pick them up.

use async_trait::async_trait;
use tracing::info;

use core_kernel::{BookingId, PortError};
use domain_payment::{MatchingTrigger, Notification, NotificationSink};

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSink for LoggingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), PortError> {
        info!(
            target: "notifications",
            user_id = %notification.user_id,
            kind = ?notification.kind,
            title = %notification.title,
            link = ?notification.link,
            "{}",
            notification.message
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMatcher;

#[async_trait]
impl MatchingTrigger for LoggingMatcher {
    async fn request_matching(&self, booking_id: BookingId) -> Result<(), PortError> {
        info!(target: "matching", booking_id = %booking_id, "Trainer matching requested");
        Ok(())
    }
}

//! Tests for the booking-payment state machine

mod common;

use chrono::Duration;

use common::Harness;
use core_kernel::{Money, UserId};
use domain_booking::{Actor, BookingKind, BookingStatus};
use domain_payment::{
    ConfirmOutcome, ConfirmRequest, EventSource, GatewayError, IntentStatus, NotificationKind,
    PaymentError, PaymentEventType, PaymentProvider, PaymentStatus,
};

// ============================================================================
// Payment Creation Tests
// ============================================================================

mod creation_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_manual_payment_opens_hold() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;

        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();

        assert_eq!(created.provider, PaymentProvider::Stripe);
        assert!(created.provider_order_ref.starts_with("pi_"));
        assert!(created.client_secret.is_some());
        assert!(created.superseded.is_empty());
        assert_eq!(h.manual.call_count("create_hold").await, 1);

        let payment = h.payment(created.payment_id).await;
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(
            h.store.events_of_type(payment.id, PaymentEventType::Created).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_create_immediate_payment_makes_no_provider_call() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;

        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Toss))
            .await
            .unwrap();

        assert_eq!(created.provider_order_ref, created.payment_id.as_uuid().to_string());
        assert!(h.immediate.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_supersedes_pending_payment() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;

        let first = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();
        let second = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();

        assert_eq!(second.superseded, vec![first.payment_id]);
        let payments = h.store.payments_for(booking.id).await;
        let live: Vec<_> = payments
            .iter()
            .filter(|p| p.status != PaymentStatus::Cancelled)
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, second.payment_id);

        // Stale intent released best-effort
        assert_eq!(
            h.manual.intent_status(&first.provider_order_ref).await,
            Some(IntentStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn test_cannot_pay_twice() {
        let h = Harness::new();
        let (booking, _) = h.held_booking(Duration::days(10)).await;

        let err = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_amount_must_match_booking_price() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let mut order = h.order(PaymentProvider::Stripe);
        order.amount = Money::krw(1_000);

        let err = h
            .lifecycle
            .create_payment(&h.customer, booking.id, order)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert!(h.manual.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_only_owner_can_pay() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let stranger = Actor::customer(UserId::new());

        let err = h
            .lifecycle
            .create_payment(&stranger, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_expired_window_refuses_payment() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        h.clock.advance(Duration::minutes(15));

        let err = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_nothing_behind() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        h.manual
            .fail_next(GatewayError::Declined {
                code: "card_declined".to_string(),
                message: "Your card was declined".to_string(),
            })
            .await;

        let err = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Provider { retryable: false, .. }));
        assert!(h.store.payments_for(booking.id).await.is_empty());
    }
}

// ============================================================================
// Confirmation Tests
// ============================================================================

mod confirmation_tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_confirmation_holds_and_notifies_trainer() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(payment.status, PaymentStatus::Held);
        assert!(payment.confirmed_at.is_some());

        let sent = h.notifier.sent_to(h.trainer.id).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::BookingRequest);
    }

    #[tokio::test]
    async fn test_manual_confirmation_requires_authorization() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();

        let err = h
            .lifecycle
            .confirm_payment(&h.customer, created.payment_id, ConfirmRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::PendingPayment);
    }

    #[tokio::test]
    async fn test_immediate_confirmation_charges() {
        let h = Harness::new();
        let (booking, payment) = h.paid_booking(Duration::days(10)).await;

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.captured_amount, Money::krw(100_000));
        assert_eq!(payment.provider_ref.payment_key(), Some("tpk_test_1"));
        assert_eq!(h.immediate.call_count("confirm").await, 1);
    }

    #[tokio::test]
    async fn test_tampered_amount_is_rejected_before_charge() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Toss))
            .await
            .unwrap();

        let err = h
            .lifecycle
            .confirm_payment(
                &h.customer,
                created.payment_id,
                ConfirmRequest {
                    payment_key: Some("tpk".to_string()),
                    amount: Some(Money::krw(100)),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert!(h.immediate.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_recommended_booking_requests_matching() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Recommended, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();
        h.manual.authorize(&created.provider_order_ref).await;
        h.lifecycle
            .confirm_payment(&h.customer, created.payment_id, ConfirmRequest::default())
            .await
            .unwrap();

        assert_eq!(h.matcher.requested().await, vec![booking.id]);
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_confirmed_twice_is_noop() {
        let h = Harness::new();
        let (_, payment) = h.held_booking(Duration::days(10)).await;

        let again = h
            .lifecycle
            .apply_payment_confirmed(
                payment.id,
                domain_payment::Confirmation::Authorized,
                EventSource::webhook("evt_1"),
                None,
            )
            .await
            .unwrap();

        assert!(matches!(again, ConfirmOutcome::AlreadyApplied(_)));
        assert_eq!(
            h.store.events_of_type(payment.id, PaymentEventType::Confirmed).await.len(),
            1
        );
        assert_eq!(h.notifier.sent().await.len(), 1);
    }
}

// ============================================================================
// Transition Tests
// ============================================================================

mod transition_tests {
    use super::*;

    #[tokio::test]
    async fn test_approve_requires_secured_payment() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;

        let err = h.lifecycle.approve(&h.trainer, booking.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_approve_notifies_customer() {
        let h = Harness::new();
        let (booking, _) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;

        let sent = h.notifier.sent_to(h.customer.id).await;
        assert_eq!(sent.last().map(|n| n.kind), Some(NotificationKind::BookingConfirmed));
    }

    #[tokio::test]
    async fn test_only_assigned_trainer_manages() {
        let h = Harness::new();
        let (booking, _) = h.held_booking(Duration::days(10)).await;
        let other = Actor::trainer(UserId::new());

        let err = h.lifecycle.approve(&other, booking.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::Forbidden(_)));
        assert!(h.lifecycle.approve(&h.admin, booking.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_complete_captures_hold_in_full() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;
        h.lifecycle.start(&h.trainer, booking.id).await.unwrap();

        let result = h.lifecycle.complete(&h.trainer, booking.id).await.unwrap();

        assert!(!result.already_captured);
        assert_eq!(result.captured_amount, Money::krw(100_000));
        assert_eq!(result.status, PaymentStatus::Paid);
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::Completed);
        assert_eq!(h.payment(payment.id).await.status, PaymentStatus::Paid);
        assert_eq!(h.manual.call_count("capture").await, 1);
    }

    #[tokio::test]
    async fn test_complete_immediate_payment_skips_provider() {
        let h = Harness::new();
        let (booking, _) = h.paid_booking(Duration::days(10)).await;
        h.approve(booking.id).await;

        let result = h.lifecycle.complete(&h.trainer, booking.id).await.unwrap();
        assert!(result.already_captured);
        assert_eq!(h.immediate.call_count("refund").await, 0);
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn test_capture_twice_calls_provider_once() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;

        let first = h.lifecycle.capture(&h.trainer, payment.id).await.unwrap();
        let second = h.lifecycle.capture(&h.trainer, payment.id).await.unwrap();

        assert!(!first.already_captured);
        assert!(second.already_captured);
        assert_eq!(first.captured_amount, second.captured_amount);
        assert_eq!(h.manual.call_count("capture").await, 1);
    }

    #[tokio::test]
    async fn test_capture_before_approval_is_refused_without_provider_call() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;

        let err = h.lifecycle.capture(&h.trainer, payment.id).await.unwrap_err();

        assert!(matches!(err, PaymentError::InvalidState(_)), "got {:?}", err);
        assert_eq!(h.manual.call_count("capture").await, 0);
        assert_eq!(h.payment(payment.id).await.status, PaymentStatus::Held);
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_capture_completes_confirmed_booking() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;

        let result = h.lifecycle.capture(&h.trainer, payment.id).await.unwrap();

        assert_eq!(result.status, PaymentStatus::Paid);
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn test_capture_refused_for_cancelled_booking() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.cancellation
            .cancel_booking(&h.customer, booking.id, Default::default())
            .await
            .unwrap();

        let err = h.lifecycle.capture(&h.admin, payment.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)), "got {:?}", err);
        assert_eq!(h.manual.call_count("capture").await, 0);
    }

    #[tokio::test]
    async fn test_customer_cannot_capture() {
        let h = Harness::new();
        let (_, payment) = h.held_booking(Duration::days(10)).await;

        let err = h.lifecycle.capture(&h.customer, payment.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_reject_releases_hold() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;

        let result = h
            .lifecycle
            .reject(&h.trainer, booking.id, Some("fully booked".to_string()))
            .await
            .unwrap();

        assert_eq!(result.refund_amount, Money::krw(100_000));
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::Rejected);
        assert_eq!(h.payment(payment.id).await.status, PaymentStatus::Cancelled);
        assert_eq!(
            h.manual.intent_status(payment.correlation_key()).await,
            Some(IntentStatus::Canceled)
        );
        let sent = h.notifier.sent_to(h.customer.id).await;
        assert_eq!(sent.last().map(|n| n.kind), Some(NotificationKind::BookingRejected));
    }

    #[tokio::test]
    async fn test_reject_refunds_charge_in_full() {
        let h = Harness::new();
        let (booking, payment) = h.paid_booking(Duration::days(10)).await;

        h.lifecycle.reject(&h.trainer, booking.id, None).await.unwrap();

        let updated = h.payment(payment.id).await;
        assert_eq!(updated.status, PaymentStatus::Cancelled);
        assert_eq!(updated.refunded_amount, Money::krw(100_000));
        assert_eq!(h.immediate.refunded("tpk_test_1").await, Some(Money::krw(100_000)));
    }

    #[tokio::test]
    async fn test_cannot_reject_confirmed_booking() {
        let h = Harness::new();
        let (booking, _) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;

        let err = h.lifecycle.reject(&h.trainer, booking.id, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
        assert_eq!(h.manual.call_count("cancel_hold").await, 0);
    }

    #[tokio::test]
    async fn test_no_show_forfeits_hold() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;

        let result = h.lifecycle.no_show(&h.trainer, booking.id).await.unwrap();

        assert_eq!(result.captured_amount, Money::krw(100_000));
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::NoShow);
        assert_eq!(h.payment(payment.id).await.status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_capture_write_failure_raises_alert() {
        let h = Harness::new();
        let (booking, _) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;
        h.store.fail_transitions(true).await;

        let err = h.lifecycle.complete(&h.trainer, booking.id).await.unwrap_err();

        assert!(matches!(err, PaymentError::ReconciliationRequired { .. }));
        assert_eq!(h.store.alerts().await.len(), 1);
        assert_eq!(h.manual.call_count("capture").await, 1);
    }
}

// ============================================================================
// Unpaid Expiry Tests
// ============================================================================

mod expiry_tests {
    use super::*;

    #[tokio::test]
    async fn test_expire_deletes_unpaid_booking() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(20));

        let cleanup = h.lifecycle.expire_unpaid(&h.customer, booking.id).await.unwrap();

        assert_eq!(cleanup.deleted_payments.len(), 1);
        assert!(h.store.booking(booking.id).await.is_none());
        assert_eq!(
            h.manual.intent_status(&created.provider_order_ref).await,
            Some(IntentStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn test_open_window_is_not_expired() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;

        let err = h.lifecycle.expire_unpaid(&h.customer, booking.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
        assert!(h.store.booking(booking.id).await.is_some());
    }

    #[tokio::test]
    async fn test_recommended_window_is_a_day() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Recommended, Duration::days(10)).await;
        h.clock.advance(Duration::hours(2));

        assert!(h.lifecycle.expire_unpaid(&h.customer, booking.id).await.is_err());
        h.clock.advance(Duration::hours(22));
        assert!(h.lifecycle.expire_unpaid(&h.customer, booking.id).await.is_ok());
    }
}

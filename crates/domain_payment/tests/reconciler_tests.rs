//! Tests for webhook reconciliation

mod common;

use chrono::Duration;

use common::Harness;
use core_kernel::Money;
use domain_booking::{BookingKind, BookingStatus};
use domain_payment::{
    AlertKind, PaymentEventType, PaymentProvider, PaymentStatus, ProviderEvent, ProviderEventKind,
    ReconcileOutcome,
};

fn event(provider: PaymentProvider, id: &str, key: &str, kind: ProviderEventKind) -> ProviderEvent {
    ProviderEvent {
        provider,
        event_id: id.to_string(),
        correlation_key: key.to_string(),
        kind,
        payment_key: None,
        raw: serde_json::json!({ "id": id }),
    }
}

// ============================================================================
// Confirmation via Webhook
// ============================================================================

mod confirmation_tests {
    use super::*;

    #[tokio::test]
    async fn test_authorized_webhook_confirms_payment() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_1",
                &created.provider_order_ref,
                ProviderEventKind::Authorized,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(h.payment(created.payment_id).await.status, PaymentStatus::Held);
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::Pending);

        let confirmed = h
            .store
            .events_of_type(created.payment_id, PaymentEventType::Confirmed)
            .await;
        assert_eq!(confirmed[0].webhook_event_id(), Some("evt_1"));
    }

    #[tokio::test]
    async fn test_same_event_twice_confirms_once() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();
        let e = event(
            PaymentProvider::Stripe,
            "evt_dup",
            &created.provider_order_ref,
            ProviderEventKind::Authorized,
        );

        let first = h.reconciler.handle(e.clone()).await.unwrap();
        let second = h.reconciler.handle(e).await.unwrap();

        assert_eq!(first, ReconcileOutcome::Applied);
        assert_eq!(second, ReconcileOutcome::AlreadyApplied);
        assert_eq!(
            h.store
                .events_of_type(created.payment_id, PaymentEventType::Confirmed)
                .await
                .len(),
            1
        );
        assert_eq!(h.notifier.sent_to(h.trainer.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_after_sync_confirmation_is_noop() {
        let h = Harness::new();
        let (_, payment) = h.held_booking(Duration::days(10)).await;

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_late",
                payment.correlation_key(),
                ProviderEventKind::Authorized,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::AlreadyApplied);
        assert_eq!(h.notifier.sent_to(h.trainer.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_toss_done_webhook_charges_pending_payment() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Toss))
            .await
            .unwrap();
        let mut e = event(
            PaymentProvider::Toss,
            "toss_1",
            &created.provider_order_ref,
            ProviderEventKind::Captured {
                amount: Money::krw(100_000),
            },
        );
        e.payment_key = Some("tpk_hook".to_string());

        let outcome = h.reconciler.handle(e).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let payment = h.payment(created.payment_id).await;
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.provider_ref.payment_key(), Some("tpk_hook"));
    }

    #[tokio::test]
    async fn test_amount_mismatch_raises_alert() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Toss))
            .await
            .unwrap();

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Toss,
                "toss_bad",
                &created.provider_order_ref,
                ProviderEventKind::Captured {
                    amount: Money::krw(1_000),
                },
            ))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::ReconciliationRequired { .. }));
        assert_eq!(h.payment(created.payment_id).await.status, PaymentStatus::Pending);
        assert_eq!(h.store.alerts().await[0].kind, AlertKind::AmountMismatch);
    }
}

// ============================================================================
// Superseded and Unmatched
// ============================================================================

mod divergence_tests {
    use super::*;

    #[tokio::test]
    async fn test_confirmation_for_superseded_payment_requires_reconciliation() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let stale = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Toss))
            .await
            .unwrap();
        h.lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Toss))
            .await
            .unwrap();

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Toss,
                "toss_stale",
                &stale.provider_order_ref,
                ProviderEventKind::Captured {
                    amount: Money::krw(100_000),
                },
            ))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::ReconciliationRequired { .. }));
        assert_eq!(h.payment(stale.payment_id).await.status, PaymentStatus::Cancelled);
        let alerts = h.store.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::ConfirmationOnInactivePayment);
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::PendingPayment);
    }

    #[tokio::test]
    async fn test_unmatched_event_is_acknowledged() {
        let h = Harness::new();

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_orphan",
                "pi_unknown",
                ProviderEventKind::Authorized,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unmatched);
    }
}

// ============================================================================
// Release and Refund Events
// ============================================================================

mod release_tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_checkout_cancels_pending_payment() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_exp",
                &created.provider_order_ref,
                ProviderEventKind::Expired,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(h.payment(created.payment_id).await.status, PaymentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_charge_marks_payment_failed() {
        let h = Harness::new();
        let booking = h.booking(BookingKind::Direct, Duration::days(10)).await;
        let created = h
            .lifecycle
            .create_payment(&h.customer, booking.id, h.order(PaymentProvider::Stripe))
            .await
            .unwrap();

        h.reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_fail",
                &created.provider_order_ref,
                ProviderEventKind::Failed {
                    reason: "card_declined".to_string(),
                },
            ))
            .await
            .unwrap();

        assert_eq!(h.payment(created.payment_id).await.status, PaymentStatus::Failed);
        assert_eq!(
            h.store
                .events_of_type(created.payment_id, PaymentEventType::Failed)
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_webhook_after_sync_release_is_noop() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.cancellation
            .cancel_booking(&h.customer, booking.id, Default::default())
            .await
            .unwrap();

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_cancel",
                payment.correlation_key(),
                ProviderEventKind::Cancelled,
            ))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_hold_released_at_provider_raises_alert_for_live_booking() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_expired_hold",
                payment.correlation_key(),
                ProviderEventKind::Cancelled,
            ))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::ReconciliationRequired { .. }));
        assert_eq!(h.payment(payment.id).await.status, PaymentStatus::Cancelled);
        assert_eq!(h.reload(booking.id).await.status, BookingStatus::Confirmed);
        let alerts = h.store.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HoldReleasedBeforeSettlement);
        assert_eq!(alerts[0].booking_id, Some(booking.id));
    }

    #[tokio::test]
    async fn test_partial_refund_webhook_marks_refunded() {
        let h = Harness::new();
        let (_, payment) = h.paid_booking(Duration::days(10)).await;

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Toss,
                "toss_refund",
                payment.correlation_key(),
                ProviderEventKind::Refunded {
                    amount: Money::krw(40_000),
                },
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let updated = h.payment(payment.id).await;
        assert_eq!(updated.status, PaymentStatus::Refunded);
        assert_eq!(updated.refunded_amount, Money::krw(40_000));
    }

    #[tokio::test]
    async fn test_capture_webhook_repairs_lost_write() {
        let h = Harness::new();
        let (booking, payment) = h.held_booking(Duration::days(10)).await;
        h.approve(booking.id).await;
        h.store.fail_transitions(true).await;
        assert!(h.lifecycle.capture(&h.trainer, payment.id).await.is_err());
        h.store.fail_transitions(false).await;

        let outcome = h
            .reconciler
            .handle(event(
                PaymentProvider::Stripe,
                "evt_succeeded",
                payment.correlation_key(),
                ProviderEventKind::Captured {
                    amount: Money::krw(100_000),
                },
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let updated = h.payment(payment.id).await;
        assert_eq!(updated.status, PaymentStatus::Paid);
        assert_eq!(updated.captured_amount, Money::krw(100_000));
    }
}

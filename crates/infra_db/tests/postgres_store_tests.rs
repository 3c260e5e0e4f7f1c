//! Integration tests for the PostgreSQL payment store
//!
//! Each test starts its own PostgreSQL container, so they are ignored by
//! default. Run with `cargo test -p infra_db -- --ignored`.

use chrono::Duration;
use core_kernel::{GuardedWrite, PortError};
use domain_booking::BookingStatus;
use domain_payment::{
    AlertKind, BookingChange, BookingPort, EventSource, InboxEntry, PaymentEvent,
    PaymentEventType, PaymentPort, PaymentProvider, PaymentStatus, PaymentTransition,
    ReconciliationAlert, ReconciliationPort, SupersedeOutcome,
};
use infra_db::PostgresPaymentStore;
use test_utils::{
    assert_event_trail, db_test, TemporalFixtures, TestBookingBuilder, TestPaymentBuilder,
};

fn change(booking: domain_booking::Booking, expected: BookingStatus) -> BookingChange {
    BookingChange { booking, expected }
}

fn created_event(payment: &domain_payment::Payment) -> PaymentEvent {
    PaymentEvent::new(
        payment.id,
        PaymentEventType::Created,
        None,
        PaymentStatus::Pending,
        EventSource::Api,
        payment.created_at,
    )
}

db_test!(test_booking_round_trip, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    store.insert_booking(&booking).await.unwrap();

    let loaded = store.get_booking(booking.id).await.unwrap();
    assert_eq!(loaded, booking);

    let duplicate = store.insert_booking(&booking).await;
    assert!(matches!(duplicate, Err(PortError::Conflict { .. })));
});

db_test!(test_update_booking_is_guarded_on_status, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    store.insert_booking(&booking).await.unwrap();

    let mut pending = booking.clone();
    pending.transition_to(BookingStatus::Pending, TemporalFixtures::now()).unwrap();
    let applied = store
        .update_booking(change(pending.clone(), BookingStatus::PendingPayment))
        .await
        .unwrap();
    assert!(applied.is_applied());

    let stale = store
        .update_booking(change(pending, BookingStatus::PendingPayment))
        .await
        .unwrap();
    assert!(matches!(stale, GuardedWrite::PreconditionFailed));

    let missing = TestBookingBuilder::new().build();
    let result = store
        .update_booking(change(missing, BookingStatus::PendingPayment))
        .await;
    assert!(matches!(result, Err(PortError::NotFound { .. })));
});

db_test!(test_insert_superseding_cancels_pending_payments, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    store.insert_booking(&booking).await.unwrap();

    let first = TestPaymentBuilder::new().build(&booking);
    let outcome = store
        .insert_superseding(&first, &created_event(&first), TemporalFixtures::now())
        .await
        .unwrap();
    assert!(matches!(outcome, SupersedeOutcome::Inserted { ref superseded } if superseded.is_empty()));

    let later = TemporalFixtures::now() + Duration::minutes(1);
    let second = TestPaymentBuilder::new().toss().created_at(later).build(&booking);
    let outcome = store
        .insert_superseding(&second, &created_event(&second), later)
        .await
        .unwrap();
    match outcome {
        SupersedeOutcome::Inserted { superseded } => {
            assert_eq!(superseded.len(), 1);
            assert_eq!(superseded[0].id, first.id);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let stale = store.get_payment(first.id).await.unwrap();
    assert_eq!(stale.status, PaymentStatus::Cancelled);
    assert_eq!(stale.cancelled_at, Some(later));
    let events = store.list_events(first.id).await.unwrap();
    assert_event_trail(&events, &[PaymentEventType::Created, PaymentEventType::Cancelled]);
    assert_eq!(events[1].source, EventSource::System);

    let active = store.find_active_payment(booking.id).await.unwrap().unwrap();
    assert_eq!(active.id, second.id);
    let found = store
        .find_by_correlation_key(PaymentProvider::Toss, second.correlation_key())
        .await
        .unwrap();
    assert_eq!(found.map(|p| p.id), Some(second.id));
});

db_test!(test_insert_superseding_refuses_when_secured, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    store.insert_booking(&booking).await.unwrap();

    let pending = TestPaymentBuilder::new().build(&booking);
    store
        .insert_superseding(&pending, &created_event(&pending), TemporalFixtures::now())
        .await
        .unwrap();
    let held = pending.transitioned(PaymentStatus::Held, TemporalFixtures::now()).unwrap();
    let event = PaymentEvent::new(
        held.id,
        PaymentEventType::Confirmed,
        Some(PaymentStatus::Pending),
        PaymentStatus::Held,
        EventSource::Api,
        TemporalFixtures::now(),
    );
    store
        .apply_transition(PaymentTransition {
            payment: held.clone(),
            expected: PaymentStatus::Pending,
            event,
            booking: None,
        })
        .await
        .unwrap();

    let another = TestPaymentBuilder::new().build(&booking);
    let outcome = store
        .insert_superseding(&another, &created_event(&another), TemporalFixtures::now())
        .await
        .unwrap();
    assert!(matches!(outcome, SupersedeOutcome::ActivePaymentExists(ref p) if p.id == held.id));
    assert_eq!(store.list_payments(booking.id).await.unwrap().len(), 1);
});

db_test!(test_apply_transition_writes_booking_atomically, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    store.insert_booking(&booking).await.unwrap();
    let payment = TestPaymentBuilder::new().build(&booking);
    store
        .insert_superseding(&payment, &created_event(&payment), TemporalFixtures::now())
        .await
        .unwrap();

    let at = TemporalFixtures::now();
    let held = payment.transitioned(PaymentStatus::Held, at).unwrap();
    let event = PaymentEvent::new(
        held.id,
        PaymentEventType::Confirmed,
        Some(PaymentStatus::Pending),
        PaymentStatus::Held,
        EventSource::webhook("evt_1"),
        at,
    );

    // Booking guard fails: the whole transition rolls back
    let mut wrong = booking.clone();
    wrong.transition_to(BookingStatus::Pending, at).unwrap();
    let result = store
        .apply_transition(PaymentTransition {
            payment: held.clone(),
            expected: PaymentStatus::Pending,
            event: event.clone(),
            booking: Some(change(wrong.clone(), BookingStatus::Confirmed)),
        })
        .await
        .unwrap();
    assert!(matches!(result, GuardedWrite::PreconditionFailed));
    assert_eq!(store.get_payment(payment.id).await.unwrap().status, PaymentStatus::Pending);

    let result = store
        .apply_transition(PaymentTransition {
            payment: held,
            expected: PaymentStatus::Pending,
            event,
            booking: Some(change(wrong, BookingStatus::PendingPayment)),
        })
        .await
        .unwrap();
    assert!(result.is_applied());
    assert_eq!(store.get_booking(booking.id).await.unwrap().status, BookingStatus::Pending);
    let events = store.list_events(payment.id).await.unwrap();
    assert_eq!(events.last().and_then(|e| e.webhook_event_id()), Some("evt_1"));
});

db_test!(test_delete_unpaid_booking, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    store.insert_booking(&booking).await.unwrap();
    let payment = TestPaymentBuilder::new().build(&booking);
    store
        .insert_superseding(&payment, &created_event(&payment), TemporalFixtures::now())
        .await
        .unwrap();

    let cleanup = store.delete_unpaid_booking(booking.id).await.unwrap();
    match cleanup {
        GuardedWrite::Applied(cleanup) => assert_eq!(cleanup.deleted_payments.len(), 1),
        GuardedWrite::PreconditionFailed => panic!("unpaid booking should be deletable"),
    }
    assert!(store.get_booking(booking.id).await.unwrap_err().is_not_found());
    assert!(store.list_events(payment.id).await.unwrap().is_empty());
});

db_test!(test_delete_refused_after_authorization, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    store.insert_booking(&booking).await.unwrap();
    let refunded = TestPaymentBuilder::new()
        .with_status(PaymentStatus::Refunded)
        .build(&booking);
    store
        .insert_superseding(&refunded, &created_event(&refunded), TemporalFixtures::now())
        .await
        .unwrap();

    let result = store.delete_unpaid_booking(booking.id).await.unwrap();
    assert!(matches!(result, GuardedWrite::PreconditionFailed));
    assert!(store.get_booking(booking.id).await.is_ok());
});

db_test!(test_webhook_inbox_deduplicates, |pool| {
    let store = PostgresPaymentStore::new(pool);
    assert!(!store.has_processed_webhook(PaymentProvider::Stripe, "evt_1").await.unwrap());

    let first = store
        .record_webhook(PaymentProvider::Stripe, "evt_1", "payment_intent.succeeded", "applied")
        .await
        .unwrap();
    let second = store
        .record_webhook(PaymentProvider::Stripe, "evt_1", "payment_intent.succeeded", "applied")
        .await
        .unwrap();
    assert_eq!(first, InboxEntry::Recorded);
    assert_eq!(second, InboxEntry::Duplicate);
    assert!(store.has_processed_webhook(PaymentProvider::Stripe, "evt_1").await.unwrap());
    assert!(!store.has_processed_webhook(PaymentProvider::Toss, "evt_1").await.unwrap());
});

db_test!(test_alerts_round_trip, |pool| {
    let store = PostgresPaymentStore::new(pool);
    let booking = TestBookingBuilder::new().build();
    let payment = TestPaymentBuilder::new().build(&booking);
    let alert = ReconciliationAlert::new(
        AlertKind::AmountMismatch,
        "provider captured 70000, expected 80000",
        TemporalFixtures::now(),
    )
    .for_payment(&payment);

    store.raise_alert(&alert).await.unwrap();
    assert_eq!(store.open_alerts().await.unwrap(), vec![alert]);
});

//! Shared harness for the payment service tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use core_kernel::{BookingId, FixedClock, Money, PaymentId, UserId};
use domain_booking::{Actor, Booking, BookingKind, BookingStatus, PaymentWindows};
use domain_payment::{
    CancellationService, ConfirmRequest, CreatePaymentRequest, LifecycleService, MockImmediateGateway,
    BookingPort, ManualCaptureGateway, MockManualGateway, MockMatcher, MockNotifier, MockStore, Payment, PaymentDeps,
    PaymentGateways, PaymentPort, PaymentProvider, WebhookReconciler,
};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<MockStore>,
    pub manual: Arc<MockManualGateway>,
    pub immediate: Arc<MockImmediateGateway>,
    pub notifier: Arc<MockNotifier>,
    pub matcher: Arc<MockMatcher>,
    pub clock: FixedClock,
    pub lifecycle: LifecycleService,
    pub cancellation: CancellationService,
    pub reconciler: WebhookReconciler,
    pub customer: Actor,
    pub trainer: Actor,
    pub admin: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_manual_gateway(|mock| mock as Arc<dyn ManualCaptureGateway>)
    }

    /// Builds the harness with the manual-capture port wrapped around the
    /// scripted gateway; `manual` still exposes the scripted state
    pub fn with_manual_gateway<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<MockManualGateway>) -> Arc<dyn ManualCaptureGateway>,
    {
        let store = Arc::new(MockStore::new());
        let manual = Arc::new(MockManualGateway::new());
        let immediate = Arc::new(MockImmediateGateway::new());
        let notifier = Arc::new(MockNotifier::new());
        let matcher = Arc::new(MockMatcher::new());
        let clock = FixedClock::new(start());

        let deps = PaymentDeps {
            bookings: store.clone(),
            payments: store.clone(),
            reconciliation: store.clone(),
            gateways: PaymentGateways::new(wrap(manual.clone()), immediate.clone(), PaymentProvider::Stripe),
            notifier: notifier.clone(),
            matcher: matcher.clone(),
            clock: Arc::new(clock.clone()),
            windows: PaymentWindows::default(),
        };

        Self {
            store,
            manual,
            immediate,
            notifier,
            matcher,
            clock,
            lifecycle: LifecycleService::new(deps.clone()),
            cancellation: CancellationService::new(deps.clone()),
            reconciler: WebhookReconciler::new(deps),
            customer: Actor::customer(UserId::new()),
            trainer: Actor::trainer(UserId::new()),
            admin: Actor::admin(UserId::new()),
        }
    }

    /// Inserts a direct booking scheduled `lead` after the harness start
    pub async fn booking(&self, kind: BookingKind, lead: Duration) -> Booking {
        let mut booking = Booking::new(
            self.customer.id,
            kind,
            start() + lead,
            start() + lead + Duration::minutes(50),
            Money::krw(100_000),
            start(),
        )
        .unwrap();
        if kind == BookingKind::Direct {
            booking = booking.with_trainer(self.trainer.id);
        }
        self.store.insert_booking(&booking).await.unwrap();
        booking
    }

    pub fn order(&self, provider: PaymentProvider) -> CreatePaymentRequest {
        CreatePaymentRequest {
            provider: Some(provider),
            amount: Money::krw(100_000),
            order_name: "Rehabilitation session".to_string(),
        }
    }

    /// A booking with a held Stripe payment, awaiting trainer approval
    pub async fn held_booking(&self, lead: Duration) -> (Booking, Payment) {
        let booking = self.booking(BookingKind::Direct, lead).await;
        let created = self
            .lifecycle
            .create_payment(&self.customer, booking.id, self.order(PaymentProvider::Stripe))
            .await
            .unwrap();
        self.manual.authorize(&created.provider_order_ref).await;
        let outcome = self
            .lifecycle
            .confirm_payment(&self.customer, created.payment_id, ConfirmRequest::default())
            .await
            .unwrap();
        (self.reload(booking.id).await, outcome.payment().clone())
    }

    /// A booking with a charged Toss payment, awaiting trainer approval
    pub async fn paid_booking(&self, lead: Duration) -> (Booking, Payment) {
        let booking = self.booking(BookingKind::Direct, lead).await;
        let created = self
            .lifecycle
            .create_payment(&self.customer, booking.id, self.order(PaymentProvider::Toss))
            .await
            .unwrap();
        let outcome = self
            .lifecycle
            .confirm_payment(
                &self.customer,
                created.payment_id,
                ConfirmRequest {
                    payment_key: Some("tpk_test_1".to_string()),
                    amount: Some(Money::krw(100_000)),
                },
            )
            .await
            .unwrap();
        (self.reload(booking.id).await, outcome.payment().clone())
    }

    pub async fn reload(&self, id: BookingId) -> Booking {
        self.store.booking(id).await.unwrap()
    }

    pub async fn payment(&self, id: PaymentId) -> Payment {
        self.store.get_payment(id).await.unwrap()
    }

    pub async fn approve(&self, id: BookingId) {
        let booking = self.lifecycle.approve(&self.trainer, id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }
}

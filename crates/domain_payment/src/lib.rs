//! Payment Domain
//!
//! Ties a booking's lifecycle to a card payment. Two provider families are
//! supported and the orchestration branches on which one a payment uses:
//!
//! - **Manual capture**: an authorization hold is placed at checkout and
//!   captured at completion, in part when a cancellation fee applies
//! - **Immediate capture**: the charge settles at checkout and is reversed
//!   by refund
//!
//! # Payment Lifecycle
//!
//! ```text
//! pending -> held -> paid
//!    |         |  \-> partially_captured
//!    |         \---> cancelled
//!    |-> paid -> refunded / cancelled
//!    \-> cancelled / failed
//! ```
//!
//! At most one payment per booking is active (`pending`, `held`, `paid` or
//! `partially_captured`). Every write is guarded on the status it was read
//! in, so concurrent requests and webhooks lose races safely.

pub mod error;
pub mod event;
pub mod fee;
pub mod gateway;
pub mod payment;
pub mod ports;
pub mod services;

pub use error::PaymentError;
pub use event::{EventSource, PaymentEvent, PaymentEventType};
pub use fee::{cancellation_fee, CancellationFee, FeeTier};
pub use gateway::{
    CaptureReceipt, ChargeReceipt, ChargeRequest, GatewayError, Hold, HoldRelease, HoldRequest,
    ImmediateCaptureGateway, IntentSnapshot, IntentStatus, ManualCaptureGateway, PaymentGateways,
    RefundReceipt, RefundRequest,
};
pub use payment::{idempotency_key, CaptureMode, Payment, PaymentProvider, PaymentStatus, ProviderRef};
pub use ports::{
    AlertKind, BookingChange, BookingPort, InboxEntry, MatchingTrigger, Notification,
    NotificationKind, NotificationSink, PaymentPort, PaymentTransition, ReconciliationAlert,
    ReconciliationPort, SupersedeOutcome, UnpaidCleanup,
};
pub use services::{
    CancelRequest, CancellationBranch, CancellationResult, CancellationService, CaptureResult,
    ConfirmOutcome, ConfirmRequest, Confirmation, CreatePaymentRequest, LifecycleService,
    PaymentCreated, PaymentDeps, ProviderEvent, ProviderEventKind, ReconcileOutcome,
    RejectionResult, WebhookReconciler,
};
#[cfg(any(test, feature = "mock"))]
pub use gateway::mock::{MockImmediateGateway, MockManualGateway};
#[cfg(any(test, feature = "mock"))]
pub use ports::mock::{MockMatcher, MockNotifier, MockStore};

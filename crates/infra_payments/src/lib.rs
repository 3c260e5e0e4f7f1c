//! Payment provider adapters
//!
//! HTTP implementations of the gateway ports defined in `domain_payment`:
//!
//! - [`StripeGateway`]: `ManualCaptureGateway` over Stripe PaymentIntents
//! - [`TossGateway`]: `ImmediateCaptureGateway` over the Toss Payments API
//!
//! and the inbound side of the same providers:
//!
//! - [`StripeWebhookVerifier`] / [`TossWebhookVerifier`] check delivery signatures
//! - [`parse_stripe_event`] / [`parse_toss_event`] normalise payloads into
//!   `ProviderEvent`s for the webhook reconciler

pub mod client;
pub mod stripe;
pub mod toss;
pub mod webhook;

pub use client::CircuitBreakerConfig;
pub use stripe::{StripeConfig, StripeGateway};
pub use toss::{TossConfig, TossGateway};
pub use webhook::{
    parse_stripe_event, parse_toss_event, StripeWebhookVerifier, TossWebhookVerifier,
    STRIPE_SIGNATURE_HEADER, TOSS_SIGNATURE_HEADER, TOSS_TRANSMISSION_ID_HEADER,
    TOSS_TRANSMISSION_TIME_HEADER,
};

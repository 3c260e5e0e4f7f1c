//! HTTP API Layer
//!
//! REST surface of the booking payment system, built on Axum.
//!
//! # Architecture
//!
//! - **Handlers**: thin adapters from HTTP to the payment services
//! - **Middleware**: bearer-token authentication and request logging
//! - **DTOs**: request validation and response shapes
//! - **Webhooks**: signature-verified provider callbacks, mounted outside
//!   the authenticated API
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let state = AppState::new(deps, config, webhooks, health_checks);
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notify;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use core_kernel::{Clock, HealthCheckable};
use domain_payment::{CancellationService, LifecycleService, PaymentDeps, WebhookReconciler};
use infra_payments::{StripeWebhookVerifier, TossWebhookVerifier};

use crate::config::ApiConfig;
use crate::handlers::{bookings, health, payments, webhooks};
use crate::middleware::{auth_middleware, request_log_middleware};

/// Signature verifiers for the provider webhook endpoints
#[derive(Debug, Clone)]
pub struct WebhookVerifiers {
    pub stripe: StripeWebhookVerifier,
    pub toss: TossWebhookVerifier,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: LifecycleService,
    pub cancellation: CancellationService,
    pub reconciler: WebhookReconciler,
    pub clock: Arc<dyn Clock>,
    pub config: ApiConfig,
    pub webhooks: WebhookVerifiers,
    /// Adapters probed by the readiness endpoint
    pub health_checks: Vec<Arc<dyn HealthCheckable>>,
}

impl AppState {
    pub fn new(
        deps: PaymentDeps,
        config: ApiConfig,
        webhooks: WebhookVerifiers,
        health_checks: Vec<Arc<dyn HealthCheckable>>,
    ) -> Self {
        Self {
            clock: deps.clock.clone(),
            lifecycle: LifecycleService::new(deps.clone()),
            cancellation: CancellationService::new(deps.clone()),
            reconciler: WebhookReconciler::new(deps),
            config,
            webhooks,
            health_checks,
        }
    }
}

/// Creates the main API router
///
/// Health and webhook routes are public; webhooks authenticate by
/// signature instead of bearer token.
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let webhook_routes = Router::new()
        .route("/stripe", post(webhooks::stripe_webhook))
        .route("/toss", post(webhooks::toss_webhook));

    let booking_routes = Router::new()
        .route("/:id/payments", post(payments::create_payment))
        .route("/:id/cancellation-quote", get(bookings::cancellation_quote))
        .route("/:id/cancel", post(bookings::cancel_booking))
        .route("/:id/approve", post(bookings::approve_booking))
        .route("/:id/reject", post(bookings::reject_booking))
        .route("/:id/start", post(bookings::start_booking))
        .route("/:id/complete", post(bookings::complete_booking))
        .route("/:id/no-show", post(bookings::no_show_booking))
        .route("/:id/unpaid", delete(bookings::expire_unpaid_booking));

    let payment_routes = Router::new()
        .route("/:id/confirm", post(payments::confirm_payment))
        .route("/:id/capture", post(payments::capture_payment));

    // Protected API routes
    let api_routes = Router::new()
        .nest("/bookings", booking_routes)
        .nest("/payments", payment_routes)
        .layer(axum_middleware::from_fn(request_log_middleware))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .nest("/webhooks", webhook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

//! Booking Payments API server
//!
//! # Usage
//!
//! ```bash
//! API_DATABASE_URL=postgres://... STRIPE_SECRET_KEY=sk_test_... TOSS_SECRET_KEY=test_sk_... \
//!     cargo run --bin booking-payments-api
//! ```
//!
//! # Environment Variables
//!
//! * `API_HOST`, `API_PORT` - bind address (default: 0.0.0.0:8080)
//! * `API_JWT_SECRET` - bearer token signing secret (required in production)
//! * `API_DATABASE_URL`, `API_DATABASE_MAX_CONNECTIONS` - PostgreSQL pool
//! * `API_LOG_LEVEL` - filter used when `RUST_LOG` is unset (default: info)
//! * `API_DEFAULT_PROVIDER` - `stripe` or `toss` (default: stripe)
//! * `API_DIRECT_PAYMENT_WINDOW_MINUTES`, `API_RECOMMENDED_PAYMENT_WINDOW_MINUTES`
//! * `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`
//! * `TOSS_SECRET_KEY`, `TOSS_WEBHOOK_SECRET`

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use core_kernel::{Clock, HealthCheckable, SystemClock};
use domain_payment::{PaymentDeps, PaymentGateways};
use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresPaymentStore};
use infra_payments::{
    StripeConfig, StripeGateway, StripeWebhookVerifier, TossConfig, TossGateway,
    TossWebhookVerifier,
};
use interface_api::config::{ApiConfig, ProviderCredentials};
use interface_api::notify::{LoggingMatcher, LoggingNotifier};
use interface_api::{create_router, AppState, WebhookVerifiers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env().context("loading API configuration")?;
    init_tracing(&config.log_level);

    let credentials = ProviderCredentials::from_env().context("loading provider credentials")?;
    tracing::info!(
        host = %config.host,
        port = %config.port,
        default_provider = %config.default_provider,
        credentials = ?credentials,
        "Starting Booking Payments API Server"
    );

    let pool = create_pool(
        DatabaseConfig::new(config.database_url.clone())
            .max_connections(config.database_max_connections),
    )
    .await
    .context("connecting to PostgreSQL")?;
    run_migrations(&pool).await.context("applying migrations")?;
    let store = Arc::new(PostgresPaymentStore::new(pool));

    let stripe_config = StripeConfig {
        secret_key: credentials.stripe_secret_key.clone(),
        webhook_secret: credentials.stripe_webhook_secret.clone(),
        ..StripeConfig::default()
    };
    let stripe_webhooks = StripeWebhookVerifier::new(
        stripe_config.webhook_secret.clone(),
        stripe_config.webhook_tolerance_secs,
    );
    let stripe = Arc::new(StripeGateway::new(stripe_config).context("configuring Stripe")?);

    let toss_config = TossConfig {
        secret_key: credentials.toss_secret_key.clone(),
        webhook_secret: credentials.toss_webhook_secret.clone(),
        ..TossConfig::default()
    };
    let toss_webhooks = TossWebhookVerifier::new(toss_config.webhook_secret.clone());
    let toss = Arc::new(TossGateway::new(toss_config).context("configuring Toss Payments")?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let deps = PaymentDeps {
        bookings: store.clone(),
        payments: store.clone(),
        reconciliation: store.clone(),
        gateways: PaymentGateways::new(stripe.clone(), toss.clone(), config.default_provider()?),
        notifier: Arc::new(LoggingNotifier),
        matcher: Arc::new(LoggingMatcher),
        clock,
        windows: config.payment_windows(),
    };
    let health_checks: Vec<Arc<dyn HealthCheckable>> = vec![store, stripe, toss];

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server_addr()))?;
    let state = AppState::new(
        deps,
        config,
        WebhookVerifiers {
            stripe: stripe_webhooks,
            toss: toss_webhooks,
        },
        health_checks,
    );
    let app = create_router(state);

    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// JSON logs; `RUST_LOG` takes precedence over the configured level
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_target(true))
        .init();
}

/// Waits for Ctrl+C or SIGTERM so in-flight requests can finish
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

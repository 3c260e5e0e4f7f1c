//! Shared HTTP plumbing for provider adapters
//!
//! Both adapters talk to their provider through a [`ProviderClient`], which
//! owns the pooled `reqwest` client and adds:
//!
//! - retry with exponential backoff for transient failures (network, 429, 5xx)
//! - a circuit breaker so a provider outage fails fast instead of piling up
//! - a `tracing` span field set per request
//!
//! Retrying a mutating call is safe because every one carries an
//! `Idempotency-Key` header; the provider replays the first response.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::sync::RwLock;

use core_kernel::{Currency, Money};
use domain_payment::GatewayError;

/// Circuit breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive successes in half-open state before it closes again
    pub success_threshold: u32,
    /// Seconds before an open circuit lets a probe request through
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_secs: 30,
        }
    }
}

#[derive(Debug)]
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    is_open: AtomicBool,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            is_open: AtomicBool::new(false),
            opened_at: RwLock::new(None),
        }
    }

    async fn is_available(&self) -> bool {
        if !self.is_open.load(Ordering::Relaxed) {
            return true;
        }
        match *self.opened_at.read().await {
            // Half-open: let a probe through
            Some(at) => at.elapsed() > Duration::from_secs(self.config.reset_timeout_secs),
            None => true,
        }
    }

    fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        if !self.is_open.load(Ordering::Relaxed) {
            return;
        }
        let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= u64::from(self.config.success_threshold) {
            self.is_open.store(false, Ordering::Relaxed);
            self.success_count.store(0, Ordering::Relaxed);
        }
    }

    async fn record_failure(&self) {
        self.success_count.store(0, Ordering::Relaxed);
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= u64::from(self.config.failure_threshold) {
            self.is_open.store(true, Ordering::Relaxed);
            *self.opened_at.write().await = Some(Instant::now());
        }
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Relaxed)
    }
}

/// A completed HTTP exchange with a provider
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `Value::Null` when the body was empty or not JSON
    pub body: Value,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Pooled HTTP client with retry and circuit breaking
#[derive(Debug)]
pub struct ProviderClient {
    provider: &'static str,
    http: reqwest::Client,
    retry_attempts: u32,
    backoff_base: Duration,
    breaker: Option<CircuitBreaker>,
}

impl ProviderClient {
    pub fn new(
        provider: &'static str,
        timeout_secs: u64,
        retry_attempts: u32,
        circuit_breaker: Option<CircuitBreakerConfig>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("{provider} HTTP client: {e}")))?;

        Ok(Self {
            provider,
            http,
            retry_attempts,
            backoff_base: Duration::from_millis(200),
            breaker: circuit_breaker.map(CircuitBreaker::new),
        })
    }

    /// Whether the circuit breaker is currently refusing requests
    pub fn is_circuit_open(&self) -> bool {
        self.breaker.as_ref().is_some_and(CircuitBreaker::is_open)
    }

    /// Sends a request, retrying transient failures
    ///
    /// `build` is called once per attempt. Any response that is not a
    /// transient failure is returned as-is, including 4xx, so the adapter
    /// can map the provider's error body.
    pub async fn execute<F>(&self, operation: &str, build: F) -> Result<ProviderResponse, GatewayError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        if let Some(breaker) = &self.breaker {
            if !breaker.is_available().await {
                return Err(GatewayError::Transient {
                    message: format!("{} circuit breaker is open", self.provider),
                });
            }
        }

        let mut attempt = 0;
        loop {
            let outcome = self.send_once(&build).await;
            let transient = match &outcome {
                Ok(response) => is_transient_status(response.status),
                Err(error) => error.is_retryable(),
            };

            if !transient {
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                return outcome;
            }

            if let Some(breaker) = &self.breaker {
                breaker.record_failure().await;
            }

            if attempt >= self.retry_attempts {
                return match outcome {
                    Ok(response) => Err(GatewayError::Transient {
                        message: format!(
                            "{} {} returned {} after {} attempts",
                            self.provider,
                            operation,
                            response.status,
                            attempt + 1
                        ),
                    }),
                    Err(error) => Err(error),
                };
            }

            let delay = self.backoff_base * 2u32.saturating_pow(attempt);
            tracing::warn!(
                provider = self.provider,
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Transient provider failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_once<F>(&self, build: &F) -> Result<ProviderResponse, GatewayError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let response = build(&self.http).send().await.map_err(|e| map_transport_error(self.provider, e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_transport_error(self.provider, e))?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(ProviderResponse { status, body })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn map_transport_error(provider: &str, error: reqwest::Error) -> GatewayError {
    if error.is_builder() {
        return GatewayError::Configuration(format!("{provider} request: {error}"));
    }
    let message = if error.is_timeout() {
        format!("{provider} request timed out")
    } else if error.is_connect() {
        format!("{provider} connection failed: {error}")
    } else {
        format!("{provider} request failed: {error}")
    };
    GatewayError::Transient { message }
}

/// Converts to the integer minor units providers expect
pub fn minor_units(money: &Money) -> Result<i64, GatewayError> {
    money
        .to_minor()
        .map_err(|e| GatewayError::Malformed(format!("amount {money}: {e}")))
}

/// Reads a minor-unit integer field as money
pub fn money_field(object: &Value, field: &str, currency: Currency) -> Result<Money, GatewayError> {
    object
        .get(field)
        .and_then(Value::as_i64)
        .map(|minor| Money::from_minor(minor, currency))
        .ok_or_else(|| GatewayError::Malformed(format!("missing integer field `{field}`")))
}

/// Reads the ISO currency code field, case-insensitively
pub fn currency_field(object: &Value, field: &str) -> Result<Currency, GatewayError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Malformed(format!("missing field `{field}`")))?
        .parse()
        .map_err(|e| GatewayError::Malformed(format!("{e}")))
}

pub fn str_field<'a>(object: &'a Value, field: &str) -> Result<&'a str, GatewayError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Malformed(format!("missing field `{field}`")))
}

//! Port infrastructure shared by the domain crates
//!
//! Domain crates declare their storage and provider traits on top of
//! [`DomainPort`]; adapters in `infra_db` and `infra_payments` implement them.
//! Every adapter failure is reported as a [`PortError`] so the orchestration
//! layer can tell retryable outages from permanent faults.
//!
//! ```rust,ignore
//! #[async_trait]
//! pub trait PaymentPort: DomainPort {
//!     async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError>;
//!     async fn apply_transition(&self, ...) -> Result<GuardedWrite<Payment>, PortError>;
//! }
//!
//! impl PaymentPort for PostgresPaymentStore { ... }
//! ```

use std::fmt;
use thiserror::Error;
use serde::{Deserialize, Serialize};

/// Failure reported by a store or provider adapter
///
/// Orchestration code only branches on the category: missing rows, guard or
/// constraint conflicts, and transient outages that a caller may retry.
#[derive(Debug, Error)]
pub enum PortError {
    /// No row with this id
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// Unique or foreign-key violation, e.g. a second active payment
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
    },

    /// Connection to the underlying system failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backing system refused work, e.g. an open circuit
    #[error("Service unavailable: {service}")]
    ServiceUnavailable {
        service: String,
    },

    /// A stored value could not be mapped back to its domain type
    #[error("Transformation error: {message}")]
    Transformation {
        message: String,
    },

    /// An internal error occurred
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PortError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Creates a Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this error indicates a transient failure that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortError::Connection { .. } | PortError::ServiceUnavailable { .. }
        )
    }

    /// Returns true if this error indicates the entity was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }
}

/// Supertrait of every persistence port; adapters are shared across tasks
pub trait DomainPort: Send + Sync + 'static {}

/// Outcome of a status-guarded write
///
/// Every mutation of a shared row is conditional on the row still being in the
/// status the caller read. Losing that race is not an error: the adapter
/// reports `PreconditionFailed` and writes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum GuardedWrite<T> {
    /// The guard held and the write was applied
    Applied(T),
    /// The row was not in the expected state; nothing was written
    PreconditionFailed,
}

impl<T> GuardedWrite<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, GuardedWrite::Applied(_))
    }
}

/// Readiness of a store or provider adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    /// Reachable but impaired, e.g. a provider circuit is open
    Degraded,
    Unhealthy,
}

impl AdapterHealth {
    /// Degraded adapters still accept traffic; only `Unhealthy` fails readiness
    pub fn is_ready(&self) -> bool {
        !matches!(self, AdapterHealth::Unhealthy)
    }
}

/// One probe of one adapter, as reported by `/health/ready`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Stable name such as `postgres-payment-store` or `toss-gateway`
    pub adapter_id: String,
    pub status: AdapterHealth,
    pub latency_ms: u64,
    pub message: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    /// Probes the backing system without side effects
    async fn health_check(&self) -> HealthCheckResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_error_not_found() {
        let error = PortError::not_found("Payment", "123");
        assert!(error.is_not_found());
        assert!(!error.is_transient());
        assert!(error.to_string().contains("Payment"));
        assert!(error.to_string().contains("123"));
    }

    #[test]
    fn test_port_error_transient() {
        assert!(PortError::connection("refused").is_transient());
        assert!(PortError::ServiceUnavailable {
            service: "stripe".to_string()
        }
        .is_transient());
        assert!(!PortError::Conflict {
            message: "one active payment per booking".to_string()
        }
        .is_transient());
        assert!(!PortError::internal("bad row").is_transient());
    }

    #[test]
    fn test_only_unhealthy_fails_readiness() {
        assert!(AdapterHealth::Healthy.is_ready());
        assert!(AdapterHealth::Degraded.is_ready());
        assert!(!AdapterHealth::Unhealthy.is_ready());
    }

    #[test]
    fn test_guarded_write_reports_outcome() {
        assert!(GuardedWrite::Applied(3).is_applied());
        assert!(!GuardedWrite::<u32>::PreconditionFailed.is_applied());
    }
}

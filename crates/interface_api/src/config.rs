//! API configuration
//!
//! Server settings come from `API_*` environment variables; provider
//! credentials use the providers' conventional names (`STRIPE_SECRET_KEY`,
//! `TOSS_WEBHOOK_SECRET`, ...) without the prefix.

use serde::Deserialize;

use domain_booking::PaymentWindows;
use domain_payment::PaymentProvider;

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub database_url: String,
    pub database_max_connections: u32,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Provider used when a payment request names none (`stripe` or `toss`)
    pub default_provider: String,
    pub direct_payment_window_minutes: i64,
    pub recommended_payment_window_minutes: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expiration_secs: 3600,
            database_url: "postgres://localhost/booking_payments".to_string(),
            database_max_connections: 10,
            log_level: "info".to_string(),
            default_provider: "stripe".to_string(),
            direct_payment_window_minutes: 15,
            recommended_payment_window_minutes: 24 * 60,
        }
    }
}

impl ApiConfig {
    /// Loads configuration from `API_*` variables over the defaults
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        config::Config::builder()
            .set_default("host", defaults.host)?
            .set_default("port", defaults.port)?
            .set_default("jwt_secret", defaults.jwt_secret)?
            .set_default("jwt_expiration_secs", defaults.jwt_expiration_secs)?
            .set_default("database_url", defaults.database_url)?
            .set_default("database_max_connections", defaults.database_max_connections)?
            .set_default("log_level", defaults.log_level)?
            .set_default("default_provider", defaults.default_provider)?
            .set_default("direct_payment_window_minutes", defaults.direct_payment_window_minutes)?
            .set_default(
                "recommended_payment_window_minutes",
                defaults.recommended_payment_window_minutes,
            )?
            .add_source(config::Environment::with_prefix("API"))
            .build()?
            .try_deserialize()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn payment_windows(&self) -> PaymentWindows {
        PaymentWindows::new(
            self.direct_payment_window_minutes,
            self.recommended_payment_window_minutes,
        )
    }

    pub fn default_provider(&self) -> Result<PaymentProvider, config::ConfigError> {
        self.default_provider
            .parse()
            .map_err(|e| config::ConfigError::Message(format!("API_DEFAULT_PROVIDER: {}", e)))
    }
}

/// Payment provider credentials
#[derive(Clone, Default, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub stripe_secret_key: String,
    #[serde(default)]
    pub stripe_webhook_secret: String,
    #[serde(default)]
    pub toss_secret_key: String,
    #[serde(default)]
    pub toss_webhook_secret: String,
}

impl ProviderCredentials {
    /// Reads `STRIPE_*` and `TOSS_*` variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }
}

// Secrets never reach logs
impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &str| if s.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("ProviderCredentials")
            .field("stripe_secret_key", &mask(&self.stripe_secret_key))
            .field("stripe_webhook_secret", &mask(&self.stripe_webhook_secret))
            .field("toss_secret_key", &mask(&self.toss_secret_key))
            .field("toss_webhook_secret", &mask(&self.toss_webhook_secret))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_payment_windows() {
        let config = ApiConfig::default();
        assert_eq!(config.payment_windows(), PaymentWindows::default());
        assert_eq!(config.default_provider().unwrap(), PaymentProvider::Stripe);
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_unknown_default_provider_is_rejected() {
        let config = ApiConfig {
            default_provider: "paypal".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.default_provider().is_err());
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let credentials = ProviderCredentials {
            stripe_secret_key: "sk_test_123".to_string(),
            ..Default::default()
        };
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("sk_test_123"));
        assert!(printed.contains("<unset>"));
    }
}

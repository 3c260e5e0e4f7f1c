//! Throwaway PostgreSQL instances for store integration tests
//!
//! Each [`TestDatabase`] owns a container with the booking payment schema
//! applied. Docker is required, so tests built with [`db_test!`] are
//! `#[ignore]`d by default.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

pub type TestDbError = Box<dyn std::error::Error + Send + Sync>;

const IMAGE: (&str, &str) = ("postgres", "16-alpine");
const CREDENTIALS: (&str, &str) = ("payments", "payments");
const DATABASE: &str = "booking_payments_test";
const READY_LINE: &str = "database system is ready to accept connections";

const SCHEMA: &str = include_str!("../../../migrations/20250501000001_booking_payments.sql");

/// Tables the schema must create for the store to work
const TABLES: [&str; 5] = [
    "bookings",
    "payments",
    "payment_events",
    "webhook_inbox",
    "reconciliation_alerts",
];

pub struct TestDatabase {
    // Dropping the handle stops the container
    _container: ContainerAsync<GenericImage>,
    pool: PgPool,
}

impl TestDatabase {
    /// Starts a fresh container and applies the schema
    pub async fn start() -> Result<Self, TestDbError> {
        let (user, password) = CREDENTIALS;
        let container = GenericImage::new(IMAGE.0, IMAGE.1)
            .with_exposed_port(5432.tcp())
            .with_wait_for(WaitFor::message_on_stderr(READY_LINE))
            .with_env_var("POSTGRES_USER", user)
            .with_env_var("POSTGRES_PASSWORD", password)
            .with_env_var("POSTGRES_DB", DATABASE)
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_url(&host.to_string(), port))
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn connection_url(host: &str, port: u16) -> String {
    let (user, password) = CREDENTIALS;
    format!("postgres://{user}:{password}@{host}:{port}/{DATABASE}")
}

/// Declares a Docker-backed test that receives a pool on a fresh database
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$pool:ident| $body:block) => {
        #[tokio::test]
        #[ignore = "requires Docker"]
        async fn $name() {
            let db = $crate::database::TestDatabase::start()
                .await
                .expect("Failed to start test database");
            let $pool = db.pool().clone();
            $body
        }
    };
}

//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for bookings, payments, payment events, the webhook
//! inbox and reconciliation alerts, using SQLx.
//!
//! # Layout
//!
//! - [`repositories`] own the SQL and the row types
//! - [`adapters`] implement the `domain_payment` ports on top of them
//!
//! Status changes are written with guarded `UPDATE ... WHERE status = $expected`
//! statements; the adapter reports a lost guard as
//! `GuardedWrite::PreconditionFailed` rather than an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresPaymentStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/booking_payments")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresPaymentStore::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::PostgresPaymentStore;
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
pub use repositories::{
    AlertRow, BookingRepository, BookingRow, PaymentEventRow, PaymentRepository, PaymentRow,
    ReconciliationRepository,
};

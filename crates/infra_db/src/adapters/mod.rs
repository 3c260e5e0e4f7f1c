//! Domain Adapters
//!
//! Implementations of the `domain_payment` ports backed by PostgreSQL. The
//! adapter translates between domain models and the repository row types;
//! the repositories own the SQL.
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresPaymentStore;
//! use domain_payment::PaymentPort;
//!
//! let store = PostgresPaymentStore::new(pool);
//! let payment = store.get_payment(payment_id).await?;
//! ```

pub mod payment_store;

pub use payment_store::PostgresPaymentStore;

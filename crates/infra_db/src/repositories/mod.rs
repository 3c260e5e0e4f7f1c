//! Repository implementations
//!
//! Repositories own the SQL and the row types; they know nothing about the
//! domain model. Every mutating statement is guarded on the status the
//! caller read, and functions that must share a transaction take a
//! `&mut PgConnection` instead of using the pool.

pub mod booking;
pub mod payment;
pub mod reconciliation;

pub use booking::{BookingRepository, BookingRow};
pub use payment::{PaymentEventRow, PaymentRepository, PaymentRow};
pub use reconciliation::{AlertRow, ReconciliationRepository};

//! Test Utilities Crate
//!
//! Shared test infrastructure, fixtures, and helpers for the booking payment
//! test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built test data for common entities
//! - `builders`: Builder patterns for bookings and payments in any status
//! - `database`: PostgreSQL test containers with the schema applied
//! - `assertions`: Assertion helpers for money, fees and payment trails
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;

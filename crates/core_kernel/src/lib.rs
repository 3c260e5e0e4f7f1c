//! Core Kernel - Foundational types shared by the booking and payment crates
//!
//! This crate provides the fundamental building blocks used across all domain modules:
//! - Money types with precise decimal arithmetic and minor-unit conversion
//! - Injectable clocks for fee tiers and payment windows
//! - Strongly-typed identifiers
//! - Port infrastructure (errors, guarded writes, health checks)

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;

pub use money::{Money, Currency, MoneyError, Rate};
pub use temporal::{Clock, FixedClock, SystemClock};
pub use identifiers::{AlertId, BookingId, IdParseError, PaymentEventId, PaymentId, UserId};
pub use ports::{DomainPort, GuardedWrite, HealthCheckable, HealthCheckResult, AdapterHealth, PortError};

//! Booking Domain
//!
//! A booking is a customer's reservation of a rehabilitation session with a
//! trainer. Its status drives, and is driven by, the payment attached to it.
//!
//! # Booking Lifecycle
//!
//! ```text
//! pending_payment -> pending -> confirmed -> in_progress -> completed
//!        |              |  \         |            |
//!        v              v   v        v            v
//!    cancelled    rejected  cancelled / no_show
//! ```

pub mod actor;
pub mod booking;
pub mod error;
pub mod window;

pub use actor::{Actor, Role};
pub use booking::{Booking, BookingKind, BookingStatus};
pub use error::BookingError;
pub use window::PaymentWindows;

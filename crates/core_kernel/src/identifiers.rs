//! Typed identifiers for bookings, payments and their audit records
//!
//! Each id wraps a UUID and renders with a short kind prefix (`BKG-…`,
//! `PAY-…`) in logs and API payloads. Parsing accepts both the prefixed and
//! the bare UUID form, since provider metadata and path segments carry the
//! bare one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A string that is not a valid identifier of the expected kind
#[derive(Debug, Error)]
#[error("invalid {kind} identifier '{input}': {source}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub input: String,
    #[source]
    pub source: uuid::Error,
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Time-ordered id; used for rows that are listed by creation order
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .unwrap_or(s);
                Uuid::parse_str(raw).map(Self).map_err(|source| IdParseError {
                    kind: stringify!($name),
                    input: s.to_string(),
                    source,
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

define_id!(
    /// A session booking made by a senior (or their guardian)
    BookingId,
    "BKG"
);
define_id!(UserId, "USR");
define_id!(
    /// One provider payment attempt; a booking may accumulate several
    PaymentId,
    "PAY"
);
define_id!(
    /// Append-only audit record of a payment status change
    PaymentEventId,
    "PEV"
);
define_id!(
    /// Reconciliation alert raised when provider and local state diverge
    AlertId,
    "ALR"
);

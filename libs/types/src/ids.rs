//! Identifier types for stored entities
//!
//! Every id is an opaque string that ends up embedded in a storage key.
//! The key grammar uses `_` and `:` as structural separators, so an id is
//! only *key-safe* when it is non-empty and contains neither character.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::IdError;

/// Characters reserved by the storage key grammar.
pub const KEY_SEPARATORS: [char; 2] = ['_', ':'];

/// Check that a raw id can be embedded in a storage key unambiguously.
pub fn validate_key_component(kind: &'static str, value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if let Some(c) = value.chars().find(|c| KEY_SEPARATORS.contains(c)) {
        return Err(IdError::ReservedCharacter {
            kind,
            value: value.to_string(),
            character: c,
        });
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string without validation.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Wrap a raw string, rejecting values that are not key-safe.
            pub fn try_new(id: impl Into<String>) -> Result<Self, IdError> {
                let id = id.into();
                validate_key_component($kind, &id)?;
                Ok(Self(id))
            }

            /// Whether this id may be embedded in a storage key.
            pub fn is_key_safe(&self) -> bool {
                self.validate().is_ok()
            }

            /// Reject an id that is not key-safe.
            pub fn validate(&self) -> Result<(), IdError> {
                validate_key_component($kind, &self.0)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Market identifier
    MarketId,
    "market"
);

string_id!(
    /// Party (trader) identifier
    PartyId,
    "party"
);

string_id!(
    /// Order identifier, shared by every version of the same order
    OrderId,
    "order"
);

string_id!(
    /// Trade identifier
    TradeId,
    "trade"
);

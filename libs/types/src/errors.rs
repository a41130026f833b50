//! Error types for the shared domain types
//!
//! Error taxonomy using thiserror

use thiserror::Error;

/// Identifier validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Empty {kind} id")]
    Empty { kind: &'static str },

    #[error("Invalid {kind} id {value:?}: reserved character {character:?}")]
    ReservedCharacter {
        kind: &'static str,
        value: String,
        character: char,
    },
}

/// Candle interval parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("Unsupported interval: {0}")]
    Unsupported(String),
}

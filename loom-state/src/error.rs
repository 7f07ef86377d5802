//! Error types for the state store.

use thiserror::Error;

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// A list operation found a non-array value at the path.
    #[error("value at '{0}' is not an array")]
    NotAnArray(String),

    /// A merge operation was given, or found, a non-object value.
    #[error("value at '{0}' is not an object")]
    NotAnObject(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Error types for vecbase operations

use crate::clients::ProviderError;
use thiserror::Error;

/// Main error type for vecbase operations
///
/// Public operations return exactly one of these variants; validation and
/// authorization failures are reported before any state is mutated.
#[derive(Error, Debug)]
pub enum VecBaseError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("caller is not authorized")]
    NotAuthorized,

    #[error("invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(String),

    #[error("embedding provider failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("an embedding run for this document is already in progress")]
    AlreadyInProgress,

    #[error("corrupt stored state: {0}")]
    CorruptState(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl VecBaseError {
    /// Shorthand for an `InvalidInput` with owned field/reason strings.
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        VecBaseError::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `NotFound` describing the missing entity.
    pub fn not_found(what: impl Into<String>) -> Self {
        VecBaseError::NotFound(what.into())
    }
}

impl From<rmp_serde::encode::Error> for VecBaseError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        VecBaseError::CorruptState(format!("encode failed: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for VecBaseError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        VecBaseError::CorruptState(format!("decode failed: {e}"))
    }
}

/// Result type alias for vecbase operations
pub type Result<T> = std::result::Result<T, VecBaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = VecBaseError::invalid("collection_id", "must be 1-64 characters");
        let msg = err.to_string();
        assert!(msg.contains("collection_id"));
        assert!(msg.contains("1-64"));
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: VecBaseError = ProviderError::RateLimited.into();
        assert!(matches!(err, VecBaseError::Embedding(_)));
    }
}

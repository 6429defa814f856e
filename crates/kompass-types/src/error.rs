//! Error types for the KOMpass domain types.

use thiserror::Error;

/// Errors raised while validating identifiers or loading configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KompassError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scope identifier is malformed
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Unknown record category
    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    /// Record key is not a safe filename
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Unknown backend kind
    #[error("Invalid backend kind: {0}")]
    InvalidBackend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KompassError::Config("missing bucket".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("missing bucket"));

        let err = KompassError::InvalidKey("../etc".to_string());
        assert!(err.to_string().contains("Invalid key"));
    }
}

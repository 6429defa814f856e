//! Error types for the storage layer.

use kompass_types::KompassError;
use thiserror::Error;

use crate::codec::CodecError;

/// Failure reported by a single backend adapter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    /// No record at the requested address
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Serialized record is larger than the backend accepts
    #[error("Record too large: {size} bytes (max: {max})")]
    SizeExceeded { size: u64, max: u64 },

    /// Transient failure: network, timeout, throttling or auth
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Backend understood the request and refused it
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// Response or stored metadata could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Whether the call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Serialization(e.to_string())
        } else {
            // Timeouts, refused connections and body read failures
            BackendError::Unavailable(e.to_string())
        }
    }
}

/// Error returned by [`StorageManager`](crate::StorageManager) operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Single record over `max_file_size_bytes`; nothing was written
    #[error("Record too large: {size} bytes (max: {max})")]
    SizeExceeded { size: u64, max: u64 },

    /// Write would push a scope or the backend over its ceiling
    #[error("Quota exceeded for {scope}: {used} + {requested} bytes over {ceiling} limit of {limit}")]
    QuotaExceeded {
        scope: String,
        ceiling: &'static str,
        used: u64,
        requested: u64,
        limit: u64,
    },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Malformed scope, key, category or payload
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Every configured backend failed its startup probe
    #[error("No storage backend available")]
    NoBackendAvailable,

    #[error("Backend error: {0}")]
    Backend(BackendError),
}

impl From<BackendError> for StorageError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound(what) => StorageError::NotFound(what),
            BackendError::SizeExceeded { size, max } => StorageError::SizeExceeded { size, max },
            BackendError::Unavailable(msg) => StorageError::Unavailable(msg),
            other => StorageError::Backend(other),
        }
    }
}

impl From<KompassError> for StorageError {
    fn from(e: KompassError) -> Self {
        match e {
            KompassError::Config(msg) => StorageError::Config(msg),
            other => StorageError::Validation(other.to_string()),
        }
    }
}

impl From<CodecError> for StorageError {
    fn from(e: CodecError) -> Self {
        StorageError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(BackendError::Unavailable("timeout".into()).is_retryable());
        assert!(!BackendError::NotFound("k".into()).is_retryable());
        assert!(!BackendError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!BackendError::SizeExceeded { size: 2, max: 1 }.is_retryable());
    }

    #[test]
    fn test_backend_error_maps_to_storage_error() {
        let err: StorageError = BackendError::SizeExceeded { size: 10, max: 5 }.into();
        assert!(matches!(err, StorageError::SizeExceeded { size: 10, max: 5 }));

        let err: StorageError = BackendError::Io("disk full".into()).into();
        assert!(matches!(err, StorageError::Backend(BackendError::Io(_))));
    }

    #[test]
    fn test_kompass_error_maps_to_validation() {
        let err: StorageError = KompassError::InvalidKey("..".into()).into();
        assert!(matches!(err, StorageError::Validation(_)));

        let err: StorageError = KompassError::Config("bad".into()).into();
        assert!(matches!(err, StorageError::Config(_)));
    }
}

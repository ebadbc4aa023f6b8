//! Error types for tenant cache operations

use std::time::Duration;
use thiserror::Error;

/// Store and federation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Loader failed for tenant {tenant}, key {key}: {reason}")]
    LoaderFailed {
        tenant: String,
        key: String,
        reason: String,
    },

    #[error("Unknown cache event: {name}")]
    UnknownEvent { name: String },
}

/// Cross-process protocol errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Request {method} carried no key")]
    MissingKey { method: String },

    #[error("No outbound channel to the owning process")]
    ChannelUnavailable,

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("Request {signature} timed out after {after:?}")]
    RequestTimedOut { signature: String, after: Duration },

    #[error("Reply for {signature} was dropped before it arrived")]
    ReplyDropped { signature: String },

    #[error("A request with signature {signature} is already pending")]
    DuplicateSignature { signature: String },

    #[error("Owner rejected {method}: {message}")]
    Remote { method: String, message: String },

    #[error("Malformed message: {reason}")]
    Malformed { reason: String },

    #[error("{operation} is only available on the owning process")]
    OwnerOnly { operation: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all tenant cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

impl CacheError {
    /// Build a loader failure for the given tenant and key.
    pub fn loader_failed(
        tenant: impl Into<String>,
        key: impl ToString,
        reason: impl ToString,
    ) -> Self {
        CacheError::Store(StoreError::LoaderFailed {
            tenant: tenant.into(),
            key: key.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Whether this error came from a bounded wait expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CacheError::Protocol(ProtocolError::RequestTimedOut { .. })
        )
    }
}

/// Result type alias for tenant cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

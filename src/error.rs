//! Error taxonomy for the federation core.

use thiserror::Error;

/// Result type for federation operations.
pub type SsoResult<T> = Result<T, SsoError>;

/// Errors surfaced by the federation core.
#[derive(Debug, Error)]
pub enum SsoError {
    /// Federation metadata is malformed or fails validation.
    #[error("Invalid federation metadata: {0}")]
    InvalidMetadata(String),

    /// Persisted preferences could not be decoded.
    #[error("Invalid stored preferences: {0}")]
    InvalidPreferences(String),

    /// Malformed admin input, unreachable metadata URL, or non-200 fetch.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Assertion rejected by the protocol layer, or required claims missing.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Protocol layer used before activation.
    #[error("Protocol layer not initialized: {0}")]
    NotInitialized(&'static str),

    /// Internal failure such as a poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Settings or user storage failure.
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SsoError {
    /// Whether this error means stored configuration is corrupt and may be
    /// discarded during boot.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SsoError::InvalidMetadata(_) | SsoError::InvalidPreferences(_)
        )
    }

    /// HTTP status a boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            SsoError::InvalidMetadata(_) | SsoError::BadRequest(_) => 400,
            SsoError::AuthenticationFailed(_) => 401,
            SsoError::NotInitialized(_) => 503,
            SsoError::InvalidPreferences(_) | SsoError::Internal(_) | SsoError::Storage(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SsoError::InvalidMetadata(_) => "INVALID_METADATA",
            SsoError::InvalidPreferences(_) => "INVALID_PREFERENCES",
            SsoError::BadRequest(_) => "BAD_REQUEST",
            SsoError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            SsoError::NotInitialized(_) => "NOT_INITIALIZED",
            SsoError::Internal(_) => "INTERNAL_ERROR",
            SsoError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

//! Error taxonomy for session and connection lifecycle.

use thiserror::Error;

/// Failure surfaced to callers of the session manager.
///
/// `Clone` because every caller attached to one in-flight initialization
/// receives the same result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Required app-level identifiers are missing. Fix the deployment.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The transport could not establish or keep a channel. Retry later.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The persistence substrate failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The attempt was displaced by a logout or a credential transfer
    /// before it settled.
    #[error("connection attempt {attempt} was superseded")]
    Superseded { attempt: u64 },

    #[error("no active connection")]
    NoActiveConnection,

    /// The live connection holds no authenticated credential.
    #[error("connection is not authenticated")]
    NotAuthenticated,
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        Self::Connectivity(error.to_string())
    }
}

/// Missing or malformed app-level identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("api id is not configured (set TAAS_TELEGRAM_API_ID)")]
    MissingApiId,
    #[error("api id must be a non-zero integer, got {0:?}")]
    InvalidApiId(String),
    #[error("api hash is not configured (set TAAS_TELEGRAM_API_HASH)")]
    MissingApiHash,
}

/// Persistence substrate failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Failure reported by the underlying connection primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },
    #[error("connection closed")]
    Closed,
}

/// Session result type.
pub type Result<T> = std::result::Result<T, SessionError>;

//! Error types for the client
//!
//! A single [`Error`] enum covers every failure the client surfaces. It is
//! `Clone` because one failed batch RPC must fail every request that was
//! coalesced into it with the same error.

use thiserror::Error;

/// All client errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Malformed key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Malformed entity (reserved property name, missing key, ...)
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// The connection reported a failure
    #[error("rpc error in {method}: {message}")]
    Rpc {
        /// RPC method that failed
        method: String,
        /// Transport or server message
        message: String,
    },

    /// A batched RPC returned a different number of results than requests
    #[error("batch result mismatch: expected {expected} results, got {actual}")]
    BatchMismatch {
        /// Number of requests in the batch
        expected: usize,
        /// Number of results returned
        actual: usize,
    },

    /// The batch a request was queued in went away without resolving it
    #[error("batch dropped before completion")]
    BatchDropped,

    /// Every transaction attempt had its commit rejected
    #[error("the transaction could not be committed after {attempts} attempts")]
    TransactionFailed {
        /// Number of attempts made
        attempts: u32,
    },

    /// A transactional operation ran on a connection without a live transaction
    #[error("transaction not active: {0}")]
    TransactionNotActive(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::Rpc`]
    pub fn rpc(method: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Rpc {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only exhausted commit retries are; running the transaction again may
    /// succeed against fresher data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransactionFailed { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

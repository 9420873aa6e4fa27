//! Error types for admission control.
//!
//! Construction problems surface as [`ConfigError`], the normal "no" answer is
//! [`RateLimitError::RateLimitExceeded`], and anything the backing store does
//! wrong is a [`StorageError`] or [`ConnectionError`].

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error (e.g., Redis connection failed).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The key has no capacity left under the configured policy.
    #[error("Rate limit exceeded for {algorithm} (limit {limit}), retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Algorithm that rejected the request.
        algorithm: &'static str,
        /// Maximum quota limit.
        limit: u64,
        /// How long to wait before retrying, when the algorithm can tell.
        retry_after: Option<Duration>,
    },
}

impl RateLimitError {
    /// Build a rejection without a retry hint.
    pub(crate) fn exceeded(algorithm: &'static str, limit: u64) -> Self {
        Self::RateLimitExceeded {
            algorithm,
            limit,
            retry_after: None,
        }
    }

    /// Check if this error is the ordinary rejection signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Check if the failed call may succeed when retried.
    ///
    /// Rejections are never retryable in this sense: the caller has to wait.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_retryable(),
            Self::Connection(_) => true,
            _ => false,
        }
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Serialization/deserialization error, or a stored value of the wrong shape.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Acquiring or releasing a named lock failed.
    #[error("Lock failed: {0}")]
    LockFailed(String),

    /// The transaction could not be committed; nothing was applied.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::LockFailed(_) | Self::TransactionFailed(_) | Self::PoolExhausted => true,
            Self::Serialization(_) => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A parameter is zero or negative.
    #[error("Invalid {name}: {name} should be greater than zero")]
    InvalidParameter {
        /// Parameter name as it appears in settings.
        name: &'static str,
    },

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),
}

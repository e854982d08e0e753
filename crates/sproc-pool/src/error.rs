//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No connection became available within the checkout wait bound.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The connection manager failed to open a new connection.
    #[error("failed to open connection: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Whether a later checkout might succeed where this one failed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }
}

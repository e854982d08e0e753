//! Error types for stored-procedure execution.

use std::time::Duration;

use serde::Serialize;
use sproc_pool::PoolError;
use thiserror::Error;

use crate::driver::{DriverError, DriverErrorKind};

/// Errors raised while mapping, invoking or dispatching a stored-procedure call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A key required by the procedure manifest is absent from the caller's parameters.
    #[error("missing parameter '{key}' for procedure '{procedure}'")]
    MissingParameter {
        /// Procedure identifier.
        procedure: String,
        /// The missing manifest key.
        key: String,
    },

    /// No manifest is registered under the given identifier.
    #[error("no manifest registered for procedure '{0}'")]
    UnknownProcedure(String),

    /// No pool is registered under the given connection name.
    #[error("no connection pool named '{0}'")]
    UnknownConnection(String),

    /// A dispatched operation name did not match any known operation.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// A procedure name failed identifier validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Configuration is missing or contradictory.
    #[error("configuration error: {0}")]
    Config(String),

    /// No pooled connection became available in time.
    #[error("connection pool exhausted: {0}")]
    PoolExhausted(#[source] PoolError),

    /// The call did not finish within its timeout.
    #[error("procedure '{procedure}' timed out after {timeout:?}")]
    Timeout {
        /// Database-side procedure name.
        procedure: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// Transport-level driver failure.
    #[error("driver error calling '{procedure}': {source}")]
    Driver {
        /// Database-side procedure name.
        procedure: String,
        /// Underlying driver error.
        source: DriverError,
    },

    /// The stored procedure itself reported a failure.
    #[error("{message}")]
    Procedure {
        /// Database-side procedure name.
        procedure: String,
        /// Message raised by the procedure.
        message: String,
        /// Error number raised by the procedure, if any.
        code: Option<i32>,
    },

    /// Any other pool failure (closed pool, failed connect).
    #[error("pool error: {0}")]
    Pool(#[source] PoolError),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading configuration from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], suitable for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::MissingParameter`].
    MissingParameter,
    /// See [`Error::UnknownProcedure`].
    UnknownProcedure,
    /// See [`Error::UnknownConnection`].
    UnknownConnection,
    /// See [`Error::UnknownOperation`].
    UnknownOperation,
    /// See [`Error::InvalidIdentifier`].
    InvalidIdentifier,
    /// See [`Error::Config`].
    Configuration,
    /// See [`Error::PoolExhausted`].
    PoolExhausted,
    /// See [`Error::Timeout`].
    Timeout,
    /// See [`Error::Driver`].
    Driver,
    /// See [`Error::Procedure`].
    ProcedureBusiness,
    /// See [`Error::Pool`].
    Pool,
    /// See [`Error::Json`] and [`Error::Io`].
    Serialization,
}

impl Error {
    /// Build an error from a driver failure according to its declared kind.
    pub(crate) fn from_driver(procedure: &str, err: DriverError) -> Self {
        match err.kind() {
            DriverErrorKind::Transport => Self::Driver {
                procedure: procedure.to_string(),
                source: err,
            },
            DriverErrorKind::Procedure => Self::Procedure {
                procedure: procedure.to_string(),
                code: err.code(),
                message: err.message().to_string(),
            },
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter { .. } => ErrorKind::MissingParameter,
            Self::UnknownProcedure(_) => ErrorKind::UnknownProcedure,
            Self::UnknownConnection(_) => ErrorKind::UnknownConnection,
            Self::UnknownOperation(_) => ErrorKind::UnknownOperation,
            Self::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            Self::Config(_) => ErrorKind::Configuration,
            Self::PoolExhausted(_) => ErrorKind::PoolExhausted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Driver { .. } => ErrorKind::Driver,
            Self::Procedure { .. } => ErrorKind::ProcedureBusiness,
            Self::Pool(_) => ErrorKind::Pool,
            Self::Json(_) | Self::Io(_) => ErrorKind::Serialization,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts, transport failures and pool exhaustion are transient.
    /// Failures reported by the procedure itself never are.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolExhausted(_) | Self::Timeout { .. } | Self::Driver { .. } => true,
            Self::Pool(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) => Self::PoolExhausted(err),
            other => Self::Pool(other),
        }
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

//! The driver seam: what a pooled connection must be able to do.
//!
//! The database driver itself lives outside this crate. A driver plugs in by
//! implementing [`sproc_pool::ConnectionManager`] for connection setup and
//! [`ProcedureConnection`] on the connection type it produces.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A connection that can execute a stored procedure.
#[async_trait]
pub trait ProcedureConnection: Send {
    /// Call `name` with positionally bound `args`.
    ///
    /// `timeout` is passed through so drivers with a native command timeout
    /// can use it; the invoker enforces it independently.
    async fn call_procedure(
        &mut self,
        name: &str,
        args: &[Value],
        timeout: Duration,
    ) -> Result<ProcedureOutput, DriverError>;
}

/// Rows and status returned by a successful procedure call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureOutput {
    /// Result rows, one JSON value per row.
    pub rows: Vec<Value>,
    /// The procedure's `RETURN` status, when the driver reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_status: Option<i32>,
}

impl ProcedureOutput {
    /// Output carrying `rows` and no return status.
    #[must_use]
    pub fn from_rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            return_status: None,
        }
    }

    /// Attach a return status.
    #[must_use]
    pub fn with_return_status(mut self, status: i32) -> Self {
        self.return_status = Some(status);
        self
    }
}

/// Where a driver failure originated.
///
/// Drivers must classify their own failures; the invoker never guesses from
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
    /// Network, session or protocol failure. Retryable.
    Transport,
    /// The procedure ran and signalled an error. Not retryable.
    Procedure,
}

/// A classified failure reported by the driver.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
    code: Option<i32>,
}

impl DriverError {
    /// A transport-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Transport,
            message: message.into(),
            code: None,
        }
    }

    /// A failure raised by the procedure body.
    pub fn procedure(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Procedure,
            message: message.into(),
            code: None,
        }
    }

    /// Attach a server error number.
    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// The failure classification.
    #[must_use]
    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    /// The driver's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The server error number, if any.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

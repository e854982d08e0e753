//! Runtime-selected facade operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::mapper::NamedParams;
use crate::options::OptionOverrides;

/// Operations reachable through [`DataAccess::dispatch`](crate::DataAccess::dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Map and run a stored procedure.
    Execute,
    /// Report every pool's status.
    ConnectionPoolStats,
    /// Report the metrics snapshot.
    PerformanceMetrics,
    /// Zero the call counters.
    ClearPerformanceMetrics,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Execute,
        Self::ConnectionPoolStats,
        Self::PerformanceMetrics,
        Self::ClearPerformanceMetrics,
    ];

    /// Canonical name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::ConnectionPoolStats => "getConnectionPoolStats",
            Self::PerformanceMetrics => "getPerformanceMetrics",
            Self::ClearPerformanceMetrics => "clearPerformanceMetrics",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "execute" => Ok(Self::Execute),
            "getConnectionPoolStats" | "connection_pool_stats" => Ok(Self::ConnectionPoolStats),
            "getPerformanceMetrics" | "performance_metrics" => Ok(Self::PerformanceMetrics),
            "clearPerformanceMetrics" | "clear_performance_metrics" => {
                Ok(Self::ClearPerformanceMetrics)
            }
            other => Err(Error::UnknownOperation(other.to_string())),
        }
    }
}

/// Arguments of [`Operation::Execute`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteArgs {
    /// Procedure identifier.
    #[serde(alias = "procedureId", alias = "procedure_id")]
    pub procedure: String,
    /// Named parameters.
    #[serde(default)]
    pub params: NamedParams,
    /// Per-call overrides; absent or `null` means none.
    #[serde(default, deserialize_with = "overrides_or_default")]
    pub options: OptionOverrides,
}

fn overrides_or_default<'de, D>(deserializer: D) -> std::result::Result<OptionOverrides, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OptionOverrides>::deserialize(deserializer)?.unwrap_or_default())
}

impl ExecuteArgs {
    /// Parse from a JSON argument object.
    pub fn from_value(args: Value) -> Result<Self> {
        Ok(serde_json::from_value(args)?)
    }
}

//! Per-call invocation options and their layered resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mapper::MappedCall;

/// Fully resolved options for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOptions {
    /// Pool to run on; `None` falls back to the invoker's default.
    pub connection_name: Option<String>,
    /// Hard limit for one attempt (checkout plus execution).
    pub timeout: Duration,
    /// Additional attempts after the first on transient failure.
    pub retry_attempts: u32,
    /// Base delay; attempt `n` waits `retry_delay * n` before the next try.
    pub retry_delay: Duration,
    /// Whether successful request/response pairs are written to the log channel.
    pub enable_logging: bool,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        Self {
            connection_name: None,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            enable_logging: true,
        }
    }
}

impl InvocationOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection name.
    #[must_use]
    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries.
    #[must_use]
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the base retry delay.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enable or disable request/response logging.
    #[must_use]
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }

    /// Resolve effective options: call overrides win over instance defaults,
    /// which win over `global`.
    #[must_use]
    pub fn resolve(global: &Self, instance: &OptionOverrides, call: &OptionOverrides) -> Self {
        call.layered_over(instance).apply_to(global.clone())
    }
}

/// Partial options; unset fields defer to the next layer down.
///
/// Field names accept both `snake_case` and the `camelCase` spelling used by
/// callers that build option objects in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionOverrides {
    /// See [`InvocationOptions::connection_name`].
    #[serde(alias = "connectionName", skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    /// Timeout in milliseconds. Zero is ignored so the next layer applies.
    #[serde(alias = "timeoutMs", alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// See [`InvocationOptions::retry_attempts`].
    #[serde(alias = "retryAttempts", skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    /// Base retry delay in milliseconds.
    #[serde(alias = "retryDelayMs", alias = "retryDelay", skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    /// See [`InvocationOptions::enable_logging`].
    #[serde(alias = "enableLogging", skip_serializing_if = "Option::is_none")]
    pub enable_logging: Option<bool>,
}

impl OptionOverrides {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the connection name.
    #[must_use]
    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Override the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Override the retry count.
    #[must_use]
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Override the retry delay.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Override logging.
    #[must_use]
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = Some(enabled);
        self
    }

    /// Parse overrides from a JSON value; `null` means no overrides.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    fn effective_timeout_ms(&self) -> Option<u64> {
        self.timeout_ms.filter(|ms| *ms > 0)
    }

    /// Combine with `lower`, keeping this layer's fields where set.
    #[must_use]
    pub fn layered_over(&self, lower: &Self) -> Self {
        Self {
            connection_name: self
                .connection_name
                .clone()
                .or_else(|| lower.connection_name.clone()),
            timeout_ms: self.effective_timeout_ms().or(lower.effective_timeout_ms()),
            retry_attempts: self.retry_attempts.or(lower.retry_attempts),
            retry_delay_ms: self.retry_delay_ms.or(lower.retry_delay_ms),
            enable_logging: self.enable_logging.or(lower.enable_logging),
        }
    }

    /// Apply the set fields on top of `base`.
    #[must_use]
    pub fn apply_to(&self, mut base: InvocationOptions) -> InvocationOptions {
        if let Some(name) = &self.connection_name {
            base.connection_name = Some(name.clone());
        }
        if let Some(ms) = self.effective_timeout_ms() {
            base.timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.retry_attempts {
            base.retry_attempts = attempts;
        }
        if let Some(ms) = self.retry_delay_ms {
            base.retry_delay = Duration::from_millis(ms);
        }
        if let Some(enabled) = self.enable_logging {
            base.enable_logging = enabled;
        }
        base
    }
}

/// One stored-procedure invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    procedure_id: String,
    procedure: String,
    params: Vec<Value>,
    options: InvocationOptions,
}

impl InvocationRequest {
    /// Build a request calling `procedure` directly.
    pub fn new(procedure: impl Into<String>, params: Vec<Value>, options: InvocationOptions) -> Self {
        let procedure = procedure.into();
        Self {
            procedure_id: procedure.clone(),
            procedure,
            params,
            options,
        }
    }

    /// Build a request from a mapped call. A connection pinned by the manifest
    /// applies only when `options` does not name one.
    pub fn from_mapped(call: MappedCall, mut options: InvocationOptions) -> Self {
        if options.connection_name.is_none() {
            options.connection_name = call.connection;
        }
        Self {
            procedure_id: call.procedure_id,
            procedure: call.procedure,
            params: call.params,
            options,
        }
    }

    /// Identifier used for metrics and logs.
    #[must_use]
    pub fn procedure_id(&self) -> &str {
        &self.procedure_id
    }

    /// Database-side procedure name.
    #[must_use]
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Ordered argument values.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Resolved options.
    #[must_use]
    pub fn options(&self) -> &InvocationOptions {
        &self.options
    }
}

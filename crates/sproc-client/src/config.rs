//! Gateway configuration.
//!
//! Configuration is a JSON document read once at startup:
//!
//! ```json
//! {
//!   "default_connection": "main",
//!   "defaults": { "timeout_ms": 30000, "retry_attempts": 3, "retry_delay_ms": 1000 },
//!   "connections": {
//!     "main": { "connection_string": "Server=db1;Database=app;", "max_connections": 20 }
//!   },
//!   "procedures": {
//!     "charge_customer": {
//!       "procedure": "billing.usp_charge",
//!       "params": { "customerId": "p_cust", "amount": "p_amt" }
//!     }
//!   }
//! }
//! ```
//!
//! Parameter order inside `params` is significant: it is the order the
//! procedure binds its arguments.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sproc_pool::PoolConfig;

use crate::error::{Error, Result};
use crate::manifest::{ManifestRegistry, OrderedParams, ProcedureManifest};
use crate::options::InvocationOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pool used when neither the call nor the manifest names one.
    #[serde(default = "default_connection_name")]
    pub default_connection: String,

    /// Global invocation defaults.
    #[serde(default)]
    pub defaults: DefaultOptions,

    /// Connection pools by name.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSettings>,

    /// Procedure manifests by identifier.
    #[serde(default)]
    pub procedures: BTreeMap<String, ProcedureEntry>,

    /// Extra parameter keys to mask in the request log.
    #[serde(default)]
    pub redact_keys: Vec<String>,
}

fn default_connection_name() -> String {
    "default".to_string()
}

/// Global invocation defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Base retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Log successful request/response pairs.
    pub enable_logging: bool,
}

impl Default for DefaultOptions {
    fn default() -> Self {
        let options = InvocationOptions::default();
        Self {
            timeout_ms: options.timeout.as_millis() as u64,
            retry_attempts: options.retry_attempts,
            retry_delay_ms: options.retry_delay.as_millis() as u64,
            enable_logging: options.enable_logging,
        }
    }
}

impl DefaultOptions {
    /// Convert to resolved options.
    #[must_use]
    pub fn to_options(&self) -> InvocationOptions {
        InvocationOptions::new()
            .timeout(Duration::from_millis(self.timeout_ms))
            .retry_attempts(self.retry_attempts)
            .retry_delay(Duration::from_millis(self.retry_delay_ms))
            .enable_logging(self.enable_logging)
    }
}

/// Settings for one named pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionSettings {
    /// Opaque driver connection string, handed to the connection manager.
    pub connection_string: String,
    /// Connections opened at warm-up.
    pub min_connections: u32,
    /// Checkout cap.
    pub max_connections: u32,
    /// Checkout wait bound in milliseconds.
    pub connection_timeout_ms: u64,
    /// Idle expiry in milliseconds.
    pub idle_timeout_ms: u64,
    /// Validate idle connections on checkout.
    pub test_on_checkout: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            connection_string: String::new(),
            min_connections: pool.min_connections,
            max_connections: pool.max_connections,
            connection_timeout_ms: pool.connection_timeout.as_millis() as u64,
            idle_timeout_ms: pool.idle_timeout.as_millis() as u64,
            test_on_checkout: pool.test_on_checkout,
        }
    }
}

impl ConnectionSettings {
    /// Pool configuration for these settings.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
            .idle_timeout(Duration::from_millis(self.idle_timeout_ms))
            .test_on_checkout(self.test_on_checkout)
    }
}

/// Manifest entry as written in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcedureEntry {
    /// Database-side name; defaults to the identifier.
    #[serde(default)]
    pub procedure: Option<String>,
    /// Pool to pin this procedure to.
    #[serde(default)]
    pub connection: Option<String>,
    /// Parameter keys in bind order.
    #[serde(default)]
    pub params: OrderedParams,
}

impl Config {
    /// Parse configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading gateway configuration");
        Self::from_json_str(&text)
    }

    /// Check cross-references between sections.
    pub fn validate(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(Error::Config("at least one connection must be configured".into()));
        }
        if !self.connections.contains_key(&self.default_connection) {
            return Err(Error::Config(format!(
                "default connection '{}' is not configured",
                self.default_connection
            )));
        }
        for (name, settings) in &self.connections {
            settings
                .pool_config()
                .validate()
                .map_err(|e| Error::Config(format!("connection '{name}': {e}")))?;
        }
        for (id, entry) in &self.procedures {
            if let Some(conn) = &entry.connection {
                if !self.connections.contains_key(conn) {
                    return Err(Error::Config(format!(
                        "procedure '{id}' references unknown connection '{conn}'"
                    )));
                }
            }
        }
        if self.defaults.timeout_ms == 0 {
            return Err(Error::Config("defaults.timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Build the manifest registry described by `procedures`.
    pub fn manifest_registry(&self) -> Result<ManifestRegistry> {
        ManifestRegistry::from_manifests(self.procedures.iter().map(|(id, entry)| {
            let name = entry.procedure.clone().unwrap_or_else(|| id.clone());
            let manifest = ProcedureManifest::new(id.clone(), name).with_params(entry.params.clone());
            match &entry.connection {
                Some(conn) => manifest.connection(conn.clone()),
                None => manifest,
            }
        }))
    }

    /// Global invocation defaults.
    #[must_use]
    pub fn invocation_defaults(&self) -> InvocationOptions {
        self.defaults.to_options()
    }
}

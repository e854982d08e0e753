//! # sproc-client
//!
//! Named-parameter stored-procedure execution over pooled connections.
//!
//! Callers hand a procedure identifier and a JSON object of named
//! parameters to a [`DataAccess`] facade. The facade looks up the
//! procedure's manifest, orders the values into the positional argument list
//! the procedure binds, runs the call through a [`ProcedureInvoker`] with a
//! per-attempt timeout and linear retry backoff, and normalizes the outcome
//! into a [`Response`].
//!
//! ## Features
//!
//! - **Manifest-driven mapping**: parameter order comes from configuration,
//!   never from the caller's key order
//! - **Bounded retries**: only transient failures are retried; procedure
//!   errors surface on the first attempt
//! - **Shared metrics**: per-attempt latency and outcome counters plus pool
//!   gauges, safe under concurrent callers
//! - **Request log channel**: paired request/response records on
//!   [`instrumentation::REQUEST_LOG_TARGET`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use sproc_client::{Config, Gateway, OptionOverrides};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("gateway.json")?;
//!     let gateway = Gateway::from_config(&config, |_, settings| {
//!         MyDriver::new(&settings.connection_string)
//!     })?;
//!
//!     let params = serde_json::json!({"customerId": "C1", "amount": "100"});
//!     let response = gateway
//!         .data_access()
//!         .execute("charge_customer", params.as_object().unwrap(), &OptionOverrides::new())
//!         .await;
//!
//!     println!("{}", serde_json::to_string(&response)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod instrumentation;
pub mod invoker;
pub mod manifest;
pub mod mapper;
pub mod metrics;
pub mod operation;
pub mod options;

pub use config::{Config, ConnectionSettings};
pub use driver::{DriverError, DriverErrorKind, ProcedureConnection, ProcedureOutput};
pub use error::{Error, ErrorKind, Result};
pub use facade::{DataAccess, Response};
pub use gateway::Gateway;
pub use instrumentation::LogRedaction;
pub use invoker::{InvokerBuilder, PoolStats, ProcedureInvoker};
pub use manifest::{BindTarget, ManifestRegistry, ProcedureManifest};
pub use mapper::{MappedCall, NamedParams, ParameterMapper};
pub use metrics::{MetricsRecorder, MetricsSnapshot, ProcedureStats};
pub use operation::Operation;
pub use options::{InvocationOptions, InvocationRequest, OptionOverrides};
pub use sproc_pool::{ConnectionManager, Pool, PoolConfig, PoolError};

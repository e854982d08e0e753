//! Per-caller entry point that maps, invokes and normalizes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use sproc_pool::ConnectionManager;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::driver::{ProcedureConnection, ProcedureOutput};
use crate::error::{Error, Result};
use crate::instrumentation::{LogRedaction, REQUEST_LOG_TARGET, span_names};
use crate::invoker::{PoolStats, ProcedureInvoker};
use crate::mapper::{NamedParams, ParameterMapper};
use crate::metrics::MetricsSnapshot;
use crate::operation::{ExecuteArgs, Operation};
use crate::options::{InvocationOptions, InvocationRequest, OptionOverrides};

/// Normalized outcome of [`DataAccess::execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// `0` on success, `1` on failure.
    pub error: u8,
    /// Failure message, empty on success.
    pub errmsg: String,
    /// Result rows on success, an empty array on failure.
    pub response: Value,
    /// Arguments in the order they were bound; empty when mapping failed.
    pub request: Vec<Value>,
    /// Status code the procedure returned, when the driver reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_status: Option<i32>,
}

impl Response {
    fn success(output: ProcedureOutput, request: Vec<Value>) -> Self {
        Self {
            error: 0,
            errmsg: String::new(),
            response: Value::Array(output.rows),
            request,
            return_status: output.return_status,
        }
    }

    fn failure(err: &Error, request: Vec<Value>) -> Self {
        Self {
            error: 1,
            errmsg: err.to_string(),
            response: Value::Array(Vec::new()),
            request,
            return_status: None,
        }
    }

    /// Whether the call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error == 0
    }
}

/// Data access entry point for one caller.
///
/// Each instance carries its own option defaults and shares the process-wide
/// [`ProcedureInvoker`]. `execute` never fails; every outcome is normalized
/// into a [`Response`].
pub struct DataAccess<M: ConnectionManager> {
    invoker: Arc<ProcedureInvoker<M>>,
    mapper: ParameterMapper,
    global: InvocationOptions,
    defaults: OptionOverrides,
    redaction: LogRedaction,
}

impl<M: ConnectionManager> Clone for DataAccess<M> {
    fn clone(&self) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
            mapper: self.mapper.clone(),
            global: self.global.clone(),
            defaults: self.defaults.clone(),
            redaction: self.redaction.clone(),
        }
    }
}

impl<M> DataAccess<M>
where
    M: ConnectionManager,
    M::Connection: ProcedureConnection,
{
    /// Create a facade over a shared invoker.
    pub fn new(
        invoker: Arc<ProcedureInvoker<M>>,
        mapper: ParameterMapper,
        global: InvocationOptions,
    ) -> Self {
        Self {
            invoker,
            mapper,
            global,
            defaults: OptionOverrides::default(),
            redaction: LogRedaction::default(),
        }
    }

    /// Set this instance's option defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: OptionOverrides) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set how parameter values are masked in the request log.
    #[must_use]
    pub fn with_redaction(mut self, redaction: LogRedaction) -> Self {
        self.redaction = redaction;
        self
    }

    /// Options a call with `overrides` would run with.
    #[must_use]
    pub fn effective_options(&self, overrides: &OptionOverrides) -> InvocationOptions {
        InvocationOptions::resolve(&self.global, &self.defaults, overrides)
    }

    /// Map `params` for `procedure_id`, run it and normalize the outcome.
    pub async fn execute(
        &self,
        procedure_id: &str,
        params: &NamedParams,
        overrides: &OptionOverrides,
    ) -> Response {
        let correlation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            span_names::EXECUTE,
            correlation_id = %correlation_id,
            procedure = %procedure_id,
        );
        self.execute_inner(correlation_id, procedure_id, params, overrides)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        correlation_id: Uuid,
        procedure_id: &str,
        params: &NamedParams,
        overrides: &OptionOverrides,
    ) -> Response {
        let options = self.effective_options(overrides);
        let logging = options.enable_logging;
        let started = Instant::now();

        let call = match self.mapper.map(procedure_id, params) {
            Ok(call) => call,
            Err(err) => {
                self.log_request(correlation_id, procedure_id, params);
                let response = Response::failure(&err, Vec::new());
                log_response(correlation_id, procedure_id, &response, Some(&err), started);
                return response;
            }
        };

        let request = InvocationRequest::from_mapped(call, options);
        if logging {
            self.log_request(correlation_id, procedure_id, params);
        }

        match self.invoker.call(&request).await {
            Ok(output) => {
                let response = Response::success(output, request.params().to_vec());
                if logging {
                    log_response(correlation_id, procedure_id, &response, None, started);
                }
                response
            }
            Err(err) => {
                if !logging {
                    self.log_request(correlation_id, procedure_id, params);
                }
                let response = Response::failure(&err, request.params().to_vec());
                log_response(correlation_id, procedure_id, &response, Some(&err), started);
                response
            }
        }
    }

    fn log_request(&self, correlation_id: Uuid, procedure_id: &str, params: &NamedParams) {
        let params = self.redaction.redact(params);
        tracing::info!(
            target: REQUEST_LOG_TARGET,
            correlation_id = %correlation_id,
            procedure = %procedure_id,
            direction = "request",
            params = %params,
        );
    }

    /// Status of every pool.
    #[must_use]
    pub fn connection_pool_stats(&self) -> BTreeMap<String, PoolStats> {
        self.invoker.pool_stats()
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn performance_metrics(&self) -> MetricsSnapshot {
        self.invoker.metrics_snapshot()
    }

    /// Zero the call counters.
    pub fn clear_performance_metrics(&self) {
        self.invoker.metrics().reset();
    }

    /// Run the operation named `operation` with JSON `args`.
    ///
    /// Fails only for an unknown operation name or malformed arguments; the
    /// outcome of an `execute` is carried inside the returned [`Response`].
    pub async fn dispatch(&self, operation: &str, args: Value) -> Result<Value> {
        let operation: Operation = operation.parse()?;
        tracing::debug!(operation = %operation, "dispatching");

        match operation {
            Operation::Execute => {
                let args = ExecuteArgs::from_value(args)?;
                let response = self.execute(&args.procedure, &args.params, &args.options).await;
                Ok(serde_json::to_value(response)?)
            }
            Operation::ConnectionPoolStats => Ok(serde_json::to_value(self.connection_pool_stats())?),
            Operation::PerformanceMetrics => Ok(serde_json::to_value(self.performance_metrics())?),
            Operation::ClearPerformanceMetrics => {
                self.clear_performance_metrics();
                Ok(json!({ "cleared": true }))
            }
        }
    }

    /// The shared invoker.
    #[must_use]
    pub fn invoker(&self) -> &Arc<ProcedureInvoker<M>> {
        &self.invoker
    }
}

fn log_response(
    correlation_id: Uuid,
    procedure_id: &str,
    response: &Response,
    err: Option<&Error>,
    started: Instant,
) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match err {
        None => tracing::info!(
            target: REQUEST_LOG_TARGET,
            correlation_id = %correlation_id,
            procedure = %procedure_id,
            direction = "response",
            error = response.error,
            rows = response.response.as_array().map_or(0, Vec::len),
            elapsed_ms,
        ),
        Some(err) => tracing::warn!(
            target: REQUEST_LOG_TARGET,
            correlation_id = %correlation_id,
            procedure = %procedure_id,
            direction = "response",
            error = response.error,
            errmsg = %response.errmsg,
            error.kind = ?err.kind(),
            elapsed_ms,
        ),
    }
}

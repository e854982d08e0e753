//! Pooled stored-procedure execution with timeout and retry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use sproc_pool::{ConnectionManager, Pool};
use tokio::time::Instant;
use tracing::Instrument;

use crate::driver::{DriverErrorKind, ProcedureConnection, ProcedureOutput};
use crate::error::{Error, Result};
use crate::instrumentation::span_names;
use crate::manifest::validate_identifier;
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::options::InvocationRequest;

/// Executes stored procedures over named connection pools.
///
/// One invoker is meant to be shared by every caller in the process; wrap it
/// in an [`Arc`] at the composition root and hand clones to each
/// [`DataAccess`](crate::DataAccess).
///
/// # Retry policy
///
/// An attempt is one checkout plus one procedure call, bounded by the
/// request's timeout. Transient failures (timeout, transport error, pool
/// exhaustion) are retried up to `retry_attempts` more times, sleeping
/// `retry_delay * attempt` between tries. Anything else is returned at once.
///
/// # Cancellation
///
/// Dropping the future returned by [`call`](Self::call) at any await point
/// releases the connection it holds, if any.
pub struct ProcedureInvoker<M: ConnectionManager> {
    pools: HashMap<String, Pool<M>>,
    default_connection: String,
    metrics: Arc<MetricsRecorder>,
}

impl<M> ProcedureInvoker<M>
where
    M: ConnectionManager,
    M::Connection: ProcedureConnection,
{
    /// Create a new invoker builder.
    #[must_use]
    pub fn builder() -> InvokerBuilder<M> {
        InvokerBuilder::new()
    }

    /// Execute `request`, retrying transient failures.
    pub async fn call(&self, request: &InvocationRequest) -> Result<ProcedureOutput> {
        validate_identifier(request.procedure())?;

        let options = request.options();
        let pool_name = options
            .connection_name
            .as_deref()
            .unwrap_or(&self.default_connection);
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| Error::UnknownConnection(pool_name.to_string()))?;

        let max_attempts = options.retry_attempts.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let span = tracing::debug_span!(
                span_names::CALL,
                procedure = %request.procedure(),
                connection = %pool_name,
                attempt,
            );

            let started = Instant::now();
            let outcome = self.attempt(pool, request).instrument(span).await;
            self.metrics
                .record_call(request.procedure_id(), started.elapsed(), outcome.is_ok());
            let status = pool.status();
            self.metrics
                .record_pool_snapshot(status.in_use, status.available, status.waiters);

            match outcome {
                Ok(output) => {
                    tracing::debug!(
                        procedure = %request.procedure(),
                        attempt,
                        rows = output.rows.len(),
                        "procedure call succeeded"
                    );
                    return Ok(output);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = options.backoff_for(attempt);
                    tracing::warn!(
                        procedure = %request.procedure(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!(
                            procedure = %request.procedure(),
                            attempts = attempt,
                            error = %e,
                            "retries exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, pool: &Pool<M>, request: &InvocationRequest) -> Result<ProcedureOutput> {
        let timeout = request.options().timeout;
        match tokio::time::timeout(timeout, Self::checkout_and_call(pool, request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                procedure: request.procedure().to_string(),
                timeout,
            }),
        }
    }

    async fn checkout_and_call(pool: &Pool<M>, request: &InvocationRequest) -> Result<ProcedureOutput> {
        let mut conn = pool.get().await?;

        // Stays set if this future is dropped mid-call, so an aborted
        // session is closed rather than reused.
        conn.mark_broken();
        let result = conn
            .call_procedure(request.procedure(), request.params(), request.options().timeout)
            .await;

        match result {
            Ok(output) => {
                conn.mark_reusable();
                Ok(output)
            }
            Err(e) => {
                if e.kind() == DriverErrorKind::Procedure {
                    conn.mark_reusable();
                }
                Err(Error::from_driver(request.procedure(), e))
            }
        }
    }

    /// Open each pool's minimum connections.
    pub async fn warm_up(&self) -> Result<()> {
        for pool in self.pools.values() {
            pool.warm_up().await?;
        }
        Ok(())
    }

    /// Status and counters for every pool, keyed by connection name.
    #[must_use]
    pub fn pool_stats(&self) -> BTreeMap<String, PoolStats> {
        self.pools
            .iter()
            .map(|(name, pool)| (name.clone(), PoolStats::from_pool(pool)))
            .collect()
    }

    /// Shared metrics recorder.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Metrics snapshot.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Name of the fallback pool.
    #[must_use]
    pub fn default_connection(&self) -> &str {
        &self.default_connection
    }

    /// Look up a pool by name.
    #[must_use]
    pub fn pool(&self, name: &str) -> Option<&Pool<M>> {
        self.pools.get(name)
    }

    /// Close every pool.
    pub fn close(&self) {
        for pool in self.pools.values() {
            pool.close();
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for ProcedureInvoker<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureInvoker")
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .field("default_connection", &self.default_connection)
            .finish()
    }
}

/// Builder for [`ProcedureInvoker`].
pub struct InvokerBuilder<M: ConnectionManager> {
    pools: HashMap<String, Pool<M>>,
    default_connection: Option<String>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl<M> InvokerBuilder<M>
where
    M: ConnectionManager,
    M::Connection: ProcedureConnection,
{
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
            default_connection: None,
            metrics: None,
        }
    }

    /// Register a pool under its own name.
    #[must_use]
    pub fn pool(mut self, pool: Pool<M>) -> Self {
        self.pools.insert(pool.name().to_string(), pool);
        self
    }

    /// Name the fallback pool.
    #[must_use]
    pub fn default_connection(mut self, name: impl Into<String>) -> Self {
        self.default_connection = Some(name.into());
        self
    }

    /// Share an existing recorder instead of creating one.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the invoker.
    ///
    /// Without an explicit default, a single registered pool becomes the
    /// default.
    pub fn build(self) -> Result<ProcedureInvoker<M>> {
        let default_connection = match self.default_connection {
            Some(name) => name,
            None if self.pools.len() == 1 => self.pools.keys().cloned().next().unwrap_or_default(),
            None => {
                return Err(Error::Config(
                    "a default connection is required when several pools are registered".into(),
                ));
            }
        };

        if !self.pools.contains_key(&default_connection) {
            return Err(Error::Config(format!(
                "default connection '{default_connection}' has no pool"
            )));
        }

        tracing::info!(
            pools = self.pools.len(),
            default_connection = %default_connection,
            "procedure invoker ready"
        );

        Ok(ProcedureInvoker {
            pools: self.pools,
            default_connection,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

impl<M> Default for InvokerBuilder<M>
where
    M: ConnectionManager,
    M::Connection: ProcedureConnection,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of one pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// Idle connections.
    pub idle: u32,
    /// Checked-out connections.
    pub active: u32,
    /// Open connections.
    pub total: u32,
    /// Checkout cap.
    pub max: u32,
    /// Callers waiting for a slot.
    pub waiters: u32,
    /// Successful checkouts since start.
    pub checkouts: u64,
    /// Failed checkouts since start.
    pub checkout_failures: u64,
    /// Releases since start.
    pub checkins: u64,
    /// Connections opened since start.
    pub connections_created: u64,
    /// Connections closed since start.
    pub connections_closed: u64,
    /// Percentage of slots in use.
    pub utilization: f64,
}

impl PoolStats {
    fn from_pool<M: ConnectionManager>(pool: &Pool<M>) -> Self {
        let status = pool.status();
        let metrics = pool.metrics();
        Self {
            idle: status.available,
            active: status.in_use,
            total: status.total,
            max: status.max,
            waiters: status.waiters,
            checkouts: metrics.checkouts_successful,
            checkout_failures: metrics.checkouts_failed,
            checkins: metrics.checkins,
            connections_created: metrics.connections_created,
            connections_closed: metrics.connections_closed,
            utilization: status.utilization(),
        }
    }
}

//! Composition root wiring configuration into pools, invoker and facades.

use std::sync::Arc;

use sproc_pool::{ConnectionManager, Pool};

use crate::config::{Config, ConnectionSettings};
use crate::driver::ProcedureConnection;
use crate::error::Result;
use crate::facade::DataAccess;
use crate::instrumentation::LogRedaction;
use crate::invoker::ProcedureInvoker;
use crate::mapper::ParameterMapper;
use crate::metrics::MetricsRecorder;
use crate::options::{InvocationOptions, OptionOverrides};

/// Owns the shared invoker and manifest registry for one process.
///
/// ```rust,ignore
/// let config = Config::from_file("gateway.json")?;
/// let gateway = Gateway::from_config(&config, |_name, settings| {
///     MyManager::new(&settings.connection_string)
/// })?;
/// gateway.warm_up().await?;
///
/// let data = gateway.data_access();
/// let response = data.execute("charge_customer", &params, &OptionOverrides::new()).await;
/// ```
pub struct Gateway<M: ConnectionManager> {
    invoker: Arc<ProcedureInvoker<M>>,
    mapper: ParameterMapper,
    global: InvocationOptions,
    redaction: LogRedaction,
}

impl<M: ConnectionManager> Clone for Gateway<M> {
    fn clone(&self) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
            mapper: self.mapper.clone(),
            global: self.global.clone(),
            redaction: self.redaction.clone(),
        }
    }
}

impl<M> Gateway<M>
where
    M: ConnectionManager,
    M::Connection: ProcedureConnection,
{
    /// Build pools from `config`, creating one manager per connection with `factory`.
    pub fn from_config<F>(config: &Config, mut factory: F) -> Result<Self>
    where
        F: FnMut(&str, &ConnectionSettings) -> M,
    {
        config.validate()?;

        let mut builder = ProcedureInvoker::builder()
            .default_connection(config.default_connection.clone())
            .metrics(Arc::new(MetricsRecorder::new()));
        for (name, settings) in &config.connections {
            let pool = Pool::new(name.clone(), factory(name, settings), settings.pool_config())?;
            builder = builder.pool(pool);
        }
        let invoker = Arc::new(builder.build()?);
        let registry = Arc::new(config.manifest_registry()?);

        tracing::info!(
            connections = config.connections.len(),
            procedures = registry.len(),
            "gateway configured"
        );

        Ok(Self {
            invoker,
            mapper: ParameterMapper::new(registry),
            global: config.invocation_defaults(),
            redaction: LogRedaction::default().with_keys(config.redact_keys.iter().cloned()),
        })
    }

    /// Assemble a gateway from parts built elsewhere.
    pub fn new(
        invoker: Arc<ProcedureInvoker<M>>,
        mapper: ParameterMapper,
        global: InvocationOptions,
    ) -> Self {
        Self {
            invoker,
            mapper,
            global,
            redaction: LogRedaction::default(),
        }
    }

    /// Open each pool's minimum connections.
    pub async fn warm_up(&self) -> Result<()> {
        self.invoker.warm_up().await
    }

    /// A facade with no instance defaults.
    #[must_use]
    pub fn data_access(&self) -> DataAccess<M> {
        DataAccess::new(Arc::clone(&self.invoker), self.mapper.clone(), self.global.clone())
            .with_redaction(self.redaction.clone())
    }

    /// A facade whose calls start from `defaults`.
    #[must_use]
    pub fn data_access_with(&self, defaults: OptionOverrides) -> DataAccess<M> {
        self.data_access().with_defaults(defaults)
    }

    /// The shared invoker.
    #[must_use]
    pub fn invoker(&self) -> &Arc<ProcedureInvoker<M>> {
        &self.invoker
    }

    /// Close every pool. Calls already holding a connection finish normally.
    pub fn shutdown(&self) {
        tracing::info!("gateway shutting down");
        self.invoker.close();
    }
}

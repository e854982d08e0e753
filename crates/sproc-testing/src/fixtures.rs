//! Builders for invokers and facades over a single scripted pool.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sproc_client::{
    DataAccess, InvocationOptions, ManifestRegistry, NamedParams, ParameterMapper,
    ProcedureInvoker, ProcedureManifest, Result,
};
use sproc_pool::PoolBuilder;

use crate::scripted::ScriptedManager;

/// Name of the pool created by these fixtures.
pub const POOL_NAME: &str = "main";

/// Manifest used throughout the examples: `customerId`, then `amount`.
#[must_use]
pub fn charge_manifest() -> ProcedureManifest {
    ProcedureManifest::new("charge_customer", "billing.usp_charge")
        .named("customerId", "p_cust")
        .named("amount", "p_amt")
}

/// Invoker over one pool of at most `max_connections` scripted connections.
pub fn invoker(manager: ScriptedManager, max_connections: u32) -> Result<Arc<ProcedureInvoker<ScriptedManager>>> {
    let pool = PoolBuilder::new()
        .name(POOL_NAME)
        .min_connections(0)
        .max_connections(max_connections)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?;
    Ok(Arc::new(ProcedureInvoker::builder().pool(pool).build()?))
}

/// Facade over [`invoker`] with the given manifests and global options.
pub fn data_access(
    manager: ScriptedManager,
    max_connections: u32,
    manifests: impl IntoIterator<Item = ProcedureManifest>,
    global: InvocationOptions,
) -> Result<DataAccess<ScriptedManager>> {
    let registry = ManifestRegistry::from_manifests(manifests)?;
    Ok(DataAccess::new(
        invoker(manager, max_connections)?,
        ParameterMapper::new(Arc::new(registry)),
        global,
    ))
}

/// Named parameters from a JSON object; anything else yields an empty map.
#[must_use]
pub fn named(value: Value) -> NamedParams {
    match value {
        Value::Object(map) => map,
        _ => NamedParams::new(),
    }
}

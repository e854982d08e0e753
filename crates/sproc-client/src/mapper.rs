//! Named-to-positional parameter mapping.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::manifest::{ManifestRegistry, ProcedureManifest};

/// Caller-supplied parameters keyed by name.
pub type NamedParams = Map<String, Value>;

/// A call whose parameters are in procedure order.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedCall {
    /// Procedure identifier the caller asked for.
    pub procedure_id: String,
    /// Database-side procedure name.
    pub procedure: String,
    /// Connection pinned by the manifest, if any.
    pub connection: Option<String>,
    /// Argument values in manifest declaration order.
    pub params: Vec<Value>,
}

/// Maps named parameters onto procedure argument order using the manifest registry.
#[derive(Debug, Clone)]
pub struct ParameterMapper {
    registry: Arc<ManifestRegistry>,
}

impl ParameterMapper {
    /// Create a mapper over `registry`.
    pub fn new(registry: Arc<ManifestRegistry>) -> Self {
        Self { registry }
    }

    /// Map `named` for `procedure_id`.
    ///
    /// Fails with [`Error::UnknownProcedure`] when no manifest is registered
    /// and with [`Error::MissingParameter`] for the first manifest key absent
    /// from `named`. Keys the manifest does not mention are ignored.
    pub fn map(&self, procedure_id: &str, named: &NamedParams) -> Result<MappedCall> {
        let manifest = self.registry.get(procedure_id)?;
        let params = order_params(manifest, named)?;
        Ok(MappedCall {
            procedure_id: procedure_id.to_string(),
            procedure: manifest.procedure().to_string(),
            connection: manifest.connection_name().map(str::to_string),
            params,
        })
    }

    /// The registry this mapper reads from.
    #[must_use]
    pub fn registry(&self) -> &Arc<ManifestRegistry> {
        &self.registry
    }
}

/// Order `named` according to `manifest`.
///
/// A key that is present with an empty string or `null` counts as present.
pub fn order_params(manifest: &ProcedureManifest, named: &NamedParams) -> Result<Vec<Value>> {
    manifest
        .params()
        .iter()
        .map(|binding| {
            named
                .get(&binding.key)
                .cloned()
                .ok_or_else(|| Error::MissingParameter {
                    procedure: manifest.id().to_string(),
                    key: binding.key.clone(),
                })
        })
        .collect()
}

//! Procedure manifests and the registry that holds them.
//!
//! A manifest lists the caller-facing parameter keys of one procedure in the
//! order the procedure binds them. The registry is assembled once at startup
//! and is read-only afterwards.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Where a manifest key is bound on the procedure side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindTarget {
    /// Bound to a named procedure parameter, e.g. `p_cust`.
    Name(String),
    /// Bound to a 1-based argument position.
    Position(u32),
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Position(pos) => write!(f, "#{pos}"),
        }
    }
}

/// One manifest entry: a caller key and its bind target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    /// Key expected in the caller's named parameters.
    pub key: String,
    /// Procedure-side target.
    pub target: BindTarget,
}

/// Manifest parameters in declaration order.
///
/// Deserializes from a JSON object and keeps its keys in the order they were
/// written. Duplicate keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedParams(pub Vec<ParamBinding>);

impl<'de> Deserialize<'de> for OrderedParams {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedParamsVisitor;

        impl<'de> Visitor<'de> for OrderedParamsVisitor {
            type Value = OrderedParams;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter key to bind name or position")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut seen = HashSet::new();
                let mut bindings = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, target)) = map.next_entry::<String, BindTarget>()? {
                    if !seen.insert(key.clone()) {
                        return Err(de::Error::custom(format!("duplicate parameter key '{key}'")));
                    }
                    bindings.push(ParamBinding { key, target });
                }
                Ok(OrderedParams(bindings))
            }
        }

        deserializer.deserialize_map(OrderedParamsVisitor)
    }
}

/// Parameter manifest for one stored procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureManifest {
    id: String,
    procedure: String,
    connection: Option<String>,
    params: Vec<ParamBinding>,
}

impl ProcedureManifest {
    /// Start a manifest for `id`, calling the database procedure `procedure`.
    pub fn new(id: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            procedure: procedure.into(),
            connection: None,
            params: Vec::new(),
        }
    }

    /// Append a parameter binding.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, target: BindTarget) -> Self {
        self.params.push(ParamBinding {
            key: key.into(),
            target,
        });
        self
    }

    /// Append a parameter bound by name.
    #[must_use]
    pub fn named(self, key: impl Into<String>, bind_name: impl Into<String>) -> Self {
        self.param(key, BindTarget::Name(bind_name.into()))
    }

    /// Pin the manifest to a connection pool.
    #[must_use]
    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    /// Replace all bindings.
    #[must_use]
    pub fn with_params(mut self, params: OrderedParams) -> Self {
        self.params = params.0;
        self
    }

    /// Procedure identifier callers use.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Database-side procedure name.
    #[must_use]
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Connection pinned by the manifest, if any.
    #[must_use]
    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    /// Bindings in declaration order.
    #[must_use]
    pub fn params(&self) -> &[ParamBinding] {
        &self.params
    }

    /// Check the manifest is usable.
    ///
    /// The procedure name must be a valid identifier, keys must be unique, and
    /// positional targets must equal their 1-based declaration index.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.procedure)?;

        let mut seen = HashSet::new();
        for (index, binding) in self.params.iter().enumerate() {
            if !seen.insert(binding.key.as_str()) {
                return Err(Error::Config(format!(
                    "procedure '{}' declares parameter '{}' twice",
                    self.id, binding.key
                )));
            }
            if let BindTarget::Position(pos) = binding.target {
                let expected = index as u32 + 1;
                if pos != expected {
                    return Err(Error::Config(format!(
                        "procedure '{}' binds '{}' to position {pos} but declares it at position {expected}",
                        self.id, binding.key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Immutable lookup of manifests by procedure identifier.
#[derive(Debug, Clone, Default)]
pub struct ManifestRegistry {
    manifests: HashMap<String, Arc<ProcedureManifest>>,
}

impl ManifestRegistry {
    /// Build a registry, validating every manifest.
    pub fn from_manifests(manifests: impl IntoIterator<Item = ProcedureManifest>) -> Result<Self> {
        let mut map = HashMap::new();
        for manifest in manifests {
            manifest.validate()?;
            let id = manifest.id.clone();
            if map.insert(id.clone(), Arc::new(manifest)).is_some() {
                return Err(Error::Config(format!("procedure '{id}' is registered twice")));
            }
        }
        tracing::debug!(procedures = map.len(), "manifest registry loaded");
        Ok(Self { manifests: map })
    }

    /// Look up the manifest for `procedure_id`.
    pub fn get(&self, procedure_id: &str) -> Result<&ProcedureManifest> {
        self.manifests
            .get(procedure_id)
            .map(AsRef::as_ref)
            .ok_or_else(|| Error::UnknownProcedure(procedure_id.to_string()))
    }

    /// Whether a manifest exists for `procedure_id`.
    #[must_use]
    pub fn contains(&self, procedure_id: &str) -> bool {
        self.manifests.contains_key(procedure_id)
    }

    /// Number of registered procedures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Iterate over all manifests in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ProcedureManifest> {
        self.manifests.values().map(AsRef::as_ref)
    }
}

/// Validate a procedure name, optionally schema- or database-qualified.
///
/// Each dot-separated part must start with a letter or underscore and contain
/// only alphanumerics, `_`, `@`, `#` or `$`, up to 128 characters.
pub fn validate_identifier(name: &str) -> Result<()> {
    #[allow(clippy::expect_used)]
    static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_@#$]{0,127}(\.[A-Za-z_][A-Za-z0-9_@#$]{0,127}){0,2}$")
            .expect("identifier pattern compiles")
    });

    if name.is_empty() {
        return Err(Error::InvalidIdentifier(
            "identifier cannot be empty".into(),
        ));
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{name}': each part must start with letter/underscore, \
             contain only alphanumerics/_/@/#/$, and be 1-128 characters"
        )));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_params_keep_document_order() {
        let params: OrderedParams =
            serde_json::from_str(r#"{"zeta":"p_z","alpha":"p_a","mid":3}"#).unwrap();
        let keys: Vec<_> = params.0.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        assert_eq!(params.0[2].target, BindTarget::Position(3));
    }

    #[test]
    fn test_ordered_params_reject_duplicates() {
        let err = serde_json::from_str::<OrderedParams>(r#"{"a":"x","a":"y"}"#).unwrap_err();
        assert!(err.to_string().contains("duplicate parameter key 'a'"));
    }

    #[test]
    fn test_positions_must_match_declaration() {
        let ok = ProcedureManifest::new("p", "dbo.usp_p")
            .param("a", BindTarget::Position(1))
            .param("b", BindTarget::Position(2));
        assert!(ok.validate().is_ok());

        let swapped = ProcedureManifest::new("p", "dbo.usp_p")
            .param("a", BindTarget::Position(2))
            .param("b", BindTarget::Position(1));
        assert!(matches!(swapped.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ManifestRegistry::from_manifests([
            ProcedureManifest::new("charge", "billing.usp_charge").named("customerId", "p_cust"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("charge").unwrap().procedure(), "billing.usp_charge");
        assert!(matches!(registry.get("refund"), Err(Error::UnknownProcedure(id)) if id == "refund"));
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let result = ManifestRegistry::from_manifests([
            ProcedureManifest::new("charge", "usp_a"),
            ProcedureManifest::new("charge", "usp_b"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("usp_charge").is_ok());
        assert!(validate_identifier("dbo.usp_charge").is_ok());
        assert!(validate_identifier("billing.dbo.usp_charge").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("123abc").is_err());
        assert!(validate_identifier("usp-charge").is_err());
        assert!(validate_identifier("dbo.").is_err());
        assert!(validate_identifier("a.b.c.d").is_err());
        assert!(validate_identifier("usp;DROP TABLE users").is_err());
    }
}

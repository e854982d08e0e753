//! Fuzz named-to-positional mapping against arbitrary manifests.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use sproc_client::NamedParams;
use sproc_client::ProcedureManifest;
use sproc_client::mapper::order_params;

#[derive(Debug, Arbitrary)]
struct Input {
    manifest_keys: Vec<String>,
    supplied: Vec<(String, i64)>,
}

fuzz_target!(|input: Input| {
    let mut manifest = ProcedureManifest::new("fuzz", "dbo.usp_fuzz");
    for key in &input.manifest_keys {
        manifest = manifest.named(key.clone(), key.clone());
    }

    let mut named = NamedParams::new();
    for (key, value) in input.supplied {
        named.insert(key, Value::from(value));
    }

    match order_params(&manifest, &named) {
        Ok(params) => {
            assert_eq!(params.len(), input.manifest_keys.len());
            for (key, value) in input.manifest_keys.iter().zip(&params) {
                assert_eq!(named.get(key), Some(value));
            }
        }
        Err(_) => {
            assert!(input.manifest_keys.iter().any(|k| !named.contains_key(k)));
        }
    }
});

//! Fuzz configuration parsing and manifest registry construction.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sproc_client::Config;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = Config::from_json_str(text) {
        // A validated config must always yield a registry or a typed error.
        let _ = config.manifest_registry();
        let _ = config.invocation_defaults();
    }
});

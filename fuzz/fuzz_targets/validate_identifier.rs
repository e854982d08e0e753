//! Fuzz procedure identifier validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sproc_client::manifest::validate_identifier;

fuzz_target!(|name: &str| {
    if validate_identifier(name).is_ok() {
        assert!(!name.contains(';'));
        assert!(!name.contains('\''));
        assert!(name.split('.').count() <= 3);
    }
});

//! Fuzz test for configuration files
//!
//! Parsing arbitrary TOML must either produce a configuration that passes
//! validation or return a ConfigError, never panic.
//!
//! Run with: cargo +nightly fuzz run config_fuzz -- -max_total_time=60

#![no_main]

use fncache_core::MemoConfig;
use fncache_storage::StorageLocation;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Any source string must resolve to a location under the root.
    let root = std::path::Path::new("/fuzz-root");
    let location = StorageLocation::for_source(root, input);
    assert!(location.path().starts_with(root));

    if let Ok(config) = MemoConfig::from_toml_str(input) {
        assert!(config.validate().is_ok(), "parsed config should be valid");
    }
});

//! Shared helpers for integration tests.

use tether_bridge::{init_sync, BridgeConfig, Instance, SyncSource};

/// Instantiate a text-format module with the default configuration.
pub fn load(wat: &str) -> Instance {
    load_with(wat, BridgeConfig::default())
}

/// Instantiate a text-format module with a custom configuration.
pub fn load_with(wat: &str, config: BridgeConfig) -> Instance {
    init_sync(SyncSource::Bytes(wat.as_bytes().to_vec()), config)
        .expect("module should instantiate")
}

/// Guest that invokes a host closure with two numeric arguments (3, 4)
/// and returns the truncated numeric result. The closure handle arrives
/// as the first `main` parameter.
pub const INVOKE_TWO_NUMBERS_WAT: &str = r#"
    (module
        (import "tether" "closure_invoke" (func $invoke (param i32 i32 i32)))
        (memory (export "memory") 1)
        (func (export "main") (param i32 i32) (result i32)
            (f64.store (i32.const 1024) (f64.const 3))
            (f64.store (i32.const 1032) (f64.const 4))
            (call $invoke (local.get 0) (i32.const 1024) (i32.const 2048))
            (i32.trunc_f64_s (f64.load (i32.const 2048))))
    )
"#;

//! Allocator behavior as seen from guest code.

mod common;

use common::{load, load_with};
use tether_bridge::{BridgeConfig, BridgeError};

#[test]
fn test_guest_realloc_preserves_prefix() {
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (import "tether" "realloc" (func $realloc (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $p i32)
                (local.set $p (call $malloc (i32.const 8) (i32.const 8)))
                (i64.store (local.get $p) (i64.const 0x1122334455667788))
                (local.set $p
                    (call $realloc (local.get $p) (i32.const 8) (i32.const 8) (i32.const 4096)))
                (i64.eq (i64.load (local.get $p)) (i64.const 0x1122334455667788)))
        )
    "#;
    let mut inst = load(wat);
    assert_eq!(inst.call_main(0, 0).unwrap(), 1);
}

#[test]
fn test_guest_realloc_shrink_in_place() {
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (import "tether" "realloc" (func $realloc (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $p i32)
                (local.set $p (call $malloc (i32.const 256) (i32.const 8)))
                ;; Shrinking keeps the block where it is.
                (i32.eq
                    (call $realloc (local.get $p) (i32.const 256) (i32.const 8) (i32.const 16))
                    (local.get $p)))
        )
    "#;
    let mut inst = load(wat);
    assert_eq!(inst.call_main(0, 0).unwrap(), 1);
}

#[test]
fn test_guest_free_then_reuse() {
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (import "tether" "free" (func $free (param i32 i32 i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $a i32)
                (local.set $a (call $malloc (i32.const 64) (i32.const 8)))
                (call $free (local.get $a) (i32.const 64) (i32.const 8))
                ;; First-fit hands the same block back.
                (i32.eq (call $malloc (i32.const 64) (i32.const 8)) (local.get $a)))
        )
    "#;
    let mut inst = load(wat);
    assert_eq!(inst.call_main(0, 0).unwrap(), 1);
}

#[test]
fn test_guest_zero_size_malloc() {
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (import "tether" "free" (func $free (param i32 i32 i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $p i32)
                (local.set $p (call $malloc (i32.const 0) (i32.const 8)))
                (call $free (local.get $p) (i32.const 0) (i32.const 8))
                (local.get $p))
        )
    "#;
    let mut inst = load(wat);
    // Zero-size allocations yield the nonzero dangling pointer `align`.
    assert_eq!(inst.call_main(0, 0).unwrap(), 8);
}

#[test]
fn test_region_grows_on_demand() {
    let config = BridgeConfig {
        max_memory_pages: 64,
        heap_pages: 1,
    };
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                ;; Twice the initial region; forces a grow-and-retry.
                (call $malloc (i32.const 131072) (i32.const 8)))
        )
    "#;
    let mut inst = load_with(wat, config);
    let before = inst.memory_size();
    let ptr = inst.call_main(0, 0).unwrap();
    assert!(ptr > 0);
    assert!(inst.memory_size() > before);
}

#[test]
fn test_guest_allocations_do_not_overlap() {
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $a i32)
                (local $b i32)
                (local.set $a (call $malloc (i32.const 100) (i32.const 4)))
                (local.set $b (call $malloc (i32.const 100) (i32.const 4)))
                ;; b starts at or past the end of a.
                (i32.ge_u (local.get $b) (i32.add (local.get $a) (i32.const 100))))
        )
    "#;
    let mut inst = load(wat);
    assert_eq!(inst.call_main(0, 0).unwrap(), 1);
}

#[test]
fn test_guest_double_free_is_protocol_error() {
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (import "tether" "free" (func $free (param i32 i32 i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $p i32)
                (local.set $p (call $malloc (i32.const 64) (i32.const 8)))
                (call $free (local.get $p) (i32.const 64) (i32.const 8))
                (call $free (local.get $p) (i32.const 64) (i32.const 8))
                (i32.const 0))
        )
    "#;
    let mut inst = load(wat);
    let err = inst.call_main(0, 0).unwrap_err();
    assert!(matches!(err, BridgeError::Protocol(_)), "got {:?}", err);
}

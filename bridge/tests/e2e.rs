//! End-to-end tests: guest modules exercising the full host surface.

mod common;

use common::{load, INVOKE_TWO_NUMBERS_WAT};
use tether_bridge::{CallbackError, ClosureShape, Handle, HostCallback, HostValue};

#[test]
fn test_main_receives_arguments() {
    let wat = r#"
        (module
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (i32.add (local.get 0) (local.get 1)))
        )
    "#;
    let mut inst = load(wat);
    assert_eq!(inst.call_main(40, 2).unwrap(), 42);
    assert_eq!(inst.call_main(-1, 1).unwrap(), 0);
}

#[test]
fn test_guest_malloc_visible_to_host() {
    let wat = r#"
        (module
            (import "tether" "malloc" (func $malloc (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $p i32)
                (local.set $p (call $malloc (i32.const 32) (i32.const 8)))
                (i32.store (local.get $p) (i32.const 0x6f6c6568))
                (local.get $p))
        )
    "#;
    let mut inst = load(wat);
    let ptr = inst.call_main(0, 0).unwrap() as u32;
    // The bridge region starts past the guest's own page.
    assert!(ptr >= 65536);
    assert_eq!(inst.read_memory(ptr, 4).unwrap(), b"helo");
}

#[test]
fn test_closure_invoke_numeric() {
    let mut inst = load(INVOKE_TWO_NUMBERS_WAT);
    let adder: Box<dyn HostCallback> = Box::new(|args: &[HostValue]| {
        let mut sum = 0.0;
        for arg in args {
            match arg {
                HostValue::Number(n) => sum += n,
                other => {
                    return Err(CallbackError::new(format!(
                        "expected number, got {}",
                        other.describe()
                    )))
                }
            }
        }
        Ok(HostValue::Number(sum))
    });
    let handle = inst
        .register_closure(ClosureShape::numeric(2), adder)
        .unwrap();
    assert_eq!(inst.call_main(handle.raw() as i32, 0).unwrap(), 7);
    // Repeat invocation works: the callback is restored after each call.
    assert_eq!(inst.call_main(handle.raw() as i32, 0).unwrap(), 7);
}

#[test]
fn test_closure_ref_argument_and_result() {
    let wat = r#"
        (module
            (import "tether" "closure_invoke" (func $invoke (param i32 i32 i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (i64.store (i32.const 1024) (i64.extend_i32_u (local.get 0)))
                (call $invoke (local.get 1) (i32.const 1024) (i32.const 2048))
                (i32.wrap_i64 (i64.load (i32.const 2048))))
        )
    "#;
    let mut inst = load(wat);

    let upper: Box<dyn HostCallback> = Box::new(|args: &[HostValue]| {
        match &args[0] {
            HostValue::Text(s) => Ok(HostValue::Text(s.to_uppercase())),
            other => Err(CallbackError::new(format!(
                "expected text, got {}",
                other.describe()
            ))),
        }
    });
    let shape = ClosureShape {
        arity: 1,
        ref_args: 0b1,
        ref_result: true,
    };
    let closure = inst.register_closure(shape, upper).unwrap();
    let input = inst.ref_insert(HostValue::Text("ping".into())).unwrap();

    let raw = inst
        .call_main(input.raw() as i32, closure.raw() as i32)
        .unwrap();
    let result = Handle::from_raw(raw as u32);
    assert_eq!(inst.ref_get(result).unwrap(), &HostValue::Text("PING".into()));
}

#[test]
fn test_guest_allocated_text_reaches_table() {
    let wat = r#"
        (module
            (import "tether" "ref_text_new" (func $text (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 16) "from guest")
            (func (export "main") (param i32 i32) (result i32)
                (call $text (i32.const 16) (i32.const 10)))
        )
    "#;
    let mut inst = load(wat);
    let raw = inst.call_main(0, 0).unwrap();
    let handle = Handle::from_raw(raw as u32);
    assert_eq!(
        inst.ref_get(handle).unwrap(),
        &HostValue::Text("from guest".into())
    );
}

#[test]
fn test_guest_ref_drop_releases_slot() {
    let wat = r#"
        (module
            (import "tether" "ref_num_new" (func $num (param f64) (result i32)))
            (import "tether" "ref_drop" (func $drop (param i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (local $h i32)
                (local.set $h (call $num (f64.const 2.5)))
                (call $drop (local.get $h))
                (local.get $h))
        )
    "#;
    let mut inst = load(wat);
    let raw = inst.call_main(0, 0).unwrap();
    let handle = Handle::from_raw(raw as u32);
    assert!(inst.ref_get(handle).is_err());
    assert_eq!(inst.ref_live(), 0);
}

#[test]
fn test_closure_destroy_from_guest_is_one_shot() {
    let wat = r#"
        (module
            (import "tether" "closure_destroy" (func $destroy (param i32)))
            (memory (export "memory") 1)
            (func (export "main") (param i32 i32) (result i32)
                (call $destroy (local.get 0))
                (i32.const 0))
        )
    "#;
    let mut inst = load(wat);
    let noop: Box<dyn HostCallback> =
        Box::new(|_: &[HostValue]| Ok::<_, CallbackError>(HostValue::Undefined));
    let handle = inst.register_closure(ClosureShape::numeric(0), noop).unwrap();

    assert_eq!(inst.call_main(handle.raw() as i32, 0).unwrap(), 0);
    // Second destroy of the same handle fails the generation check.
    let err = inst.call_main(handle.raw() as i32, 0).unwrap_err();
    assert!(matches!(
        err,
        tether_bridge::BridgeError::UseAfterInvalidate(h) if h == handle
    ));
}

//! Module validation — bridge ABI compatibility checks.
//!
//! Validates a compiled module before instantiation:
//!
//! 1. `memory` export present
//! 2. `main` exported with signature `(i32, i32) -> i32`
//! 3. `start`, if exported, has signature `() -> ()`
//! 4. All imports come from the `tether` module and are functions
//! 5. No WASI imports

use wasmtime::{ExternType, Module, ValType};

use crate::error::BridgeError;

/// Import module name the bridge links under.
pub const IMPORT_MODULE: &str = "tether";

fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Validate that a module meets the bridge ABI requirements.
pub fn validate_module(module: &Module) -> Result<(), BridgeError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), BridgeError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(BridgeError::Instantiation(
            "module must export 'memory'".into(),
        ));
    }

    let main = module
        .exports()
        .find(|e| e.name() == "main")
        .ok_or_else(|| BridgeError::Instantiation("missing required export: main".into()))?;
    let main_ty = match main.ty() {
        ExternType::Func(ft) => ft,
        _ => {
            return Err(BridgeError::Instantiation(
                "export 'main' must be a function".into(),
            ));
        }
    };
    let params: Vec<ValType> = main_ty.params().collect();
    let results: Vec<ValType> = main_ty.results().collect();
    if params.len() != 2 || !params.iter().all(is_i32) || results.len() != 1 || !is_i32(&results[0])
    {
        return Err(BridgeError::Instantiation(
            "export 'main' must have signature (i32, i32) -> i32".into(),
        ));
    }

    // Start routine is optional but, when present, must be nullary.
    if let Some(start) = module.exports().find(|e| e.name() == "start") {
        match start.ty() {
            ExternType::Func(ft)
                if ft.params().len() == 0 && ft.results().len() == 0 => {}
            _ => {
                return Err(BridgeError::Instantiation(
                    "export 'start' must have signature () -> ()".into(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_imports(module: &Module) -> Result<(), BridgeError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name.starts_with("wasi") {
            return Err(BridgeError::Instantiation(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if module_name != IMPORT_MODULE {
            return Err(BridgeError::Instantiation(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                IMPORT_MODULE,
                import.name()
            )));
        }

        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(BridgeError::Instantiation(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn test_engine() -> Engine {
        Engine::default()
    }

    #[test]
    fn test_minimal_valid_module() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "main") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        validate_module(&module).unwrap();
    }

    #[test]
    fn test_start_routine_accepted() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "start"))
                (func (export "main") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        validate_module(&module).unwrap();
    }

    #[test]
    fn test_reject_missing_main() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
    }

    #[test]
    fn test_reject_wrong_main_signature() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "main") (param i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
    }

    #[test]
    fn test_reject_bad_start_signature() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "start") (param i32))
                (func (export "main") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
    }

    #[test]
    fn test_reject_missing_memory() {
        let wat = r#"
            (module
                (func (export "main") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
    }

    #[test]
    fn test_reject_wasi_import() {
        let wat = r#"
            (module
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                (memory (export "memory") 1)
                (func (export "main") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
    }

    #[test]
    fn test_accept_tether_import() {
        let wat = r#"
            (module
                (import "tether" "malloc" (func (param i32 i32) (result i32)))
                (memory (export "memory") 1)
                (func (export "main") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        validate_module(&module).unwrap();
    }

    #[test]
    fn test_reject_unknown_module_import() {
        let wat = r#"
            (module
                (import "env" "some_func" (func (result i32)))
                (memory (export "memory") 1)
                (func (export "main") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err, BridgeError::Instantiation(_)));
    }
}

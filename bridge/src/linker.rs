//! Host function registration via the Wasmtime linker.
//!
//! Registers the `tether` import set the guest links against:
//! the linear-memory allocator (`malloc`/`realloc`/`free`), reference-table
//! entry points (`ref_alloc`/`ref_drop`/`ref_text_new`/`ref_num_new`),
//! the generic closure adapter (`closure_invoke`/`closure_destroy`), and
//! the exception channel (`exn_store`).
//!
//! These signatures have no spare status channel — `malloc` returns the
//! pointer itself — so a failing import records a typed [`HostFault`] in
//! the store state and traps; the loader's call wrapper converts the
//! recorded fault into the host-visible error.

use anyhow::anyhow;
use wasmtime::{AsContextMut, Caller, Linker, Memory};

use tether_hostapi::{Handle, HostValue, ARG_SLOT_BYTES};

use crate::error::{BridgeError, HostFault};
use crate::host_impl::BridgeState;
use crate::memory::{self, AllocError, AllocGrow, PAGE_BYTES};
use crate::validation::IMPORT_MODULE;

/// Get the guest's exported memory from a Caller.
fn get_memory(caller: &mut Caller<'_, BridgeState>) -> Option<Memory> {
    caller.get_export("memory").and_then(|e| e.into_memory())
}

fn need_memory(caller: &mut Caller<'_, BridgeState>) -> anyhow::Result<Memory> {
    get_memory(caller).ok_or_else(|| anyhow!("no memory export"))
}

/// Register all `tether` host functions with the linker.
pub fn register_host_functions(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    register_malloc(linker)?;
    register_realloc(linker)?;
    register_free(linker)?;
    register_ref_alloc(linker)?;
    register_ref_drop(linker)?;
    register_ref_text_new(linker)?;
    register_ref_num_new(linker)?;
    register_closure_invoke(linker)?;
    register_closure_destroy(linker)?;
    register_exn_store(linker)?;
    Ok(())
}

// ── Allocator primitives ──

/// Allocate in the bridge region, growing the wasm memory when the region
/// is exhausted. A refused grow records `OutOfMemory` and traps — never a
/// truncated allocation.
pub(crate) fn allocate_raw<C>(
    mut ctx: C,
    mem: &Memory,
    size: u32,
    align: u32,
) -> anyhow::Result<u32>
where
    C: AsContextMut<Data = BridgeState>,
{
    loop {
        let outcome = ctx.as_context_mut().data_mut().alloc.allocate(size, align);
        match outcome {
            Ok(ptr) => return Ok(ptr),
            Err(AllocGrow::Error(AllocError::BadAlignment)) => {
                return Err(ctx.as_context_mut().data_mut().fault(HostFault::BadAlignment));
            }
            Err(AllocGrow::Error(_)) => {
                return Err(ctx.as_context_mut().data_mut().fault(HostFault::BadPointer));
            }
            Err(AllocGrow::Grow(grow)) => {
                if mem.grow(&mut ctx, grow.pages).is_err() {
                    return Err(ctx.as_context_mut().data_mut().fault(HostFault::OutOfMemory));
                }
                let extra = (grow.pages * PAGE_BYTES).min(u32::MAX as u64) as u32;
                ctx.as_context_mut().data_mut().alloc.extend_capacity(extra);
            }
        }
    }
}

/// Reallocate a block, preserving `[0, min(old, new))` bytes.
///
/// Shrink is served in place; growth tries in-place extension first and
/// otherwise relocates (allocate, copy, free). The old pointer is invalid
/// the instant this returns a different one.
pub(crate) fn reallocate_raw<C>(
    mut ctx: C,
    mem: &Memory,
    ptr: u32,
    old_size: u32,
    old_align: u32,
    new_size: u32,
) -> anyhow::Result<u32>
where
    C: AsContextMut<Data = BridgeState>,
{
    if old_size == 0 {
        return allocate_raw(ctx, mem, new_size, old_align);
    }
    if new_size == 0 {
        let freed = ctx
            .as_context_mut()
            .data_mut()
            .alloc
            .free(ptr, old_size, old_align);
        if let Err(err) = freed {
            let fault = free_fault(err);
            return Err(ctx.as_context_mut().data_mut().fault(fault));
        }
        return allocate_raw(ctx, mem, 0, old_align);
    }
    if new_size <= old_size {
        let shrunk = ctx
            .as_context_mut()
            .data_mut()
            .alloc
            .shrink(ptr, old_size, new_size);
        if let Err(err) = shrunk {
            let fault = free_fault(err);
            return Err(ctx.as_context_mut().data_mut().fault(fault));
        }
        return Ok(ptr);
    }
    if ctx
        .as_context_mut()
        .data_mut()
        .alloc
        .try_extend(ptr, old_size, new_size)
    {
        return Ok(ptr);
    }

    let new_ptr = allocate_raw(&mut ctx, mem, new_size, old_align)?;
    {
        let data = mem.data_mut(&mut ctx);
        if memory::validate_range(data.len(), ptr, old_size).is_err()
            || memory::validate_range(data.len(), new_ptr, old_size).is_err()
        {
            return Err(ctx.as_context_mut().data_mut().fault(HostFault::BadPointer));
        }
        data.copy_within(
            ptr as usize..ptr as usize + old_size as usize,
            new_ptr as usize,
        );
    }
    let freed = ctx
        .as_context_mut()
        .data_mut()
        .alloc
        .free(ptr, old_size, old_align);
    if let Err(err) = freed {
        let fault = free_fault(err);
        return Err(ctx.as_context_mut().data_mut().fault(fault));
    }
    Ok(new_ptr)
}

fn free_fault(err: AllocError) -> HostFault {
    match err {
        AllocError::BadPointer => HostFault::BadPointer,
        AllocError::BadAlignment => HostFault::BadAlignment,
        AllocError::DoubleFree => HostFault::DoubleFree,
    }
}

fn register_malloc(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "malloc",
        |mut caller: Caller<'_, BridgeState>, size: i32, align: i32| -> anyhow::Result<i32> {
            let mem = need_memory(&mut caller)?;
            let ptr = allocate_raw(&mut caller, &mem, size as u32, align as u32)?;
            Ok(ptr as i32)
        },
    )?;
    Ok(())
}

fn register_realloc(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "realloc",
        |mut caller: Caller<'_, BridgeState>,
         ptr: i32,
         old_size: i32,
         old_align: i32,
         new_size: i32|
         -> anyhow::Result<i32> {
            let mem = need_memory(&mut caller)?;
            let new_ptr = reallocate_raw(
                &mut caller,
                &mem,
                ptr as u32,
                old_size as u32,
                old_align as u32,
                new_size as u32,
            )?;
            Ok(new_ptr as i32)
        },
    )?;
    Ok(())
}

fn register_free(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "free",
        |mut caller: Caller<'_, BridgeState>,
         ptr: i32,
         size: i32,
         align: i32|
         -> anyhow::Result<()> {
            let freed = caller
                .data_mut()
                .alloc
                .free(ptr as u32, size as u32, align as u32);
            if let Err(err) = freed {
                let fault = free_fault(err);
                return Err(caller.data_mut().fault(fault));
            }
            Ok(())
        },
    )?;
    Ok(())
}

// ── Reference table ──

fn register_ref_alloc(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "ref_alloc",
        |mut caller: Caller<'_, BridgeState>| -> anyhow::Result<i32> {
            match caller.data_mut().table.alloc() {
                Ok(handle) => Ok(handle.raw() as i32),
                Err(err) => {
                    let fault = HostFault::from(err);
                    Err(caller.data_mut().fault(fault))
                }
            }
        },
    )?;
    Ok(())
}

fn register_ref_drop(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "ref_drop",
        |mut caller: Caller<'_, BridgeState>, handle: i32| -> anyhow::Result<()> {
            let handle = Handle::from_raw(handle as u32);
            if let Err(fault) = caller.data_mut().drop_ref(handle) {
                return Err(caller.data_mut().fault(fault));
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn register_ref_text_new(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "ref_text_new",
        |mut caller: Caller<'_, BridgeState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let mem = need_memory(&mut caller)?;
            let bytes = {
                let data = mem.data(&caller);
                match memory::read_bytes(data, ptr as u32, len as u32) {
                    Ok(b) => b,
                    Err(_) => return Err(caller.data_mut().fault(HostFault::BadPointer)),
                }
            };
            let text = match String::from_utf8(bytes) {
                Ok(t) => t,
                Err(_) => return Err(caller.data_mut().fault(HostFault::InvalidUtf8)),
            };
            match caller.data_mut().table.insert(HostValue::Text(text)) {
                Ok(handle) => Ok(handle.raw() as i32),
                Err(err) => {
                    let fault = HostFault::from(err);
                    Err(caller.data_mut().fault(fault))
                }
            }
        },
    )?;
    Ok(())
}

fn register_ref_num_new(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "ref_num_new",
        |mut caller: Caller<'_, BridgeState>, value: f64| -> anyhow::Result<i32> {
            match caller.data_mut().table.insert(HostValue::Number(value)) {
                Ok(handle) => Ok(handle.raw() as i32),
                Err(err) => {
                    let fault = HostFault::from(err);
                    Err(caller.data_mut().fault(fault))
                }
            }
        },
    )?;
    Ok(())
}

// ── Closure trampoline ──

fn register_closure_invoke(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "closure_invoke",
        |mut caller: Caller<'_, BridgeState>,
         handle: i32,
         args_ptr: i32,
         ret_ptr: i32|
         -> anyhow::Result<()> {
            let mem = need_memory(&mut caller)?;
            let handle = Handle::from_raw(handle as u32);

            let (id, shape) = match caller.data().resolve_closure(handle) {
                Ok(v) => v,
                Err(fault) => return Err(caller.data_mut().fault(fault)),
            };

            // Read raw argument slots and validate the result slot.
            let mut raw = Vec::with_capacity(shape.arity as usize);
            {
                let data = mem.data(&caller);
                for i in 0..shape.arity as u32 {
                    match memory::read_u64(data, args_ptr as u32 + i * ARG_SLOT_BYTES) {
                        Ok(slot) => raw.push(slot),
                        Err(_) => return Err(caller.data_mut().fault(HostFault::BadPointer)),
                    }
                }
                if memory::validate_range(data.len(), ret_ptr as u32, ARG_SLOT_BYTES).is_err() {
                    return Err(caller.data_mut().fault(HostFault::BadPointer));
                }
            }

            let args = match caller.data().resolve_args(shape, &raw) {
                Ok(a) => a,
                Err(fault) => return Err(caller.data_mut().fault(fault)),
            };

            // Take the callback out for the duration of the call; a nested
            // invoke of the same closure would find it missing.
            let mut callback = match caller.data_mut().closures.take(id) {
                Some(cb) => cb,
                None => {
                    let fault =
                        HostFault::TypeMismatch(format!("closure {} invoked reentrantly", handle));
                    return Err(caller.data_mut().fault(fault));
                }
            };
            let outcome = callback.call(&args);
            caller.data_mut().closures.restore(id, callback);

            match outcome {
                Ok(value) => {
                    let slot = match caller.data_mut().encode_result(shape, value) {
                        Ok(s) => s,
                        Err(fault) => return Err(caller.data_mut().fault(fault)),
                    };
                    let wrote = {
                        let data = mem.data_mut(&mut caller);
                        memory::write_u64(data, ret_ptr as u32, slot)
                    };
                    if wrote.is_err() {
                        return Err(caller.data_mut().fault(HostFault::BadPointer));
                    }
                    Ok(())
                }
                Err(err) => {
                    // Callback failure arms the exception channel and
                    // surfaces as a module fault.
                    match caller.data_mut().arm_exn_text(err.0.clone()) {
                        Ok(()) => Err(anyhow!("callback failed: {}", err.0)),
                        Err(fault) => Err(caller.data_mut().fault(fault)),
                    }
                }
            }
        },
    )?;
    Ok(())
}

fn register_closure_destroy(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "closure_destroy",
        |mut caller: Caller<'_, BridgeState>, handle: i32| -> anyhow::Result<()> {
            let handle = Handle::from_raw(handle as u32);
            if let Err(fault) = caller.data_mut().destroy_closure(handle) {
                return Err(caller.data_mut().fault(fault));
            }
            Ok(())
        },
    )?;
    Ok(())
}

// ── Exception channel ──

fn register_exn_store(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "exn_store",
        |mut caller: Caller<'_, BridgeState>, handle: i32| -> anyhow::Result<()> {
            let handle = Handle::from_raw(handle as u32);
            // The stored value must be live; the wrapper drains it later.
            if let Err(err) = caller.data().table.get(handle) {
                let fault = HostFault::from(err);
                return Err(caller.data_mut().fault(fault));
            }
            if caller.data_mut().exn.store(handle).is_err() {
                return Err(caller.data_mut().fault(HostFault::ChannelViolation));
            }
            Ok(())
        },
    )?;
    Ok(())
}

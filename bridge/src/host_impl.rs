//! Per-instance mutable state held in the Wasmtime Store.
//!
//! `BridgeState` combines the reference table, closure registry, linear
//! allocator, exception channel, and fault slot into a single struct that
//! lives inside `Store<BridgeState>` for the lifetime of one module
//! instance. The exception channel and table are deliberately fields here
//! rather than globals, so multiple instances never share fault state.

use anyhow::anyhow;
use wasmtime::StoreLimits;
use wasmtime::StoreLimitsBuilder;

use tether_hostapi::{
    ClosureId, ClosureShape, Handle, HostCallback, HostValue, RefTable, TableError,
};

use crate::closures::ClosureRegistry;
use crate::config::BridgeConfig;
use crate::error::HostFault;
use crate::exn::ExnChannel;
use crate::memory::{LinearAllocator, PAGE_BYTES};

/// Per-instance mutable state held in the Wasmtime `Store`.
pub struct BridgeState {
    /// Host-owned values reachable from guest code by handle.
    pub table: RefTable,
    /// Registered host callbacks.
    pub closures: ClosureRegistry,
    /// Allocator over the bridge's region of guest linear memory.
    /// Initialized with a placeholder; the loader sets the real region
    /// after instantiation.
    pub alloc: LinearAllocator,
    /// Single-slot exception channel for the in-flight call.
    pub exn: ExnChannel,
    /// Why the last import trapped, if it did.
    pub fault: Option<HostFault>,
    /// Memory growth ceiling enforced by wasmtime.
    pub limits: StoreLimits,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size((config.max_memory_pages * PAGE_BYTES) as usize)
            .build();
        Self {
            table: RefTable::new(),
            closures: ClosureRegistry::new(),
            alloc: LinearAllocator::uninitialized(),
            exn: ExnChannel::new(),
            fault: None,
            limits,
        }
    }

    /// Record a fault and produce the trap error for the failing import.
    ///
    /// Only the first fault of a call is kept; it is what the call
    /// wrapper surfaces.
    pub fn fault(&mut self, fault: HostFault) -> anyhow::Error {
        tracing::debug!(?fault, "host import fault");
        let err = anyhow!("host fault: {:?}", fault);
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
        err
    }

    pub fn take_fault(&mut self) -> Option<HostFault> {
        self.fault.take()
    }

    // ── Closures ──

    /// Register a host callback and publish it in the reference table.
    pub fn register_closure(
        &mut self,
        shape: ClosureShape,
        callback: Box<dyn HostCallback>,
    ) -> Result<Handle, TableError> {
        let id = self.closures.register(shape, callback);
        match self.table.insert(HostValue::Closure(id)) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.closures.remove(id);
                Err(err)
            }
        }
    }

    /// Destroy a registered closure: drop the callback and invalidate its
    /// table handle. Exactly-once; a second destroy fails the generation
    /// check inside `invalidate`.
    pub fn destroy_closure(&mut self, handle: Handle) -> Result<(), HostFault> {
        match self.table.get(handle) {
            Ok(HostValue::Closure(id)) => {
                let id = *id;
                self.closures.remove(id);
                self.table.invalidate(handle).map_err(HostFault::from)?;
                Ok(())
            }
            Ok(_) => Err(HostFault::TypeMismatch(format!(
                "handle {} is not a closure",
                handle
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Invalidate a table entry, dropping its callback first when the
    /// entry is a closure.
    pub fn drop_ref(&mut self, handle: Handle) -> Result<(), HostFault> {
        match self.table.get(handle) {
            Ok(HostValue::Closure(_)) => self.destroy_closure(handle),
            Ok(_) => {
                self.table.invalidate(handle).map_err(HostFault::from)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve an invoke target: the handle must name a live closure.
    pub fn resolve_closure(&self, handle: Handle) -> Result<(ClosureId, ClosureShape), HostFault> {
        match self.table.get(handle) {
            Ok(HostValue::Closure(id)) => {
                let id = *id;
                match self.closures.shape(id) {
                    Some(shape) => Ok((id, shape)),
                    None => Err(HostFault::UseAfterInvalidate(handle)),
                }
            }
            Ok(_) => Err(HostFault::TypeMismatch(format!(
                "handle {} is not a closure",
                handle
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Convert raw argument slots into callback arguments per the shape.
    ///
    /// Numeric slots are f64 bit patterns; reference slots carry a handle
    /// widened to u64 and resolve to a clone of the table value.
    pub fn resolve_args(
        &self,
        shape: ClosureShape,
        raw: &[u64],
    ) -> Result<Vec<HostValue>, HostFault> {
        debug_assert_eq!(raw.len(), shape.arity as usize);
        let mut args = Vec::with_capacity(raw.len());
        for (i, &slot) in raw.iter().enumerate() {
            if shape.arg_is_ref(i as u8) {
                if slot > u32::MAX as u64 {
                    return Err(HostFault::TypeMismatch(format!(
                        "argument {} is not a handle",
                        i
                    )));
                }
                let handle = Handle::from_raw(slot as u32);
                let value = self.table.get(handle).map_err(HostFault::from)?;
                args.push(value.clone());
            } else {
                args.push(HostValue::Number(f64::from_bits(slot)));
            }
        }
        Ok(args)
    }

    /// Encode a callback result into its 8-byte slot value per the shape.
    ///
    /// With `ref_result` the value goes into a fresh table slot and the
    /// handle is written; otherwise the result must be numeric-coercible.
    pub fn encode_result(
        &mut self,
        shape: ClosureShape,
        value: HostValue,
    ) -> Result<u64, HostFault> {
        if shape.ref_result {
            let handle = self.table.insert(value).map_err(HostFault::from)?;
            return Ok(handle.raw() as u64);
        }
        match value {
            HostValue::Number(n) => Ok(n.to_bits()),
            HostValue::Boolean(b) => Ok((if b { 1.0f64 } else { 0.0 }).to_bits()),
            HostValue::Undefined => Ok(0.0f64.to_bits()),
            other => Err(HostFault::TypeMismatch(format!(
                "numeric result expected, got {}",
                other.describe()
            ))),
        }
    }

    /// Arm the exception channel with a text value, used when a host
    /// callback reports an error of its own.
    pub fn arm_exn_text(&mut self, message: String) -> Result<(), HostFault> {
        let handle = self
            .table
            .insert(HostValue::Text(message))
            .map_err(HostFault::from)?;
        self.exn
            .store(handle)
            .map_err(|_| HostFault::ChannelViolation)
    }
}

//! The external reference table: host-owned values reachable from guest
//! code by integer handle.
//!
//! Classic arena+index layout with a generation tag per slot. A handle
//! carries the generation it was issued under; `invalidate` bumps the slot
//! generation, so any lookup through a stale handle fails with
//! `UseAfterInvalidate` — cheaply, and unconditionally, even after the
//! index has been reused.

use crate::error::TableError;
use crate::types::{Handle, HostValue};

struct Slot {
    generation: u16,
    occupied: bool,
    value: HostValue,
}

/// Table of host-owned values addressed by [`Handle`].
///
/// Indices 0..4 are pre-seeded sentinels (undefined, null, true, false)
/// that are never allocated or invalidated by ordinary callers. Backing
/// storage grows on demand; growth never renumbers issued handles.
pub struct RefTable {
    slots: Vec<Slot>,
    free: Vec<u16>,
}

impl RefTable {
    pub fn new() -> Self {
        let sentinels = [
            HostValue::Undefined,
            HostValue::Null,
            HostValue::Boolean(true),
            HostValue::Boolean(false),
        ];
        let slots = sentinels
            .into_iter()
            .map(|value| Slot {
                generation: 0,
                occupied: true,
                value,
            })
            .collect();
        Self {
            slots,
            free: Vec::new(),
        }
    }

    /// Reserve a new slot, initially holding `Undefined`.
    pub fn alloc(&mut self) -> Result<Handle, TableError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.occupied = true;
            slot.value = HostValue::Undefined;
            return Ok(Handle::from_parts(index, slot.generation));
        }
        if self.slots.len() > u16::MAX as usize {
            return Err(TableError::Exhausted);
        }
        let index = self.slots.len() as u16;
        self.slots.push(Slot {
            generation: 1,
            occupied: true,
            value: HostValue::Undefined,
        });
        Ok(Handle::from_parts(index, 1))
    }

    /// Allocate a slot and immediately fill it.
    pub fn insert(&mut self, value: HostValue) -> Result<Handle, TableError> {
        let handle = self.alloc()?;
        self.slots[handle.index() as usize].value = value;
        Ok(handle)
    }

    /// Look up the value behind a handle.
    pub fn get(&self, handle: Handle) -> Result<&HostValue, TableError> {
        let index = self.check(handle)?;
        Ok(&self.slots[index as usize].value)
    }

    /// Overwrite the value in a live slot. Sentinels are read-only.
    pub fn set(&mut self, handle: Handle, value: HostValue) -> Result<(), TableError> {
        if handle.is_sentinel() {
            return Err(TableError::Sentinel(handle));
        }
        let index = self.check(handle)?;
        self.slots[index as usize].value = value;
        Ok(())
    }

    /// Release a slot for reuse, returning the value it held.
    ///
    /// The slot generation is bumped before the index goes back on the
    /// free list, retiring every outstanding copy of the handle.
    pub fn invalidate(&mut self, handle: Handle) -> Result<HostValue, TableError> {
        if handle.is_sentinel() {
            return Err(TableError::Sentinel(handle));
        }
        let index = self.check(handle)?;
        let slot = &mut self.slots[index as usize];
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        let value = std::mem::replace(&mut slot.value, HostValue::Undefined);
        self.free.push(index);
        Ok(value)
    }

    /// Number of live (occupied) slots, sentinels included.
    pub fn live_len(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    fn check(&self, handle: Handle) -> Result<u16, TableError> {
        let index = handle.index();
        match self.slots.get(index as usize) {
            Some(slot) if slot.occupied && slot.generation == handle.generation() => Ok(index),
            _ => Err(TableError::UseAfterInvalidate(handle)),
        }
    }
}

impl Default for RefTable {
    fn default() -> Self {
        Self::new()
    }
}

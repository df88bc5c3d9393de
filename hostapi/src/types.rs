//! Core value and descriptor types for the Tether bridge.
//!
//! `Handle` is the guest-visible integer naming a reference-table slot.
//! `HostValue` is what a slot holds. `ClosureShape` describes the argument
//! and result marshaling of a registered host callback.

use std::fmt;

/// Number of bytes in one closure argument/result slot in guest memory.
///
/// Numeric slots carry an f64 bit pattern (little-endian); reference slots
/// carry the raw handle value widened to u64 (little-endian).
pub const ARG_SLOT_BYTES: u32 = 8;

/// Maximum number of arguments a closure shape may declare.
pub const MAX_CLOSURE_ARITY: u8 = 8;

/// An opaque integer naming a reference-table slot.
///
/// Layout: low 16 bits are the slot index, high 16 bits are the slot
/// generation at allocation time. Invalidation bumps the slot generation,
/// so a stale handle never matches again even after the index is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    /// Sentinel: the `undefined` value. Never allocated, never invalidated.
    pub const UNDEFINED: Handle = Handle(0);
    /// Sentinel: the `null` value.
    pub const NULL: Handle = Handle(1);
    /// Sentinel: boolean `true`.
    pub const TRUE: Handle = Handle(2);
    /// Sentinel: boolean `false`.
    pub const FALSE: Handle = Handle(3);

    /// Number of reserved low handles (indices `0..SENTINEL_COUNT`, generation 0).
    pub const SENTINEL_COUNT: u16 = 4;

    /// Build a handle from a slot index and generation.
    pub fn from_parts(index: u16, generation: u16) -> Self {
        Handle(((generation as u32) << 16) | index as u32)
    }

    /// Reconstruct a handle from its raw wire value.
    pub fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    /// The raw wire value passed across the guest boundary.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Slot index component.
    pub fn index(self) -> u16 {
        self.0 as u16
    }

    /// Generation component.
    pub fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Whether this handle names one of the reserved sentinel slots.
    pub fn is_sentinel(self) -> bool {
        self.generation() == 0 && self.index() < Self::SENTINEL_COUNT
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Identifier of a registered host callback in the closure registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureId(pub u32);

/// A host-owned value reachable from guest code through the reference table.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// A registered host callback. The callback itself lives in the
    /// closure registry; the table slot carries only its id.
    Closure(ClosureId),
}

impl HostValue {
    /// Render the value as a human-readable message, used when a value is
    /// drained from the exception channel.
    pub fn describe(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Boolean(b) => b.to_string(),
            HostValue::Number(n) => n.to_string(),
            HostValue::Text(s) => s.clone(),
            HostValue::Bytes(b) => format!("{} bytes", b.len()),
            HostValue::Closure(id) => format!("closure #{}", id.0),
        }
    }
}

/// Marshaling descriptor for a registered closure.
///
/// One generic adapter serves every callback signature; the shape tells it
/// how many 8-byte argument slots to read, which of them are reference
/// handles, and whether the result goes back as a fresh table handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureShape {
    /// Number of argument slots, at most [`MAX_CLOSURE_ARITY`].
    pub arity: u8,
    /// Bitmask over arguments: bit `i` set means argument `i` is a
    /// reference-table handle rather than a number.
    pub ref_args: u8,
    /// Whether the result is published as a fresh reference-table handle.
    pub ref_result: bool,
}

impl ClosureShape {
    /// A shape taking `arity` numeric arguments and returning a number.
    pub fn numeric(arity: u8) -> Self {
        Self {
            arity,
            ref_args: 0,
            ref_result: false,
        }
    }

    /// Whether argument `i` is a reference-table handle.
    pub fn arg_is_ref(&self, i: u8) -> bool {
        self.ref_args & (1 << i) != 0
    }

    /// Check internal consistency: arity within bounds, no ref bits set
    /// beyond the declared arity.
    pub fn is_valid(&self) -> bool {
        if self.arity > MAX_CLOSURE_ARITY {
            return false;
        }
        if self.arity < 8 {
            self.ref_args & !((1u8 << self.arity) - 1) == 0
        } else {
            true
        }
    }
}

//! Bridge error taxonomy.
//!
//! Every entry point either returns a success value or one of these —
//! nothing is silently swallowed. Host-side failures inside guest imports
//! are recorded as a [`HostFault`] before the import traps; the loader's
//! call wrapper converts the recorded fault into the matching
//! [`BridgeError`] variant.

use tether_hostapi::{Handle, TableError};

/// Top-level error type for the bridge crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Malformed binary image, unmet imports, or a failed start routine.
    #[error("instantiation error: {0}")]
    Instantiation(String),

    /// Image acquisition failed before instantiation was attempted.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Linear memory growth was refused; the instance remains usable.
    #[error("out of linear memory")]
    OutOfMemory,

    /// A handle was used after its table slot was invalidated.
    /// Programming error — treated as a fatal assertion for the call.
    #[error("handle {0} used after invalidate")]
    UseAfterInvalidate(Handle),

    /// The guest call returned abnormally; the message carries the drained
    /// exception value (or the trap's own message if none was stored).
    #[error("module fault: {0}")]
    ModuleFault(String),

    /// Caller broke a bridge protocol rule: double-armed exception
    /// channel, bad pointer or alignment, marshaling type mismatch.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Raw memory access failed (out-of-bounds read/write).
    #[error("memory error: {0}")]
    Memory(String),

    /// Wasmtime engine or call machinery error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),
}

impl From<TableError> for BridgeError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::UseAfterInvalidate(h) => BridgeError::UseAfterInvalidate(h),
            TableError::Exhausted => BridgeError::OutOfMemory,
            TableError::Sentinel(h) => {
                BridgeError::Protocol(format!("handle {} is a reserved sentinel", h))
            }
        }
    }
}

/// Typed record of why a guest import trapped.
///
/// Import functions have no spare return channel (`malloc` returns the
/// pointer itself), so they record the fault here and trap; the call
/// wrapper reads it back out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostFault {
    OutOfMemory,
    UseAfterInvalidate(Handle),
    BadPointer,
    BadAlignment,
    DoubleFree,
    TableExhausted,
    ChannelViolation,
    InvalidUtf8,
    TypeMismatch(String),
}

impl HostFault {
    /// The error surfaced to the host for this fault.
    pub fn into_error(self) -> BridgeError {
        match self {
            HostFault::OutOfMemory => BridgeError::OutOfMemory,
            HostFault::TableExhausted => BridgeError::OutOfMemory,
            HostFault::UseAfterInvalidate(h) => BridgeError::UseAfterInvalidate(h),
            HostFault::BadPointer => BridgeError::Protocol("bad pointer".into()),
            HostFault::BadAlignment => BridgeError::Protocol("bad alignment".into()),
            HostFault::DoubleFree => BridgeError::Protocol("double free".into()),
            HostFault::ChannelViolation => {
                BridgeError::Protocol("exception channel already armed".into())
            }
            HostFault::InvalidUtf8 => BridgeError::Protocol("invalid utf-8".into()),
            HostFault::TypeMismatch(msg) => BridgeError::Protocol(msg),
        }
    }
}

impl From<TableError> for HostFault {
    fn from(err: TableError) -> Self {
        match err {
            TableError::UseAfterInvalidate(h) => HostFault::UseAfterInvalidate(h),
            TableError::Exhausted => HostFault::TableExhausted,
            TableError::Sentinel(h) => {
                HostFault::TypeMismatch(format!("handle {} is a reserved sentinel", h))
            }
        }
    }
}

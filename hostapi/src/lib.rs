//! `tether-hostapi` — host-side types for the Tether WASM bridge.
//!
//! This crate defines everything the bridge shares with host code without
//! pulling in wasmtime:
//!
//! - `Handle` — generation-tagged reference-table handle
//! - `HostValue` — a host-owned value reachable from guest code
//! - `ClosureShape` — marshaling descriptor for registered callbacks
//! - `RefTable` — the external reference table (arena + generations)
//! - `HostCallback` trait — the host-side callback seam
//! - `TableError` / `CallbackError` — host-side error types

pub mod error;
pub mod table;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root.
pub use error::{CallbackError, TableError};
pub use table::RefTable;
pub use traits::HostCallback;
pub use types::{ClosureId, ClosureShape, Handle, HostValue, ARG_SLOT_BYTES, MAX_CLOSURE_ARITY};

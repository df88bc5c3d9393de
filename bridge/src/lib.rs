//! Host-side bridge runtime for guest modules.
//!
//! Loads a guest module (from bytes, a precompiled module, a URL, or an
//! in-flight download), wires up the `tether` import set, and exposes the
//! host surface: a linear-memory allocator inside the guest's memory, a
//! reference table of host-owned values addressed by generation-tagged
//! handles, host callbacks invokable from guest code, and a single-slot
//! exception channel for abnormal returns.
//!
//! ```no_run
//! use tether_bridge::{init_sync, BridgeConfig, SyncSource};
//!
//! let wat = br#"
//!     (module
//!         (memory (export "memory") 1)
//!         (func (export "main") (param i32 i32) (result i32)
//!             i32.const 0)
//!     )
//! "#;
//! let mut instance = init_sync(SyncSource::Bytes(wat.to_vec()), BridgeConfig::default())?;
//! let status = instance.call_main(0, 0)?;
//! # Ok::<(), tether_bridge::BridgeError>(())
//! ```

mod closures;
mod config;
mod error;
mod exn;
mod host_impl;
mod linker;
mod loader;
mod memory;
mod validation;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use loader::{init, init_sync, Bridge, Instance, ModuleSource, SyncSource};
pub use memory::PAGE_BYTES;
pub use validation::IMPORT_MODULE;

pub use tether_hostapi::{
    CallbackError, ClosureShape, Handle, HostCallback, HostValue, ARG_SLOT_BYTES,
};

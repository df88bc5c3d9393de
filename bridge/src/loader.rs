//! Module loading and the host-side instance surface.
//!
//! [`Bridge`] owns the engine and configuration and turns a module image
//! into a running [`Instance`]: validate the ABI, wire the `tether` host
//! functions, instantiate, claim the allocator region, and run the
//! optional one-time `start` routine. Images come in synchronously
//! ([`SyncSource`]) or asynchronously ([`ModuleSource`], including URL
//! fetch and caller-supplied pending downloads).
//!
//! Every guest entry goes through [`Instance::finish_call`], which settles
//! the call against the fault slot and the exception channel so no error
//! state leaks into the next call.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use tracing::{debug, info};
use wasmtime::{Config, Engine, Linker, Memory, Module, Store, TypedFunc};

use tether_hostapi::{ClosureShape, Handle, HostCallback, HostValue};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host_impl::BridgeState;
use crate::linker::{allocate_raw, reallocate_raw, register_host_functions};
use crate::memory::{self, LinearAllocator, PAGE_BYTES};
use crate::validation::validate_module;

/// Synchronously available module image.
pub enum SyncSource {
    /// Raw binary (or text-format) image, compiled on the spot.
    Bytes(Vec<u8>),
    /// Module previously compiled via [`Bridge::compile`].
    Precompiled(Module),
}

/// Module image for asynchronous loading.
pub enum ModuleSource {
    /// Raw binary (or text-format) image, compiled on the spot.
    Bytes(Vec<u8>),
    /// Module previously compiled via [`Bridge::compile`].
    Precompiled(Module),
    /// Image fetched over HTTP(S). Non-success status is a fetch error.
    Url(String),
    /// Caller-supplied download already in flight.
    Pending(BoxFuture<'static, anyhow::Result<Vec<u8>>>),
}

impl ModuleSource {
    /// Wrap an in-flight download as a module source.
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
    {
        ModuleSource::Pending(fut.boxed())
    }
}

fn create_engine() -> Result<Engine, BridgeError> {
    let mut config = Config::new();
    config.wasm_threads(false);
    config.wasm_multi_memory(false);
    Ok(Engine::new(&config)?)
}

/// Module loader: engine plus configuration, reusable across instances.
pub struct Bridge {
    engine: Engine,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Self {
            engine: create_engine()?,
            config,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile an image for later instantiation (possibly many times).
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, BridgeError> {
        Module::new(&self.engine, bytes).map_err(|e| BridgeError::Instantiation(e.to_string()))
    }

    /// Instantiate from a synchronously available image.
    pub fn init_sync(&self, source: SyncSource) -> Result<Instance, BridgeError> {
        let module = match source {
            SyncSource::Bytes(bytes) => self.compile(&bytes)?,
            SyncSource::Precompiled(module) => module,
        };
        self.instantiate(module)
    }

    /// Instantiate from an asynchronous image source.
    ///
    /// Acquisition failures surface as [`BridgeError::Fetch`] and leave no
    /// instance behind. The fetch itself is not cancellable from here;
    /// callers wanting a deadline race this future against a timer.
    pub async fn init(&self, source: ModuleSource) -> Result<Instance, BridgeError> {
        let module = match source {
            ModuleSource::Bytes(bytes) => self.compile(&bytes)?,
            ModuleSource::Precompiled(module) => module,
            ModuleSource::Url(url) => {
                let bytes = fetch_bytes(&url).await?;
                self.compile(&bytes)?
            }
            ModuleSource::Pending(fut) => {
                let bytes = fut.await.map_err(|e| BridgeError::Fetch(e.to_string()))?;
                self.compile(&bytes)?
            }
        };
        self.instantiate(module)
    }

    fn instantiate(&self, module: Module) -> Result<Instance, BridgeError> {
        validate_module(&module)?;

        let mut store = Store::new(&self.engine, BridgeState::new(&self.config));
        store.limiter(|state| &mut state.limits);

        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| BridgeError::Instantiation("missing memory export".into()))?;

        // Claim the allocator region by growing past the module's own data.
        let guest_pages = memory.size(&store);
        memory
            .grow(&mut store, self.config.heap_pages)
            .map_err(|e| BridgeError::Instantiation(format!("initial heap grow: {}", e)))?;
        store.data_mut().alloc = LinearAllocator::new(
            (guest_pages * PAGE_BYTES) as u32,
            (self.config.heap_pages * PAGE_BYTES) as u32,
        );

        let main = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, "main")
            .map_err(|e| BridgeError::Instantiation(e.to_string()))?;
        let start = instance.get_func(&mut store, "start");

        let mut live = Instance {
            store,
            memory,
            main,
        };

        // One-time start routine; any failure fails instantiation.
        if let Some(func) = start {
            let start = func
                .typed::<(), ()>(&live.store)
                .map_err(|e| BridgeError::Instantiation(e.to_string()))?;
            let result = start.call(&mut live.store, ());
            live.finish_call(result)
                .map_err(|e| BridgeError::Instantiation(format!("start routine: {}", e)))?;
        }

        info!(
            guest_pages,
            heap_pages = self.config.heap_pages,
            "module instantiated"
        );
        Ok(live)
    }
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>, BridgeError> {
    debug!(url, "fetching module image");
    let response = reqwest::get(url)
        .await
        .map_err(|e| BridgeError::Fetch(e.to_string()))?
        .error_for_status()
        .map_err(|e| BridgeError::Fetch(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| BridgeError::Fetch(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// A loaded, running module instance.
///
/// All guest interaction goes through this handle; the store, memory, and
/// bridge state live inside it, so dropping the instance tears everything
/// down.
pub struct Instance {
    store: Store<BridgeState>,
    memory: Memory,
    main: TypedFunc<(i32, i32), i32>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").finish_non_exhaustive()
    }
}

impl Instance {
    /// Invoke the guest entry point.
    pub fn call_main(&mut self, argc: i32, argv: i32) -> Result<i32, BridgeError> {
        debug!(argc, argv, "calling main");
        let result = self.main.call(&mut self.store, (argc, argv));
        self.finish_call(result)
    }

    // ── Closures ──

    /// Register a host callback; the returned handle is what guest code
    /// passes to `closure_invoke`.
    pub fn register_closure(
        &mut self,
        shape: ClosureShape,
        callback: Box<dyn HostCallback>,
    ) -> Result<Handle, BridgeError> {
        if !shape.is_valid() {
            return Err(BridgeError::Protocol(format!(
                "invalid closure shape: arity {}",
                shape.arity
            )));
        }
        self.store
            .data_mut()
            .register_closure(shape, callback)
            .map_err(BridgeError::from)
    }

    /// Drop a registered closure and invalidate its handle. One-shot.
    pub fn destroy_closure(&mut self, handle: Handle) -> Result<(), BridgeError> {
        self.store
            .data_mut()
            .destroy_closure(handle)
            .map_err(|f| f.into_error())
    }

    // ── Reference table ──

    /// Reserve an empty table slot.
    pub fn ref_alloc(&mut self) -> Result<Handle, BridgeError> {
        self.store.data_mut().table.alloc().map_err(BridgeError::from)
    }

    /// Store a value into the table, returning its handle.
    pub fn ref_insert(&mut self, value: HostValue) -> Result<Handle, BridgeError> {
        self.store
            .data_mut()
            .table
            .insert(value)
            .map_err(BridgeError::from)
    }

    /// Read the value a handle refers to.
    pub fn ref_get(&self, handle: Handle) -> Result<&HostValue, BridgeError> {
        self.store.data().table.get(handle).map_err(BridgeError::from)
    }

    /// Replace the value a handle refers to.
    pub fn ref_set(&mut self, handle: Handle, value: HostValue) -> Result<(), BridgeError> {
        self.store
            .data_mut()
            .table
            .set(handle, value)
            .map_err(BridgeError::from)
    }

    /// Invalidate a handle, releasing its slot (and callback, for
    /// closures). Later uses of the handle fail with use-after-invalidate.
    pub fn ref_invalidate(&mut self, handle: Handle) -> Result<(), BridgeError> {
        self.store
            .data_mut()
            .drop_ref(handle)
            .map_err(|f| f.into_error())
    }

    /// Number of live non-sentinel table entries.
    pub fn ref_live(&self) -> usize {
        self.store.data().table.live_len() - Handle::SENTINEL_COUNT as usize
    }

    // ── Linear memory ──

    /// Allocate guest memory from the bridge region.
    pub fn allocate(&mut self, size: u32, align: u32) -> Result<u32, BridgeError> {
        let mem = self.memory;
        allocate_raw(&mut self.store, &mem, size, align).map_err(|e| self.settle_host_err(e))
    }

    /// Reallocate a guest block, preserving its prefix.
    pub fn reallocate(
        &mut self,
        ptr: u32,
        old_size: u32,
        old_align: u32,
        new_size: u32,
    ) -> Result<u32, BridgeError> {
        let mem = self.memory;
        reallocate_raw(&mut self.store, &mem, ptr, old_size, old_align, new_size)
            .map_err(|e| self.settle_host_err(e))
    }

    /// Return a guest block to the bridge region.
    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<(), BridgeError> {
        self.store
            .data_mut()
            .alloc
            .free(ptr, size, align)
            .map_err(|e| BridgeError::Memory(e.to_string()))
    }

    /// Read raw bytes from guest memory.
    pub fn read_memory(&self, ptr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
        memory::read_bytes(self.memory.data(&self.store), ptr, len)
            .map_err(|e| BridgeError::Memory(e.to_string()))
    }

    /// Write raw bytes into guest memory.
    pub fn write_memory(&mut self, ptr: u32, data: &[u8]) -> Result<(), BridgeError> {
        memory::write_bytes(self.memory.data_mut(&mut self.store), ptr, data)
            .map_err(|e| BridgeError::Memory(e.to_string()))
    }

    /// Allocate a block and copy `data` into it, returning the pointer.
    pub fn alloc_and_write(&mut self, data: &[u8]) -> Result<u32, BridgeError> {
        let ptr = self.allocate(data.len() as u32, 8)?;
        self.write_memory(ptr, data)?;
        Ok(ptr)
    }

    /// Current linear memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    // ── Call settlement ──

    /// Settle a guest call against the fault slot and exception channel.
    ///
    /// Precedence: a recorded host fault wins (its typed error is what the
    /// import trapped for); otherwise a stored exception value is drained
    /// and reported as a module fault; otherwise a raw trap is reported
    /// with its own message. A normal return with the channel still armed
    /// is also a module fault: the guest signalled an error it never
    /// raised.
    fn finish_call<R>(&mut self, result: Result<R, anyhow::Error>) -> Result<R, BridgeError> {
        let fault = self.store.data_mut().take_fault();
        match result {
            Ok(value) => {
                if let Some(fault) = fault {
                    return Err(fault.into_error());
                }
                if let Some(handle) = self.store.data_mut().exn.take() {
                    let message = self.drain_exn(handle);
                    return Err(BridgeError::ModuleFault(format!(
                        "returned normally with pending exception: {}",
                        message
                    )));
                }
                Ok(value)
            }
            Err(trap) => {
                if let Some(fault) = fault {
                    // Any stored exception value is stale now; release it.
                    if let Some(handle) = self.store.data_mut().exn.take() {
                        let _ = self.store.data_mut().table.invalidate(handle);
                    }
                    return Err(fault.into_error());
                }
                if let Some(handle) = self.store.data_mut().exn.take() {
                    let message = self.drain_exn(handle);
                    return Err(BridgeError::ModuleFault(message));
                }
                Err(BridgeError::ModuleFault(trap.root_cause().to_string()))
            }
        }
    }

    /// Take the exception value out of the table and render it.
    fn drain_exn(&mut self, handle: Handle) -> String {
        match self.store.data_mut().table.invalidate(handle) {
            Ok(value) => value.describe(),
            Err(_) => "(exception value unavailable)".to_string(),
        }
    }

    /// An error out of the shared allocator helpers carries its typed
    /// fault in the store; prefer that over the opaque anyhow error.
    fn settle_host_err(&mut self, err: anyhow::Error) -> BridgeError {
        match self.store.data_mut().take_fault() {
            Some(fault) => fault.into_error(),
            None => BridgeError::Wasmtime(err),
        }
    }
}

/// Instantiate from a synchronously available image with a fresh engine.
pub fn init_sync(source: SyncSource, config: BridgeConfig) -> Result<Instance, BridgeError> {
    Bridge::new(config)?.init_sync(source)
}

/// Instantiate from an asynchronous image source with a fresh engine.
pub async fn init(source: ModuleSource, config: BridgeConfig) -> Result<Instance, BridgeError> {
    Bridge::new(config)?.init(source).await
}

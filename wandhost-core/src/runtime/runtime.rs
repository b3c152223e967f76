//! Wasmtime-backed runtime glue for wandhost-core.
//!
//! Responsibilities:
//! - Create a Wasmtime `Engine` with the feature flags guests are built against.
//! - Define host imports under module `"env"` matching the guest ABI.
//! - Instantiate a guest, grow its memory, run `state_init_` and check that it shared its
//!   regions.
//! - Expose the running instance to the frame loop as a [`Guest`].

use crate::abi::{self, GuestEntrypoints, validate::MissingExport};
use crate::bridge::SharedMemory;
use crate::config::RuntimeConfig;
use crate::driver::{Guest, GuestError};
use crate::host::HostServices;
use crate::loader::{self, LoadError};
use crate::state::HostState;

use thiserror::Error;
use wasmtime::{Engine, Linker, Module, Store};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("failed to set up the wasm runtime: {0:#}")]
    Runtime(anyhow::Error),
    #[error("failed to instantiate guest: {0:#}")]
    Instantiate(anyhow::Error),
    #[error("guest is missing required export {0:?}")]
    MissingExport(MissingExport),
    #[error("failed to grow guest memory by {pages} pages: {source:#}")]
    Grow {
        pages: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("guest initialization failed: {0}")]
    Init(#[source] GuestError),
    #[error("guest returned from `{}` without calling `{}`", abi::guest_exports::INIT, abi::host_imports::SHARE_MEMORY)]
    NotShared,
}

/// Host-side runtime container.
pub struct WasmtimeRuntime {
    pub engine: Engine,
    pub linker: Linker<HostState>,
}

impl WasmtimeRuntime {
    /// Create a new runtime with the host imports already defined.
    pub fn new() -> anyhow::Result<Self> {
        let mut cfg = wasmtime::Config::new();

        // Features the guest toolchains emit by default.
        cfg.wasm_multi_value(true);
        cfg.wasm_bulk_memory(true);
        cfg.wasm_reference_types(true);
        cfg.wasm_simd(true);
        cfg.wasm_relaxed_simd(true);
        cfg.wasm_tail_call(true);

        let engine = Engine::new(&cfg)?;
        let mut linker = Linker::new(&engine);
        super::imports::define_imports(&mut linker)?;

        Ok(Self { engine, linker })
    }

    pub fn compile(&self, guest_bytes: &[u8]) -> Result<Module, LoadError> {
        loader::compile_module(&self.engine, guest_bytes)
    }

    /// Instantiate `module`, grow its memory, and run its initializer.
    pub fn launch(
        &self,
        module: &Module,
        config: &RuntimeConfig,
        services: Box<dyn HostServices>,
    ) -> Result<WasmGuest, LaunchError> {
        let mut store = Store::new(&self.engine, HostState::new(services));
        store.limiter(|state| state);

        let instance = self
            .linker
            .instantiate(&mut store, module)
            .map_err(LaunchError::Instantiate)?;

        abi::validate::required_exports_present(&instance, &mut store)
            .map_err(LaunchError::MissingExport)?;
        let entry =
            GuestEntrypoints::resolve(&instance, &mut store).map_err(LaunchError::Instantiate)?;

        let pages = config.startup_grow_pages;
        if pages > 0 {
            entry
                .memory
                .grow(&mut store, u64::from(pages))
                .map_err(|source| LaunchError::Grow { pages, source })?;
        }

        entry
            .init
            .call(&mut store, ())
            .map_err(|err| LaunchError::Init(GuestError::from_trap(err)))?;

        if !store.data().bridge.is_shared() {
            return Err(LaunchError::NotShared);
        }
        log::info!(
            "guest initialized with {} bytes of linear memory",
            entry.memory.data_size(&store)
        );

        Ok(WasmGuest { store, entry })
    }
}

/// Load, instantiate and initialize a guest in one go.
pub fn launch(
    guest_bytes: &[u8],
    config: &RuntimeConfig,
    services: Box<dyn HostServices>,
) -> Result<WasmGuest, LaunchError> {
    let runtime = WasmtimeRuntime::new().map_err(LaunchError::Runtime)?;
    let module = runtime.compile(guest_bytes)?;
    runtime.launch(&module, config, services)
}

/// A running guest instance.
pub struct WasmGuest {
    store: Store<HostState>,
    entry: GuestEntrypoints,
}

impl WasmGuest {
    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    /// Current size of guest linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.entry.memory.data_size(&self.store)
    }
}

impl Guest for WasmGuest {
    fn step(&mut self, skip_draw: bool) -> Result<(), GuestError> {
        self.entry
            .step
            .call(&mut self.store, i32::from(skip_draw))
            .map_err(GuestError::from_trap)
    }

    fn synthesize_audio_chunk(&mut self) -> Result<(), GuestError> {
        self.entry
            .sound
            .call(&mut self.store, ())
            .map_err(GuestError::from_trap)
    }

    fn shared(&mut self) -> Result<SharedMemory<'_>, GuestError> {
        let (data, state) = self.entry.memory.data_and_store_mut(&mut self.store);
        Ok(SharedMemory::new(&mut state.bridge, data))
    }
}

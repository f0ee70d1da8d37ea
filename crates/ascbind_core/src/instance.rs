//! A live module instance and the runtime services it exports

use crate::config::BridgeConfig;
use crate::error::{BoundaryError, InstantiationError, Result};
use crate::heap::ModuleHeap;
use crate::imports::{self, HostHooks, HostState, ImportOverrides};
use crate::marshal::{Managed, Marshaller};
use crate::ptr::Ptr;
use wasmi::{Engine, Instance, Linker, Memory, Module, Store, TypedFunc, Val, WasmParams, WasmResults};

/// The module's store together with the runtime exports marshalling relies
/// on. Implements [`ModuleHeap`] for the live instance.
pub struct ModuleRuntime {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    new: TypedFunc<(i32, i32), i32>,
    pin: TypedFunc<i32, i32>,
    unpin: TypedFunc<i32, ()>,
    collect: Option<TypedFunc<(), ()>>,
    set_arguments_length: Option<TypedFunc<i32, ()>>,
}

impl ModuleRuntime {
    /// Turn a failed call into a [`BoundaryError`]. An abort recorded by the
    /// `abort` import takes precedence over the engine's own error.
    fn settle<R>(&mut self, export: &str, result: std::result::Result<R, wasmi::Error>) -> Result<R> {
        let trap = self.store.data_mut().take_trap();
        match (result, trap) {
            (Ok(value), _) => Ok(value),
            (Err(_), Some(trap)) => Err(BoundaryError::Trap(trap)),
            (Err(source), None) => Err(BoundaryError::Runtime {
                export: export.to_string(),
                source,
            }),
        }
    }

    /// Invoke export `name` with raw ABI values.
    pub fn call<P, R>(&mut self, name: &str, params: P) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = self
            .instance
            .get_func(&self.store, name)
            .ok_or_else(|| BoundaryError::MissingExport {
                name: name.to_string(),
            })?
            .typed::<P, R>(&self.store)
            .map_err(|source| BoundaryError::Runtime {
                export: name.to_string(),
                source,
            })?;
        let result = func.call(&mut self.store, params);
        self.settle(name, result)
    }

    /// Tell the module how many arguments the next call actually passes,
    /// for exports with optional trailing parameters.
    pub fn set_arguments_length(&mut self, argc: u32) -> Result<()> {
        let Some(func) = &self.set_arguments_length else {
            return Err(BoundaryError::MissingExport {
                name: "__setArgumentsLength".to_string(),
            });
        };
        let result = func.call(&mut self.store, argc as i32);
        self.settle("__setArgumentsLength", result)
    }

    /// Run a full collection. A no-op for modules built without `__collect`.
    pub fn collect(&mut self) -> Result<()> {
        let Some(collect) = &self.collect else {
            return Ok(());
        };
        let result = collect.call(&mut self.store, ());
        self.settle("__collect", result)
    }

    /// Value of an exported `i32` global.
    pub fn global_i32(&self, name: &str) -> Result<i32> {
        let global = self
            .instance
            .get_global(&self.store, name)
            .ok_or_else(|| BoundaryError::MissingExport {
                name: name.to_string(),
            })?;
        match global.get(&self.store) {
            Val::I32(value) => Ok(value),
            _ => Err(BoundaryError::MissingExport {
                name: format!("{name}: i32"),
            }),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.memory.data(&self.store).len()
    }
}

impl ModuleHeap for ModuleRuntime {
    fn alloc(&mut self, size: u32, class_id: u32) -> Result<Ptr> {
        let result = self.new.call(&mut self.store, (size as i32, class_id as i32));
        self.settle("__new", result).map(Ptr::from_abi)
    }

    fn pin(&mut self, ptr: Ptr) -> Result<Ptr> {
        let result = self.pin.call(&mut self.store, ptr.to_abi());
        self.settle("__pin", result).map(Ptr::from_abi)
    }

    fn unpin(&mut self, ptr: Ptr) -> Result<()> {
        let result = self.unpin.call(&mut self.store, ptr.to_abi());
        self.settle("__unpin", result)
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }
}

/// An instantiated module plus the marshalling state that belongs to it.
///
/// Every call crosses the boundary through `&mut self`; wrap it in a
/// [`SharedModule`](crate::SharedModule) to use it from several threads.
pub struct ModuleInstance {
    runtime: ModuleRuntime,
    marshaller: Marshaller,
    config: BridgeConfig,
}

impl ModuleInstance {
    /// Compile `binary`, link the host imports (defaults replaced by
    /// `overrides`) and run the module's start function.
    pub fn instantiate(
        binary: &[u8],
        overrides: ImportOverrides,
        config: BridgeConfig,
    ) -> std::result::Result<Self, InstantiationError> {
        config
            .validate()
            .map_err(|e| InstantiationError::Config(e.to_string()))?;

        let engine = Engine::default();
        let module =
            Module::new(&engine, binary).map_err(|e| InstantiationError::InvalidBinary(e.to_string()))?;

        let hooks = HostHooks::compose(overrides, &config);
        let mut store = Store::new(&engine, HostState::new(hooks, &config));
        let mut linker = <Linker<HostState>>::new(&engine);
        imports::define(&mut linker)?;

        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .map_err(|e| match store.data_mut().take_trap() {
                Some(trap) => InstantiationError::Start(trap.to_string()),
                None if e.as_trap_code().is_some() => InstantiationError::Start(e.to_string()),
                None => InstantiationError::Link(e.to_string()),
            })?;

        let memory = instance
            .get_memory(&store, "memory")
            .ok_or(InstantiationError::MissingMemory)?;
        let new = instance
            .get_typed_func::<(i32, i32), i32>(&store, "__new")
            .map_err(|_| InstantiationError::MissingRuntimeExport { name: "__new" })?;
        let pin = instance
            .get_typed_func::<i32, i32>(&store, "__pin")
            .map_err(|_| InstantiationError::MissingRuntimeExport { name: "__pin" })?;
        let unpin = instance
            .get_typed_func::<i32, ()>(&store, "__unpin")
            .map_err(|_| InstantiationError::MissingRuntimeExport { name: "__unpin" })?;
        let collect = instance.get_typed_func::<(), ()>(&store, "__collect").ok();
        let set_arguments_length = instance
            .get_typed_func::<i32, ()>(&store, "__setArgumentsLength")
            .ok();

        let runtime = ModuleRuntime {
            store,
            instance,
            memory,
            new,
            pin,
            unpin,
            collect,
            set_arguments_length,
        };
        let marshaller = Marshaller::new(runtime.memory(), config.lift_window_units);

        tracing::info!(
            module = %config.module_name,
            instance = %marshaller.instance(),
            memory_bytes = runtime.memory_size(),
            collect = runtime.collect.is_some(),
            "module instantiated"
        );

        Ok(Self {
            runtime,
            marshaller,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline]
    pub fn marshaller(&self) -> &Marshaller {
        &self.marshaller
    }

    #[inline]
    pub fn runtime(&self) -> &ModuleRuntime {
        &self.runtime
    }

    /// Both halves at once, for marshalling rules that need the marshaller
    /// and the heap together.
    #[inline]
    pub fn parts(&mut self) -> (&mut Marshaller, &mut ModuleRuntime) {
        (&mut self.marshaller, &mut self.runtime)
    }

    pub fn retain(&mut self, ptr: Ptr) -> Result<Ptr> {
        self.marshaller.retain(&mut self.runtime, ptr)
    }

    pub fn release(&mut self, ptr: Ptr) -> Result<()> {
        self.marshaller.release(&mut self.runtime, ptr)
    }

    pub fn lower_string(&mut self, value: Option<&str>) -> Result<Ptr> {
        self.marshaller.lower_string(&mut self.runtime, value)
    }

    pub fn lift_string(&mut self, ptr: Ptr) -> Result<Option<String>> {
        self.marshaller.lift_string(&self.runtime, ptr)
    }

    pub fn lower<T: Managed>(&mut self, value: Option<&T>) -> Result<Ptr> {
        self.marshaller.lower(&mut self.runtime, value)
    }

    pub fn lift<T: Managed>(&mut self, ptr: Ptr) -> Result<Option<T>> {
        self.marshaller.lift(&self.runtime, ptr)
    }

    pub fn collect(&mut self) -> Result<()> {
        self.runtime.collect()
    }

    pub fn global_i32(&self, name: &str) -> Result<i32> {
        self.runtime.global_i32(name)
    }

    /// Lift the managed object an exported pointer global refers to.
    pub fn lift_global<T: Managed>(&mut self, name: &str) -> Result<Option<T>> {
        let ptr = Ptr::from_abi(self.runtime.global_i32(name)?);
        self.lift(ptr)
    }

    /// Lift the array of managed objects an exported pointer global refers to.
    pub fn lift_global_array<T: Managed>(&mut self, name: &str) -> Result<Option<Vec<T>>> {
        let ptr = Ptr::from_abi(self.runtime.global_i32(name)?);
        self.marshaller.lift_managed_array(&self.runtime, ptr)
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module", &self.config.module_name)
            .field("instance", &self.marshaller.instance())
            .field("memory_bytes", &self.runtime.memory_size())
            .field("pinned", &self.marshaller.registrar().len())
            .finish()
    }
}

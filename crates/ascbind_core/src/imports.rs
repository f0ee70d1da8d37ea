//! Host services the module imports from `env`
//!
//! An AssemblyScript module expects four host functions: `abort`,
//! `console.log`, `Date.now` and `seed`. Each has a default; callers may
//! replace any of them through [`ImportOverrides`]. The set is composed once
//! per instance and frozen before linking.

use crate::config::{BridgeConfig, MODULE_LOG_TARGET};
use crate::error::{InstantiationError, ModuleTrap};
use crate::marshal::read_utf16;
use crate::ptr::Ptr;
use crate::view::MemoryView;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use wasmi::{Caller, Extern, Linker};

/// Decides what an abort does. Returning the trap aborts the call; returning
/// `Ok(())` lets the module continue.
pub type AbortHook = Arc<dyn Fn(ModuleTrap) -> Result<(), ModuleTrap> + Send + Sync>;
pub type LogHook = Arc<dyn Fn(&str) + Send + Sync>;
/// Milliseconds since the Unix epoch.
pub type ClockHook = Arc<dyn Fn() -> f64 + Send + Sync>;
pub type SeedHook = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Replacements for the default host imports. Unset slots keep the default.
#[derive(Clone, Default)]
pub struct ImportOverrides {
    abort: Option<AbortHook>,
    log: Option<LogHook>,
    now: Option<ClockHook>,
    seed: Option<SeedHook>,
}

impl ImportOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(mut self, hook: impl Fn(ModuleTrap) -> Result<(), ModuleTrap> + Send + Sync + 'static) -> Self {
        self.abort = Some(Arc::new(hook));
        self
    }

    pub fn log(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(hook));
        self
    }

    pub fn now(mut self, hook: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.now = Some(Arc::new(hook));
        self
    }

    pub fn seed(mut self, hook: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.seed = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ImportOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOverrides")
            .field("abort", &self.abort.is_some())
            .field("log", &self.log.is_some())
            .field("now", &self.now.is_some())
            .field("seed", &self.seed.is_some())
            .finish()
    }
}

/// The frozen import set of one instance.
#[derive(Clone)]
pub(crate) struct HostHooks {
    abort: AbortHook,
    log: LogHook,
    now: ClockHook,
    seed: SeedHook,
}

impl HostHooks {
    /// Overrides win over defaults, slot by slot.
    pub(crate) fn compose(overrides: ImportOverrides, config: &BridgeConfig) -> Self {
        let name = config.module_name.clone();
        let now = overrides.now.unwrap_or_else(|| Arc::new(wall_clock_ms));
        let seed = overrides.seed.unwrap_or_else(|| {
            let now = now.clone();
            Arc::new(move || now() * rand::random::<f64>())
        });
        Self {
            abort: overrides.abort.unwrap_or_else(|| Arc::new(raise)),
            log: overrides.log.unwrap_or_else(|| {
                Arc::new(move |text: &str| {
                    tracing::info!(target: MODULE_LOG_TARGET, module = %name, "{text}");
                })
            }),
            now,
            seed,
        }
    }
}

fn raise(trap: ModuleTrap) -> Result<(), ModuleTrap> {
    Err(trap)
}

fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as f64)
        .unwrap_or(0.0)
}

/// Store data of every instance.
pub(crate) struct HostState {
    hooks: HostHooks,
    window: usize,
    module_name: String,
    trap: Option<ModuleTrap>,
}

impl HostState {
    pub(crate) fn new(hooks: HostHooks, config: &BridgeConfig) -> Self {
        Self {
            hooks,
            window: config.lift_window_units,
            module_name: config.module_name.clone(),
            trap: None,
        }
    }

    /// The abort that ended the last call, if any.
    pub(crate) fn take_trap(&mut self) -> Option<ModuleTrap> {
        self.trap.take()
    }
}

/// Lift a string argument of a host call straight out of the caller's memory.
fn caller_string(caller: &Caller<'_, HostState>, ptr: i32) -> Result<Option<String>, wasmi::Error> {
    let ptr = Ptr::from_abi(ptr);
    if ptr.is_null() {
        return Ok(None);
    }
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmi::Error::new("module does not export `memory`"))?;
    let data = memory.data(caller);
    let units = read_utf16(&mut MemoryView::over(data), data, ptr, caller.data().window)
        .map_err(|e| wasmi::Error::new(e.to_string()))?;
    Ok(units.map(|units| String::from_utf16_lossy(&units)))
}

fn link_error(e: impl fmt::Display) -> InstantiationError {
    InstantiationError::Link(e.to_string())
}

/// Register the `env` imports on `linker`.
pub(crate) fn define(linker: &mut Linker<HostState>) -> Result<(), InstantiationError> {
    linker
        .func_wrap(
            "env",
            "abort",
            |mut caller: Caller<'_, HostState>,
             message: i32,
             file: i32,
             line: i32,
             column: i32|
             -> Result<(), wasmi::Error> {
                let trap = ModuleTrap {
                    message: caller_string(&caller, message)?,
                    file: caller_string(&caller, file)?,
                    line: line as u32,
                    column: column as u32,
                };
                let state = caller.data();
                tracing::error!(target: MODULE_LOG_TARGET, module = %state.module_name, %trap, "module aborted");
                let hook = state.hooks.abort.clone();
                match hook(trap) {
                    Ok(()) => Ok(()),
                    Err(trap) => {
                        let message = trap.to_string();
                        caller.data_mut().trap = Some(trap);
                        Err(wasmi::Error::new(message))
                    }
                }
            },
        )
        .map_err(link_error)?;

    linker
        .func_wrap(
            "env",
            "console.log",
            |caller: Caller<'_, HostState>, text: i32| -> Result<(), wasmi::Error> {
                let text = caller_string(&caller, text)?;
                (caller.data().hooks.log)(text.as_deref().unwrap_or("null"));
                Ok(())
            },
        )
        .map_err(link_error)?;

    linker
        .func_wrap("env", "Date.now", |caller: Caller<'_, HostState>| -> f64 {
            (caller.data().hooks.now)()
        })
        .map_err(link_error)?;

    linker
        .func_wrap("env", "seed", |caller: Caller<'_, HostState>| -> f64 {
            (caller.data().hooks.seed)()
        })
        .map_err(link_error)?;

    Ok(())
}

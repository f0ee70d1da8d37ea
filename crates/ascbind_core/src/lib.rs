//! ascbind core
//!
//! Host side of the boundary between Rust and an AssemblyScript module
//! running under wasmi:
//! - Instantiation with the `env` imports the module expects
//! - A self-healing view over the module's linear memory
//! - Lowering and lifting of strings, arrays, typed arrays and records
//! - Reference counted pinning of objects the host holds on to
//! - Scoped export calls that always release what they retained

pub mod config;
pub mod error;
pub mod heap;
pub mod marshal;
pub mod ptr;
pub mod registrar;
pub mod view;

mod exports;
mod imports;
mod instance;
mod shared;

pub use config::BridgeConfig;
pub use error::{BoundaryError, InstantiationError, ModuleTrap, Result};
pub use exports::{Arg, CallScope};
pub use heap::ModuleHeap;
pub use imports::{AbortHook, ClockHook, ImportOverrides, LogHook, SeedHook};
pub use instance::{ModuleInstance, ModuleRuntime};
pub use marshal::{FieldCodec, InstanceId, Internref, Managed, Marshaller, Record};
pub use ptr::Ptr;
pub use registrar::Registrar;
pub use shared::SharedModule;
pub use view::MemoryView;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

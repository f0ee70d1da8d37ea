use crate::ptr::Ptr;
use std::fmt;
use thiserror::Error;

/// Errors raised while building a module instance. Never retried.
#[derive(Debug, Error)]
pub enum InstantiationError {
    #[error("module binary is invalid: {0}")]
    InvalidBinary(String),

    #[error("failed to link module imports: {0}")]
    Link(String),

    #[error("module start function failed: {0}")]
    Start(String),

    #[error("module does not export its linear memory as `memory`")]
    MissingMemory,

    #[error("module does not export required runtime function `{name}`")]
    MissingRuntimeExport { name: &'static str },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Abort signalled by the module itself through its `abort` import.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ModuleTrap {
    pub message: Option<String>,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for ModuleTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {}:{}:{}",
            self.message.as_deref().unwrap_or("null"),
            self.file.as_deref().unwrap_or("null"),
            self.line,
            self.column
        )
    }
}

/// Everything that can go wrong at the marshalling boundary.
#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error(transparent)]
    Instantiation(#[from] InstantiationError),

    #[error("argument `{argument}` must not be null")]
    NullConstraint { argument: &'static str },

    #[error("opaque handle of class {found} from instance {origin} used where class {expected} of instance {instance} was expected")]
    TypeMismatch {
        expected: u32,
        found: u32,
        instance: u64,
        origin: u64,
    },

    #[error("invalid refcount '{count}' for reference '{ptr}'")]
    InvalidRefcount { ptr: Ptr, count: u32 },

    #[error("module trapped: {0}")]
    Trap(#[from] ModuleTrap),

    #[error("access of {len} bytes at {ptr} is outside module memory ({extent} bytes)")]
    OutOfBounds { ptr: Ptr, len: u32, extent: usize },

    #[error("module does not export `{name}`")]
    MissingExport { name: String },

    #[error("call to `{export}` failed: {source}")]
    Runtime {
        export: String,
        #[source]
        source: wasmi::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = BoundaryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_message_includes_location() {
        let trap = ModuleTrap {
            message: Some("assertion failed".into()),
            file: Some("assembly/index.ts".into()),
            line: 12,
            column: 5,
        };
        assert_eq!(trap.to_string(), "assertion failed in assembly/index.ts:12:5");
    }

    #[test]
    fn trap_message_renders_missing_strings_as_null() {
        let trap = ModuleTrap {
            message: None,
            file: None,
            line: 0,
            column: 0,
        };
        assert_eq!(trap.to_string(), "null in null:0:0");
    }
}

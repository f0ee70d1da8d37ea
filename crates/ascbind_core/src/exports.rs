//! Calling exports with marshalled arguments
//!
//! A call lowers its arguments, retains the ones a later allocation could
//! otherwise collect, invokes the export and lifts the result. Everything a
//! [`CallScope`] retained is released when the scope ends, whether the call
//! succeeded, failed or trapped, so the pinned set is the same before and
//! after every call.

use crate::error::{BoundaryError, Result};
use crate::instance::{ModuleInstance, ModuleRuntime};
use crate::marshal::{Managed, Marshaller};
use crate::ptr::Ptr;
use bytemuck::Pod;
use wasmi::{WasmParams, WasmResults};

/// A trailing parameter the module declares optional.
///
/// The module can't tell an omitted argument from an explicit null once both
/// are lowered to 0, so the caller states which one it meant and the count
/// sent through `__setArgumentsLength` follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<T> {
    /// Left out; the module applies its default.
    Omitted,
    /// Supplied as null.
    Null,
    Value(T),
}

impl<T> Arg<T> {
    /// Whether the argument counts towards the call's arity.
    pub fn is_supplied(&self) -> bool {
        !matches!(self, Arg::Omitted)
    }

    /// `1` when supplied, `0` when omitted.
    pub fn arity(&self) -> u32 {
        self.is_supplied() as u32
    }

    pub fn value(self) -> Option<T> {
        match self {
            Arg::Value(value) => Some(value),
            Arg::Omitted | Arg::Null => None,
        }
    }
}

impl<T> Default for Arg<T> {
    fn default() -> Self {
        Arg::Omitted
    }
}

/// A supplied argument: `None` is an explicit null.
impl<T> From<Option<T>> for Arg<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Null, Arg::Value)
    }
}

/// Marshalling state of one export call. Created by [`ModuleInstance::scoped`].
pub struct CallScope<'i> {
    instance: &'i mut ModuleInstance,
    retained: Vec<Ptr>,
}

impl<'i> CallScope<'i> {
    /// Pin `ptr` until the scope ends.
    pub fn retain(&mut self, ptr: Ptr) -> Result<Ptr> {
        let ptr = self.instance.retain(ptr)?;
        if !ptr.is_null() {
            self.retained.push(ptr);
        }
        Ok(ptr)
    }

    /// Lower a nullable string argument.
    pub fn string(&mut self, value: Option<&str>) -> Result<Ptr> {
        self.instance.lower_string(value)
    }

    /// Lower a required string argument. Null is rejected before anything is
    /// allocated.
    pub fn required_string(&mut self, argument: &'static str, value: Option<&str>) -> Result<Ptr> {
        let value = value.ok_or(BoundaryError::NullConstraint { argument })?;
        self.instance.lower_string(Some(value))
    }

    /// Lower a required string argument and keep it pinned for the call.
    pub fn retained_string(&mut self, argument: &'static str, value: Option<&str>) -> Result<Ptr> {
        let ptr = self.required_string(argument, value)?;
        self.retain(ptr)
    }

    pub fn managed<T: Managed>(&mut self, value: Option<&T>) -> Result<Ptr> {
        self.instance.lower(value)
    }

    pub fn required<T: Managed>(&mut self, argument: &'static str, value: Option<&T>) -> Result<Ptr> {
        let value = value.ok_or(BoundaryError::NullConstraint { argument })?;
        let ptr = self.instance.lower(Some(value))?;
        Marshaller::not_null(ptr, argument)
    }

    pub fn typed_array<T: Pod>(&mut self, values: Option<&[T]>, class_id: u32) -> Result<Ptr> {
        let (m, heap) = self.instance.parts();
        m.lower_typed_array(heap, values, class_id)
    }

    pub fn managed_array<T: Managed>(&mut self, values: Option<&[T]>, class_id: u32) -> Result<Ptr> {
        let (m, heap) = self.instance.parts();
        m.lower_managed_array(heap, values, class_id)
    }

    /// Invoke export `name` with every parameter passed.
    pub fn call<P, R>(&mut self, name: &str, params: P) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        tracing::trace!(export = name, "calling export");
        let (_, runtime) = self.instance.parts();
        runtime.call(name, params)
    }

    /// Invoke an export with optional trailing parameters, `argc` of which
    /// are actually supplied. The count is set immediately before the call.
    pub fn call_with_arity<P, R>(&mut self, name: &str, argc: u32, params: P) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        tracing::trace!(export = name, argc, "calling export");
        let (_, runtime) = self.instance.parts();
        runtime.set_arguments_length(argc)?;
        runtime.call(name, params)
    }

    pub fn lift_string(&mut self, ptr: Ptr) -> Result<Option<String>> {
        self.instance.lift_string(ptr)
    }

    pub fn lift<T: Managed>(&mut self, ptr: Ptr) -> Result<Option<T>> {
        self.instance.lift(ptr)
    }

    pub fn lift_typed_array<T: Pod>(&mut self, ptr: Ptr) -> Result<Option<Vec<T>>> {
        let (m, heap) = self.instance.parts();
        m.lift_typed_array(&*heap, ptr)
    }

    pub fn lift_managed_array<T: Managed>(&mut self, ptr: Ptr) -> Result<Option<Vec<T>>> {
        let (m, heap) = self.instance.parts();
        m.lift_managed_array(&*heap, ptr)
    }

    /// Marshaller and heap together, for rules the helpers above don't cover.
    pub fn parts(&mut self) -> (&mut Marshaller, &mut ModuleRuntime) {
        self.instance.parts()
    }

    /// Release everything retained, newest first. Every pointer is released
    /// even if an earlier one fails; the first failure is returned.
    fn release_all(&mut self) -> Result<()> {
        let mut first = None;
        for ptr in std::mem::take(&mut self.retained).into_iter().rev() {
            if let Err(e) = self.instance.release(ptr) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        // Only reached with pointers left when the call body unwound.
        if let Err(e) = self.release_all() {
            tracing::error!(error = %e, "failed to release arguments of an unwound call");
        }
    }
}

impl ModuleInstance {
    /// Run one marshalled call.
    ///
    /// `body` lowers arguments through the scope, calls the export and lifts
    /// the result. Retained arguments are released afterwards on every path.
    /// If the call failed and releasing then fails too, the release error is
    /// returned and the call error is logged. With `collect_after_call`,
    /// `__collect` runs on every path; its own failure is only returned when
    /// nothing failed before it.
    pub fn scoped<R>(&mut self, body: impl FnOnce(&mut CallScope<'_>) -> Result<R>) -> Result<R> {
        let collect = self.config().collect_after_call;
        let (outcome, released) = {
            let mut scope = CallScope {
                instance: self,
                retained: Vec::new(),
            };
            let outcome = body(&mut scope);
            (outcome, scope.release_all())
        };
        let result = match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release)) => Err(release),
            (Err(call), Ok(())) => Err(call),
            (Err(call), Err(release)) => {
                tracing::error!(error = %call, "call failed before its arguments could be released");
                Err(release)
            }
        };
        if !collect {
            return result;
        }
        match (result, self.collect()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(collect)) => Err(collect),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(collect)) => {
                tracing::error!(error = %collect, "collection after a failed call failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_and_null_differ_in_arity() {
        assert_eq!(Arg::<&str>::Omitted.arity(), 0);
        assert_eq!(Arg::<&str>::Null.arity(), 1);
        assert_eq!(Arg::Value("x").arity(), 1);
        assert_eq!(Arg::<&str>::default(), Arg::Omitted);
        assert_eq!(Arg::from(None::<&str>), Arg::Null);
        assert_eq!(Arg::from(Some("x")).value(), Some("x"));
        assert_eq!(Arg::<&str>::Null.value(), None);
    }

    #[test]
    fn instance_can_move_between_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<ModuleInstance>();
    }
}

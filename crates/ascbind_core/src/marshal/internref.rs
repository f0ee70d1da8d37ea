//! Opaque handles to module-owned objects

use super::Marshaller;
use crate::error::{BoundaryError, Result};
use crate::heap::{ModuleHeap, RT_ID_OFFSET};
use crate::ptr::Ptr;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Tag identifying the marshaller (and so the module instance) that
/// produced a handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        InstanceId(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A module object the host forwards but never decodes.
///
/// Only a [`Marshaller`] can produce one, by lifting a pointer; it records
/// the object's runtime class and the instance it came from. Passing it to a
/// different instance, or where another class is expected, is a
/// [`BoundaryError::TypeMismatch`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Internref {
    ptr: Ptr,
    class_id: u32,
    origin: InstanceId,
}

impl Internref {
    #[inline]
    pub fn ptr(&self) -> Ptr {
        self.ptr
    }

    #[inline]
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    #[inline]
    pub fn origin(&self) -> InstanceId {
        self.origin
    }
}

impl Marshaller {
    /// Forward a handle unchanged after checking where it came from.
    pub fn lower_internref(
        &self,
        handle: Option<&Internref>,
        expected_class: Option<u32>,
    ) -> Result<Ptr> {
        let Some(handle) = handle else {
            return Ok(Ptr::NULL);
        };
        let class_ok = expected_class.map_or(true, |class| class == handle.class_id);
        if handle.origin != self.instance || !class_ok {
            return Err(BoundaryError::TypeMismatch {
                expected: expected_class.unwrap_or(handle.class_id),
                found: handle.class_id,
                instance: self.instance.get(),
                origin: handle.origin.get(),
            });
        }
        Ok(handle.ptr)
    }

    pub fn lift_internref<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &H,
        ptr: Ptr,
    ) -> Result<Option<Internref>> {
        ptr.non_null()
            .map(|ptr| self.read_handle(heap, ptr))
            .transpose()
    }

    /// Wrap a non-null pointer, reading its class from the object header.
    pub(crate) fn read_handle<H: ModuleHeap + ?Sized>(&mut self, heap: &H, ptr: Ptr) -> Result<Internref> {
        let class_id = self.get_u32(heap, ptr.sub(RT_ID_OFFSET))?;
        Ok(Internref {
            ptr,
            class_id,
            origin: self.instance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::mock::MockHeap;

    #[test]
    fn handle_passes_through_unchanged() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let raw = heap.alloc(16, 77).unwrap();
        let handle = m.lift_internref(&heap, raw).unwrap().unwrap();
        assert_eq!(handle.class_id(), 77);
        assert_eq!(m.lower_internref(Some(&handle), Some(77)).unwrap(), raw);
        assert_eq!(m.lower_internref(Some(&handle), None).unwrap(), raw);
        assert_eq!(m.lower_internref(None, Some(77)).unwrap(), Ptr::NULL);
    }

    #[test]
    fn handle_from_another_instance_is_rejected() {
        let mut heap = MockHeap::new();
        let mut ours = Marshaller::new(&heap.memory, 1024);
        let theirs = Marshaller::new(&heap.memory, 1024);
        let raw = heap.alloc(16, 77).unwrap();
        let handle = ours.lift_internref(&heap, raw).unwrap().unwrap();
        assert!(matches!(
            theirs.lower_internref(Some(&handle), None),
            Err(BoundaryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn handle_of_the_wrong_class_is_rejected() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let raw = heap.alloc(16, 77).unwrap();
        let handle = m.lift_internref(&heap, raw).unwrap().unwrap();
        let err = m.lower_internref(Some(&handle), Some(78)).unwrap_err();
        assert!(matches!(
            err,
            BoundaryError::TypeMismatch { expected: 78, found: 77, .. }
        ));
    }

    #[test]
    fn null_lifts_to_none() {
        let heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        assert_eq!(m.lift_internref(&heap, Ptr::NULL).unwrap(), None);
    }
}

//! Lowering host values into module memory and lifting them back out
//!
//! Every rule is a method on [`Marshaller`], generic over the
//! [`ModuleHeap`] it allocates from. Lowering returns the module pointer of
//! the new object (null for `None`); lifting takes a pointer and returns a
//! host-owned value (`None` for null).
//!
//! Layout conventions follow the AssemblyScript runtime:
//!
//! | object        | payload                                               |
//! |---------------|-------------------------------------------------------|
//! | `String`      | UTF-16 code units, byte length at `ptr - 4`           |
//! | typed array   | `{ buffer, dataStart, byteLength }`                   |
//! | `Array<T>`    | `{ buffer, dataStart, byteLength, length }`           |
//! | class record  | fields at fixed offsets, exact declared size          |

mod array;
mod internref;
mod record;
mod string;
mod typed_array;

pub use internref::{InstanceId, Internref};
pub use record::{FieldCodec, Managed, Record};
#[doc(hidden)]
pub use record::opaque_mismatch;
pub(crate) use string::read_utf16;

use crate::error::{BoundaryError, Result};
use crate::heap::ModuleHeap;
use crate::ptr::Ptr;
use crate::registrar::Registrar;
use crate::view::MemoryView;

/// Per-instance marshalling state: the cached memory view, the pinned set
/// and the tag stamped on every opaque handle this instance hands out.
#[derive(Debug)]
pub struct Marshaller {
    view: MemoryView,
    registrar: Registrar,
    window: usize,
    instance: InstanceId,
}

impl Marshaller {
    pub fn new(memory: &[u8], window: usize) -> Self {
        Self {
            view: MemoryView::over(memory),
            registrar: Registrar::new(),
            window: window.max(1),
            instance: InstanceId::next(),
        }
    }

    #[inline]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    #[inline]
    pub fn view(&self) -> &MemoryView {
        &self.view
    }

    #[inline]
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    pub fn retain<H: ModuleHeap + ?Sized>(&mut self, heap: &mut H, ptr: Ptr) -> Result<Ptr> {
        self.registrar.retain(heap, ptr)
    }

    pub fn release<H: ModuleHeap + ?Sized>(&mut self, heap: &mut H, ptr: Ptr) -> Result<()> {
        self.registrar.release(heap, ptr)
    }

    /// Reject null for a slot that does not accept it.
    pub fn not_null(ptr: Ptr, argument: &'static str) -> Result<Ptr> {
        if ptr.is_null() {
            Err(BoundaryError::NullConstraint { argument })
        } else {
            Ok(ptr)
        }
    }

    pub fn get_u32<H: ModuleHeap + ?Sized>(&mut self, heap: &H, ptr: Ptr) -> Result<u32> {
        self.view.read_u32(heap.memory(), ptr)
    }

    pub fn set_u32<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        ptr: Ptr,
        value: u32,
    ) -> Result<()> {
        self.view.write_u32(heap.memory_mut(), ptr, value)
    }

    pub fn get_ptr<H: ModuleHeap + ?Sized>(&mut self, heap: &H, ptr: Ptr) -> Result<Ptr> {
        self.get_u32(heap, ptr).map(Ptr::new)
    }

    pub fn set_ptr<H: ModuleHeap + ?Sized>(&mut self, heap: &mut H, at: Ptr, ptr: Ptr) -> Result<()> {
        self.set_u32(heap, at, ptr.addr())
    }

    pub fn get_bytes<H: ModuleHeap + ?Sized>(&mut self, heap: &H, ptr: Ptr, len: u32) -> Result<Vec<u8>> {
        self.view.read_bytes(heap.memory(), ptr, len).map(<[u8]>::to_vec)
    }

    pub fn set_bytes<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        ptr: Ptr,
        bytes: &[u8],
    ) -> Result<()> {
        self.view.write_bytes(heap.memory_mut(), ptr, bytes)
    }

    /// Keep `ptr` pinned while `write` runs, unpinning on every exit path.
    ///
    /// Used for multi-step writes where a nested allocation could otherwise
    /// collect the object being filled in.
    pub(crate) fn with_pinned<H, R>(
        &mut self,
        heap: &mut H,
        ptr: Ptr,
        write: impl FnOnce(&mut Self, &mut H) -> Result<R>,
    ) -> Result<R>
    where
        H: ModuleHeap + ?Sized,
    {
        let ptr = heap.pin(ptr)?;
        let written = write(self, heap);
        let unpinned = heap.unpin(ptr);
        let value = written?;
        unpinned?;
        Ok(value)
    }
}

/// Byte size of `count` elements of `1 << align` bytes, if it fits a u32.
pub(crate) fn scaled_len(count: usize, align: u32, ptr_hint: Ptr) -> Result<u32> {
    u32::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(1u32 << align))
        .ok_or(BoundaryError::OutOfBounds {
            ptr: ptr_hint,
            len: u32::MAX,
            extent: u32::MAX as usize,
        })
}
